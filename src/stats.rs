use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::keys::QueueKeys;

/// In-memory counters a consumer updates as it processes messages.
/// Cheap, lock-free, read by the [`StatsEmitter`] on its own schedule so
/// the hot dispatch path never blocks on a Redis round trip.
#[derive(Default)]
pub struct StatsCounters {
    acks: AtomicU64,
    unacks: AtomicU64,
    expired: AtomicU64,
    processing_ms_sum: AtomicU64,
    processing_count: AtomicU64,
}

impl StatsCounters {
    pub fn record_ack(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unack(&self) {
        self.unacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, elapsed: Duration) {
        self.processing_ms_sum
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.processing_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> [(&'static str, u64); 5] {
        [
            ("acks", self.acks.load(Ordering::Relaxed)),
            ("unacks", self.unacks.load(Ordering::Relaxed)),
            ("expired", self.expired.load(Ordering::Relaxed)),
            (
                "processing_ms_sum",
                self.processing_ms_sum.load(Ordering::Relaxed),
            ),
            (
                "processing_count",
                self.processing_count.load(Ordering::Relaxed),
            ),
        ]
    }
}

/// Periodically publishes a consumer's counters to Redis for the
/// external monitor to read. This path is advisory: any failure here is
/// logged and swallowed, never surfaced to the pull loop or the handler.
pub struct StatsEmitter {
    conn: ConnectionManager,
    key: String,
    interval: Duration,
}

impl StatsEmitter {
    pub fn new(
        conn: ConnectionManager,
        queue_name: &str,
        consumer_id: &str,
        interval: Duration,
    ) -> Self {
        let keys = QueueKeys::new(queue_name);
        Self {
            conn,
            key: keys.stats(consumer_id),
            interval,
        }
    }

    /// Run the emit loop until cancelled. Intended to be spawned as its
    /// own task, independent of the pull loop, per the concurrency model.
    pub async fn run(mut self, counters: Arc<StatsCounters>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.flush(&counters).await {
                log::warn!("failed to publish stats for {}: {e}", self.key);
            }
        }
    }

    async fn flush(&mut self, counters: &StatsCounters) -> redis::RedisResult<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(&self.key);
        for (field, value) in counters.snapshot() {
            cmd.arg(field).arg(value);
        }
        cmd.query_async(&mut self.conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = StatsCounters::default();
        counters.record_ack();
        counters.record_ack();
        counters.record_unack();
        counters.record_expired();
        counters.record_processing_time(Duration::from_millis(42));

        let snapshot = counters.snapshot();
        let as_map: std::collections::HashMap<_, _> = snapshot.into_iter().collect();
        assert_eq!(as_map["acks"], 2);
        assert_eq!(as_map["unacks"], 1);
        assert_eq!(as_map["expired"], 1);
        assert_eq!(as_map["processing_ms_sum"], 42);
        assert_eq!(as_map["processing_count"], 1);
    }
}
