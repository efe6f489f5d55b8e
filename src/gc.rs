use chrono::Utc;
use redis::aio::ConnectionManager;

use crate::error::Result;
use crate::keys::QueueKeys;
use crate::scripts::BrokerScripts;

/// Reclaims in-flight messages abandoned by dead consumers and enforces
/// the per-queue GC-leader election described in the design's §4.6.
///
/// At most one consumer per queue acts as GC leader at a time; the
/// leadership is a lease with an expiry of roughly `2 x tick`, so a
/// leader that stops renewing it (because its process died) is
/// automatically superseded within one missed tick plus slack. GC work
/// is idempotent -- reclaiming the same dead consumer twice converges
/// to the same final state -- so races around leadership handoff are
/// harmless.
#[derive(Clone)]
pub struct GarbageCollector {
    conn: ConnectionManager,
    scripts: BrokerScripts,
    keys: QueueKeys,
    retry_threshold: u32,
    lease_ttl_ms: u64,
}

/// What happened to one drained record, for stats bookkeeping by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Requeued,
    DeadLettered,
    Expired,
}

impl GarbageCollector {
    pub fn new(
        conn: ConnectionManager,
        queue_name: impl Into<String>,
        retry_threshold: u32,
        tick: std::time::Duration,
    ) -> Self {
        Self {
            conn,
            scripts: BrokerScripts::default(),
            keys: QueueKeys::new(queue_name),
            retry_threshold,
            lease_ttl_ms: (tick.as_millis() as u64 * 2).max(1),
        }
    }

    /// Attempt to become (or remain) the GC leader for this tick. Returns
    /// `false` when another consumer currently holds the lease.
    pub async fn acquire_lease(&self, consumer_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: i32 = self
            .scripts
            .gc_lease
            .key(self.keys.gc_lock())
            .arg(consumer_id)
            .arg(self.lease_ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    /// Release the lease unconditionally, used on graceful leader shutdown.
    pub async fn release_lease(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.keys.gc_lock())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Run one GC tick: reclaim in-flight records belonging to consumers
    /// whose liveness token has lapsed, then sweep expired pending
    /// records. Returns the list of reclaim outcomes, for the caller to
    /// fold into statistics.
    pub async fn tick(&self) -> Result<Vec<ReclaimOutcome>> {
        let mut conn = self.conn.clone();
        let mut outcomes = Vec::new();

        let consumer_ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys.consumers())
            .query_async(&mut conn)
            .await?;

        for cid in consumer_ids {
            let alive: bool = redis::cmd("EXISTS")
                .arg(self.keys.alive(&cid))
                .query_async(&mut conn)
                .await?;
            if alive {
                continue;
            }
            outcomes.extend(self.drain_consumer(&cid).await?);
            let _: () = redis::cmd("SREM")
                .arg(self.keys.consumers())
                .arg(&cid)
                .query_async(&mut conn)
                .await?;
        }

        let swept: i64 = self
            .scripts
            .sweep_expired
            .key(self.keys.pending())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        outcomes.extend(std::iter::repeat(ReclaimOutcome::Expired).take(swept.max(0) as usize));

        Ok(outcomes)
    }

    /// Drain every record in a presumed-dead consumer's in-flight list,
    /// applying the same retry/dead-letter/expire policy a live failure
    /// would. Each record's pop-and-decide step is one atomic script
    /// invocation (`gc_drain_one.lua`), so a crash mid-drain never loses
    /// or duplicates a record already popped.
    async fn drain_consumer(&self, cid: &str) -> Result<Vec<ReclaimOutcome>> {
        let mut conn = self.conn.clone();
        let inflight = self.keys.inflight(cid);
        let mut outcomes = Vec::new();

        loop {
            let (outcome, _record): (String, String) = self
                .scripts
                .gc_drain_one
                .key(&inflight)
                .key(self.keys.pending())
                .key(self.keys.dlq())
                .arg(Utc::now().timestamp_millis())
                .arg(self.retry_threshold)
                .invoke_async(&mut conn)
                .await?;

            match outcome.as_str() {
                "empty" => break,
                "dropped" => outcomes.push(ReclaimOutcome::DeadLettered),
                "expired" => outcomes.push(ReclaimOutcome::Expired),
                "requeued" => outcomes.push(ReclaimOutcome::Requeued),
                "deadlettered" => outcomes.push(ReclaimOutcome::DeadLettered),
                other => {
                    log::warn!("gc_drain_one returned unexpected outcome {other:?}");
                }
            }
        }

        Ok(outcomes)
    }
}
