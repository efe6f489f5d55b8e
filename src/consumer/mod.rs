pub mod handler;
pub mod watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use handler::{FnHandler, Handler, HandlerResult};

use crate::error::{BrokerError, Result};
use crate::gc::GarbageCollector;
use crate::keys::QueueKeys;
use crate::record::MessageRecord;
use crate::scripts::BrokerScripts;
use crate::stats::{StatsCounters, StatsEmitter};

/// Configuration recognized by a consumer, matching the external
/// interface's `{ messageConsumeTimeout, messageTTL, messageRetryThreshold }`
/// plus the internal scheduling knobs for heartbeat/GC/stats ticks.
#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    /// `0`/`None` disables the processing-timeout watchdog.
    pub message_consume_timeout: Option<Duration>,
    /// Default TTL applied, at dispatch time only, to records that were
    /// published with no TTL of their own. Never mutates the stored
    /// record -- see the design notes' resolution of the TTL-default
    /// open question.
    pub message_ttl: Option<Duration>,
    /// Maximum `attempts` at which a record is still eligible for
    /// re-queue; default 3.
    pub message_retry_threshold: u32,
    /// How often the liveness token is refreshed.
    pub heartbeat_interval: Duration,
    /// How often this consumer attempts the GC lease and, if held, runs
    /// one collection pass.
    pub gc_tick_interval: Duration,
    /// How often counters are published for the monitor.
    pub stats_interval: Duration,
    /// Blocking-pull timeout; short enough that shutdown stays responsive.
    pub pull_timeout: Duration,
    /// Bounded wait for an in-progress handler during graceful shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            message_consume_timeout: None,
            message_ttl: None,
            message_retry_threshold: 3,
            heartbeat_interval: Duration::from_secs(1),
            gc_tick_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(1),
            pull_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The consumer's externally observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Initializing,
    Running,
    Processing,
    ShuttingDown,
    Stopped,
}

/// A single logical worker bound to one queue.
///
/// Owns two independent Redis connections, per the concurrency model:
/// one dedicated to the blocking pending-to-in-flight move, one for
/// everything else (heartbeat, stats, ack/retry/dead-letter, GC),
/// because a blocking command monopolizes the connection it runs on.
pub struct Consumer<T, H> {
    id: String,
    queue_name: String,
    keys: QueueKeys,
    conn_blocking: ConnectionManager,
    conn_control: ConnectionManager,
    scripts: BrokerScripts,
    options: ConsumerOptions,
    handler: Arc<H>,
    gc: GarbageCollector,
    counters: Arc<StatsCounters>,
    state: Arc<std::sync::Mutex<ConsumerState>>,
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    _marker: std::marker::PhantomData<T>,
}

impl<T, H> Consumer<T, H>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    H: Handler<T>,
{
    /// Build a consumer from two already-open connections (use
    /// [`crate::connect`] twice to obtain them) and a handler.
    pub fn new(
        conn_blocking: ConnectionManager,
        conn_control: ConnectionManager,
        queue_name: impl Into<String>,
        options: ConsumerOptions,
        handler: H,
    ) -> Self {
        let queue_name = queue_name.into();
        let id = Uuid::new_v4().to_string();
        let gc = GarbageCollector::new(
            conn_control.clone(),
            queue_name.clone(),
            options.message_retry_threshold,
            options.gc_tick_interval,
        );
        Self {
            id,
            keys: QueueKeys::new(&queue_name),
            queue_name,
            conn_blocking,
            conn_control,
            scripts: BrokerScripts::default(),
            options,
            handler: Arc::new(handler),
            gc,
            counters: Arc::new(StatsCounters::default()),
            state: Arc::new(std::sync::Mutex::new(ConsumerState::Initializing)),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock().expect("consumer state lock poisoned")
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.lock().expect("consumer state lock poisoned") = state;
    }

    /// Register this consumer and start its control loop, returning a
    /// handle used to request graceful shutdown. The loop itself (pull,
    /// dispatch, heartbeat, GC attempt, stats) runs on a spawned task so
    /// the caller is free to await other work.
    pub async fn run(mut self) -> Result<ConsumerHandle> {
        self.register().await?;
        self.set_state(ConsumerState::Running);

        let alive_key = self.keys.alive(&self.id);
        let gc_lock_owner_check = self.gc.clone();
        let conn_control = self.conn_control.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let shutdown_requested = self.shutdown_requested.clone();
        let id = self.id.clone();
        let grace = self.options.shutdown_grace;

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.conn_control.clone(),
            self.scripts.clone(),
            self.keys.clone(),
            self.id.clone(),
            self.options.heartbeat_interval,
            self.shutdown_requested.clone(),
            self.shutdown_notify.clone(),
        ));

        let gc_task = tokio::spawn(gc_loop(
            self.gc.clone(),
            self.id.clone(),
            self.options.gc_tick_interval,
            self.shutdown_requested.clone(),
        ));

        let stats = StatsEmitter::new(
            self.conn_control.clone(),
            &self.queue_name,
            &self.id,
            self.options.stats_interval,
        );
        let stats_task = tokio::spawn(stats.run(self.counters.clone()));

        let loop_task = tokio::spawn(async move {
            self.pull_loop().await;
            self.set_state(ConsumerState::ShuttingDown);
            heartbeat.abort();
            gc_task.abort();
            stats_task.abort();
            let delete_result: redis::RedisResult<()> = redis::cmd("DEL")
                .arg(&alive_key)
                .query_async(&mut conn_control.clone())
                .await;
            if let Err(e) = delete_result {
                log::warn!("failed to delete liveness token during shutdown: {e}");
            }
            let _ = gc_lock_owner_check.release_lease().await;
            self.set_state(ConsumerState::Stopped);
        });

        Ok(ConsumerHandle {
            id,
            loop_task: Some(loop_task),
            shutdown_requested,
            shutdown_notify,
            grace,
        })
    }

    async fn register(&mut self) -> Result<()> {
        let expiry_ms = (self.options.heartbeat_interval.as_millis() as u64 * 3).max(1);
        let _: i64 = self
            .scripts
            .heartbeat
            .key(self.keys.consumers())
            .key(self.keys.alive(&self.id))
            .arg(&self.id)
            .arg(expiry_ms)
            .invoke_async(&mut self.conn_control)
            .await?;
        log::info!("consumer {} registered on queue {}", self.id, self.queue_name);
        Ok(())
    }

    async fn pull_loop(&mut self) {
        loop {
            if self.shutdown_requested.load(Ordering::Relaxed) {
                break;
            }

            let shutdown_notify = self.shutdown_notify.clone();
            let popped = tokio::select! {
                _ = shutdown_notify.notified() => Ok(None),
                res = self.pull_one() => res,
            };

            let raw = match popped {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("pull failed for consumer {}: {e}", self.id);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            };

            if let Err(e) = self.dispatch(raw).await {
                log::warn!("dispatch failed for consumer {}: {e}", self.id);
            }
        }
    }

    async fn pull_one(&mut self) -> Result<Option<String>> {
        let pending = self.keys.pending();
        let inflight = self.keys.inflight(&self.id);
        let timeout_secs = self.options.pull_timeout.as_secs_f64().max(0.01);
        let popped: Option<String> = redis::cmd("BLMOVE")
            .arg(&pending)
            .arg(&inflight)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout_secs)
            .query_async(&mut self.conn_blocking)
            .await?;
        Ok(popped)
    }

    async fn dispatch(&mut self, raw: String) -> Result<()> {
        let record: MessageRecord<T> = match MessageRecord::decode(&raw) {
            Ok(r) => r,
            Err(_) => {
                // SerializationError: move straight to DLQ, never retried.
                let _: i64 = self
                    .scripts
                    .ack
                    .key(self.keys.inflight(&self.id))
                    .arg(&raw)
                    .invoke_async(&mut self.conn_control)
                    .await?;
                let _: () = redis::cmd("RPUSH")
                    .arg(self.keys.dlq())
                    .arg(&raw)
                    .query_async(&mut self.conn_control)
                    .await?;
                return Ok(());
            }
        };

        let now = Utc::now().timestamp_millis();
        let effective_ttl = if record.ttl > 0 {
            record.ttl
        } else {
            self.options.message_ttl.map(|d| d.as_millis() as u64).unwrap_or(0)
        };

        if effective_ttl > 0 && now.saturating_sub(record.created_at) > effective_ttl as i64 {
            let _: i64 = self
                .scripts
                .ack
                .key(self.keys.inflight(&self.id))
                .arg(&raw)
                .invoke_async(&mut self.conn_control)
                .await?;
            self.counters.record_expired();
            return Ok(());
        }

        self.set_state(ConsumerState::Processing);
        let started = std::time::Instant::now();
        let outcome = watchdog::run(
            self.options.message_consume_timeout,
            self.handler.handle(record.payload.clone()),
        )
        .await;
        self.counters.record_processing_time(started.elapsed());
        self.set_state(ConsumerState::Running);

        match outcome {
            Ok(()) => {
                let _: i64 = self
                    .scripts
                    .ack
                    .key(self.keys.inflight(&self.id))
                    .arg(&raw)
                    .invoke_async(&mut self.conn_control)
                    .await?;
                self.counters.record_ack();
                Ok(())
            }
            Err(BrokerError::Handler(_)) | Err(BrokerError::Timeout) => {
                self.counters.record_unack();
                self.retry_or_dead_letter(raw, record).await
            }
            Err(other) => Err(other),
        }
    }

    /// Apply the retry/dead-letter/expire policy to a record whose
    /// handler just failed (or whose watchdog fired). TTL expiry takes
    /// priority over the retry threshold: a record whose TTL has
    /// elapsed is discarded outright, never dead-lettered, per the
    /// error taxonomy's `ExpiredError` ("deleted, not DLQ'd").
    async fn retry_or_dead_letter(&mut self, old_raw: String, mut record: MessageRecord<T>) -> Result<()> {
        record.attempts += 1;
        let now = Utc::now().timestamp_millis();
        let effective_ttl = if record.ttl > 0 {
            record.ttl
        } else {
            self.options.message_ttl.map(|d| d.as_millis() as u64).unwrap_or(0)
        };
        let expired = effective_ttl > 0 && now.saturating_sub(record.created_at) > effective_ttl as i64;

        if expired {
            let _: i64 = self
                .scripts
                .ack
                .key(self.keys.inflight(&self.id))
                .arg(&old_raw)
                .invoke_async(&mut self.conn_control)
                .await?;
            self.counters.record_expired();
        } else if record.attempts >= self.options.message_retry_threshold {
            let new_raw = record.encode()?;
            let _: i64 = self
                .scripts
                .dead_letter
                .key(self.keys.inflight(&self.id))
                .key(self.keys.dlq())
                .arg(&old_raw)
                .arg(&new_raw)
                .invoke_async(&mut self.conn_control)
                .await?;
        } else {
            let new_raw = record.encode()?;
            let _: i64 = self
                .scripts
                .requeue
                .key(self.keys.inflight(&self.id))
                .key(self.keys.pending())
                .arg(&old_raw)
                .arg(&new_raw)
                .invoke_async(&mut self.conn_control)
                .await?;
        }
        Ok(())
    }
}

async fn heartbeat_loop(
    mut conn: ConnectionManager,
    scripts: BrokerScripts,
    keys: QueueKeys,
    id: String,
    interval: Duration,
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    let expiry_ms = (interval.as_millis() as u64 * 3).max(1);
    loop {
        ticker.tick().await;
        if shutdown_requested.load(Ordering::Relaxed) {
            break;
        }
        let result: redis::RedisResult<i64> = scripts
            .heartbeat
            .key(keys.consumers())
            .key(keys.alive(&id))
            .arg(&id)
            .arg(expiry_ms)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(1) => {}
            Ok(_) => {
                // Our own liveness token had already expired: this
                // consumer is a zombie by the GC's definition and must
                // not continue touching its in-flight list.
                log::error!(
                    "consumer {id} observed its own liveness token expired; shutting down as a zombie"
                );
                shutdown_requested.store(true, Ordering::Relaxed);
                shutdown_notify.notify_waiters();
                break;
            }
            Err(e) => log::warn!("heartbeat refresh failed for consumer {id}: {e}"),
        }
    }
}

async fn gc_loop(
    gc: GarbageCollector,
    id: String,
    interval: Duration,
    shutdown_requested: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if shutdown_requested.load(Ordering::Relaxed) {
            break;
        }
        match gc.acquire_lease(&id).await {
            Ok(true) => match gc.tick().await {
                Ok(outcomes) if !outcomes.is_empty() => {
                    log::debug!("gc leader {id} reclaimed {} records", outcomes.len());
                }
                Ok(_) => {}
                Err(e) => log::warn!("gc tick failed for leader {id}: {e}"),
            },
            Ok(false) => {}
            Err(e) => log::warn!("gc lease attempt failed for {id}: {e}"),
        }
    }
}

/// Handle returned by [`Consumer::run`]; the only way to request a
/// graceful stop.
pub struct ConsumerHandle {
    id: String,
    loop_task: Option<JoinHandle<()>>,
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    grace: Duration,
}

impl ConsumerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop accepting new pulls and wait up to the configured grace
    /// period for the in-progress handler (if any) and the control
    /// loop's cleanup (liveness-token deletion, GC-lease release) to
    /// finish. Records still in this consumer's in-flight list at this
    /// point are reclaimed by the next GC pass, per the crash-recovery
    /// protocol -- a graceful shutdown that outruns its grace period
    /// degrades to exactly that path.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown_requested.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
        if let Some(task) = self.loop_task.take() {
            if tokio::time::timeout(self.grace, task).await.is_err() {
                log::warn!(
                    "consumer {} did not stop within its shutdown grace period",
                    self.id
                );
            }
        }
        Ok(())
    }
}
