//! Redis key-space model for a single named queue.
//!
//! Every key for queue `Q` is generated from a `{queue}`-style hash tag so
//! that all of one queue's keys land on the same Redis Cluster slot.

/// Global registry of every queue name ever produced to, so the external
/// monitor can enumerate queues without scanning the keyspace.
pub const QUEUES_REGISTRY: &str = "queues";

/// Key accessors for one queue, keyed by its logical name.
#[derive(Clone, Debug)]
pub struct QueueKeys {
    name: String,
}

impl QueueKeys {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Q.pending` -- FIFO list of records awaiting first dispatch or re-dispatch.
    pub fn pending(&self) -> String {
        format!("{{{}}}.pending", self.name)
    }

    /// `Q.inflight.<consumerId>` -- the records a single consumer currently owns.
    pub fn inflight(&self, consumer_id: &str) -> String {
        format!("{{{}}}.inflight.{}", self.name, consumer_id)
    }

    /// `Q.dlq` -- dead-lettered records, read-only to consumers.
    pub fn dlq(&self) -> String {
        format!("{{{}}}.dlq", self.name)
    }

    /// `Q.consumers` -- set of every consumer id known to this queue.
    pub fn consumers(&self) -> String {
        format!("{{{}}}.consumers", self.name)
    }

    /// `Q.alive.<consumerId>` -- liveness token with an expiry.
    pub fn alive(&self, consumer_id: &str) -> String {
        format!("{{{}}}.alive.{}", self.name, consumer_id)
    }

    /// `Q.gc.lock` -- holds the id of the current GC leader.
    pub fn gc_lock(&self) -> String {
        format!("{{{}}}.gc.lock", self.name)
    }

    /// `Q.stats.<suffix>` -- counters and timestamps; advisory only.
    pub fn stats(&self, suffix: &str) -> String {
        format!("{{{}}}.stats.{}", self.name, suffix)
    }
}
