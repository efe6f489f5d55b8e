use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::Serialize;

use crate::error::Result;
use crate::keys::{QueueKeys, QUEUES_REGISTRY};
use crate::record::MessageRecord;
use crate::scripts::BrokerScripts;

/// Publishes payloads to a named queue's pending list.
///
/// Stateless beyond its open Redis connection: any number of producers,
/// on any number of hosts, may target the same queue concurrently. Every
/// publish builds a fresh record with a new `uuid`, `createdAt = now`
/// and `attempts = 0`, then appends it to `Q.pending` and registers the
/// queue name in the global registry, both in one round trip.
#[derive(Clone)]
pub struct Producer<T> {
    conn: ConnectionManager,
    scripts: BrokerScripts,
    keys: QueueKeys,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize> Producer<T> {
    pub fn new(conn: ConnectionManager, queue_name: impl Into<String>) -> Self {
        Self {
            conn,
            scripts: BrokerScripts::default(),
            keys: QueueKeys::new(queue_name),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn queue_name(&self) -> &str {
        self.keys.name()
    }

    /// Publish `payload` with no TTL.
    pub async fn produce(&self, payload: T) -> Result<uuid::Uuid> {
        self.produce_with_ttl(payload, 0).await
    }

    /// Publish `payload` with a TTL; `ttl_ms` must be `> 0` to take effect.
    pub async fn produce_with_ttl(&self, payload: T, ttl_ms: u64) -> Result<uuid::Uuid> {
        let now = Utc::now().timestamp_millis();
        let record = MessageRecord::new(payload, now, ttl_ms);
        let encoded = record.encode()?;

        let mut conn = self.conn.clone();
        self.scripts
            .produce
            .key(self.keys.pending())
            .key(QUEUES_REGISTRY)
            .key(self.keys.stats("produce"))
            .arg(encoded)
            .arg(self.keys.name())
            .invoke_async::<_, ()>(&mut conn)
            .await?;
        Ok(record.uuid)
    }
}
