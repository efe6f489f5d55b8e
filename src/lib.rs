//! A persistent message queue broker layered over Redis.
//!
//! Producers publish to a named queue's pending list; consumers pull
//! FIFO, process under an optional deadline, and either ack, retry, or
//! dead-letter. Crash recovery is handled by a leader-elected garbage
//! collector that reclaims records left in a dead consumer's in-flight
//! list. See the module docs below for the pieces that make this up.

pub mod config;
pub mod consumer;
pub mod error;
pub mod gc;
pub mod keys;
pub mod producer;
pub mod record;
pub mod scripts;
pub mod stats;

pub use config::BrokerConfig;
pub use consumer::{Consumer, ConsumerHandle, ConsumerOptions, ConsumerState, FnHandler, Handler};
pub use error::{BrokerError, Result};
pub use gc::{GarbageCollector, ReclaimOutcome};
pub use keys::QueueKeys;
pub use producer::Producer;
pub use record::MessageRecord;

use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, RedisError};

/// Open a connection to Redis and wrap it in a [`ConnectionManager`],
/// which transparently reconnects and is cheap to clone.
///
/// A [`Consumer`] needs two of these (one dedicated to its blocking
/// pull, one for everything else), so callers typically call this
/// twice against the same connection info.
pub async fn connect<S: IntoConnectionInfo>(redis: S) -> std::result::Result<ConnectionManager, RedisError> {
    let client = Client::open(redis.into_connection_info()?)?;
    let conn = client.get_connection_manager().await?;
    Ok(conn)
}
