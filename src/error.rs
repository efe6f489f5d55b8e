use thiserror::Error;

/// Error taxonomy surfaced to producers, consumers and logs.
///
/// Mirrors the kinds enumerated in the broker's error-handling design:
/// transport failures are retried with backoff by the consumer loop,
/// serialization failures move a record straight to the dead-letter
/// queue, handler/timeout failures drive the retry-or-dead-letter
/// policy, and configuration errors are fatal before any message is
/// touched.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Redis was unreachable or a command failed.
    #[error("redis transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// A stored record could not be decoded back into a `MessageRecord`.
    #[error("failed to (de)serialize message record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The user-supplied handler returned or signalled failure.
    #[error("handler reported failure: {0}")]
    Handler(String),

    /// The processing-timeout watchdog fired before the handler completed.
    #[error("handler exceeded its processing timeout")]
    Timeout,

    /// The record's TTL elapsed before it could be dispatched or retried.
    #[error("message ttl expired")]
    Expired,

    /// Startup configuration was missing or invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A record lookup by id found nothing.
    #[error("no record found for id {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrokerError>;
