use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The envelope every produced payload is wrapped in before it is
/// appended to `Q.pending`.
///
/// Once persisted, `uuid`, `payload`, `created_at` and `ttl` never
/// change; only `attempts` is mutated, and only by the consumer that
/// currently holds the record in its in-flight list. The wire field
/// names (`data`, `time`) match the stable encoding named in the
/// broker's external interface so any deployment reading the raw
/// Redis values sees a consistent shape across versions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord<T> {
    pub uuid: Uuid,
    #[serde(rename = "data")]
    pub payload: T,
    #[serde(rename = "time")]
    pub created_at: i64,
    #[serde(default)]
    pub attempts: u32,
    /// Milliseconds; `0` means no TTL.
    #[serde(default)]
    pub ttl: u64,
}

impl<T> MessageRecord<T> {
    /// Build a fresh record as it looks the instant a producer publishes it.
    pub fn new(payload: T, now_ms: i64, ttl_ms: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            payload,
            created_at: now_ms,
            attempts: 0,
            ttl: ttl_ms,
        }
    }

    /// `true` once `now_ms - created_at` has exceeded a nonzero `ttl`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl > 0 && now_ms.saturating_sub(self.created_at) > self.ttl as i64
    }

    pub fn encode(&self) -> Result<String, serde_json::Error>
    where
        T: Serialize,
    {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let record = MessageRecord::new("payload".to_string(), 1_000, 5_000);
        let encoded = record.encode().unwrap();
        let decoded: MessageRecord<String> = MessageRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.uuid, record.uuid);
        assert_eq!(decoded.payload, "payload");
        assert_eq!(decoded.created_at, 1_000);
        assert_eq!(decoded.ttl, 5_000);
        assert_eq!(decoded.attempts, 0);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let record = MessageRecord::new("x".to_string(), 0, 0);
        assert!(!record.is_expired(i64::MAX));
    }

    #[test]
    fn nonzero_ttl_expires_after_elapsed() {
        let record = MessageRecord::new("x".to_string(), 0, 100);
        assert!(!record.is_expired(100));
        assert!(record.is_expired(201));
    }
}
