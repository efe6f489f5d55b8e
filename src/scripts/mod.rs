//! The server-side Lua scripts backing every atomic state transition the
//! broker performs. Client-side read-then-write is never used for the
//! transitions enumerated in the design's concurrency section; each one
//! below is either a single Redis command (for the blocking pending→
//! in-flight move, issued directly by the consumer) or one of these
//! scripts.

use redis::Script;

#[derive(Clone)]
pub struct BrokerScripts {
    pub produce: Script,
    pub ack: Script,
    pub requeue: Script,
    pub dead_letter: Script,
    pub gc_lease: Script,
    pub gc_drain_one: Script,
    pub heartbeat: Script,
    pub sweep_expired: Script,
}

impl std::fmt::Debug for BrokerScripts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerScripts").finish_non_exhaustive()
    }
}

impl Default for BrokerScripts {
    fn default() -> Self {
        Self {
            produce: Script::new(include_str!("produce.lua")),
            ack: Script::new(include_str!("ack.lua")),
            requeue: Script::new(include_str!("requeue.lua")),
            dead_letter: Script::new(include_str!("dead_letter.lua")),
            gc_lease: Script::new(include_str!("gc_lease.lua")),
            gc_drain_one: Script::new(include_str!("gc_drain_one.lua")),
            heartbeat: Script::new(include_str!("heartbeat.lua")),
            sweep_expired: Script::new(include_str!("sweep_expired.lua")),
        }
    }
}
