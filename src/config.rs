//! Compile-time tunables and their runtime-overridable counterparts.
//!
//! `M` and `K` stay `const` (they size the fixed-length finger table and
//! successor list arrays); the periodic-task intervals and timeouts are
//! collected into `ChordConfig` so the binary can override them from the
//! command line without touching the routing-state layout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChordConfig {
    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub fix_predecessor_interval: Duration,
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for ChordConfig {
    fn default() -> Self {
        ChordConfig {
            stabilize_interval: Duration::from_millis(200),
            fix_fingers_interval: Duration::from_millis(200),
            fix_predecessor_interval: Duration::from_millis(200),
            dial_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
        }
    }
}
