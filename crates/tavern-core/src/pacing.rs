//! Replay pacing policy.
//!
//! Missed messages are replayed one at a time with a delay after each, so
//! a reconnecting client's presentation layer is not flooded with a burst
//! of buffered state. Some message kinds need longer (a dice-roll
//! animation takes over a second to play out client-side), so the delay is
//! configurable per envelope kind.

use std::{collections::HashMap, time::Duration};

/// Per-message-kind delay inserted between replayed messages.
#[derive(Debug, Clone)]
pub struct ReplayPacing {
    /// Delay applied when no per-kind override matches.
    pub default_delay: Duration,
    /// Overrides keyed by envelope kind.
    pub per_kind: HashMap<String, Duration>,
}

impl Default for ReplayPacing {
    fn default() -> Self {
        let mut per_kind = HashMap::new();
        // Dice-roll turns drive a long client-side animation.
        per_kind.insert("rd".to_string(), Duration::from_millis(1100));
        Self { default_delay: Duration::from_millis(200), per_kind }
    }
}

impl ReplayPacing {
    /// Delay to apply after replaying a message of the given kind.
    pub fn delay_for(&self, kind: &str) -> Duration {
        self.per_kind.get(kind).copied().unwrap_or(self.default_delay)
    }
}
