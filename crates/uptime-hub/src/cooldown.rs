//! Dispatch cooldown
//!
//! Remembers when each (validator, website) pair was last dispatched and
//! refuses a second dispatch inside the window. The window is shorter than
//! the sweep interval, so in practice this only suppresses the overlap of a
//! post-signup sweep with the periodic one.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default cooldown window
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

pub struct CooldownTracker {
    last_dispatch: Mutex<HashMap<(String, String), Instant>>,
    window: Duration,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            last_dispatch: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record in one step.
    ///
    /// Returns true, and stores `now` as the last dispatch, when the pair has
    /// never been dispatched or the window has fully elapsed.
    pub fn should_dispatch(&self, validator_id: &str, website_id: &str, now: Instant) -> bool {
        let mut last = self.last_dispatch.lock();
        let key = (validator_id.to_string(), website_id.to_string());

        if let Some(prev) = last.get(&key) {
            if now.saturating_duration_since(*prev) < self.window {
                return false;
            }
        }

        last.insert(key, now);
        true
    }

    /// Drop entries whose window has already elapsed
    pub fn prune(&self, now: Instant) {
        let window = self.window;
        self.last_dispatch
            .lock()
            .retain(|_, prev| now.saturating_duration_since(*prev) < window);
    }

    pub fn len(&self) -> usize {
        self.last_dispatch.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_dispatch.lock().is_empty()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
