//! Hub configuration

use crate::cooldown::DEFAULT_COOLDOWN;
use std::time::Duration;

/// Credit added to a validator's pending payout per verified check
pub const DEFAULT_REWARD_PER_CHECK: i64 = 100;

/// Interval between full dispatch sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Endpoint used when geolocation is enabled
pub const DEFAULT_GEO_ENDPOINT: &str = "https://ipapi.co";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interval of the periodic sweep over websites x validators
    pub sweep_interval: Duration,
    /// Minimum gap between two dispatches of the same (validator, website).
    /// Must stay below `sweep_interval`.
    pub cooldown: Duration,
    pub reward_per_check: i64,
    /// Pending requests older than this are dropped. `None` keeps them until
    /// restart.
    pub callback_ttl: Option<Duration>,
    /// Base URL of the geolocation service, `None` disables lookups
    pub geo_endpoint: Option<String>,
}

impl HubConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep interval must be positive");
        }
        if self.cooldown >= self.sweep_interval {
            anyhow::bail!(
                "cooldown ({:?}) must be shorter than the sweep interval ({:?})",
                self.cooldown,
                self.sweep_interval
            );
        }
        if self.reward_per_check < 0 {
            anyhow::bail!("reward per check cannot be negative");
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
            reward_per_check: DEFAULT_REWARD_PER_CHECK,
            callback_ttl: None,
            geo_endpoint: None,
        }
    }
}
