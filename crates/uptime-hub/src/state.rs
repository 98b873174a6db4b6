//! Application state

use crate::callbacks::CallbackCorrelator;
use crate::config::HubConfig;
use crate::cooldown::CooldownTracker;
use crate::models::{ValidatorStats, ValidatorSummary};
use crate::registry::ValidatorRegistry;
use crate::store::HubStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared state of one hub instance.
///
/// Each component guards its own map; no lock is held across an await, so
/// handlers that resume after a store call must re-read what they need.
pub struct AppState {
    pub store: Arc<dyn HubStore>,
    pub registry: ValidatorRegistry,
    pub callbacks: CallbackCorrelator,
    pub cooldown: CooldownTracker,
    pub config: HubConfig,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<dyn HubStore>, config: HubConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            store,
            registry: ValidatorRegistry::new(),
            callbacks: CallbackCorrelator::new(),
            cooldown: CooldownTracker::new(config.cooldown),
            config,
            http_client,
        }
    }

    /// Snapshot of admitted validators for the dashboard
    pub fn stats(&self) -> ValidatorStats {
        let validators: Vec<ValidatorSummary> = self
            .registry
            .list_connected()
            .into_iter()
            .map(|v| ValidatorSummary {
                id: v.validator_id,
                public_key: v.public_key,
            })
            .collect();

        ValidatorStats {
            online_validators: validators.len(),
            validators,
        }
    }
}
