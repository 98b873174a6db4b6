//! Persistence seam
//!
//! The hub only needs a handful of operations from its database. They are
//! collected in [`HubStore`] so the protocol code can run against PostgreSQL
//! in production ([`crate::db::PgStore`]) and against [`MemoryStore`] in
//! tests and local development.

use crate::models::{NewWebsiteTick, Validator, Website, WebsiteTick};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Location recorded for validators until something better is known
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Outcome of a find-or-create lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValidator {
    pub validator: Validator,
    pub created: bool,
}

#[async_trait]
pub trait HubStore: Send + Sync {
    /// Websites that should be checked (not disabled)
    async fn list_enabled_websites(&self) -> Result<Vec<Website>>;

    /// Find the validator owning `public_key`, creating it if there is none.
    /// New validators start with zero payout and an unknown location.
    async fn find_or_create_validator(&self, public_key: &str, ip: &str)
        -> Result<ResolvedValidator>;

    /// Insert a tick and credit `reward` to its validator, atomically.
    /// Either both happen or neither does.
    async fn record_tick(&self, tick: &NewWebsiteTick, reward: i64) -> Result<WebsiteTick>;

    /// Refresh cached network metadata. `None` leaves a field unchanged.
    async fn update_validator_metadata(
        &self,
        validator_id: &str,
        ip: Option<&str>,
        location: Option<&str>,
    ) -> Result<()>;

    async fn get_validator(&self, validator_id: &str) -> Result<Option<Validator>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    validators: HashMap<String, Validator>,
    websites: Vec<Website>,
    ticks: Vec<WebsiteTick>,
    fail_writes: bool,
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_website(&self, url: &str) -> Website {
        let website = Website {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            disabled: false,
        };
        self.inner.lock().websites.push(website.clone());
        website
    }

    pub fn set_website_disabled(&self, website_id: &str, disabled: bool) {
        if let Some(w) = self
            .inner
            .lock()
            .websites
            .iter_mut()
            .find(|w| w.id == website_id)
        {
            w.disabled = disabled;
        }
    }

    pub fn validators(&self) -> Vec<Validator> {
        self.inner.lock().validators.values().cloned().collect()
    }

    pub fn ticks(&self) -> Vec<WebsiteTick> {
        self.inner.lock().ticks.clone()
    }

    /// Make every subsequent write fail, to exercise persistence errors
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

#[async_trait]
impl HubStore for MemoryStore {
    async fn list_enabled_websites(&self) -> Result<Vec<Website>> {
        Ok(self
            .inner
            .lock()
            .websites
            .iter()
            .filter(|w| !w.disabled)
            .cloned()
            .collect())
    }

    async fn find_or_create_validator(
        &self,
        public_key: &str,
        ip: &str,
    ) -> Result<ResolvedValidator> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .validators
            .values()
            .find(|v| v.public_key == public_key)
        {
            return Ok(ResolvedValidator {
                validator: existing.clone(),
                created: false,
            });
        }
        if inner.fail_writes {
            return Err(anyhow!("write failed"));
        }

        let validator = Validator {
            id: Uuid::new_v4().to_string(),
            public_key: public_key.to_string(),
            ip: ip.to_string(),
            location: UNKNOWN_LOCATION.to_string(),
            pending_payouts: 0,
        };
        inner
            .validators
            .insert(validator.id.clone(), validator.clone());
        Ok(ResolvedValidator {
            validator,
            created: true,
        })
    }

    async fn record_tick(&self, tick: &NewWebsiteTick, reward: i64) -> Result<WebsiteTick> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(anyhow!("write failed"));
        }

        let validator = inner
            .validators
            .get_mut(&tick.validator_id)
            .ok_or_else(|| anyhow!("Validator {} not found", tick.validator_id))?;
        validator.pending_payouts += reward;

        let stored = WebsiteTick {
            id: Uuid::new_v4().to_string(),
            website_id: tick.website_id.clone(),
            validator_id: tick.validator_id.clone(),
            status: tick.status,
            latency: tick.latency,
            created_at: tick.created_at,
        };
        inner.ticks.push(stored.clone());
        Ok(stored)
    }

    async fn update_validator_metadata(
        &self,
        validator_id: &str,
        ip: Option<&str>,
        location: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(anyhow!("write failed"));
        }
        let validator = inner
            .validators
            .get_mut(validator_id)
            .ok_or_else(|| anyhow!("Validator {} not found", validator_id))?;
        if let Some(ip) = ip {
            validator.ip = ip.to_string();
        }
        if let Some(location) = location {
            validator.location = location.to_string();
        }
        Ok(())
    }

    async fn get_validator(&self, validator_id: &str) -> Result<Option<Validator>> {
        Ok(self.inner.lock().validators.get(validator_id).cloned())
    }
}
