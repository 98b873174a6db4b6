//! Dispatch scheduling
//!
//! Two triggers feed the same dispatch path:
//! - a periodic sweep over every enabled website x every connected validator
//! - an immediate sweep for one validator right after it signs up
//!
//! Both go through the cooldown tracker, which is what keeps the two from
//! double-dispatching the same pair when they coincide.

use crate::callbacks::{CallbackCorrelator, PendingRequest};
use crate::models::{OutgoingMessage, ValidateOutgoing, Website};
use crate::registry::ConnectedValidator;
use crate::state::AppState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Inside the cooldown window for this pair
    Suppressed,
    /// The socket went away; nothing is left pending
    ConnectionClosed,
}

/// Summary of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Suppressed => self.suppressed += 1,
            DispatchOutcome::ConnectionClosed => self.failed += 1,
        }
    }
}

/// Ask one validator to check one website
pub fn dispatch_one(
    state: &AppState,
    validator: &ConnectedValidator,
    website: &Website,
    now: Instant,
) -> DispatchOutcome {
    if !state
        .cooldown
        .should_dispatch(&validator.validator_id, &website.id, now)
    {
        debug!(
            "Cooldown active for {} / {}, skipping",
            validator.validator_id, website.id
        );
        return DispatchOutcome::Suppressed;
    }

    let callback_id = CallbackCorrelator::mint_token();
    state.callbacks.register(
        &callback_id,
        PendingRequest {
            validator_id: validator.validator_id.clone(),
            public_key: validator.public_key.clone(),
            website_id: website.id.clone(),
            issued_at: now,
        },
    );

    let msg = OutgoingMessage::Validate(ValidateOutgoing {
        url: website.url.clone(),
        callback_id: callback_id.clone(),
        website_id: website.id.clone(),
    });

    match validator.connection.send(msg) {
        Ok(()) => {
            debug!(
                "Sent validate to {} for {} (callback {})",
                validator.validator_id, website.url, callback_id
            );
            DispatchOutcome::Sent
        }
        Err(e) => {
            state.callbacks.drop_token(&callback_id);
            warn!(
                "Dispatch to {} failed: {}",
                validator.validator_id, e
            );
            DispatchOutcome::ConnectionClosed
        }
    }
}

fn dispatch_all(
    state: &AppState,
    validators: &[ConnectedValidator],
    websites: &[Website],
) -> SweepReport {
    let now = Instant::now();
    let mut report = SweepReport::default();
    for website in websites {
        for validator in validators {
            report.record(dispatch_one(state, validator, website, now));
        }
    }
    report
}

/// Sweep every enabled website across every connected validator
pub async fn run_full_cycle(state: &AppState) -> SweepReport {
    let websites = match state.store.list_enabled_websites().await {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to load websites: {}", e);
            return SweepReport::default();
        }
    };
    // Read after the store call: connections may have come or gone meanwhile
    let validators = state.registry.list_connected();

    info!(
        "Starting validation cycle: {} websites, {} validators",
        websites.len(),
        validators.len()
    );
    if validators.is_empty() {
        info!("No validators available - skipping validation cycle");
        return SweepReport::default();
    }

    let report = dispatch_all(state, &validators, &websites);
    info!(
        "Validation cycle done: {} sent, {} in cooldown, {} failed",
        report.sent, report.suppressed, report.failed
    );
    report
}

/// Sweep every enabled website for a single, just-admitted validator
pub async fn run_for_validator(state: &AppState, validator_id: &str) -> SweepReport {
    let websites = match state.store.list_enabled_websites().await {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to load websites: {}", e);
            return SweepReport::default();
        }
    };
    let Some(validator) = state.registry.get_by_validator(validator_id) else {
        debug!("Validator {} left before its first sweep", validator_id);
        return SweepReport::default();
    };

    let report = dispatch_all(state, std::slice::from_ref(&validator), &websites);
    info!(
        "Immediate dispatch for {}: {} sent, {} in cooldown",
        validator_id, report.sent, report.suppressed
    );
    report
}

/// Run [`run_full_cycle`] every `sweep_interval`, first run one interval
/// after start.
pub fn spawn_sweep_loop(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_full_cycle(&state).await;
            state.cooldown.prune(Instant::now());
        }
    })
}

/// Periodically drop pending requests older than the configured TTL.
/// Returns `None` when no TTL is configured.
pub fn spawn_callback_purge(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let ttl = state.config.callback_ttl?;
    let period = (ttl / 2).max(Duration::from_secs(1));
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let purged = state.callbacks.purge_older_than(ttl, Instant::now());
            if purged > 0 {
                info!("Dropped {} unanswered dispatches", purged);
            }
        }
    }))
}
