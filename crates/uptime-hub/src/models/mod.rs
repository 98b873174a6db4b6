//! Data models and wire frames for the hub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub id: String,
    /// Base58 ed25519 public key, the natural key of a validator
    pub public_key: String,
    pub ip: String,
    pub location: String,
    /// Accrued, unsettled credit. Only ever incremented by the hub.
    pub pending_payouts: i64,
}

// ============================================================================
// WEBSITE (monitored target)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub id: String,
    pub url: String,
    pub disabled: bool,
}

// ============================================================================
// WEBSITE TICK (check result)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebsiteStatus {
    Good,
    Bad,
}

impl WebsiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebsiteStatus::Good => "Good",
            WebsiteStatus::Bad => "Bad",
        }
    }
}

impl std::fmt::Display for WebsiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified outcome of one dispatch, written once and never updated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteTick {
    pub id: String,
    pub website_id: String,
    pub validator_id: String,
    pub status: WebsiteStatus,
    /// Milliseconds as measured by the validator
    pub latency: f64,
    pub created_at: DateTime<Utc>,
}

/// A tick about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebsiteTick {
    pub website_id: String,
    pub validator_id: String,
    pub status: WebsiteStatus,
    pub latency: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// INBOUND FRAMES (validator -> hub)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum IncomingMessage {
    #[serde(rename = "signup")]
    Signup(SignupIncoming),

    #[serde(rename = "validate")]
    Validate(ValidateIncoming),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignupIncoming {
    pub callback_id: String,
    /// Origin hint supplied by the validator ("browser" for in-page runtimes)
    pub ip: String,
    pub public_key: String,
    /// Signature of "Signed message for {callbackId}, {publicKey}"
    pub signed_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateIncoming {
    pub callback_id: String,
    pub status: WebsiteStatus,
    pub latency: f64,
    pub validator_id: String,
    #[serde(default)]
    pub website_id: Option<String>,
    /// Signature of "Replying to {callbackId}"
    pub signed_message: String,
}

// ============================================================================
// OUTBOUND FRAMES (hub -> validator)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum OutgoingMessage {
    #[serde(rename = "signup")]
    Signup(SignupOutgoing),

    #[serde(rename = "validate")]
    Validate(ValidateOutgoing),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignupOutgoing {
    pub validator_id: String,
    pub callback_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutgoing {
    pub url: String,
    pub callback_id: String,
    pub website_id: String,
}

// ============================================================================
// STATS (dashboard side channel)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStats {
    pub online_validators: usize,
    pub validators: Vec<ValidatorSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSummary {
    pub id: String,
    pub public_key: String,
}
