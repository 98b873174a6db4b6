//! Uptime Hub - coordination server for remote uptime validators
//!
//! Validators hold a WebSocket open to the hub. The hub:
//! - admits them through an ed25519-signed signup
//! - periodically dispatches website checks to every admitted validator,
//!   plus an immediate round right after signup
//! - correlates signed replies to the dispatch that produced them
//! - records each verified result and the validator's payout credit in one
//!   transaction
//!
//! Key invariants:
//! - a callback id resolves at most once
//! - replies are verified against the key of the validator the work was
//!   dispatched to, never a key carried in the reply
//! - a (validator, website) pair is dispatched at most once per cooldown

pub mod api;
pub mod auth;
pub mod callbacks;
pub mod client_info;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::HubConfig;
pub use db::{DbPool, PgStore};
pub use error::{HubError, Result};
pub use state::AppState;
pub use store::{HubStore, MemoryStore};
