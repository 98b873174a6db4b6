//! WebSocket transport for validators

pub mod connection;
pub mod handler;

pub use connection::*;
pub use handler::*;
