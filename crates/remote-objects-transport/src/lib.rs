//! HTTP bridge endpoint for remote object sessions.
//!
//! Provides:
//! - `Bridge` - Serves the bootstrap script and evaluates posted expressions
//! - `bridge_middleware` - Axum middleware passing non-bridge traffic on
//! - `script` - Bootstrap script rendering
//!
//! Any caller holding the channel secret from a served script can run
//! arbitrary expressions. Only mount the endpoint where that is acceptable.

pub mod bridge;
pub mod script;

pub use bridge::{Bridge, bridge_middleware};
