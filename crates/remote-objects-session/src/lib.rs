//! Session registry and server context for remote object sessions.
//!
//! Provides:
//! - `SessionRegistry` - Namespaces keyed by uid with idle expiry
//! - `SessionManager` - Channel check, uid check and dispatch to the evaluator

pub mod manager;
pub mod registry;

pub use manager::{Reply, SessionManager};
pub use registry::{RegistryError, SessionRegistry};
