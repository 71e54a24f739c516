//! Rust client for remote object sessions.
//!
//! Provides:
//! - `Client` - Session lifecycle (bootstrap, heartbeat, teardown)
//! - `Scope` - Builder scope with an ordered evaluation queue
//! - `Remote` - Lazily built remote value; awaiting it sends the expression
//! - `Chain` / `Arg` - Deferred operations and their rendering
//! - `Transport` / `HttpTransport` - How requests reach the endpoint

pub mod client;
mod connection;
pub mod error;
pub mod expr;
pub mod remote;
pub mod scope;
pub mod transport;

pub use client::{Bootstrap, Client, ClientConfig};
pub use error::{ClientError, TransportError};
pub use expr::{Arg, Chain};
pub use remote::{Bound, Evaluation, Remote, Resolved};
pub use scope::Scope;
pub use transport::{HttpTransport, Transport};
