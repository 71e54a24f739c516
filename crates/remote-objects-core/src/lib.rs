//! Core building blocks for remote object sessions.
//!
//! This crate provides:
//! - `flatted` - Cycle-safe wire format over an arena `Graph`
//! - `BridgeRequest` / `BridgeResponse` - Protocol records
//! - `Uid` / `ChannelSecret` - Session token and per-process secret
//! - `BridgeConfig` - Server configuration
//! - `Evaluator` trait

pub mod config;
pub mod error;
pub mod flatted;
pub mod protocol;
pub mod token;
pub mod traits;

pub use config::BridgeConfig;
pub use error::{BridgeError, CodecError, EvalError};
pub use flatted::{Graph, Node, NodeId, Slot};
pub use protocol::{BridgeRequest, BridgeResponse};
pub use token::{ChannelSecret, Uid};
pub use traits::Evaluator;
