//! Rhai expression evaluator for remote object sessions.
//!
//! Provides:
//! - `HostEnvironment` - Engine builder, modules for `require` and handle types
//! - `RhaiEvaluator` - `Evaluator` implementation
//! - `Namespace` - Per-session scope and instance registry
//! - `classify` - Decides whether a result is sent by value or by reference
//! - `Deferred` - Pending values awaited before a result is sent
//! - `Emitter` - Named events expressions can wait for with `until`
//!
//! Expressions are not restricted in any way. A caller holding the channel
//! secret can do anything the registered host environment can do.

pub mod classify;
pub mod deferred;
pub mod emitter;
pub mod environment;
pub mod evaluator;
pub mod namespace;

pub use classify::{Shape, classify};
pub use deferred::Deferred;
pub use emitter::Emitter;
pub use environment::HostEnvironment;
pub use evaluator::RhaiEvaluator;
pub use namespace::{HostHandle, Namespace};
