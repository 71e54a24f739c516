//! Core traits for expression evaluation.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{error::EvalError, flatted::Graph, token::{ChannelSecret, Uid}};

/// Trait for expression evaluators.
///
/// An evaluator runs expression text against one session's namespace and
/// turns the produced value into a wire graph. Values that cannot be sent by
/// value are kept in the namespace and replaced by reference descriptors
/// tagged with `channel`.
///
/// Evaluation is deliberately unrestricted: whatever the evaluator can reach,
/// an authenticated expression can reach.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Per-session state owned by the session registry.
    type Namespace: Send + 'static;

    /// Create the namespace for a new session.
    fn create_namespace(&self, uid: &Uid) -> Self::Namespace;

    /// Evaluate `code` against `namespace`.
    ///
    /// # Errors
    /// Returns [`EvalError`] if compiling or running the expression fails.
    async fn execute(
        &self,
        namespace: &Mutex<Self::Namespace>,
        code: &str,
        channel: &ChannelSecret,
    ) -> Result<Graph, EvalError>;
}
