//! Pending values produced by host functions.

use std::future::Future;

use futures::{
    FutureExt,
    future::{self, BoxFuture, Shared},
};
use remote_objects_core::EvalError;
use rhai::Dynamic;

type Settlement = Result<Dynamic, String>;

/// A value that is not ready yet.
///
/// Host functions return a `Deferred` when their work is asynchronous; the
/// evaluator awaits it before classifying the result. Clones share the same
/// settlement.
#[derive(Clone)]
pub struct Deferred {
    inner: Shared<BoxFuture<'static, Settlement>>,
}

impl Deferred {
    /// Run `future` on the current tokio runtime.
    ///
    /// Must be called from within a runtime, which is always the case for
    /// host functions invoked by the evaluator.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        Self::from_future(async move {
            handle
                .await
                .unwrap_or_else(|e| Err(format!("Deferred task failed: {e}")))
        })
    }

    /// An already settled value.
    #[must_use]
    pub fn settled(value: Settlement) -> Self {
        Self::from_future(future::ready(value))
    }

    pub(crate) fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Wait for the value.
    ///
    /// # Errors
    /// Returns the rejection message, or an error if the producing task
    /// panicked.
    pub async fn settle(&self) -> Result<Dynamic, EvalError> {
        self.inner.clone().await.map_err(EvalError::new)
    }
}
