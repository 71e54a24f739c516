//! Server context: authenticates requests and dispatches them to sessions.

use std::time::Duration;

use remote_objects_core::{
    BridgeError, BridgeRequest, BridgeResponse, ChannelSecret, Evaluator, Uid,
};

use crate::registry::{RegistryError, SessionRegistry};

/// What to send back for an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Teardown acknowledged.
    Empty,
    /// Encoded `{result}` or `{error}` record.
    Body(String),
}

impl From<RegistryError> for BridgeError {
    fn from(e: RegistryError) -> Self {
        Self::Transport(e.to_string())
    }
}

/// One server context.
///
/// Owns the channel secret every request must present, the session registry
/// and the evaluator. Restarting the process rotates the secret and drops all
/// sessions.
pub struct SessionManager<E: Evaluator> {
    secret: ChannelSecret,
    registry: SessionRegistry<E::Namespace>,
    evaluator: E,
}

impl<E: Evaluator> SessionManager<E> {
    /// Create a context with a freshly minted channel secret.
    #[must_use]
    pub fn new(evaluator: E, session_ttl: Duration) -> Self {
        Self::with_secret(evaluator, session_ttl, ChannelSecret::generate())
    }

    #[must_use]
    pub fn with_secret(evaluator: E, session_ttl: Duration, secret: ChannelSecret) -> Self {
        Self {
            secret,
            registry: SessionRegistry::new(session_ttl),
            evaluator,
        }
    }

    #[must_use]
    pub const fn secret(&self) -> &ChannelSecret {
        &self.secret
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry<E::Namespace> {
        &self.registry
    }

    /// Handle one decoded request.
    ///
    /// Evaluation failures are part of a successful reply. Nothing is
    /// mutated when an error is returned.
    ///
    /// # Errors
    /// Returns [`BridgeError::Auth`] on a channel or uid mismatch and
    /// [`BridgeError::Transport`] for a request without code or an internal
    /// fault.
    pub async fn handle(&self, request: BridgeRequest) -> Result<Reply, BridgeError> {
        if !self.secret.matches(request.channel.as_deref()) {
            tracing::warn!("Rejected request with invalid channel");
            return Err(BridgeError::Auth("channel mismatch".into()));
        }
        let uid = validate_uid(request.uid.as_deref())?;

        if request.exit {
            self.registry.destroy(&uid)?;
            return Ok(Reply::Empty);
        }

        let code = request
            .code
            .ok_or_else(|| BridgeError::Transport("request has no code".into()))?;

        let namespace = self
            .registry
            .touch(&uid, || self.evaluator.create_namespace(&uid))?;
        let swept = self.registry.sweep()?;
        if swept > 0 {
            tracing::debug!(swept, "Swept expired sessions");
        }

        let response = match self.evaluator.execute(&namespace, &code, &self.secret).await {
            Ok(graph) => BridgeResponse::Result(graph),
            Err(e) => {
                tracing::debug!(%uid, error = %e, "Expression failed");
                BridgeResponse::Error(e.message)
            }
        };
        Ok(Reply::Body(response.encode()?))
    }
}

fn validate_uid(uid: Option<&str>) -> Result<Uid, BridgeError> {
    match uid {
        Some(uid)
            if !uid.is_empty()
                && uid
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            Ok(Uid::from(uid))
        }
        _ => {
            tracing::warn!(?uid, "Rejected request with invalid uid");
            Err(BridgeError::Auth("invalid uid".into()))
        }
    }
}
