//! Session state shared by a client, its scopes and its heartbeat.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use remote_objects_core::{BridgeRequest, BridgeResponse};

use crate::{error::ClientError, transport::Transport};

pub(crate) struct Connection {
    uid: String,
    channel: String,
    transport: Arc<dyn Transport>,
    offline: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(uid: String, channel: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            uid,
            channel,
            transport,
            offline: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn uid(&self) -> &str {
        &self.uid
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Send one expression. Network failures switch the connection offline
    /// for good; there is no retry. Error statuses leave it online.
    pub(crate) async fn execute(&self, code: &str) -> Result<BridgeResponse, ClientError> {
        if self.is_offline() {
            return Err(ClientError::Network("client is offline".into()));
        }

        let body = BridgeRequest::execute(&self.uid, &self.channel, code)
            .encode()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        match self.transport.post(body).await {
            Ok(text) => {
                BridgeResponse::decode(&text).map_err(|e| ClientError::Protocol(e.to_string()))
            }
            Err(e) if e.is_network() => {
                self.offline.store(true, Ordering::SeqCst);
                tracing::error!(uid = %self.uid, "Network failure, client is offline: {e}");
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(uid = %self.uid, "Request rejected: {e}");
                Err(e.into())
            }
        }
    }

    /// Ask the server to drop the session. Runs at most once.
    pub(crate) async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) || self.is_offline() {
            return;
        }
        let body = match BridgeRequest::teardown(&self.uid, &self.channel).encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to encode teardown: {e}");
                return;
            }
        };
        if let Err(e) = self.transport.post(body).await {
            tracing::debug!(uid = %self.uid, "Teardown failed: {e}");
        }
    }
}
