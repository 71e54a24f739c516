//! Client error types.

use thiserror::Error;

/// Transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {0}")]
    Status(u16),
    #[error("Invalid endpoint URL: {0}")]
    Url(String),
    #[error("{0}")]
    Other(String),
}

/// Client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The expression failed on the server.
    #[error("{0}")]
    Remote(String),
    /// The server could not be reached. The client stays offline afterwards.
    #[error("Network error: {0}")]
    Network(String),
    /// The server rejected the channel secret or the session token.
    #[error("Request rejected by the server")]
    Forbidden,
    /// A second scope was requested from a single-scope client.
    #[error("Unauthorized script")]
    Unauthorized,
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
    /// The scope's worker is gone.
    #[error("Client is closed")]
    Closed,
    /// The server sent something that is not a bridge response.
    #[error("Invalid response: {0}")]
    Protocol(String),
    #[error("Bootstrap script is missing {0}")]
    Bootstrap(&'static str),
}

impl TransportError {
    /// Whether the failure happened while sending or receiving, as opposed
    /// to the server answering with an error status.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        !matches!(self, Self::Status(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Status(403) => Self::Forbidden,
            TransportError::Status(status) => {
                Self::Protocol(format!("server answered with status {status}"))
            }
            e => Self::Network(e.to_string()),
        }
    }
}
