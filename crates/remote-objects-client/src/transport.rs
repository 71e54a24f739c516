//! Client-side transports.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::error::TransportError;

/// Carries request bodies to the bridge endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` and return the response text.
    ///
    /// # Errors
    /// Returns error if the request fails or the status is not a success.
    async fn post(&self, body: String) -> Result<String, TransportError>;

    /// GET the bootstrap script.
    ///
    /// # Errors
    /// Returns error if the request fails or the status is not a success.
    async fn fetch_bootstrap(&self) -> Result<String, TransportError>;
}

/// Transport over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport for the endpoint at `endpoint`, e.g.
    /// `http://localhost:3000/remote-objects`.
    ///
    /// # Errors
    /// Returns error if `endpoint` is not a valid URL.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint).map_err(|e| TransportError::Url(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

async fn text(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(TransportError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: String) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json;charset=utf-8")
            .body(body)
            .send()
            .await?;
        text(response).await
    }

    async fn fetch_bootstrap(&self) -> Result<String, TransportError> {
        let response = self.client.get(self.endpoint.clone()).send().await?;
        text(response).await
    }
}
