//! HTTP endpoint for bridge traffic.

use std::{panic::AssertUnwindSafe, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use remote_objects_core::{BridgeConfig, BridgeError, BridgeRequest, Evaluator, Uid};
use remote_objects_session::{Reply, SessionManager};

use crate::script::{self, ScriptParams};

struct Inner<E: Evaluator> {
    manager: SessionManager<E>,
    config: BridgeConfig,
}

/// The bridge endpoint.
///
/// A request is bridge traffic when the last segment of its path is the
/// configured name and its query is absent or `module`. Other requests are
/// left alone.
pub struct Bridge<E: Evaluator> {
    inner: Arc<Inner<E>>,
}

impl<E: Evaluator> Clone for Bridge<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Evaluator + 'static> Bridge<E> {
    /// Create an endpoint with a fresh server context.
    #[must_use]
    pub fn new(evaluator: E, config: BridgeConfig) -> Self {
        let manager = SessionManager::new(evaluator, config.session_ttl);
        Self::with_manager(manager, config)
    }

    #[must_use]
    pub fn with_manager(manager: SessionManager<E>, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner { manager, config }),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &SessionManager<E> {
        &self.inner.manager
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// `Some(module)` if `uri` addresses the endpoint.
    fn route(&self, uri: &Uri) -> Option<bool> {
        let name = uri.path().rsplit('/').next()?;
        if name != self.inner.config.path_name {
            return None;
        }
        match uri.query() {
            None => Some(false),
            Some("module") => Some(true),
            Some(_) => None,
        }
    }

    /// Answer `request` if it is bridge traffic, otherwise hand it back.
    ///
    /// # Errors
    /// Returns the untouched request when it is not addressed to the
    /// endpoint.
    pub async fn try_handle(&self, request: Request) -> Result<Response, Request> {
        let Some(module) = self.route(request.uri()) else {
            return Err(request);
        };

        if request.method() != Method::POST {
            return Ok(self.bootstrap(module));
        }

        let outcome = AssertUnwindSafe(self.post(request.into_body()))
            .catch_unwind()
            .await;
        Ok(outcome.unwrap_or_else(|_| {
            tracing::error!("Bridge request panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }))
    }

    /// Router that answers bridge traffic only; anything else is a 404.
    pub fn router(self) -> Router {
        Router::new().fallback(standalone::<E>).with_state(self)
    }

    fn bootstrap(&self, module: bool) -> Response {
        let config = &self.inner.config;
        let uid = Uid::generate();
        let body = script::render(&ScriptParams {
            uid: &uid,
            channel: self.inner.manager.secret(),
            base_dir: &config.base_dir,
            path_name: &config.path_name,
            single_scope: config.single_scope,
            module,
        });
        tracing::debug!(%uid, module, "Served bootstrap script");

        (
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::CONTENT_TYPE, "application/javascript;charset=utf-8"),
            ],
            body,
        )
            .into_response()
    }

    async fn post(&self, body: Body) -> Response {
        let bytes = match axum::body::to_bytes(body, self.inner.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to read bridge request: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let request = match std::str::from_utf8(&bytes)
            .map_err(|e| BridgeError::Transport(e.to_string()))
            .and_then(|text| BridgeRequest::decode(text).map_err(BridgeError::from))
        {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed bridge request: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        match self.inner.manager.handle(request).await {
            Ok(Reply::Empty) => StatusCode::OK.into_response(),
            Ok(Reply::Body(body)) => {
                ([(header::CONTENT_TYPE, "text/plain;charset=utf-8")], body).into_response()
            }
            Err(BridgeError::Auth(_)) => StatusCode::FORBIDDEN.into_response(),
            Err(BridgeError::Transport(e)) => {
                tracing::error!("Bridge request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn standalone<E: Evaluator + 'static>(
    State(bridge): State<Bridge<E>>,
    request: Request,
) -> Response {
    bridge
        .try_handle(request)
        .await
        .unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
}

/// Middleware answering bridge traffic and passing everything else on.
///
/// ```ignore
/// let app = Router::new()
///     .fallback_service(ServeDir::new("public"))
///     .layer(axum::middleware::from_fn_with_state(bridge, bridge_middleware));
/// ```
pub async fn bridge_middleware<E: Evaluator + 'static>(
    State(bridge): State<Bridge<E>>,
    request: Request,
    next: Next,
) -> Response {
    match bridge.try_handle(request).await {
        Ok(response) => response,
        Err(request) => next.run(request).await,
    }
}
