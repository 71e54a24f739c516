//! Client lifecycle: bootstrap, heartbeat and teardown.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use regex::Regex;
use tokio::task::JoinHandle;

use crate::{
    connection::Connection,
    error::ClientError,
    scope::Scope,
    transport::{HttpTransport, Transport},
};

/// Default interval between keep-alive requests.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval between keep-alive requests; `None` disables them.
    pub heartbeat: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat: Some(DEFAULT_HEARTBEAT),
        }
    }
}

/// Session parameters handed out by the server's bootstrap script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub uid: String,
    pub channel: String,
    pub base_dir: String,
    pub single_scope: bool,
}

impl Bootstrap {
    /// Extract the session parameters from a bootstrap script.
    ///
    /// # Errors
    /// Returns error if a parameter cannot be found.
    pub fn parse(script: &str) -> Result<Self, ClientError> {
        let uid = capture(script, r"const UID = '([A-Za-z0-9_-]+)';", "UID")?;
        let channel = capture(script, r"const channel = '([0-9A-Za-z]+)';", "channel")?;
        let base_dir = capture(script, r"const dirname = '((?:[^'\\]|\\.)*)';", "dirname")?;
        let once = capture(script, r"const once = '(true|false)'", "once")?;

        Ok(Self {
            uid,
            channel,
            base_dir: js_unescape(&base_dir),
            single_scope: once == "true",
        })
    }
}

fn capture(script: &str, pattern: &str, name: &'static str) -> Result<String, ClientError> {
    let re = Regex::new(pattern).map_err(|e| ClientError::Protocol(e.to_string()))?;
    re.captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ClientError::Bootstrap(name))
}

fn js_unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

struct Inner {
    connection: Arc<Connection>,
    base_dir: String,
    single_scope: bool,
    scopes: AtomicUsize,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        // Fire and forget; nothing to do without a runtime.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let connection = Arc::clone(&self.connection);
            handle.spawn(async move { connection.teardown().await });
        }
    }
}

/// Connection to one server session.
///
/// Keeps the session alive with periodic heartbeats and tears it down when
/// closed or when the last handle is dropped. Must be used within a tokio
/// runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect using parameters from an already fetched bootstrap script.
    pub fn new(
        transport: impl Transport + 'static,
        bootstrap: Bootstrap,
        config: &ClientConfig,
    ) -> Self {
        let connection = Arc::new(Connection::new(
            bootstrap.uid,
            bootstrap.channel,
            Arc::new(transport),
        ));
        let heartbeat = config
            .heartbeat
            .map(|period| tokio::spawn(heartbeat(Arc::clone(&connection), period)));
        tracing::debug!(uid = connection.uid(), "Client connected");

        Self {
            inner: Arc::new(Inner {
                connection,
                base_dir: bootstrap.base_dir,
                single_scope: bootstrap.single_scope,
                scopes: AtomicUsize::new(0),
                heartbeat,
            }),
        }
    }

    /// Fetch the bootstrap script through `transport` and connect.
    ///
    /// # Errors
    /// Returns error if the script cannot be fetched or parsed.
    pub async fn bootstrap(
        transport: impl Transport + 'static,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let script = transport.fetch_bootstrap().await?;
        let bootstrap = Bootstrap::parse(&script)?;
        Ok(Self::new(transport, bootstrap, config))
    }

    /// Connect over HTTP to the endpoint at `url`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the bootstrap fails.
    pub async fn connect(url: &str, config: &ClientConfig) -> Result<Self, ClientError> {
        Self::bootstrap(HttpTransport::new(url)?, config).await
    }

    /// Open a builder scope.
    ///
    /// # Errors
    /// Returns [`ClientError::Unauthorized`] for a second scope of a
    /// single-scope client.
    pub fn scope(&self) -> Result<Scope, ClientError> {
        let id = self.inner.scopes.fetch_add(1, Ordering::SeqCst);
        if self.inner.single_scope && id > 0 {
            return Err(ClientError::Unauthorized);
        }
        Ok(Scope::new(id, Arc::clone(&self.inner.connection)))
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        self.inner.connection.uid()
    }

    /// Server base directory.
    #[must_use]
    pub fn base_dir(&self) -> &str {
        &self.inner.base_dir
    }

    /// Whether no network failure has happened yet.
    #[must_use]
    pub fn is_online(&self) -> bool {
        !self.inner.connection.is_offline()
    }

    /// Tear down the server session. Later evaluations start a fresh one.
    pub async fn close(&self) {
        if let Some(heartbeat) = &self.inner.heartbeat {
            heartbeat.abort();
        }
        self.inner.connection.teardown().await;
    }
}

async fn heartbeat(connection: Arc<Connection>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if connection.execute("true").await.is_err() && connection.is_offline() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use remote_objects_core::{BridgeRequest, BridgeResponse, Graph};

    use super::*;
    use crate::error::TransportError;

    const SCRIPT: &str = r"const remoteObjects = (function (fetch) {'use strict';
  const UID = 'abc123';
  const channel = 'ff00';
  const endpoint = 'remote-objects';
  const dirname = '/srv/it\'s';
  const once = 'true' === 'true';";

    #[derive(Clone, Default)]
    struct Recorder {
        requests: Arc<Mutex<Vec<BridgeRequest>>>,
        offline: bool,
        status: Option<u16>,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn post(&self, body: String) -> Result<String, TransportError> {
            if self.offline {
                return Err(TransportError::Other("unreachable".into()));
            }
            let request = BridgeRequest::decode(&body).unwrap();
            let slow = request.code.as_deref().is_some_and(|code| code != "true");
            self.requests.lock().unwrap().push(request);
            if let Some(status) = self.status {
                return Err(TransportError::Status(status));
            }
            if let Some(stall) = self.stall.filter(|_| slow) {
                tokio::time::sleep(stall).await;
            }
            let response = BridgeResponse::Result(Graph::primitive(true.into()));
            Ok(response.encode().unwrap())
        }

        async fn fetch_bootstrap(&self) -> Result<String, TransportError> {
            Ok(SCRIPT.to_string())
        }
    }

    fn bootstrap() -> Bootstrap {
        Bootstrap::parse(SCRIPT).unwrap()
    }

    #[test]
    fn test_parse_bootstrap() {
        assert_eq!(
            bootstrap(),
            Bootstrap {
                uid: "abc123".into(),
                channel: "ff00".into(),
                base_dir: "/srv/it's".into(),
                single_scope: true,
            }
        );
        assert!(matches!(
            Bootstrap::parse("const UID = 'x';"),
            Err(ClientError::Bootstrap("channel"))
        ));
    }

    #[tokio::test]
    async fn test_single_scope() {
        let client = Client::new(Recorder::default(), bootstrap(), &ClientConfig { heartbeat: None });
        assert!(client.scope().is_ok());
        assert_eq!(client.scope().err(), Some(ClientError::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat() {
        let recorder = Recorder::default();
        let client = Client::new(recorder.clone(), bootstrap(), &ClientConfig::default());

        tokio::time::sleep(DEFAULT_HEARTBEAT * 2 + Duration::from_secs(1)).await;
        {
            let requests = recorder.requests.lock().unwrap();
            assert_eq!(requests.len(), 2);
            assert_eq!(requests[0], BridgeRequest::execute("abc123", "ff00", "true"));
        }

        client.close().await;
        let requests = recorder.requests.lock().unwrap();
        assert_eq!(requests.last(), Some(&BridgeRequest::teardown("abc123", "ff00")));
    }

    #[tokio::test]
    async fn test_network_failure_goes_offline() {
        let recorder = Recorder {
            offline: true,
            ..Recorder::default()
        };
        let client = Client::new(recorder, bootstrap(), &ClientConfig { heartbeat: None });
        let scope = client.scope().unwrap();

        let err = scope.run("1").await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert!(!client.is_online());
    }

    #[tokio::test]
    async fn test_error_status_keeps_client_online() {
        for (status, expected) in [
            (403, ClientError::Forbidden),
            (500, ClientError::Protocol("server answered with status 500".into())),
        ] {
            let recorder = Recorder {
                status: Some(status),
                ..Recorder::default()
            };
            let client = Client::new(recorder.clone(), bootstrap(), &ClientConfig { heartbeat: None });
            let scope = client.scope().unwrap();

            assert_eq!(scope.run("explode()").await.unwrap_err(), expected);
            assert!(client.is_online());
            assert_eq!(scope.run("1 + 1").await.unwrap_err(), expected);
            assert_eq!(recorder.requests.lock().unwrap().len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_during_slow_evaluation() {
        let recorder = Recorder {
            stall: Some(DEFAULT_HEARTBEAT * 3),
            ..Recorder::default()
        };
        let client = Client::new(recorder.clone(), bootstrap(), &ClientConfig::default());
        let scope = client.scope().unwrap();

        let slow = scope.run("work()");
        tokio::time::sleep(DEFAULT_HEARTBEAT * 2 + Duration::from_secs(1)).await;
        {
            let requests = recorder.requests.lock().unwrap();
            let codes: Vec<_> = requests.iter().map(|r| r.code.as_deref()).collect();
            assert_eq!(codes, vec![Some("work()"), Some("true"), Some("true")]);
        }

        assert!(slow.await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_sends_teardown() {
        let recorder = Recorder::default();
        let client = Client::bootstrap(recorder.clone(), &ClientConfig { heartbeat: None })
            .await
            .unwrap();
        drop(client);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let requests = recorder.requests.lock().unwrap();
        assert_eq!(*requests, vec![BridgeRequest::teardown("abc123", "ff00")]);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(js_unescape(r"a\\b\x3Cc\'"), "a\\b<c'");
    }
}
