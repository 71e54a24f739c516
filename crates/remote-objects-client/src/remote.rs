//! Remote values and pending evaluations.

use std::{
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    task::{Context, Poll},
};

use remote_objects_core::{BridgeResponse, Graph};
use tokio::sync::oneshot;

use crate::{
    error::ClientError,
    expr::{Arg, Chain},
    scope::Scope,
};

/// A value living on the server.
///
/// Operations only extend the chain of deferred operations; nothing is sent
/// until the value is awaited. `set` is the exception and is queued at once.
#[derive(Clone)]
pub struct Remote {
    scope: Scope,
    chain: Chain,
}

impl Remote {
    pub(crate) const fn new(scope: Scope, chain: Chain) -> Self {
        Self { scope, chain }
    }

    /// Property access.
    #[must_use]
    pub fn get(&self, key: impl Into<String>) -> Self {
        self.with(self.chain.get(key))
    }

    /// Assign a property. The assignment is queued immediately.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Arg>) -> Evaluation {
        self.scope.evaluate(self.chain.set(key, value.into()).program())
    }

    /// Invoke this value.
    #[must_use]
    pub fn call<I>(&self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.with(self.chain.call(args.into_iter().map(Into::into).collect()))
    }

    /// Partially apply `args`. The returned value prepends them to the
    /// arguments of every later call.
    #[must_use]
    pub fn bind<I>(&self, args: I) -> Bound
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        Bound {
            target: self.clone(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Construct once per returned proxy. Every chain that uses the result
    /// refers to the same server-side instance.
    #[must_use]
    pub fn construct<I>(&self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let slot = self.scope.next_slot();
        self.with(
            self.chain
                .construct(slot, args.into_iter().map(Into::into).collect()),
        )
    }

    /// Program text sent when this value is awaited.
    #[must_use]
    pub fn expression(&self) -> String {
        self.chain.program()
    }

    /// Membership tests cannot be deferred and are not supported.
    ///
    /// # Errors
    /// Always returns [`ClientError::Unsupported`].
    #[allow(clippy::unused_self)]
    pub fn has(&self, _key: &str) -> Result<bool, ClientError> {
        Err(ClientError::Unsupported("membership test on a remote value"))
    }

    #[must_use]
    pub const fn chain(&self) -> &Chain {
        &self.chain
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    fn with(&self, chain: Chain) -> Self {
        Self::new(self.scope.clone(), chain)
    }
}

/// A remote function with leading arguments already applied.
#[derive(Debug, Clone)]
pub struct Bound {
    target: Remote,
    args: Vec<Arg>,
}

impl Bound {
    /// Invoke the target with the bound arguments followed by `extra`.
    #[must_use]
    pub fn call<I>(&self, extra: I) -> Remote
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let args = self
            .args
            .iter()
            .cloned()
            .chain(extra.into_iter().map(Into::into));
        self.target.call(args)
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Remote").field(&self.chain.program()).finish()
    }
}

impl From<&Remote> for Arg {
    fn from(remote: &Remote) -> Self {
        Self::Chain(remote.chain.clone())
    }
}

impl From<Remote> for Arg {
    fn from(remote: Remote) -> Self {
        Self::Chain(remote.chain)
    }
}

impl IntoFuture for Remote {
    type Output = Result<Resolved, ClientError>;
    type IntoFuture = Evaluation;

    fn into_future(self) -> Evaluation {
        self.scope.evaluate(self.chain.program())
    }
}

impl IntoFuture for &Remote {
    type Output = Result<Resolved, ClientError>;
    type IntoFuture = Evaluation;

    fn into_future(self) -> Evaluation {
        self.clone().into_future()
    }
}

/// Outcome of awaiting a remote value.
#[derive(Debug)]
pub enum Resolved {
    /// The value was sent by value.
    Value(Graph),
    /// The value stayed on the server; this proxy addresses it.
    Remote(Remote),
}

impl Resolved {
    /// The value as JSON.
    ///
    /// # Errors
    /// Returns error for a remote reference or a cyclic value.
    pub fn into_json(self) -> Result<serde_json::Value, ClientError> {
        match self {
            Self::Value(graph) => graph
                .to_json()
                .map_err(|e| ClientError::Protocol(e.to_string())),
            Self::Remote(remote) => Err(ClientError::Protocol(format!(
                "expected a value, got a reference to {}",
                remote.expression()
            ))),
        }
    }

    /// The referenced remote value.
    ///
    /// # Errors
    /// Returns error if the result was sent by value.
    pub fn into_remote(self) -> Result<Remote, ClientError> {
        match self {
            Self::Remote(remote) => Ok(remote),
            Self::Value(_) => Err(ClientError::Protocol(
                "expected a reference, got a value".into(),
            )),
        }
    }
}

pub(crate) type Outcome = Result<BridgeResponse, ClientError>;

/// A queued evaluation.
///
/// The request is already in the scope's queue; awaiting only waits for its
/// outcome. Dropping an `Evaluation` does not cancel the request.
pub struct Evaluation {
    scope: Scope,
    rx: oneshot::Receiver<Outcome>,
}

impl Evaluation {
    pub(crate) const fn new(scope: Scope, rx: oneshot::Receiver<Outcome>) -> Self {
        Self { scope, rx }
    }
}

impl Future for Evaluation {
    type Output = Result<Resolved, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Closed)),
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.and_then(|r| this.scope.resolve(r))),
        }
    }
}
