//! Builder scopes and their ordered evaluation queue.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use remote_objects_core::{BridgeResponse, protocol::as_reference};
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::Connection,
    error::ClientError,
    expr::{Arg, Chain, string_literal},
    remote::{Evaluation, Outcome, Remote, Resolved},
};

struct Job {
    code: String,
    reply: oneshot::Sender<Outcome>,
}

struct Inner {
    id: usize,
    slots: AtomicUsize,
    connection: Arc<Connection>,
    queue: mpsc::UnboundedSender<Job>,
}

/// One builder scope.
///
/// Evaluations issued through a scope are queued when issued and sent one at
/// a time, so their effects happen in issue order even if nobody awaits
/// them.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

impl Scope {
    /// Must be called within a tokio runtime.
    pub(crate) fn new(id: usize, connection: Arc<Connection>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(Arc::clone(&connection), rx));
        Self {
            inner: Arc::new(Inner {
                id,
                slots: AtomicUsize::new(0),
                connection,
                queue,
            }),
        }
    }

    /// The session record, `sandbox["<uid>"]`.
    #[must_use]
    pub fn global(&self) -> Remote {
        self.reference(self.record())
    }

    /// A module registered with the host environment.
    #[must_use]
    pub fn require(&self, name: &str) -> Remote {
        self.reference(format!("require({})", string_literal(name)))
    }

    /// A host function, to be invoked with [`Remote::call`].
    #[must_use]
    pub fn function(&self, name: &str) -> Remote {
        self.reference(name)
    }

    /// An event source that waits for events: `until(emitter).get("once")
    /// .call(["ready"])` settles with the value of the next `ready` event.
    #[must_use]
    pub fn until(&self, emitter: impl Into<Arg>) -> Remote {
        self.function("until").call([emitter.into()])
    }

    /// A value computed by `code`. Variables it declares stay local to it.
    #[must_use]
    pub fn eval(&self, code: &str) -> Remote {
        self.reference(format!("{{ {code} }}"))
    }

    /// A remote value addressed by raw expression text.
    #[must_use]
    pub fn reference(&self, expression: impl Into<String>) -> Remote {
        Remote::new(self.clone(), Chain::root(expression))
    }

    /// Queue `code` as a program of its own. Variables it declares persist
    /// in the session.
    pub fn run(&self, code: impl Into<String>) -> Evaluation {
        self.evaluate(code.into())
    }

    /// Delete the entry `remote` addresses from its container.
    pub fn remove(&self, remote: &Remote) -> Evaluation {
        match remote.chain().removal() {
            Some(code) => self.evaluate(code),
            None => self.fail(ClientError::Unsupported("removing a computed value")),
        }
    }

    pub(crate) fn evaluate(&self, code: String) -> Evaluation {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(job)) = self.inner.queue.send(Job { code, reply }) {
            let _ = job.reply.send(Err(ClientError::Closed));
        }
        Evaluation::new(self.clone(), rx)
    }

    fn fail(&self, error: ClientError) -> Evaluation {
        let (reply, rx) = oneshot::channel();
        let _ = reply.send(Err(error));
        Evaluation::new(self.clone(), rx)
    }

    pub(crate) fn next_slot(&self) -> String {
        let n = self.inner.slots.fetch_add(1, Ordering::SeqCst);
        format!(
            "{}.instances[{}]",
            self.record(),
            string_literal(&format!("{}:{n}", self.inner.id))
        )
    }

    pub(crate) fn resolve(&self, response: BridgeResponse) -> Result<Resolved, ClientError> {
        match response {
            BridgeResponse::Error(message) => Err(ClientError::Remote(message)),
            BridgeResponse::Result(graph) => {
                let channel = self.inner.connection.channel();
                match as_reference(&graph, graph.root(), channel) {
                    Some(path) => Ok(Resolved::Remote(self.reference(path))),
                    None => Ok(Resolved::Value(graph)),
                }
            }
        }
    }

    fn record(&self) -> String {
        format!("sandbox[{}]", string_literal(self.inner.connection.uid()))
    }
}

async fn run(connection: Arc<Connection>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let outcome = connection.execute(&job.code).await;
        let _ = job.reply.send(outcome);
    }
}
