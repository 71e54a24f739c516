//! Rhai-backed evaluator.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use remote_objects_core::{ChannelSecret, EvalError, Evaluator, Graph, Uid};
use rhai::{Dynamic, Engine, EvalAltResult};

use crate::{
    classify::Marshaller,
    deferred::Deferred,
    environment::HostEnvironment,
    namespace::{IdentityProbe, Namespace},
};

/// Evaluates expression text with a Rhai engine against session namespaces.
pub struct RhaiEvaluator {
    engine: Engine,
    probes: Vec<IdentityProbe>,
}

impl RhaiEvaluator {
    pub(crate) const fn new(engine: Engine, probes: Vec<IdentityProbe>) -> Self {
        Self { engine, probes }
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    fn run(&self, namespace: &Mutex<Namespace>, code: &str) -> Result<Dynamic, EvalError> {
        let mut ns = lock(namespace)?;
        tracing::debug!(uid = %ns.uid(), len = code.len(), "Evaluating expression");
        self.engine
            .eval_with_scope::<Dynamic>(ns.scope_mut(), code)
            .map_err(|e| EvalError::new(describe(&e)))
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        HostEnvironment::new().build()
    }
}

#[async_trait]
impl Evaluator for RhaiEvaluator {
    type Namespace = Namespace;

    fn create_namespace(&self, uid: &Uid) -> Namespace {
        Namespace::new(uid.clone())
    }

    async fn execute(
        &self,
        namespace: &Mutex<Namespace>,
        code: &str,
        channel: &ChannelSecret,
    ) -> Result<Graph, EvalError> {
        let mut value = self.run(namespace, code)?;

        // The namespace stays unlocked while a deferred value settles.
        while let Some(deferred) = value.clone().try_cast::<Deferred>() {
            value = deferred.settle().await?;
        }

        let mut ns = lock(namespace)?;
        let origin = ns.key_at(code);
        Marshaller::new(&mut ns, &self.probes, channel.as_str())
            .reusing(origin)
            .finish(value)
    }
}

fn lock(namespace: &Mutex<Namespace>) -> Result<MutexGuard<'_, Namespace>, EvalError> {
    namespace
        .lock()
        .map_err(|_| EvalError::new("Session namespace is poisoned"))
}

// Thrown values report as themselves, not wrapped in the call stack.
fn describe(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => describe(inner),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicI64, Ordering},
        },
        time::Duration,
    };

    use rhai::INT;
    use serde_json::json;

    use super::*;
    use crate::namespace::HostHandle;

    #[derive(Clone)]
    struct Counter(Arc<AtomicI64>);

    impl HostHandle for Counter {
        fn identity(&self) -> usize {
            Arc::as_ptr(&self.0) as usize
        }
    }

    #[derive(Clone)]
    struct Ticket;

    fn evaluator() -> RhaiEvaluator {
        let mut env = HostEnvironment::new();
        env.register_handle::<Counter>("Counter")
            .register_module("counter", Counter(Arc::new(AtomicI64::new(0))));
        env.engine_mut()
            .register_fn("make_counter", || Counter(Arc::new(AtomicI64::new(0))))
            .register_fn("bump", |c: &mut Counter| -> INT {
                c.0.fetch_add(1, Ordering::SeqCst) + 1
            })
            .register_fn("later", |v: INT| {
                Deferred::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Dynamic::from(v))
                })
            })
            .register_fn("ticket", || Ticket)
            .register_fn("rejected", || Deferred::settled(Err("late failure".into())));
        env.build()
    }

    fn session(ev: &RhaiEvaluator, uid: &str) -> Mutex<Namespace> {
        Mutex::new(ev.create_namespace(&Uid::from(uid)))
    }

    async fn eval(
        ev: &RhaiEvaluator,
        ns: &Mutex<Namespace>,
        code: &str,
    ) -> Result<serde_json::Value, EvalError> {
        let channel = ChannelSecret::from("chan");
        Ok(ev.execute(ns, code, &channel).await?.to_json().unwrap())
    }

    #[tokio::test]
    async fn test_scalar_result() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        assert_eq!(eval(&ev, &ns, "1 + 1").await.unwrap(), json!(2));
        assert_eq!(eval(&ev, &ns, "()").await.unwrap(), json!(null));
    }

    #[tokio::test]
    async fn test_errors_become_data() {
        let ev = evaluator();
        let ns = session(&ev, "u1");

        let thrown = eval(&ev, &ns, r#"throw "boom""#).await.unwrap_err();
        assert_eq!(thrown.message, "boom");

        let missing = eval(&ev, &ns, "undefined_thing.foo").await.unwrap_err();
        assert!(!missing.message.is_empty());

        let syntax = eval(&ev, &ns, "1 +").await.unwrap_err();
        assert!(!syntax.message.is_empty());

        // The session survives failed expressions.
        assert_eq!(eval(&ev, &ns, "2 * 3").await.unwrap(), json!(6));
    }

    #[tokio::test]
    async fn test_state_persists_per_session() {
        let ev = evaluator();
        let a = session(&ev, "a");
        let b = session(&ev, "b");

        eval(&ev, &a, "let x = 40;").await.unwrap();
        assert_eq!(eval(&ev, &a, "x + 2").await.unwrap(), json!(42));
        assert!(eval(&ev, &b, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_records_and_sequences() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        assert_eq!(
            eval(&ev, &ns, r#"#{a: 1, b: [true, (), "s"]}"#).await.unwrap(),
            json!({"a": 1, "b": [true, null, "s"]})
        );
    }

    #[tokio::test]
    async fn test_record_keys_come_back_sorted() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        let record = eval(&ev, &ns, "#{zeta: 1, alpha: 2, mid: 3}").await.unwrap();
        let keys: Vec<_> = record.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_blob_and_date() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        assert_eq!(
            eval(&ev, &ns, "let b = blob(); b.push(104); b.push(105); b")
                .await
                .unwrap(),
            json!("hi")
        );
        assert_eq!(
            eval(&ev, &ns, r#"date("2024-01-02T03:04:05Z")"#).await.unwrap(),
            json!("2024-01-02T03:04:05.000Z")
        );
    }

    #[tokio::test]
    async fn test_opaque_values_are_referenced() {
        let ev = evaluator();
        let ns = session(&ev, "u1");

        let first = eval(&ev, &ns, r#"require("counter")"#).await.unwrap();
        let again = eval(&ev, &ns, r#"require("counter")"#).await.unwrap();
        let fresh = eval(&ev, &ns, "make_counter()").await.unwrap();

        assert_eq!(first, json!({"chan": r#"sandbox["u1"].instances["0"]"#}));
        assert_eq!(again, first);
        assert_eq!(fresh, json!({"chan": r#"sandbox["u1"].instances["1"]"#}));

        // The path resolves to the retained object.
        assert_eq!(
            eval(&ev, &ns, r#"sandbox["u1"].instances["0"].bump()"#)
                .await
                .unwrap(),
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_reawaited_references_keep_their_key() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        let path = r#"sandbox["u1"].instances["0"]"#;

        let first = eval(&ev, &ns, "ticket()").await.unwrap();
        assert_eq!(first, json!({"chan": path}));
        for _ in 0..2 {
            assert_eq!(eval(&ev, &ns, path).await.unwrap(), first);
        }
        assert_eq!(ns.lock().unwrap().instance_count(), 1);

        // A new value of the same type is still a new instance.
        assert_eq!(
            eval(&ev, &ns, "ticket()").await.unwrap(),
            json!({"chan": r#"sandbox["u1"].instances["1"]"#})
        );
    }

    #[tokio::test]
    async fn test_until_waits_for_event() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        eval(&ev, &ns, "let e = emitter();").await.unwrap();

        let (waited, emitted) = tokio::join!(
            eval(&ev, &ns, r#"until(e).once("ready")"#),
            eval(&ev, &ns, r#"e.emit("ready", 42)"#),
        );
        assert_eq!(emitted.unwrap(), json!(1));
        assert_eq!(waited.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_construct_slot_is_memoized() {
        let ev = evaluator();
        let ns = session(&ev, "u1");
        let code = r#"if type_of(sandbox["u1"].instances["s:0"]) == "()" { sandbox["u1"].instances["s:0"] = make_counter(); } sandbox["u1"].instances["s:0"].bump()"#;

        assert_eq!(eval(&ev, &ns, code).await.unwrap(), json!(1));
        assert_eq!(eval(&ev, &ns, code).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_deferred_values_settle() {
        let ev = evaluator();
        let ns = session(&ev, "u1");

        assert_eq!(eval(&ev, &ns, "later(5)").await.unwrap(), json!(5));

        let err = eval(&ev, &ns, "rejected()").await.unwrap_err();
        assert_eq!(err.message, "late failure");

        // Only a top-level deferred is awaited.
        assert_eq!(
            eval(&ev, &ns, "[later(1)]").await.unwrap(),
            json!([{"chan": r#"sandbox["u1"].instances["0"]"#}])
        );
    }
}
