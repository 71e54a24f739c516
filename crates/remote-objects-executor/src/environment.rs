//! Host environment the evaluator runs in.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use rhai::{Dynamic, Engine, EvalAltResult, INT};

use crate::{
    deferred::Deferred,
    emitter::Emitter,
    evaluator::RhaiEvaluator,
    namespace::{HostHandle, IdentityProbe, probe},
};

/// Builder for the engine expressions are evaluated with.
///
/// Everything registered here is reachable by any authenticated expression.
/// Only expose what a connected client may use without further checks.
pub struct HostEnvironment {
    engine: Engine,
    modules: HashMap<String, Dynamic>,
    probes: Vec<IdentityProbe>,
}

impl HostEnvironment {
    /// Standard engine plus dates, deferred values and `print` routed to
    /// tracing.
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();

        engine.on_print(|text| tracing::info!(target: "remote_objects::print", "{text}"));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(target: "remote_objects::print", ?source, %pos, "{text}");
        });

        engine
            .register_type_with_name::<Deferred>("Deferred")
            .register_type_with_name::<DateTime<Utc>>("Date")
            .register_fn("now", Utc::now)
            .register_fn("date", parse_date)
            .register_fn("to_string", |date: &mut DateTime<Utc>| {
                date.to_rfc3339_opts(SecondsFormat::Millis, true)
            })
            .register_fn("to_debug", |date: &mut DateTime<Utc>| {
                format!("Date({})", date.to_rfc3339_opts(SecondsFormat::Millis, true))
            })
            .register_get("timestamp", |date: &mut DateTime<Utc>| -> INT {
                date.timestamp_millis()
            });

        engine
            .register_type_with_name::<Emitter>("Emitter")
            .register_fn("emitter", Emitter::new)
            .register_fn("until", |emitter: &mut Emitter| emitter.clone())
            .register_fn("once", |emitter: &mut Emitter, event: &str| emitter.once(event))
            .register_fn("emit", |emitter: &mut Emitter, event: &str, value: Dynamic| {
                count(emitter.emit(event, &value))
            })
            .register_fn("emit", |emitter: &mut Emitter, event: &str| {
                count(emitter.emit(event, &Dynamic::UNIT))
            });

        Self {
            engine,
            modules: HashMap::new(),
            probes: vec![probe::<Emitter>],
        }
    }

    /// Direct access to the engine for registering functions and types.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Make `module` available to expressions as `require(name)`.
    pub fn register_module<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        module: T,
    ) -> &mut Self {
        self.modules.insert(name.into(), Dynamic::from(module));
        self
    }

    /// Register a host type whose values keep their instance key when
    /// returned repeatedly.
    pub fn register_handle<T: HostHandle>(&mut self, name: &str) -> &mut Self {
        self.engine.register_type_with_name::<T>(name);
        self.probes.push(probe::<T>);
        self
    }

    /// Finish the environment.
    #[must_use]
    pub fn build(self) -> RhaiEvaluator {
        let Self {
            mut engine,
            modules,
            probes,
        } = self;

        let modules = Arc::new(modules);
        engine.register_fn(
            "require",
            move |name: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                modules
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("Cannot find module '{name}'").into())
            },
        );

        RhaiEvaluator::new(engine, probes)
    }
}

fn count(n: usize) -> INT {
    INT::try_from(n).unwrap_or(INT::MAX)
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, Box<EvalAltResult>> {
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| format!("Invalid date '{text}': {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dates() {
        let engine = HostEnvironment::new().engine;
        let text: String = engine
            .eval(r#"date("2024-01-02T03:04:05+01:00").to_string()"#)
            .unwrap();
        assert_eq!(text, "2024-01-02T02:04:05.000Z");

        let millis: INT = engine.eval(r#"date("1970-01-01T00:00:01Z").timestamp"#).unwrap();
        assert_eq!(millis, 1000);

        assert!(engine.eval::<Dynamic>(r#"date("yesterday")"#).is_err());
    }

    #[derive(Clone)]
    struct Files;

    #[test]
    fn test_require_unknown_module() {
        let mut env = HostEnvironment::new();
        env.register_module("answer", 42 as INT)
            .register_module("files", Files);
        env.engine_mut().register_type_with_name::<Files>("Files");
        let evaluator = env.build();

        let answer: INT = evaluator.engine().eval(r#"require("answer")"#).unwrap();
        assert_eq!(answer, 42);
        let kind: String = evaluator
            .engine()
            .eval(r#"type_of(require("files"))"#)
            .unwrap();
        assert_eq!(kind, "Files");

        let err = evaluator
            .engine()
            .eval::<Dynamic>(r#"require("fs")"#)
            .unwrap_err();
        assert!(err.to_string().contains("Cannot find module 'fs'"));
    }
}
