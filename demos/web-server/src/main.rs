//! Demo web server exposing a few host modules to the browser.
//!
//! Run with: cargo run -p web-server-demo
//!
//! Then open http://localhost:3000 in your browser.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use axum::{Router, middleware};
use remote_objects_core::BridgeConfig;
use remote_objects_executor::{Deferred, HostEnvironment, HostHandle, RhaiEvaluator};
use remote_objects_transport::{Bridge, bridge_middleware};
use rhai::{Dynamic, INT};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared counter, reachable as `require("counter")`.
#[derive(Clone)]
struct Counter(Arc<AtomicI64>);

impl HostHandle for Counter {
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// File access, reachable as `require("fs")`.
#[derive(Clone)]
struct Fs;

fn environment() -> RhaiEvaluator {
    let mut env = HostEnvironment::new();
    env.register_handle::<Counter>("Counter")
        .register_module("counter", Counter(Arc::new(AtomicI64::new(0))))
        .register_module("fs", Fs);

    env.engine_mut()
        .register_type_with_name::<Fs>("Fs")
        .register_fn("bump", |c: &mut Counter| -> INT {
            c.0.fetch_add(1, Ordering::SeqCst) + 1
        })
        .register_get("value", |c: &mut Counter| -> INT { c.0.load(Ordering::SeqCst) })
        .register_fn("read", |_: &mut Fs, path: &str| {
            let path = path.to_string();
            Deferred::spawn(async move {
                tokio::fs::read_to_string(&path)
                    .await
                    .map(Dynamic::from)
                    .map_err(|e| format!("{path}: {e}"))
            })
        })
        .register_fn("sleep", |ms: INT| {
            let ms = u64::try_from(ms).unwrap_or_default();
            Deferred::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Dynamic::UNIT)
            })
        });

    env.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    let port: u16 = match std::env::var("PORT") {
        Ok(port) => port.parse().context("invalid PORT")?,
        Err(_) => 3000,
    };
    let public = concat!(env!("CARGO_MANIFEST_DIR"), "/public");

    let bridge = Bridge::new(environment(), config);

    // Bridge traffic is answered by the middleware; everything else is static.
    let app = Router::new()
        .fallback_service(ServeDir::new(public))
        .layer(middleware::from_fn_with_state(
            bridge,
            bridge_middleware::<RhaiEvaluator>,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
