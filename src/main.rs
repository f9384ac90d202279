//! Binary entry point: loads configuration, wires a default in-memory
//! [`broker_core::EchoResponder`] into the engine, mounts the HTTP adapter,
//! and serves until interrupted.
//!
//! A production deployment swaps `EchoResponder` for a real LLM-backed
//! `Responder` implementation; the engine and HTTP layer are unaware of the
//! difference.

use std::sync::Arc;
use std::time::Duration;

use broker_core::{Engine, EchoResponder};
use broker_shared::{logging, BrokerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BrokerConfig::load()?;
    logging::init_tracing(&config.log_level);

    tracing::info!(
        host = %config.host,
        port = config.port,
        max_queue_size = config.max_queue_size,
        "broker starting"
    );

    let responder = Arc::new(EchoResponder::new(Duration::from_millis(30)));
    let (engine, mut worker_handle) = Engine::new(config.clone(), responder);

    let app = broker_http::router(engine.clone());
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    // The dispatch worker only ever returns by way of `Engine::shutdown`
    // tripping its cancellation token, which happens below, after `serve`
    // exits. If it returns (or panics) any other way, that's an invariant
    // violation inside the worker — a bug, not a runtime failure — and
    // tokio would otherwise just swallow the panic at the task boundary,
    // leaving the server up with nothing draining the queue. Race the two
    // futures and exit the process outright if the worker wins.
    tokio::select! {
        result = serve => {
            result?;
        }
        join_result = &mut worker_handle => {
            match join_result {
                Ok(()) => tracing::error!("dispatch worker exited unexpectedly"),
                Err(err) => tracing::error!(%err, "dispatch worker task panicked"),
            }
            std::process::exit(1);
        }
    }

    engine.shutdown(worker_handle).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
