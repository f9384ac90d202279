//! Thin axum adapter translating HTTP requests into `broker-core::Engine`
//! operations and serializing responses / SSE event streams. Contains no
//! scheduling or state-machine logic of its own.

pub mod dto;
pub mod error;
pub mod routes;
pub mod sse;

use std::sync::Arc;

use axum::Router;
use broker_core::Engine;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Axum state injected into every handler: a handle to the one engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Build the full route table, with a `tower-http` tracing layer for
/// request logging and a permissive CORS layer (browser-based SSE clients
/// need `Access-Control-Allow-Origin`).
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .merge(routes::router())
        .with_state(AppState { engine })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
