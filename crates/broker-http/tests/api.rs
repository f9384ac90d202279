//! Integration tests driving the axum router directly via
//! `tower::ServiceExt::oneshot`, exercising end-to-end scenarios against
//! the router rather than the bare `Engine`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use broker_core::{EchoResponder, Engine, ScriptedResponder};
use broker_shared::BrokerConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

fn config() -> BrokerConfig {
    BrokerConfig {
        max_queue_size: 10,
        processing_timeout_secs: 5,
        ..BrokerConfig::default()
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submit_then_status_then_cancel() {
    let (engine, handle) = Engine::new(
        config(),
        Arc::new(ScriptedResponder::new(["slow"]).with_pre_delay(Duration::from_secs(5))),
    );
    let app = broker_http::router(engine.clone());

    let submit = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/messages")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "user_message": "hello", "priority": "normal" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(submit.status(), StatusCode::ACCEPTED);
    let submitted = body_json(submit).await;
    let id = submitted["id"].as_str().unwrap().to_string();
    assert_eq!(submitted["state"], "queued");

    let status = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/messages/{id}/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status_body = body_json(status).await;
    assert_eq!(status_body["message_id"], id);
    assert_eq!(status_body["user_message"], "hello");

    let cancel_first = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/messages/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Racy against the single worker: it may already have started
    // processing this message by the time cancel arrives. Either a clean
    // cancel (200) or a 409 NotCancellable (because it is PROCESSING) is a
    // correct outcome; what's never acceptable is 404 or 500.
    assert!(
        cancel_first.status() == StatusCode::OK || cancel_first.status() == StatusCode::CONFLICT
    );

    engine.shutdown(handle).await;
}

#[tokio::test]
async fn submit_empty_prompt_is_bad_request() {
    let (engine, handle) = Engine::new(config(), Arc::new(EchoResponder::default()));
    let app = broker_http::router(engine.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/messages")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "user_message": "" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    engine.shutdown(handle).await;
}

#[tokio::test]
async fn status_on_unknown_id_is_not_found() {
    let (engine, handle) = Engine::new(config(), Arc::new(EchoResponder::default()));
    let app = broker_http::router(engine.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/messages/{}/status", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    engine.shutdown(handle).await;
}

#[tokio::test]
async fn priority_ordering_s1() {
    let (engine, handle) = Engine::new(
        config(),
        Arc::new(ScriptedResponder::new(Vec::<String>::new()).with_pre_delay(Duration::from_secs(5))),
    );
    let app = broker_http::router(engine.clone());

    async fn submit(app: &axum::Router, prompt: &str, priority: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "user_message": prompt, "priority": priority }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        body["id"].as_str().unwrap().to_string()
    }

    // The worker is already blocked on the first ScriptedResponder's
    // 5s pre-delay by the time these land, so none of them dispatch yet.
    let _a = submit(&app, "a", "normal").await;
    let _b = submit(&app, "b", "low").await;
    let c = submit(&app, "c", "high").await;

    let queue = app
        .oneshot(Request::builder().uri("/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(queue).await;
    let preview = body["queued_preview"].as_array().unwrap();
    // `c` (HIGH) must be ahead of `a` and `b` regardless of which message is
    // currently occupying the single PROCESSING slot.
    let c_position = preview
        .iter()
        .find(|p| p["id"] == c)
        .map(|p| p["position"].as_u64().unwrap());
    assert_eq!(c_position, Some(0));

    engine.shutdown(handle).await;
}
