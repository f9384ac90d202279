//! The HTTP route table. Handlers validate nothing themselves —
//! `InvalidInput` from the core maps to 400 via [`crate::error::ApiError`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use uuid::Uuid;

use broker_shared::MessageState;

use crate::dto::{
    message_status, HealthResponse, MessageStatusResponse, QueueSummaryResponse, SubmitRequest,
    SubmitResponse, ThreadMetadataResponse,
};
use crate::error::ApiError;
use crate::sse::{event_stream, sse_response};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(submit_message))
        .route("/messages/{id}/status", get(get_status))
        .route("/messages/{id}/stream", get(stream_message))
        .route("/messages/{id}", delete(cancel_message))
        .route("/queue", get(queue_summary))
        .route("/threads", get(list_threads))
        .route("/threads/{tid}", get(thread_metadata))
        .route("/threads/{tid}/messages", get(thread_messages))
        .route("/health", get(health))
}

async fn submit_message(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .engine
        .submit(request.user_message, request.priority, request.thread_id)?;
    let response = SubmitResponse {
        id: outcome.message.id,
        state: outcome.message.state,
        queue_position: outcome.queue_position,
        created_at: outcome.message.created_at,
        thread_id: outcome.message.thread_id,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageStatusResponse>, ApiError> {
    let view = state.engine.get(id)?;
    Ok(Json(view.into()))
}

async fn stream_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.engine.get(id)?;
    let waiting_position = if view.message.state == MessageState::Queued {
        view.queue_position
    } else {
        None
    };

    let subscription = state.engine.subscribe(id)?;
    let receiver = (!subscription.already_terminal).then_some(subscription.receiver);
    let stream = event_stream(waiting_position, subscription.replay, receiver);
    Ok(sse_response(stream, state.engine.config().keepalive_interval()))
}

async fn cancel_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageStatusResponse>, ApiError> {
    let message = state.engine.cancel(id)?;
    Ok(Json(message_status(&message, None)))
}

async fn queue_summary(State(state): State<AppState>) -> Json<QueueSummaryResponse> {
    Json(state.engine.summary().into())
}

async fn list_threads(State(state): State<AppState>) -> Json<Vec<ThreadMetadataResponse>> {
    Json(state.engine.threads().into_iter().map(Into::into).collect())
}

async fn thread_metadata(
    State(state): State<AppState>,
    Path(tid): Path<String>,
) -> Result<Json<ThreadMetadataResponse>, ApiError> {
    let meta = state.engine.thread_metadata(&tid)?;
    Ok(Json(meta.into()))
}

async fn thread_messages(
    State(state): State<AppState>,
    Path(tid): Path<String>,
) -> Result<Json<Vec<MessageStatusResponse>>, ApiError> {
    let messages = state.engine.thread_messages(&tid)?;
    Ok(Json(
        messages.iter().map(|m| message_status(m, None)).collect(),
    ))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let summary = state.engine.summary();
    Json(HealthResponse {
        status: "ok",
        queued: summary.count_by_state.get(&MessageState::Queued).copied().unwrap_or(0),
        processing: summary.processing.is_some(),
    })
}
