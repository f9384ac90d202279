//! Priority queue, state machine, stream broadcaster and dispatch worker —
//! the asynchronous queue-and-dispatch engine fronting a pluggable AI
//! worker.
//!
//! This crate has no HTTP dependency: `broker-http` is a thin adapter on
//! top of the single [`Engine`] entry point exposed here.

pub mod broadcaster;
pub mod dispatch;
pub mod engine;
pub mod responder;
pub mod scheduler;
pub mod store;

pub use broadcaster::{StreamBroadcaster, StreamEvent, Subscription};
pub use dispatch::DispatchWorker;
pub use engine::{Engine, MessageView, QueueSummary, QueuedPreview, SubmitOutcome};
pub use responder::{
    EchoResponder, Responder, ResponderChunk, ResponderError, ResponderStream, ScriptedResponder,
};
pub use scheduler::{Dequeued, PriorityScheduler};
pub use store::{MessageStore, TransitionUpdate};
