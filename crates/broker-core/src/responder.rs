//! The external, pluggable, streaming text-generation capability.
//!
//! The core knows nothing about LLMs: it drives any `Responder`
//! implementation identically. `EchoResponder` and `ScriptedResponder` below
//! are deterministic test doubles; a real backend is a third implementation
//! wired in at `main` and never referenced by `broker-core` itself.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;

/// One item yielded by a [`Responder`] stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderChunk {
    /// An incremental piece of output text.
    Text(String),
    /// Marks successful completion. `Some(text)` is an explicit canonical
    /// result that wins over `concat(chunks)`; `None` means the dispatch
    /// worker should compute the result itself.
    Final(Option<String>),
}

/// Failure surfaced by a [`Responder`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResponderError {
    #[error("responder cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// A lazy, cancellable sequence of [`ResponderChunk`]s.
pub type ResponderStream =
    Pin<Box<dyn Stream<Item = Result<ResponderChunk, ResponderError>> + Send>>;

/// The pluggable AI backend. Implementations must honor `cancel`: once
/// tripped, the stream should stop yielding new text promptly (it may still
/// finish delivering work already in flight).
#[async_trait]
pub trait Responder: Send + Sync {
    async fn stream(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<ResponderStream, ResponderError>;
}

/// Deterministic test/demo responder: splits the prompt on spaces (keeping
/// the delimiter attached to each chunk, so `concat` reconstructs it
/// exactly) and yields one chunk per word with a configurable delay between
/// them.
#[derive(Debug, Clone)]
pub struct EchoResponder {
    pub chunk_delay: Duration,
}

impl EchoResponder {
    pub fn new(chunk_delay: Duration) -> Self {
        EchoResponder { chunk_delay }
    }
}

impl Default for EchoResponder {
    fn default() -> Self {
        EchoResponder::new(Duration::from_millis(0))
    }
}

#[async_trait]
impl Responder for EchoResponder {
    async fn stream(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<ResponderStream, ResponderError> {
        let words: Vec<String> = prompt.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.chunk_delay;

        enum State {
            Words(std::vec::IntoIter<String>),
            Done,
        }

        let stream = stream::unfold(
            (State::Words(words.into_iter()), cancel),
            move |(state, cancel)| async move {
                match state {
                    State::Words(mut iter) => {
                        if cancel.is_cancelled() {
                            return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                        }
                        match iter.next() {
                            Some(word) => {
                                if !delay.is_zero() {
                                    tokio::select! {
                                        _ = tokio::time::sleep(delay) => {}
                                        _ = cancel.cancelled() => {
                                            return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                                        }
                                    }
                                }
                                Some((Ok(ResponderChunk::Text(word)), (State::Words(iter), cancel)))
                            }
                            None => Some((Ok(ResponderChunk::Final(None)), (State::Done, cancel))),
                        }
                    }
                    State::Done => None,
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

/// Test double that replays a fixed, pre-scripted sequence of chunks, for
/// tests that need exact control over timing and outcome (late-subscriber
/// and timeout scenarios).
#[derive(Debug, Clone)]
pub struct ScriptedResponder {
    pub chunks: Vec<String>,
    pub chunk_delay: Duration,
    /// Delay before the first chunk is yielded; used to simulate a
    /// responder that hangs long enough to trip the processing timeout.
    pub pre_delay: Duration,
    /// Explicit final result overriding `concat(chunks)`. `None` lets the
    /// worker compute it.
    pub explicit_result: Option<String>,
    /// If set, the stream ends with this error instead of a `Final` item.
    pub error: Option<String>,
}

impl ScriptedResponder {
    pub fn new(chunks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedResponder {
            chunks: chunks.into_iter().map(Into::into).collect(),
            chunk_delay: Duration::ZERO,
            pre_delay: Duration::ZERO,
            explicit_result: None,
            error: None,
        }
    }

    pub fn with_pre_delay(mut self, delay: Duration) -> Self {
        self.pre_delay = delay;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn stream(
        &self,
        _prompt: &str,
        cancel: CancellationToken,
    ) -> Result<ResponderStream, ResponderError> {
        let chunks = self.chunks.clone();
        let chunk_delay = self.chunk_delay;
        let pre_delay = self.pre_delay;
        let explicit_result = self.explicit_result.clone();
        let error = self.error.clone();

        let stream = stream::unfold(
            (State::PreDelay, cancel),
            move |(state, cancel)| {
                let chunk_delay = chunk_delay;
                let pre_delay = pre_delay;
                let explicit_result = explicit_result.clone();
                let error = error.clone();
                let chunks = chunks.clone();
                async move {
                    match state {
                        State::PreDelay => {
                            if !pre_delay.is_zero() {
                                tokio::select! {
                                    _ = tokio::time::sleep(pre_delay) => {}
                                    _ = cancel.cancelled() => {
                                        return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                                    }
                                }
                            }
                            if cancel.is_cancelled() {
                                return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                            }
                            Self::advance(
                                State::Chunks(chunks.into_iter()),
                                cancel,
                                chunk_delay,
                                &explicit_result,
                                &error,
                            )
                            .await
                        }
                        other => {
                            Self::advance(other, cancel, chunk_delay, &explicit_result, &error)
                                .await
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

impl ScriptedResponder {
    async fn advance(
        state: State,
        cancel: CancellationToken,
        chunk_delay: Duration,
        explicit_result: &Option<String>,
        error: &Option<String>,
    ) -> Option<(Result<ResponderChunk, ResponderError>, (State, CancellationToken))> {
        match state {
            State::Chunks(mut iter) => {
                if cancel.is_cancelled() {
                    return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                }
                match iter.next() {
                    Some(text) => {
                        if !chunk_delay.is_zero() {
                            tokio::select! {
                                _ = tokio::time::sleep(chunk_delay) => {}
                                _ = cancel.cancelled() => {
                                    return Some((Err(ResponderError::Cancelled), (State::Done, cancel)));
                                }
                            }
                        }
                        Some((Ok(ResponderChunk::Text(text)), (State::Chunks(iter), cancel)))
                    }
                    None => Self::finish(cancel, explicit_result, error),
                }
            }
            State::Finishing => Self::finish(cancel, explicit_result, error),
            State::Done | State::PreDelay => None,
        }
    }

    fn finish(
        cancel: CancellationToken,
        explicit_result: &Option<String>,
        error: &Option<String>,
    ) -> Option<(Result<ResponderChunk, ResponderError>, (State, CancellationToken))> {
        if let Some(message) = error {
            Some((
                Err(ResponderError::Failed(message.clone())),
                (State::Done, cancel),
            ))
        } else {
            Some((
                Ok(ResponderChunk::Final(explicit_result.clone())),
                (State::Done, cancel),
            ))
        }
    }
}

/// Internal drive state for [`ScriptedResponder`]'s stream. `Finishing` is
/// unreachable from `stream()` (the pre-delay path always goes straight to
/// `Chunks`) but kept so `advance` has a single place to emit the terminal
/// item regardless of how a future variant might reach it.
enum State {
    PreDelay,
    Chunks(std::vec::IntoIter<String>),
    Finishing,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn echo_responder_splits_on_spaces_and_ends_with_final() {
        let responder = EchoResponder::default();
        let cancel = CancellationToken::new();
        let mut stream = responder.stream("The answer is 42.", cancel).await.unwrap();

        let mut texts = Vec::new();
        let mut saw_final = false;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                ResponderChunk::Text(t) => texts.push(t),
                ResponderChunk::Final(explicit) => {
                    saw_final = true;
                    assert!(explicit.is_none());
                }
            }
        }
        assert_eq!(texts, vec!["The ", "answer ", "is 42."]);
        assert!(saw_final);
    }

    #[tokio::test]
    async fn scripted_responder_can_fail() {
        let responder = ScriptedResponder::new(["a", "b"]).with_error("boom");
        let cancel = CancellationToken::new();
        let mut stream = responder.stream("ignored", cancel).await.unwrap();

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(ResponderChunk::Text("a".into())));
        assert_eq!(items[1], Ok(ResponderChunk::Text("b".into())));
        assert_eq!(items[2], Err(ResponderError::Failed("boom".into())));
    }

    #[tokio::test]
    async fn scripted_responder_honors_explicit_result() {
        let responder = ScriptedResponder::new(["a"]);
        let mut responder = responder;
        responder.explicit_result = Some("override".into());
        let cancel = CancellationToken::new();
        let mut stream = responder.stream("ignored", cancel).await.unwrap();

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item.unwrap());
        }
        assert_eq!(last, Some(ResponderChunk::Final(Some("override".into()))));
    }
}
