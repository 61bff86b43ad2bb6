//! Streaming reconciliation: applies incremental reply content to the
//! placeholder message of an in-flight request.
//!
//! A request can finish through two independent paths: a terminal chunk on
//! the stream, or the backend's unary result. Whichever arrives first while
//! the request is still registered wins; everything after deregistration
//! (late chunks, a result after cancellation) is ignored.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::StreamChunk,
    error::{Error, Result},
    events::StoreEvent,
    model::{Message, MessageStatus},
    store::{Store, StoreInner},
};

/// Ephemeral link from a request to the message it fills
#[derive(Debug, Clone)]
pub(crate) struct StreamRegistration {
    pub(crate) conversation_id: String,
    pub(crate) assistant_message_id: String,
    pub(crate) model_name: String,
    /// Set once any non-empty chunk has been applied
    pub(crate) received_chunk: bool,
    pub(crate) cancel: CancellationToken,
}

/// Table of in-flight streams keyed by request id
#[derive(Debug, Default)]
pub(crate) struct StreamRegistry {
    streams: HashMap<String, StreamRegistration>,
}

impl StreamRegistry {
    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    fn insert(&mut self, request_id: String, registration: StreamRegistration) {
        self.streams.insert(request_id, registration);
    }

    fn get_mut(&mut self, request_id: &str) -> Option<&mut StreamRegistration> {
        self.streams.get_mut(request_id)
    }

    fn remove(&mut self, request_id: &str) -> Option<StreamRegistration> {
        self.streams.remove(request_id)
    }

    pub(crate) fn has_conversation(&self, conversation_id: &str) -> bool {
        self.streams
            .values()
            .any(|s| s.conversation_id == conversation_id)
    }

    fn token(&self, request_id: &str) -> Option<CancellationToken> {
        self.streams.get(request_id).map(|s| s.cancel.clone())
    }

    /// Drop every registration for a conversation, signalling cancellation
    pub(crate) fn release_conversation(&mut self, conversation_id: &str) -> Vec<StreamRegistration> {
        let request_ids: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, s)| s.conversation_id == conversation_id)
            .map(|(id, _)| id.clone())
            .collect();
        request_ids
            .iter()
            .filter_map(|id| self.streams.remove(id))
            .inspect(|s| s.cancel.cancel())
            .collect()
    }
}

/// How a request ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Full reply from the unary path; used only if nothing was streamed
    pub final_content: Option<String>,
    pub token_count: Option<u32>,
    pub error: Option<String>,
}

impl Completion {
    /// Terminal stream chunk without content
    pub fn finished(token_count: Option<u32>) -> Self {
        Self {
            token_count,
            ..Default::default()
        }
    }

    /// Unary result carrying the whole reply
    pub fn with_content(content: impl Into<String>, token_count: Option<u32>) -> Self {
        Self {
            final_content: Some(content.into()),
            token_count,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Text stored in a reply that failed
pub fn format_error(error: &str) -> String {
    format!("Error: {}", error)
}

/// Open a placeholder reply and register its stream. Fails without touching
/// state if the conversation already has a reply in progress.
pub(crate) fn open_stream(
    inner: &mut StoreInner,
    conversation_id: &str,
    request_id: &str,
    model_name: &str,
    cancel: CancellationToken,
) -> Result<String> {
    let busy = inner.streams.has_conversation(conversation_id);
    let conversation = inner
        .state
        .conversation_mut(conversation_id)
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
    if busy || conversation.pending_reply().is_some() {
        return Err(Error::SendInFlight(conversation_id.to_string()));
    }

    let placeholder = Message::placeholder(model_name);
    let message_id = placeholder.id.clone();
    conversation.messages.push(placeholder);
    conversation.touch();

    inner.streams.insert(
        request_id.to_string(),
        StreamRegistration {
            conversation_id: conversation_id.to_string(),
            assistant_message_id: message_id.clone(),
            model_name: model_name.to_string(),
            received_chunk: false,
            cancel,
        },
    );
    inner.emit(StoreEvent::StreamStarted {
        conversation_id: conversation_id.to_string(),
        request_id: request_id.to_string(),
        message_id: message_id.clone(),
    });
    Ok(message_id)
}

fn apply_chunk_locked(inner: &mut StoreInner, request_id: &str, delta: &str) -> bool {
    if delta.is_empty() {
        return false;
    }
    let Some(registration) = inner.streams.get_mut(request_id) else {
        return false;
    };
    let conversation_id = registration.conversation_id.clone();
    let message_id = registration.assistant_message_id.clone();

    let Some(conversation) = inner.state.conversation_mut(&conversation_id) else {
        return false;
    };
    let Some(message) = conversation.message_mut(&message_id) else {
        return false;
    };
    if message.status != MessageStatus::Sending {
        return false;
    }
    message.content.push_str(delta);
    conversation.touch();
    registration.received_chunk = true;

    inner.emit(StoreEvent::StreamDelta {
        conversation_id,
        message_id,
        delta: delta.to_string(),
    });
    true
}

fn complete_locked(inner: &mut StoreInner, request_id: &str, completion: Completion) -> bool {
    let Some(registration) = inner.streams.remove(request_id) else {
        return false;
    };
    inner.in_flight.remove(&registration.conversation_id);

    let Some(conversation) = inner.state.conversation_mut(&registration.conversation_id) else {
        return true;
    };
    let Some(message) = conversation.message_mut(&registration.assistant_message_id) else {
        return true;
    };

    message.model_name = Some(registration.model_name.clone());
    if completion.token_count.is_some() {
        message.token_count = completion.token_count;
    }
    let status = if let Some(error) = completion.error {
        message.content = format_error(&error);
        message.is_error = true;
        MessageStatus::Failed
    } else {
        if !registration.received_chunk {
            if let Some(content) = completion.final_content {
                message.content = content;
            }
        }
        MessageStatus::Sent
    };
    message.status = status;
    conversation.touch();

    inner.emit(StoreEvent::StreamFinished {
        conversation_id: registration.conversation_id,
        message_id: registration.assistant_message_id,
        status,
    });
    true
}

fn cancel_locked(inner: &mut StoreInner, conversation_id: &str) -> bool {
    let released = inner.streams.release_conversation(conversation_id);
    let was_in_flight = inner.in_flight.remove(conversation_id);

    let Some(conversation) = inner.state.conversation_mut(conversation_id) else {
        return !released.is_empty() || was_in_flight;
    };
    let mut stopped = Vec::new();
    for message in &mut conversation.messages {
        if message.status == MessageStatus::Sending {
            message.status = MessageStatus::Sent;
            stopped.push(message.id.clone());
        }
    }
    if stopped.is_empty() && released.is_empty() && !was_in_flight {
        return false;
    }
    conversation.touch();
    for message_id in stopped {
        inner.emit(StoreEvent::StreamFinished {
            conversation_id: conversation_id.to_string(),
            message_id,
            status: MessageStatus::Sent,
        });
    }
    true
}

/// Settle a request whose driver went away before completing it. Only the
/// request's own registration is released, so a newer exchange on the same
/// conversation is left alone.
fn abandon_locked(inner: &mut StoreInner, request_id: &str) -> bool {
    let Some(conversation_id) = inner
        .streams
        .get_mut(request_id)
        .map(|s| s.conversation_id.clone())
    else {
        return false;
    };
    cancel_locked(inner, &conversation_id)
}

/// Applies stream events to conversation state through the store
#[derive(Clone)]
pub struct StreamReconciler {
    store: Store,
}

impl StreamReconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an empty `sending` assistant message to the conversation and
    /// register `request_id` against it. Returns the message id.
    pub fn begin_stream(
        &self,
        conversation_id: &str,
        request_id: &str,
        model_name: &str,
    ) -> Result<String> {
        self.store.update(|inner| {
            open_stream(
                inner,
                conversation_id,
                request_id,
                model_name,
                CancellationToken::new(),
            )
        })
    }

    /// Append a content delta. Returns `false` (and changes nothing) for
    /// unknown or already finished requests.
    pub fn apply_chunk(&self, request_id: &str, delta: &str) -> bool {
        self.store
            .update(|inner| apply_chunk_locked(inner, request_id, delta))
    }

    /// Finalize a request. Streamed content is kept on success; without any
    /// streamed content the unary `final_content` is written. Errors always
    /// replace the content. Returns `false` if the request was not registered.
    pub fn complete_stream(&self, request_id: &str, completion: Completion) -> bool {
        let completed = self
            .store
            .update(|inner| complete_locked(inner, request_id, completion));
        if completed {
            tracing::debug!("Stream {} completed", request_id);
        }
        completed
    }

    /// Stop the reply in progress for a conversation, keeping whatever content
    /// has arrived. Later chunks for the request are ignored.
    pub fn cancel_stream(&self, conversation_id: &str) -> bool {
        let cancelled = self
            .store
            .update(|inner| cancel_locked(inner, conversation_id));
        if cancelled {
            tracing::debug!("Cancelled stream for conversation {}", conversation_id);
        }
        cancelled
    }

    /// Release a request that will never be completed, keeping whatever
    /// content arrived. No-op once the request has finished.
    pub(crate) fn abandon(&self, request_id: &str) -> bool {
        self.store
            .update(|inner| abandon_locked(inner, request_id))
    }

    /// Apply one event from the backend's chunk stream
    pub fn apply_event(&self, chunk: StreamChunk) {
        self.store.update(|inner| {
            apply_chunk_locked(inner, &chunk.request_id, &chunk.content_delta);
            if chunk.is_terminal() {
                complete_locked(
                    inner,
                    &chunk.request_id,
                    Completion {
                        final_content: None,
                        token_count: chunk.eval_count,
                        error: chunk.error,
                    },
                );
            }
        });
    }

    /// Drain a request's chunk channel in arrival order until the sender side
    /// is dropped.
    pub async fn consume(self, mut chunks: mpsc::UnboundedReceiver<StreamChunk>) {
        while let Some(chunk) = chunks.recv().await {
            self.apply_event(chunk);
        }
    }

    pub fn is_registered(&self, request_id: &str) -> bool {
        self.store.update(|inner| inner.streams.token(request_id).is_some())
    }

    /// Cancellation token handed to the backend for this request
    pub fn cancel_token(&self, request_id: &str) -> Option<CancellationToken> {
        self.store.update(|inner| inner.streams.token(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;

    fn setup() -> (Store, StreamReconciler, String) {
        let store = Store::default();
        let conv = store.create_conversation("llama3", None).unwrap();
        let reconciler = StreamReconciler::new(store.clone());
        (store, reconciler, conv)
    }

    fn reply(store: &Store, conv: &str, message_id: &str) -> Message {
        store
            .conversation(conv)
            .unwrap()
            .message(message_id)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_begin_stream_appends_placeholder() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.role, MessageRole::Assistant);
        assert_eq!(m.status, MessageStatus::Sending);
        assert!(m.content.is_empty());
        assert!(reconciler.is_registered("r1"));
    }

    #[test]
    fn test_begin_stream_rejects_second_reply() {
        let (store, reconciler, conv) = setup();
        reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        let err = reconciler.begin_stream(&conv, "r2", "llama3").unwrap_err();
        assert!(matches!(err, Error::SendInFlight(_)));
        assert_eq!(store.conversation(&conv).unwrap().messages.len(), 1);
        assert!(!reconciler.is_registered("r2"));
    }

    #[test]
    fn test_chunks_concatenate_and_done_finalizes() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();

        reconciler.apply_event(StreamChunk::delta("r1", "Sure,"));
        reconciler.apply_event(StreamChunk::delta("r1", " here"));
        reconciler.apply_event(StreamChunk::delta("r1", " is..."));
        reconciler.apply_event(StreamChunk::done("r1", Some(12)));

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "Sure, here is...");
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(m.token_count, Some(12));
        assert!(!reconciler.is_registered("r1"));
    }

    #[test]
    fn test_unknown_request_chunk_is_noop() {
        let (store, reconciler, conv) = setup();
        reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        let before = store.snapshot();

        assert!(!reconciler.apply_chunk("ghost", "boo"));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_result_path_does_not_double_apply_streamed_content() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.apply_chunk("r1", "Hello");
        reconciler.apply_chunk("r1", " world");

        assert!(reconciler.complete_stream("r1", Completion::with_content("Hello world", Some(2))));

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "Hello world");
        assert_eq!(m.token_count, Some(2));
    }

    #[test]
    fn test_result_path_writes_content_when_nothing_streamed() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.complete_stream("r1", Completion::with_content("All at once", None));

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "All at once");
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(m.model_name.as_deref(), Some("llama3"));
    }

    #[test]
    fn test_error_completion_overwrites_content() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.apply_chunk("r1", "partial");
        reconciler.apply_event(StreamChunk::error("r1", "model crashed"));

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "Error: model crashed");
        assert_eq!(m.status, MessageStatus::Failed);
        assert!(m.is_error);
    }

    #[test]
    fn test_second_completion_is_ignored() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.apply_chunk("r1", "done text");
        assert!(reconciler.complete_stream("r1", Completion::finished(None)));
        assert!(!reconciler.complete_stream("r1", Completion::failed("late")));

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "done text");
        assert_eq!(m.status, MessageStatus::Sent);
    }

    #[test]
    fn test_cancel_keeps_partial_and_ignores_late_chunks() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        let token = reconciler.cancel_token("r1").unwrap();
        reconciler.apply_chunk("r1", "The answer is");

        assert!(reconciler.cancel_stream(&conv));
        assert!(token.is_cancelled());

        let finalized = reply(&store, &conv, &msg);
        assert_eq!(finalized.content, "The answer is");
        assert_eq!(finalized.status, MessageStatus::Sent);

        reconciler.apply_event(StreamChunk::delta("r1", " 42"));
        reconciler.apply_event(StreamChunk::done("r1", Some(5)));
        assert!(!reconciler.complete_stream("r1", Completion::with_content("x", None)));
        assert_eq!(reply(&store, &conv, &msg), finalized);
    }

    #[test]
    fn test_cancel_without_stream_is_noop() {
        let (store, reconciler, conv) = setup();
        let before = store.snapshot();
        assert!(!reconciler.cancel_stream(&conv));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_abandon_only_touches_its_own_request() {
        let (store, reconciler, conv) = setup();
        let first = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.apply_chunk("r1", "half");
        assert!(reconciler.abandon("r1"));
        assert_eq!(reply(&store, &conv, &first).status, MessageStatus::Sent);
        assert_eq!(reply(&store, &conv, &first).content, "half");

        let second = reconciler.begin_stream(&conv, "r2", "llama3").unwrap();
        assert!(!reconciler.abandon("r1"));
        assert!(reconciler.is_registered("r2"));
        assert_eq!(reply(&store, &conv, &second).status, MessageStatus::Sending);
    }

    #[test]
    fn test_new_stream_allowed_after_completion() {
        let (_store, reconciler, conv) = setup();
        reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        reconciler.complete_stream("r1", Completion::finished(None));
        assert!(reconciler.begin_stream(&conv, "r2", "llama3").is_ok());
    }

    #[tokio::test]
    async fn test_consume_applies_in_arrival_order() {
        let (store, reconciler, conv) = setup();
        let msg = reconciler.begin_stream(&conv, "r1", "llama3").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(reconciler.clone().consume(rx));

        for piece in ["a", "b", "c", "d"] {
            tx.send(StreamChunk::delta("r1", piece)).unwrap();
        }
        tx.send(StreamChunk::done("r1", None)).unwrap();
        drop(tx);
        task.await.unwrap();

        let m = reply(&store, &conv, &msg);
        assert_eq!(m.content, "abcd");
        assert_eq!(m.status, MessageStatus::Sent);
        assert_eq!(store.active_streams(), 0);
    }

    #[test]
    fn test_at_most_one_sending_per_conversation() {
        let (store, reconciler, conv) = setup();
        for i in 0..5 {
            let _ = reconciler.begin_stream(&conv, &format!("r{}", i), "llama3");
        }
        let sending = store
            .conversation(&conv)
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.status == MessageStatus::Sending)
            .count();
        assert_eq!(sending, 1);
    }
}
