//! Send coordinator: drives one user-message / assistant-reply exchange

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{Backend, ChatRequest},
    error::{Error, Result},
    events::StoreEvent,
    model::{Attachment, DEFAULT_TITLE, Message, MessageStatus},
    reconciler::{self, Completion, StreamReconciler},
    store::{Store, StoreInner},
};

/// Result of a completed exchange
#[derive(Debug)]
pub struct SendOutcome {
    pub request_id: String,
    pub assistant_message_id: String,
    /// Final status of the assistant message
    pub status: MessageStatus,
    /// The reply was stopped before the backend finished
    pub stopped: bool,
    /// Background title generation, started after a first exchange
    pub title_task: Option<JoinHandle<()>>,
}

/// State captured when an exchange is admitted
struct Prepared {
    request: ChatRequest,
    assistant_message_id: String,
    first_exchange: bool,
}

/// Settles an admitted exchange if the send future is dropped before the
/// reply completes
struct ExchangeGuard<'a> {
    reconciler: &'a StreamReconciler,
    request_id: &'a str,
    armed: bool,
}

impl ExchangeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.reconciler.abandon(self.request_id) {
            tracing::debug!("Send for request {} dropped; reply settled", self.request_id);
        }
    }
}

/// Runs sends against a backend, routing results through the reconciler
#[derive(Clone)]
pub struct SendCoordinator {
    store: Store,
    backend: Arc<dyn Backend>,
    reconciler: StreamReconciler,
}

impl SendCoordinator {
    pub fn new(store: Store, backend: Arc<dyn Backend>) -> Self {
        let reconciler = StreamReconciler::new(store.clone());
        Self {
            store,
            backend,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &StreamReconciler {
        &self.reconciler
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Stop generating the reply for a conversation. Whatever has arrived is
    /// kept as the final content.
    pub fn stop(&self, conversation_id: &str) -> bool {
        self.reconciler.cancel_stream(conversation_id)
    }

    /// Send a user message and wait for the reply to settle.
    ///
    /// Only admission failures (unknown conversation, exchange already in
    /// flight) are returned as errors, and those leave state untouched.
    /// Backend failures end up in the assistant message instead. Dropping
    /// the future stops the exchange as [`SendCoordinator::stop`] would.
    pub async fn send(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome> {
        let text = text.into();
        let request_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        let prepared = self.store.update(|inner| {
            prepare(
                inner,
                conversation_id,
                &request_id,
                &text,
                attachments,
                cancel.clone(),
            )
        })?;
        let guard = ExchangeGuard {
            reconciler: &self.reconciler,
            request_id: &request_id,
            armed: true,
        };
        tracing::debug!(
            "Sending request {} for conversation {} ({} messages)",
            request_id,
            conversation_id,
            prepared.request.messages.len()
        );

        let Prepared {
            request,
            assistant_message_id,
            first_exchange,
        } = prepared;
        let model = request.model.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(self.reconciler.clone().consume(rx));
        let result = self.backend.send_message(request, tx, cancel.clone()).await;

        // Every chunk must be applied before the result path runs
        if let Err(e) = consumer.await {
            tracing::warn!("Stream consumer for {} failed: {}", request_id, e);
        }

        let completion = match result {
            Ok(response) => Completion::with_content(response.content, response.eval_count),
            Err(e) => {
                tracing::warn!("Request {} failed: {}", request_id, e);
                Completion::failed(e.to_string())
            }
        };
        self.reconciler.complete_stream(&request_id, completion);
        guard.disarm();
        let stopped = cancel.is_cancelled();

        let (status, is_error) = self
            .store
            .conversation(conversation_id)
            .and_then(|c| {
                c.message(&assistant_message_id)
                    .map(|m| (m.status, m.is_error))
            })
            .unwrap_or((MessageStatus::Sent, false));

        let title_task = if first_exchange && !stopped && status == MessageStatus::Sent && !is_error {
            Some(self.spawn_title(conversation_id, &model, &text))
        } else {
            None
        };

        Ok(SendOutcome {
            request_id,
            assistant_message_id,
            status,
            stopped,
            title_task,
        })
    }

    /// Best-effort title generation; the title is only applied while the
    /// conversation still carries the default one.
    fn spawn_title(&self, conversation_id: &str, model: &str, first_message: &str) -> JoinHandle<()> {
        let store = self.store.clone();
        let backend = self.backend.clone();
        let conversation_id = conversation_id.to_string();
        let model = model.to_string();
        let first_message = first_message.to_string();

        tokio::spawn(async move {
            let title = match backend.generate_title(&model, &first_message).await {
                Ok(title) => title.trim().to_string(),
                Err(e) => {
                    tracing::warn!("Title generation failed: {}", e);
                    return;
                }
            };
            if title.is_empty() {
                return;
            }
            let untitled = store
                .conversation(&conversation_id)
                .is_some_and(|c| c.title == DEFAULT_TITLE);
            if untitled {
                if let Err(e) = store.rename_conversation(&conversation_id, title) {
                    tracing::debug!("Skipping generated title: {}", e);
                }
            }
        })
    }
}

/// Admit an exchange: append the user message and the reply placeholder in a
/// single transition, register the stream and mark the conversation in flight.
fn prepare(
    inner: &mut StoreInner,
    conversation_id: &str,
    request_id: &str,
    text: &str,
    attachments: Vec<Attachment>,
    cancel: CancellationToken,
) -> Result<Prepared> {
    let conversation = inner
        .state
        .conversation_mut(conversation_id)
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
    if inner.in_flight.contains(conversation_id)
        || inner.streams.has_conversation(conversation_id)
        || conversation.pending_reply().is_some()
    {
        return Err(Error::SendInFlight(conversation_id.to_string()));
    }

    let first_exchange = conversation.messages.is_empty();
    let model = conversation.model_name.clone();
    conversation
        .messages
        .push(Message::user(text).with_attachments(attachments));
    conversation.touch();

    // History up to and including the new user message
    let request = ChatRequest {
        request_id: request_id.to_string(),
        model: model.clone(),
        messages: conversation.messages.clone(),
        system_prompt: conversation.system_prompt.clone(),
        parameters: conversation.parameters.clone(),
        stream: true,
    };

    inner.emit(StoreEvent::ConversationChanged {
        conversation_id: conversation_id.to_string(),
    });
    let assistant_message_id =
        reconciler::open_stream(inner, conversation_id, request_id, &model, cancel)?;
    inner.in_flight.insert(conversation_id.to_string());

    Ok(Prepared {
        request,
        assistant_message_id,
        first_exchange,
    })
}
