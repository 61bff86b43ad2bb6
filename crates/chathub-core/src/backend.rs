//! Model backend abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    model::{Message, ModelParameters},
};

/// One incremental piece of a streamed reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub request_id: String,
    /// Text to append (may be empty on the terminal chunk)
    #[serde(default)]
    pub content_delta: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn delta(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content_delta: content.into(),
            ..Default::default()
        }
    }

    pub fn done(request_id: impl Into<String>, eval_count: Option<u32>) -> Self {
        Self {
            request_id: request_id.into(),
            done: true,
            eval_count,
            ..Default::default()
        }
    }

    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// No further chunks follow this one
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// Sending half of a per-request chunk channel
pub type ChunkSender = mpsc::UnboundedSender<StreamChunk>;

/// Outbound chat request built from a conversation's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub request_id: String,
    pub model: String,
    /// Full history ending with the new user message, attachments included
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub parameters: ModelParameters,
    pub stream: bool,
}

/// Unary result of a chat request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
}

/// Locally installed model as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub families: Option<Vec<String>>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}

/// The generative-model server the engine talks to
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check a server; `true` when it answers
    async fn test_connection(&self, host: &str, port: u16, use_https: bool) -> Result<bool>;

    /// Run a chat request.
    ///
    /// When `request.stream` is set, content may be reported incrementally on
    /// `chunks` before the call returns. The sender must be dropped by the time
    /// the future completes. `cancel` is a hint that the caller no longer wants
    /// the reply.
    async fn send_message(
        &self,
        request: ChatRequest,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<ChatResponse>;

    /// Produce a short title for a conversation opening with `first_message`
    async fn generate_title(&self, model: &str, first_message: &str) -> Result<String>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn pull_model(&self, name: &str) -> Result<String>;

    async fn delete_model(&self, name: &str) -> Result<()>;
}
