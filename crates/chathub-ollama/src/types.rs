//! Ollama wire types and conversion from chathub messages

use base64::Engine;
use chathub_core::{ChatRequest, Message, ModelParameters};
use serde::{Deserialize, Serialize};

pub use chathub_core::backend::{ModelDetails, ModelInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

impl OllamaChatRequest {
    /// Build the wire request for a chat exchange
    pub fn from_chat(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: messages_to_ollama(&request.messages, request.system_prompt.as_deref()),
            stream: Some(request.stream),
            options: Some(OllamaOptions::from(&request.parameters)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaChatMessage {
    pub role: String,
    pub content: String,
    /// Base64-encoded images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl From<&ModelParameters> for OllamaOptions {
    fn from(params: &ModelParameters) -> Self {
        Self {
            temperature: Some(params.temperature),
            top_k: params.top_k,
            top_p: params.top_p,
            num_predict: params.max_tokens,
        }
    }
}

/// One response object; a whole reply when not streaming, one NDJSON line
/// otherwise
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<OllamaChatMessage>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Nanoseconds
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u32>,
    /// Reported mid-stream when generation fails
    #[serde(default)]
    pub error: Option<String>,
}

impl OllamaChatResponse {
    pub fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

/// One model's side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelReply {
    pub name: String,
    /// Reply text, or `Error: ..` when the request failed
    pub content: String,
    pub duration_ms: u64,
}

/// The same prompt answered by two models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub first: ModelReply,
    pub second: ModelReply,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Body for the model management endpoints
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelRequest<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Convert chat history to Ollama messages. A non-empty system prompt goes
/// first; image attachments travel base64-encoded.
pub fn messages_to_ollama(messages: &[Message], system_prompt: Option<&str>) -> Vec<OllamaChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
        out.push(OllamaChatMessage {
            role: "system".to_string(),
            content: prompt.to_string(),
            images: None,
        });
    }

    for msg in messages {
        let images: Vec<String> = msg
            .attachments
            .iter()
            .filter(|a| a.is_image())
            .map(|a| base64::engine::general_purpose::STANDARD.encode(&a.data))
            .collect();

        out.push(OllamaChatMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
            images: if images.is_empty() { None } else { Some(images) },
        });
    }

    out
}
