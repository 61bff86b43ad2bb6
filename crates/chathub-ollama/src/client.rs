//! Ollama HTTP client

use async_trait::async_trait;
use chathub_core::{
    Backend, ChatRequest, ChatResponse, ChunkSender, Connection, DEFAULT_TITLE, ModelInfo,
    reconciler::format_error,
};
use futures::StreamExt;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    stream::{LineDecoder, ReplyBuilder, to_chunk},
    types::{
        Comparison, ModelReply, ModelRequest, OllamaChatMessage, OllamaChatRequest,
        OllamaChatResponse, OllamaOptions, TagsResponse,
    },
};

/// Generation requests can run long on slow hardware
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// How much of the opening message the title prompt sees
const TITLE_CONTEXT_CHARS: usize = 200;

/// Client for one Ollama server. The target can be switched at runtime.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: RwLock<String>,
}

impl OllamaClient {
    /// Create a client for a base URL such as `http://localhost:11434`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: RwLock::new(normalize(base_url)),
        })
    }

    pub fn from_connection(connection: &Connection) -> Result<Self> {
        Self::new(&connection.base_url())
    }

    pub fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    pub fn set_base_url(&self, base_url: &str) {
        *self.base_url.write() = normalize(base_url);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.read(), path)
    }

    /// Check that the server answers on `/api/tags`
    pub async fn health_check(&self) -> Result<bool> {
        self.check_server(&self.base_url()).await
    }

    async fn check_server(&self, base_url: &str) -> Result<bool> {
        let response = self.client.get(format!("{}/api/tags", base_url)).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }

    /// Details for one model as returned by `/api/show`
    pub async fn show_model(&self, name: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&ModelRequest { name, stream: None })
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn pull_model(&self, name: &str) -> Result<String> {
        tracing::info!("Pulling model {}", name);
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&ModelRequest {
                name,
                stream: Some(false),
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(format!("Successfully pulled {}", name))
    }

    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&ModelRequest { name, stream: None })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Non-streaming chat request
    pub async fn chat(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse> {
        let mut request = request.clone();
        request.stream = Some(false);
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let reply: OllamaChatResponse = response.json().await?;
        if let Some(error) = &reply.error {
            return Err(Error::Stream(error.clone()));
        }
        Ok(reply)
    }

    /// Streaming chat request. Each NDJSON line is handed to `on_line` as it
    /// arrives; the accumulated reply is returned at the end.
    pub async fn chat_stream<F>(
        &self,
        request: &OllamaChatRequest,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> Result<ChatResponse>
    where
        F: FnMut(&OllamaChatResponse),
    {
        let mut request = request.clone();
        request.stream = Some(true);

        let send = self.client.post(self.url("/api/chat")).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            response = send => response?,
        };
        let response = check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut decoder = LineDecoder::default();
        let mut reply = ReplyBuilder::default();

        loop {
            let bytes = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Chat stream cancelled");
                    return Err(Error::Aborted);
                }
                next = body.next() => match next {
                    Some(bytes) => bytes?,
                    None => break,
                },
            };
            for line in decoder.push(&bytes) {
                handle_line(&line, &mut reply, &mut on_line)?;
            }
        }
        if let Some(line) = decoder.finish() {
            handle_line(&line, &mut reply, &mut on_line)?;
        }

        if !reply.is_done() {
            tracing::debug!("Chat stream ended without a done marker");
        }
        Ok(reply.finish())
    }

    /// Answer the same chat with two models, one after the other. A model
    /// that fails reports the error as its reply text.
    pub async fn compare_models(
        &self,
        first: &str,
        second: &str,
        request: &ChatRequest,
    ) -> Comparison {
        let body = OllamaChatRequest::from_chat(request);
        Comparison {
            first: self.timed_reply(&body, first).await,
            second: self.timed_reply(&body, second).await,
        }
    }

    async fn timed_reply(&self, body: &OllamaChatRequest, model: &str) -> ModelReply {
        let request = retarget(body, model);
        let started = Instant::now();
        let content = match self.chat(&request).await {
            Ok(reply) => reply.content().to_string(),
            Err(e) => {
                tracing::debug!("Comparison request to {} failed: {}", model, e);
                format_error(&e.to_string())
            }
        };
        ModelReply {
            name: model.to_string(),
            content,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Ask the model for a 3-6 word title for a conversation
    pub async fn generate_title(&self, model: &str, first_message: &str) -> Result<String> {
        let opening: String = first_message.chars().take(TITLE_CONTEXT_CHARS).collect();
        let request = OllamaChatRequest {
            model: model.to_string(),
            messages: vec![OllamaChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Generate a very short title (3-6 words, no quotes) for a conversation that starts with: {}",
                    opening
                ),
                images: None,
            }],
            stream: Some(false),
            options: Some(OllamaOptions {
                temperature: Some(0.3),
                num_predict: Some(20),
                ..Default::default()
            }),
        };

        let reply = self.chat(&request).await?;
        Ok(reply
            .message
            .map(|m| clean_title(&m.content))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()))
    }
}

fn normalize(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Unary copy of a chat request aimed at another model
fn retarget(body: &OllamaChatRequest, model: &str) -> OllamaChatRequest {
    OllamaChatRequest {
        model: model.to_string(),
        stream: Some(false),
        ..body.clone()
    }
}

fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

/// Turn a non-success status into an API error carrying the body text
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text);
    Err(Error::api(status, message))
}

fn handle_line<F>(line: &str, reply: &mut ReplyBuilder, on_line: &mut F) -> Result<()>
where
    F: FnMut(&OllamaChatResponse),
{
    let parsed: OllamaChatResponse = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Skipping malformed stream line: {}", e);
            return Ok(());
        }
    };
    on_line(&parsed);
    if let Some(error) = &parsed.error {
        return Err(Error::Stream(error.clone()));
    }
    reply.apply(&parsed);
    Ok(())
}

#[async_trait]
impl Backend for OllamaClient {
    /// Check the given server; on success the client targets it from then on
    async fn test_connection(
        &self,
        host: &str,
        port: u16,
        use_https: bool,
    ) -> chathub_core::Result<bool> {
        let scheme = if use_https { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, host, port);
        match self.check_server(&base_url).await {
            Ok(true) => {
                self.set_base_url(&base_url);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                tracing::debug!("Connection to {} failed: {}", base_url, e);
                Ok(false)
            }
        }
    }

    async fn send_message(
        &self,
        request: ChatRequest,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> chathub_core::Result<ChatResponse> {
        let body = OllamaChatRequest::from_chat(&request);

        if !request.stream {
            drop(chunks);
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted.into()),
                reply = self.chat(&body) => reply?,
            };
            return Ok(ChatResponse {
                content: reply.content().to_string(),
                eval_count: reply.eval_count,
                total_duration_ms: reply.total_duration.map(|ns| ns / 1_000_000),
            });
        }

        let request_id = request.request_id;
        let reply = self
            .chat_stream(&body, &cancel, |line| {
                // Receiver gone means nobody wants the rest
                let _ = chunks.send(to_chunk(&request_id, line));
            })
            .await?;
        Ok(reply)
    }

    async fn generate_title(&self, model: &str, first_message: &str) -> chathub_core::Result<String> {
        Ok(OllamaClient::generate_title(self, model, first_message).await?)
    }

    async fn list_models(&self) -> chathub_core::Result<Vec<ModelInfo>> {
        Ok(OllamaClient::list_models(self).await?)
    }

    async fn pull_model(&self, name: &str) -> chathub_core::Result<String> {
        Ok(OllamaClient::pull_model(self, name).await?)
    }

    async fn delete_model(&self, name: &str) -> chathub_core::Result<()> {
        Ok(OllamaClient::delete_model(self, name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.url("/api/tags"), "http://localhost:11434/api/tags");

        client.set_base_url("https://gpu.lan:443//");
        assert_eq!(client.base_url(), "https://gpu.lan:443");
    }

    #[test]
    fn test_from_connection() {
        let client = OllamaClient::from_connection(&Connection::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Rust Borrow Checker Basics\"\n"), "Rust Borrow Checker Basics");
        assert_eq!(clean_title("Plain"), "Plain");
    }

    #[test]
    fn test_stream_error_line_is_forwarded_then_fails() {
        let mut reply = ReplyBuilder::default();
        let mut seen = Vec::new();
        let result = handle_line(
            r#"{"error":"out of memory"}"#,
            &mut reply,
            &mut |line: &OllamaChatResponse| seen.push(to_chunk("r1", line)),
        );
        assert!(matches!(result, Err(Error::Stream(ref m)) if m == "out of memory"));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].error.as_deref(), Some("out of memory"));
    }

    #[test]
    fn test_malformed_line_skipped() {
        let mut reply = ReplyBuilder::default();
        let mut calls = 0;
        handle_line("not json", &mut reply, &mut |_: &OllamaChatResponse| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_false() {
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let reachable = client.test_connection("127.0.0.1", 9, false).await.unwrap();
        assert!(!reachable);
        assert_eq!(client.base_url(), "http://127.0.0.1:9");
    }

    fn comparison_request() -> ChatRequest {
        ChatRequest {
            request_id: "cmp".into(),
            model: "llama3".into(),
            messages: vec![chathub_core::Message::user("Name a prime")],
            system_prompt: Some("Answer in one word".into()),
            parameters: chathub_core::ModelParameters::precise(),
            stream: true,
        }
    }

    #[test]
    fn test_retarget_keeps_history_and_options() {
        let body = OllamaChatRequest::from_chat(&comparison_request());
        let other = retarget(&body, "qwen2.5");
        assert_eq!(other.model, "qwen2.5");
        assert_eq!(other.stream, Some(false));
        assert_eq!(other.messages, body.messages);
        assert_eq!(other.messages[0].role, "system");
        assert_eq!(other.options, body.options);
    }

    #[tokio::test]
    async fn test_compare_reports_failures_as_content() {
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let comparison = client
            .compare_models("llama3", "qwen2.5", &comparison_request())
            .await;
        assert_eq!(comparison.first.name, "llama3");
        assert_eq!(comparison.second.name, "qwen2.5");
        assert!(comparison.first.content.starts_with("Error: HTTP error"));
        assert!(comparison.second.content.starts_with("Error: HTTP error"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send_aborts() {
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = OllamaChatRequest {
            model: "llama3".into(),
            messages: vec![],
            stream: Some(true),
            options: None,
        };
        let result = client.chat_stream(&request, &cancel, |_| {}).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }
}
