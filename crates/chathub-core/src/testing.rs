//! Scripted in-memory backend for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{Backend, ChatRequest, ChatResponse, ChunkSender, ModelInfo, StreamChunk},
    error::{Error, Result},
};

/// What the backend does with the next chat request
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Stream these deltas, send `done`, then return their concatenation
    Stream(Vec<&'static str>),
    /// Return the reply without streaming anything
    Unary(&'static str),
    /// Stream these deltas, then wait until cancelled
    StreamThenHang(Vec<&'static str>),
    /// Fail the request
    Fail(&'static str),
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    scripts: Mutex<Vec<Script>>,
    pub(crate) requests: Mutex<Vec<ChatRequest>>,
    pub(crate) title: Mutex<Option<String>>,
    pub(crate) reachable: Mutex<bool>,
    /// Signalled once a hanging request has streamed its deltas
    pub(crate) streaming: Arc<Notify>,
}

impl ScriptedBackend {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts),
            reachable: Mutex::new(true),
            ..Default::default()
        })
    }

    pub(crate) fn with_title(self: Arc<Self>, title: &str) -> Arc<Self> {
        *self.title.lock() = Some(title.to_string());
        self
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock();
        if scripts.is_empty() {
            Script::Unary("ok")
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn test_connection(&self, _host: &str, _port: u16, _use_https: bool) -> Result<bool> {
        Ok(*self.reachable.lock())
    }

    async fn send_message(
        &self,
        request: ChatRequest,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let request_id = request.request_id.clone();
        self.requests.lock().push(request);

        match self.next_script() {
            Script::Stream(deltas) => {
                for delta in &deltas {
                    let _ = chunks.send(StreamChunk::delta(&request_id, *delta));
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                let _ = chunks.send(StreamChunk::done(&request_id, Some(deltas.len() as u32)));
                Ok(ChatResponse {
                    content: deltas.concat(),
                    eval_count: Some(deltas.len() as u32),
                    total_duration_ms: None,
                })
            }
            Script::Unary(content) => Ok(ChatResponse {
                content: content.to_string(),
                eval_count: None,
                total_duration_ms: None,
            }),
            Script::StreamThenHang(deltas) => {
                for delta in deltas {
                    let _ = chunks.send(StreamChunk::delta(&request_id, delta));
                }
                self.streaming.notify_one();
                cancel.cancelled().await;
                Err(Error::backend("Request aborted"))
            }
            Script::Fail(message) => Err(Error::backend(message)),
        }
    }

    async fn generate_title(&self, _model: &str, _first_message: &str) -> Result<String> {
        self.title
            .lock()
            .clone()
            .ok_or_else(|| Error::backend("title model unavailable"))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    async fn pull_model(&self, name: &str) -> Result<String> {
        Ok(format!("pulled {}", name))
    }

    async fn delete_model(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}
