//! Entity model: conversations, messages, projects and their settings

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Title given to conversations until one is generated or set
pub const DEFAULT_TITLE: &str = "New Conversation";

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Next value for a monotonic `updated_at`: wall clock, but never behind
/// (or equal to) the previous stamp.
pub(crate) fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Draft,
    Queued,
    Sending,
    #[default]
    Sent,
    Failed,
}

/// File attached to a message. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub size: u64,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            id: new_id(),
            name: name.into(),
            mime_type: mime_type.into(),
            data,
            size,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Tool invocation carried on a message. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model_name: None,
            is_error: false,
            token_count: None,
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            status,
            status_message: None,
        }
    }

    /// A user message that has been handed to the engine
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content, MessageStatus::Sent)
    }

    /// A finished assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content, MessageStatus::Sent)
    }

    /// An empty assistant message awaiting streamed content
    pub fn placeholder(model_name: impl Into<String>) -> Self {
        let mut message = Self::with_role(MessageRole::Assistant, "", MessageStatus::Sending);
        message.model_name = Some(model_name.into());
        message
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Whether this is the in-flight assistant reply of its conversation
    pub fn is_pending_reply(&self) -> bool {
        self.role == MessageRole::Assistant && self.status == MessageStatus::Sending
    }
}

/// Sampling parameters sent with each request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParameters {
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self::balanced()
    }
}

impl ModelParameters {
    pub fn balanced() -> Self {
        Self {
            temperature: 0.7,
            top_k: Some(40),
            top_p: Some(0.9),
            max_tokens: None,
        }
    }

    pub fn creative() -> Self {
        Self {
            temperature: 1.2,
            top_k: Some(80),
            top_p: Some(0.95),
            max_tokens: None,
        }
    }

    pub fn precise() -> Self {
        Self {
            temperature: 0.2,
            top_k: Some(10),
            top_p: Some(0.5),
            max_tokens: None,
        }
    }

    pub fn code() -> Self {
        Self {
            temperature: 0.1,
            top_k: Some(5),
            top_p: Some(0.3),
            max_tokens: None,
        }
    }

    /// Look up a named preset (balanced, creative, precise, code)
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "balanced" => Some(Self::balanced()),
            "creative" => Some(Self::creative()),
            "precise" => Some(Self::precise()),
            "code" => Some(Self::code()),
            _ => None,
        }
    }
}

/// A titled thread of messages with its own model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model_name: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation; the merge key for sync
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tool_calling_enabled: bool,
}

impl Conversation {
    pub fn new(model_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: DEFAULT_TITLE.to_string(),
            model_name: model_name.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            system_prompt: None,
            parameters: ModelParameters::default(),
            project_id: None,
            tool_calling_enabled: false,
        }
    }

    /// Bump `updated_at` after a mutation
    pub fn touch(&mut self) {
        self.updated_at = next_stamp(self.updated_at);
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// The assistant message currently being generated, if any
    pub fn pending_reply(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_pending_reply())
    }

    /// Finalize messages left in `sending` with no live stream behind them
    /// (e.g. after a restart). Partial content is kept. Returns how many
    /// messages changed.
    pub fn settle_interrupted(&mut self) -> usize {
        let mut settled = 0;
        for message in &mut self.messages {
            if message.status == MessageStatus::Sending {
                message.status = MessageStatus::Sent;
                settled += 1;
            }
        }
        settled
    }
}

/// A workspace grouping conversations under shared instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub color: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.into(),
            description: None,
            system_prompt: None,
            instructions: None,
            color: "#6366f1".to_string(),
            icon: "folder".to_string(),
            created_at: now,
            updated_at: now,
            is_pinned: false,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = next_stamp(self.updated_at);
    }

    /// System prompt for new conversations in this project: the project's
    /// prompt followed by its instructions.
    pub fn combined_system_prompt(&self) -> Option<String> {
        match (&self.system_prompt, &self.instructions) {
            (Some(prompt), Some(instructions)) => {
                Some(format!("{}\n\n## Instructions\n{}", prompt, instructions))
            }
            (Some(prompt), None) => Some(prompt.clone()),
            (None, Some(instructions)) => Some(instructions.clone()),
            (None, None) => None,
        }
    }
}

/// Backend server the client talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub use_https: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, use_https: bool) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            host: host.into(),
            port,
            use_https,
            is_default: false,
            created_at: Utc::now(),
            last_connected_at: None,
        }
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            is_default: true,
            ..Self::new("Local Ollama", "localhost", 11434, false)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub enabled: bool,
    pub max_tool_calls: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tool_calls: 10,
        }
    }
}

/// LAN sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub enabled: bool,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9876,
            pin: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub theme: Theme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_connection_id: Option<String>,
    #[serde(default)]
    pub tool_config: ToolConfig,
    #[serde(default)]
    pub developer_mode: bool,
    #[serde(default)]
    pub sync_config: SyncConfig,
}

/// Top-level screen shown by a front end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Chat,
    Settings,
    Projects,
    Project,
    Comparison,
    Models,
}

/// Layout state a front end wants restored across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiLayout {
    pub current_view: View,
    pub sidebar_open: bool,
    pub sidebar_width: u32,
}

impl Default for UiLayout {
    fn default() -> Self {
        Self {
            current_view: View::Chat,
            sidebar_open: true,
            sidebar_width: 280,
        }
    }
}
