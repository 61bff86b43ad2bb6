//! State change events

use serde::{Deserialize, Serialize};

use crate::model::MessageStatus;

/// Events published by the store after a mutation has been committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Conversation metadata or message list changed
    ConversationChanged { conversation_id: String },

    /// Conversation removed locally
    ConversationDeleted { conversation_id: String },

    /// A reply started streaming into a placeholder message
    StreamStarted {
        conversation_id: String,
        request_id: String,
        message_id: String,
    },

    /// Content appended to a streaming message
    StreamDelta {
        conversation_id: String,
        message_id: String,
        delta: String,
    },

    /// A streaming message reached its final status
    StreamFinished {
        conversation_id: String,
        message_id: String,
        status: MessageStatus,
    },

    /// Project created, edited or removed
    ProjectChanged { project_id: String },

    /// Remote data merged in from another device
    Merged {
        conversations: usize,
        projects: usize,
    },

    /// Connections, selected model, settings or layout changed
    SettingsChanged,
}

impl StoreEvent {
    /// Whether the change touches data shared with sync peers
    pub fn touches_sync_data(&self) -> bool {
        !matches!(self, StoreEvent::SettingsChanged)
    }
}
