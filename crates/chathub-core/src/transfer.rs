//! Chat history export and import

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    events::StoreEvent,
    model::Conversation,
    store::Store,
};

/// Version tag written into export files
pub const EXPORT_VERSION: u64 = 1;

/// Exported chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u64,
    pub exported_at: DateTime<Utc>,
    pub conversations: Vec<Conversation>,
}

/// Incoming payload; only the conversation list is required
#[derive(Debug, Deserialize)]
struct ImportPayload {
    conversations: Vec<Conversation>,
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Conversations already present (or repeated in the payload)
    pub skipped: usize,
}

impl Store {
    pub fn export_conversations(&self) -> ExportBundle {
        ExportBundle {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            conversations: self.read(|state| state.conversations.clone()),
        }
    }

    /// Export as pretty-printed JSON
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_conversations())?)
    }

    /// Import conversations from an export file's contents. The payload is
    /// validated as a whole before anything is added; conversations whose id
    /// already exists are skipped.
    pub fn import_conversations(&self, json: &str) -> Result<ImportReport> {
        let payload: ImportPayload =
            serde_json::from_str(json).map_err(|e| Error::Import(e.to_string()))?;
        let total = payload.conversations.len();

        let report = self.update(|inner| {
            let mut seen: HashSet<String> =
                inner.state.conversations.iter().map(|c| c.id.clone()).collect();
            let mut fresh: Vec<Conversation> = payload
                .conversations
                .into_iter()
                .filter(|c| seen.insert(c.id.clone()))
                .collect();
            for conversation in &mut fresh {
                conversation.settle_interrupted();
            }

            let ids: Vec<String> = fresh.iter().map(|c| c.id.clone()).collect();
            let report = ImportReport {
                imported: fresh.len(),
                skipped: total - fresh.len(),
            };
            fresh.append(&mut inner.state.conversations);
            inner.state.conversations = fresh;
            for conversation_id in ids {
                inner.emit(StoreEvent::ConversationChanged { conversation_id });
            }
            report
        });

        tracing::info!(
            "Imported {} conversation(s), skipped {}",
            report.imported,
            report.skipped
        );
        Ok(report)
    }
}
