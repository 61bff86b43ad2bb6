//! The persisted application state aggregate

use serde::{Deserialize, Serialize};

use crate::model::{AppSettings, Connection, Conversation, Project, UiLayout};

/// Everything that survives a restart and is shared with a front end.
///
/// Conversations are kept most-recently-created first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub active_connection_id: Option<String>,
    #[serde(default)]
    pub selected_model: Option<String>,
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub active_conversation_id: Option<String>,
    pub projects: Vec<Project>,
    #[serde(default)]
    pub active_project_id: Option<String>,
    #[serde(default)]
    pub settings: AppSettings,
    #[serde(default)]
    pub ui: UiLayout,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connections: vec![Connection::default()],
            active_connection_id: None,
            selected_model: None,
            conversations: Vec::new(),
            active_conversation_id: None,
            projects: Vec::new(),
            active_project_id: None,
            settings: AppSettings::default(),
            ui: UiLayout::default(),
        }
    }
}

impl AppState {
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn project_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.id == id)
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_conversation_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Find a conversation by full id or unambiguous id prefix
    pub fn find_conversation(&self, query: &str) -> Option<&Conversation> {
        if let Some(exact) = self.conversation(query) {
            return Some(exact);
        }
        let mut matches = self.conversations.iter().filter(|c| c.id.starts_with(query));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Finalize any message left mid-stream. Returns the number settled.
    pub(crate) fn settle_interrupted(&mut self) -> usize {
        self.conversations
            .iter_mut()
            .map(|c| c.settle_interrupted())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_local_connection() {
        let state = AppState::default();
        assert_eq!(state.connections.len(), 1);
        assert!(state.connections[0].is_default);
        assert!(state.active_connection_id.is_none());
    }

    #[test]
    fn test_find_conversation_by_prefix() {
        let mut state = AppState::default();
        let mut a = Conversation::new("m");
        a.id = "abc-1".into();
        let mut b = Conversation::new("m");
        b.id = "abd-2".into();
        state.conversations = vec![a, b];

        assert_eq!(state.find_conversation("abc").map(|c| c.id.as_str()), Some("abc-1"));
        assert!(state.find_conversation("ab").is_none());
        assert_eq!(state.find_conversation("abd-2").map(|c| c.id.as_str()), Some("abd-2"));
    }

    #[test]
    fn test_active_conversation_ignores_dangling_id() {
        let mut state = AppState::default();
        let mut a = Conversation::new("m");
        a.id = "abc-1".into();
        state.conversations = vec![a];

        state.active_conversation_id = Some("gone".into());
        assert!(state.active_conversation().is_none());
        state.active_conversation_id = Some("abc-1".into());
        assert_eq!(state.active_conversation().map(|c| c.id.as_str()), Some("abc-1"));
    }
}
