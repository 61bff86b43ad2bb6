//! Application state handle: the single owner of conversations and projects

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    error::{Error, Result},
    events::StoreEvent,
    model::{Conversation, ModelParameters, Project},
    reconciler::StreamRegistry,
    state::AppState,
};

/// Everything guarded by the store lock
pub(crate) struct StoreInner {
    /// Persisted, merged state
    pub(crate) state: AppState,
    /// In-flight stream registrations (never persisted)
    pub(crate) streams: StreamRegistry,
    /// Conversations with an exchange in flight
    pub(crate) in_flight: HashSet<String>,
    pending_events: Vec<StoreEvent>,
}

impl StoreInner {
    /// Queue an event for publication once the mutation commits
    pub(crate) fn emit(&mut self, event: StoreEvent) {
        self.pending_events.push(event);
    }
}

/// Optional edits for [`Store::update_project`]. `None` leaves a field as is;
/// the nested options clear a field with `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub system_prompt: Option<Option<String>>,
    pub instructions: Option<Option<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_pinned: Option<bool>,
}

/// A cloneable handle to the application state.
///
/// Every mutation runs under one lock and its events are published before the
/// lock is released, so subscribers observe changes in commit order and never
/// see a half-applied update.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Store {
    /// Take ownership of a (hydrated or default) state. Messages left in
    /// `sending` by a previous process are finalized as-is, since no stream
    /// can still be feeding them.
    pub fn new(mut state: AppState) -> Self {
        let settled = state.settle_interrupted();
        if settled > 0 {
            tracing::info!("Finalized {} interrupted message(s)", settled);
        }
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state,
                streams: StreamRegistry::default(),
                in_flight: HashSet::new(),
                pending_events: Vec::new(),
            })),
            events,
        }
    }

    /// Subscribe to committed changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Run a read-only closure against the current state
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.inner.lock().state)
    }

    /// Clone of the full state
    pub fn snapshot(&self) -> AppState {
        self.read(|state| state.clone())
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.read(|state| state.conversation(id).cloned())
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        self.read(|state| state.project(id).cloned())
    }

    /// Whether an exchange is in flight for this conversation
    pub fn is_sending(&self, conversation_id: &str) -> bool {
        self.inner.lock().in_flight.contains(conversation_id)
    }

    /// Number of live stream registrations
    pub fn active_streams(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// Apply a mutation atomically and publish the events it queued
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut StoreInner) -> R) -> R {
        let mut inner = self.inner.lock();
        let result = f(&mut inner);
        for event in inner.pending_events.drain(..) {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        result
    }

    // ---- Conversations ----

    /// Create an empty conversation, make it active, and return its id.
    /// A project's system prompt and instructions are copied in.
    pub fn create_conversation(
        &self,
        model_name: impl Into<String>,
        project_id: Option<&str>,
    ) -> Result<String> {
        let model_name = model_name.into();
        self.update(|inner| {
            let mut conversation = Conversation::new(model_name);
            if let Some(project_id) = project_id {
                let project = inner
                    .state
                    .project(project_id)
                    .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))?;
                conversation.system_prompt = project.combined_system_prompt();
                conversation.project_id = Some(project_id.to_string());
            }
            let id = conversation.id.clone();
            inner.state.conversations.insert(0, conversation);
            inner.state.active_conversation_id = Some(id.clone());
            inner.emit(StoreEvent::ConversationChanged {
                conversation_id: id.clone(),
            });
            Ok(id)
        })
    }

    /// Remove a conversation locally, abandoning any exchange in flight
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        self.update(|inner| {
            let before = inner.state.conversations.len();
            inner.state.conversations.retain(|c| c.id != id);
            if inner.state.conversations.len() == before {
                return Err(Error::ConversationNotFound(id.to_string()));
            }
            inner.streams.release_conversation(id);
            inner.in_flight.remove(id);
            if inner.state.active_conversation_id.as_deref() == Some(id) {
                inner.state.active_conversation_id = None;
            }
            inner.emit(StoreEvent::ConversationDeleted {
                conversation_id: id.to_string(),
            });
            Ok(())
        })
    }

    pub fn set_active_conversation(&self, id: Option<&str>) -> Result<()> {
        self.update(|inner| {
            if let Some(id) = id {
                if inner.state.conversation(id).is_none() {
                    return Err(Error::ConversationNotFound(id.to_string()));
                }
            }
            inner.state.active_conversation_id = id.map(str::to_string);
            inner.emit(StoreEvent::SettingsChanged);
            Ok(())
        })
    }

    /// Edit one conversation's metadata, bumping its `updated_at`
    fn modify_conversation<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> Result<R> {
        self.update(|inner| {
            let conversation = inner
                .state
                .conversation_mut(id)
                .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;
            let result = f(conversation);
            conversation.touch();
            inner.emit(StoreEvent::ConversationChanged {
                conversation_id: id.to_string(),
            });
            Ok(result)
        })
    }

    pub fn rename_conversation(&self, id: &str, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        self.modify_conversation(id, |c| c.title = title)
    }

    pub fn set_conversation_model(&self, id: &str, model_name: impl Into<String>) -> Result<()> {
        let model_name = model_name.into();
        self.modify_conversation(id, |c| c.model_name = model_name)
    }

    pub fn set_parameters(&self, id: &str, parameters: ModelParameters) -> Result<()> {
        self.modify_conversation(id, |c| c.parameters = parameters)
    }

    pub fn set_system_prompt(&self, id: &str, prompt: Option<String>) -> Result<()> {
        self.modify_conversation(id, |c| c.system_prompt = prompt)
    }

    /// Flip tool use for a conversation, returning the new value
    pub fn toggle_tool_calling(&self, id: &str) -> Result<bool> {
        self.modify_conversation(id, |c| {
            c.tool_calling_enabled = !c.tool_calling_enabled;
            c.tool_calling_enabled
        })
    }

    // ---- Projects ----

    pub fn create_project(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        system_prompt: Option<String>,
        instructions: Option<String>,
    ) -> String {
        let mut project = Project::new(name);
        project.description = description;
        project.system_prompt = system_prompt;
        project.instructions = instructions;
        let id = project.id.clone();
        self.update(|inner| {
            inner.state.projects.push(project);
            inner.emit(StoreEvent::ProjectChanged {
                project_id: id.clone(),
            });
        });
        id
    }

    pub fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<()> {
        self.update(|inner| {
            let project = inner
                .state
                .project_mut(id)
                .ok_or_else(|| Error::ProjectNotFound(id.to_string()))?;
            if let Some(name) = patch.name {
                project.name = name;
            }
            if let Some(description) = patch.description {
                project.description = description;
            }
            if let Some(system_prompt) = patch.system_prompt {
                project.system_prompt = system_prompt;
            }
            if let Some(instructions) = patch.instructions {
                project.instructions = instructions;
            }
            if let Some(color) = patch.color {
                project.color = color;
            }
            if let Some(icon) = patch.icon {
                project.icon = icon;
            }
            if let Some(is_pinned) = patch.is_pinned {
                project.is_pinned = is_pinned;
            }
            project.touch();
            inner.emit(StoreEvent::ProjectChanged {
                project_id: id.to_string(),
            });
            Ok(())
        })
    }

    /// Remove a project and detach its conversations
    pub fn delete_project(&self, id: &str) -> Result<()> {
        self.update(|inner| {
            let before = inner.state.projects.len();
            inner.state.projects.retain(|p| p.id != id);
            if inner.state.projects.len() == before {
                return Err(Error::ProjectNotFound(id.to_string()));
            }
            let mut unlinked = Vec::new();
            for conversation in &mut inner.state.conversations {
                if conversation.project_id.as_deref() == Some(id) {
                    conversation.project_id = None;
                    conversation.touch();
                    unlinked.push(conversation.id.clone());
                }
            }
            for conversation_id in unlinked {
                inner.emit(StoreEvent::ConversationChanged { conversation_id });
            }
            if inner.state.active_project_id.as_deref() == Some(id) {
                inner.state.active_project_id = None;
            }
            inner.emit(StoreEvent::ProjectChanged {
                project_id: id.to_string(),
            });
            Ok(())
        })
    }

    pub fn set_active_project(&self, id: Option<&str>) -> Result<()> {
        self.update(|inner| {
            if let Some(id) = id {
                if inner.state.project(id).is_none() {
                    return Err(Error::ProjectNotFound(id.to_string()));
                }
            }
            inner.state.active_project_id = id.map(str::to_string);
            inner.emit(StoreEvent::SettingsChanged);
            Ok(())
        })
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}
