//! Sync merge engine.
//!
//! Conversation and project records are last-writer-wins on `updated_at`
//! (strictly newer remote wins, ties keep local). Messages of a conversation
//! that is replaced or inserted are an append-only union by id: local
//! messages stay in place and remote-only ones are appended. Nothing local is
//! ever removed, so deletions do not propagate.

use std::collections::HashSet;

use crate::{
    events::StoreEvent,
    model::{Conversation, MessageStatus, Project},
    state::AppState,
    store::Store,
};

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub conversations_inserted: Vec<String>,
    pub conversations_updated: Vec<String>,
    pub projects_inserted: Vec<String>,
    pub projects_updated: Vec<String>,
    pub messages_added: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.conversations_inserted.is_empty()
            && self.conversations_updated.is_empty()
            && self.projects_inserted.is_empty()
            && self.projects_updated.is_empty()
    }

    pub fn conversations_changed(&self) -> usize {
        self.conversations_inserted.len() + self.conversations_updated.len()
    }

    pub fn projects_changed(&self) -> usize {
        self.projects_inserted.len() + self.projects_updated.len()
    }
}

/// Remote copy of a conversation with messages still being generated on the
/// other device left out; they arrive once finalized there.
fn settled_copy(remote: &Conversation) -> Conversation {
    let mut copy = remote.clone();
    copy.messages.retain(|m| m.status != MessageStatus::Sending);
    copy
}

/// Merge a remote snapshot into `state`
pub fn merge_snapshot(
    state: &mut AppState,
    remote_conversations: &[Conversation],
    remote_projects: &[Project],
) -> MergeReport {
    let mut report = MergeReport::default();

    for remote in remote_conversations {
        match state.conversation_mut(&remote.id) {
            None => {
                let incoming = settled_copy(remote);
                report.messages_added += incoming.messages.len();
                report.conversations_inserted.push(incoming.id.clone());
                state.conversations.push(incoming);
            }
            Some(local) if remote.updated_at > local.updated_at => {
                let mut incoming = settled_copy(remote);
                let known: HashSet<&str> = local.messages.iter().map(|m| m.id.as_str()).collect();
                incoming.messages.retain(|m| !known.contains(m.id.as_str()));
                report.messages_added += incoming.messages.len();

                let mut messages = std::mem::take(&mut local.messages);
                messages.append(&mut incoming.messages);
                incoming.messages = messages;
                *local = incoming;
                report.conversations_updated.push(remote.id.clone());
            }
            Some(_) => {}
        }
    }

    for remote in remote_projects {
        match state.project_mut(&remote.id) {
            None => {
                report.projects_inserted.push(remote.id.clone());
                state.projects.push(remote.clone());
            }
            Some(local) if remote.updated_at > local.updated_at => {
                *local = remote.clone();
                report.projects_updated.push(remote.id.clone());
            }
            Some(_) => {}
        }
    }

    report
}

impl Store {
    /// Merge data pushed by a sync peer. Publishes a single `Merged` event
    /// when anything changed.
    pub fn merge_remote(&self, conversations: &[Conversation], projects: &[Project]) -> MergeReport {
        let report = self.update(|inner| {
            let report = merge_snapshot(&mut inner.state, conversations, projects);
            if !report.is_empty() {
                inner.emit(StoreEvent::Merged {
                    conversations: report.conversations_changed(),
                    projects: report.projects_changed(),
                });
            }
            report
        });
        if !report.is_empty() {
            tracing::info!(
                "Merged {} conversation(s), {} project(s), {} new message(s)",
                report.conversations_changed(),
                report.projects_changed(),
                report.messages_added
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use chrono::Duration;

    fn conversation_with(messages: Vec<Message>) -> Conversation {
        let mut conv = Conversation::new("llama3");
        conv.messages = messages;
        conv
    }

    fn message_counts(state: &AppState) -> Vec<(String, usize)> {
        state
            .conversations
            .iter()
            .map(|c| (c.id.clone(), c.messages.len()))
            .collect()
    }

    #[test]
    fn test_newer_remote_adds_reply() {
        let a = Message::user("hi");
        let local = conversation_with(vec![a.clone()]);
        let mut remote = local.clone();
        let b = Message::assistant("hello");
        remote.messages.push(b.clone());
        remote.updated_at = local.updated_at + Duration::seconds(5);

        let mut state = AppState::default();
        state.conversations.push(local);
        let report = merge_snapshot(&mut state, &[remote.clone()], &[]);

        let merged = &state.conversations[0];
        let ids: Vec<&str> = merged.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
        assert_eq!(merged.updated_at, remote.updated_at);
        assert_eq!(report.messages_added, 1);
        assert_eq!(report.conversations_updated, vec![remote.id.clone()]);
    }

    #[test]
    fn test_union_keeps_local_only_messages() {
        let shared = Message::user("hi");
        let mut local = conversation_with(vec![shared.clone(), Message::assistant("local reply")]);
        local.title = "Local".into();
        let mut remote = conversation_with(vec![shared, Message::assistant("remote reply")]);
        remote.id = local.id.clone();
        remote.title = "Remote".into();
        remote.updated_at = local.updated_at + Duration::seconds(1);

        let mut state = AppState::default();
        state.conversations.push(local);
        merge_snapshot(&mut state, &[remote], &[]);

        let merged = &state.conversations[0];
        assert_eq!(merged.title, "Remote");
        let contents: Vec<&str> = merged.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "local reply", "remote reply"]);
    }

    #[test]
    fn test_older_or_equal_remote_is_ignored() {
        let local = conversation_with(vec![Message::user("hi")]);
        let mut older = local.clone();
        older.title = "Stale".into();
        older.messages.push(Message::assistant("never seen"));
        older.updated_at = local.updated_at - Duration::seconds(1);
        let mut tied = older.clone();
        tied.updated_at = local.updated_at;

        let mut state = AppState::default();
        state.conversations.push(local.clone());
        assert!(merge_snapshot(&mut state, &[older, tied], &[]).is_empty());
        assert_eq!(state.conversations[0], local);
    }

    #[test]
    fn test_unknown_conversation_inserted() {
        let remote = conversation_with(vec![Message::user("from phone")]);
        let mut state = AppState::default();
        let report = merge_snapshot(&mut state, &[remote.clone()], &[]);
        assert_eq!(report.conversations_inserted, vec![remote.id.clone()]);
        assert_eq!(state.conversation(&remote.id), Some(&remote));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = conversation_with(vec![Message::user("hi")]);
        let mut remote = local.clone();
        remote.messages.push(Message::assistant("hello"));
        remote.updated_at = local.updated_at + Duration::seconds(2);
        let other = conversation_with(vec![Message::user("other")]);
        let mut project = Project::new("Shared");
        project.updated_at += Duration::seconds(3);

        let mut state = AppState::default();
        state.conversations.push(local);
        let remote_convs = vec![remote, other];
        let remote_projects = vec![project];

        merge_snapshot(&mut state, &remote_convs, &remote_projects);
        let once = state.clone();
        let report = merge_snapshot(&mut state, &remote_convs, &remote_projects);
        assert!(report.is_empty());
        assert_eq!(state, once);
    }

    #[test]
    fn test_merge_never_shrinks_message_lists() {
        let local = conversation_with(vec![
            Message::user("1"),
            Message::assistant("2"),
            Message::user("3"),
        ]);
        let mut remote = local.clone();
        remote.messages.truncate(1);
        remote.updated_at = local.updated_at + Duration::seconds(10);

        let mut state = AppState::default();
        state.conversations.push(local);
        let before = message_counts(&state);
        merge_snapshot(&mut state, &[remote], &[]);
        assert_eq!(message_counts(&state), before);
    }

    #[test]
    fn test_remote_messages_in_progress_are_skipped() {
        let local = conversation_with(vec![Message::user("hi")]);
        let mut remote = local.clone();
        let mut partial = Message::placeholder("llama3");
        partial.content = "hal".into();
        remote.messages.push(partial);
        remote.updated_at = local.updated_at + Duration::seconds(1);

        let mut state = AppState::default();
        state.conversations.push(local);
        let report = merge_snapshot(&mut state, &[remote], &[]);
        assert_eq!(report.messages_added, 0);
        assert_eq!(state.conversations[0].messages.len(), 1);
    }

    #[test]
    fn test_project_rename_later_wins_in_either_order() {
        let base = Project::new("Original");
        let mut device_a = base.clone();
        device_a.name = "Renamed on A".into();
        device_a.updated_at = base.updated_at + Duration::seconds(1);
        let mut device_b = base.clone();
        device_b.name = "Renamed on B".into();
        device_b.updated_at = base.updated_at + Duration::seconds(2);

        // A receives B's snapshot
        let mut on_a = AppState::default();
        on_a.projects.push(device_a.clone());
        merge_snapshot(&mut on_a, &[], &[device_b.clone()]);

        // B receives A's snapshot
        let mut on_b = AppState::default();
        on_b.projects.push(device_b.clone());
        merge_snapshot(&mut on_b, &[], &[device_a]);

        assert_eq!(on_a.projects[0].name, "Renamed on B");
        assert_eq!(on_b.projects[0].name, "Renamed on B");
        assert_eq!(on_a.projects, on_b.projects);
    }

    #[test]
    fn test_store_merge_publishes_once() {
        let store = Store::default();
        let mut rx = store.subscribe();
        let remote = conversation_with(vec![Message::user("hi")]);

        let report = store.merge_remote(&[remote.clone()], &[]);
        assert_eq!(report.conversations_changed(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Merged {
                conversations: 1,
                projects: 0
            }
        );

        assert!(store.merge_remote(&[remote], &[]).is_empty());
        assert!(rx.try_recv().is_err());
    }
}
