//! Conversation commands: /list, /switch, /title, /params, /info

use super::CommandResult;
use crate::utils::{format_age, short_id, truncate_chars};
use chathub_core::{AppState, MessageRole, ModelParameters, Store};
use chrono::{DateTime, Utc};

pub struct ConversationCommand;

impl ConversationCommand {
    /// One line per conversation, most recent first, active one starred
    pub fn list_text(state: &AppState, active: Option<&str>, now: DateTime<Utc>) -> String {
        if state.conversations.is_empty() {
            return "No conversations yet.".to_string();
        }

        let mut conversations: Vec<_> = state.conversations.iter().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut output = String::new();
        for c in conversations {
            let marker = if Some(c.id.as_str()) == active { "*" } else { " " };
            output.push_str(&format!(
                "{} {}  {}  ({} messages, {}, {})\n",
                marker,
                short_id(&c.id),
                truncate_chars(&c.title, 40),
                c.messages.len(),
                c.model_name,
                format_age(c.updated_at, now)
            ));
        }
        output.pop();
        output
    }

    pub fn switch(args: &str, store: &Store) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message("Usage: /switch <id>".to_string());
        }
        match store.read(|state| state.find_conversation(args).map(|c| c.id.clone())) {
            Some(id) => CommandResult::Switch(id),
            None => CommandResult::Message(format!("No single conversation matches '{}'", args)),
        }
    }

    pub fn rename(args: &str, store: &Store, active: Option<&str>) -> CommandResult {
        let Some(id) = active else {
            return no_conversation();
        };
        if args.is_empty() {
            return CommandResult::Message("Usage: /title <text>".to_string());
        }
        match store.rename_conversation(id, args) {
            Ok(()) => CommandResult::Message(format!("Renamed to \"{}\"", args)),
            Err(e) => CommandResult::Message(e.to_string()),
        }
    }

    pub fn params(args: &str, store: &Store, active: Option<&str>) -> CommandResult {
        let Some(id) = active else {
            return no_conversation();
        };
        let Some(parameters) = ModelParameters::preset(args) else {
            return CommandResult::Message(
                "Usage: /params <balanced|creative|precise|code>".to_string(),
            );
        };
        let summary = format!(
            "temperature {}, top_k {}, top_p {}",
            parameters.temperature,
            parameters.top_k.map(|k| k.to_string()).unwrap_or_else(|| "-".into()),
            parameters.top_p.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        );
        match store.set_parameters(id, parameters) {
            Ok(()) => CommandResult::Message(format!("Using {} preset ({})", args.to_lowercase(), summary)),
            Err(e) => CommandResult::Message(e.to_string()),
        }
    }

    pub fn info(store: &Store, active: Option<&str>) -> CommandResult {
        let Some(conversation) = active.and_then(|id| store.conversation(id)) else {
            return no_conversation();
        };

        let count = |role: MessageRole| {
            conversation
                .messages
                .iter()
                .filter(|m| m.role == role)
                .count()
        };
        let tokens: u32 = conversation
            .messages
            .iter()
            .filter_map(|m| m.token_count)
            .sum();

        let mut output = String::from("Conversation Info\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("Title:       {}\n", conversation.title));
        output.push_str(&format!("Id:          {}\n", conversation.id));
        output.push_str(&format!("Model:       {}\n", conversation.model_name));
        output.push_str(&format!(
            "Parameters:  temperature {}\n",
            conversation.parameters.temperature
        ));
        if let Some(prompt) = &conversation.system_prompt {
            output.push_str(&format!("System:      {}\n", truncate_chars(prompt, 60)));
        }
        output.push_str(&format!(
            "Messages:    {} ({} user, {} assistant)\n",
            conversation.messages.len(),
            count(MessageRole::User),
            count(MessageRole::Assistant)
        ));
        output.push_str(&format!("Tokens:      {}\n", tokens));
        output.push_str(&format!(
            "Created:     {}",
            conversation.created_at.format("%Y-%m-%d %H:%M")
        ));
        CommandResult::Message(output)
    }
}

fn no_conversation() -> CommandResult {
    CommandResult::Message("No active conversation. Start one with /new".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_orders_by_recency() {
        let store = Store::default();
        let first = store.create_conversation("llama3", None).unwrap();
        let second = store.create_conversation("llama3", None).unwrap();
        store.rename_conversation(&first, "Older but edited").unwrap();

        let text = store.read(|s| ConversationCommand::list_text(s, Some(&second), Utc::now()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Older but edited"));
        assert!(lines[1].starts_with(&format!("* {}", short_id(&second))));
        assert!(lines[1].contains("(0 messages, llama3, just now)"));

        let empty = Store::default();
        assert_eq!(
            empty.read(|s| ConversationCommand::list_text(s, None, Utc::now())),
            "No conversations yet."
        );
    }

    #[test]
    fn test_switch_by_prefix() {
        let store = Store::default();
        let id = store.create_conversation("llama3", None).unwrap();
        assert_eq!(
            ConversationCommand::switch(&id[..8], &store),
            CommandResult::Switch(id.clone())
        );
        assert!(matches!(
            ConversationCommand::switch("zzzz", &store),
            CommandResult::Message(_)
        ));
    }

    #[test]
    fn test_params_preset() {
        let store = Store::default();
        let id = store.create_conversation("llama3", None).unwrap();

        let result = ConversationCommand::params("Creative", &store, Some(&id));
        assert!(matches!(result, CommandResult::Message(m) if m.starts_with("Using creative preset")));
        assert_eq!(
            store.conversation(&id).unwrap().parameters,
            ModelParameters::creative()
        );

        assert!(matches!(
            ConversationCommand::params("wild", &store, Some(&id)),
            CommandResult::Message(m) if m.starts_with("Usage")
        ));
        assert!(matches!(
            ConversationCommand::params("code", &store, None),
            CommandResult::Message(m) if m.starts_with("No active conversation")
        ));
    }

    #[test]
    fn test_info() {
        let store = Store::default();
        let id = store.create_conversation("llama3", None).unwrap();
        store.rename_conversation(&id, "Bread").unwrap();
        let CommandResult::Message(text) = ConversationCommand::info(&store, Some(&id)) else {
            panic!("expected message");
        };
        assert!(text.contains("Title:       Bread"));
        assert!(text.contains("Messages:    0 (0 user, 0 assistant)"));
    }
}
