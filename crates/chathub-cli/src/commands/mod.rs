//! Slash commands for interactive mode

mod conversation;
mod model;

pub use conversation::ConversationCommand;
pub use model::{ModelCommand, find_model};

use chathub_core::{ModelInfo, Store};

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Start a fresh conversation
    NewConversation,
    /// Make another conversation current
    Switch(String),
    /// Use another model for the current conversation
    ChangeModel(String),
    /// List installed models (needs a round trip to the server)
    ListModels,
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command against the current conversation
pub fn execute_command(
    input: &str,
    store: &Store,
    active: Option<&str>,
    available_models: &[ModelInfo],
) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "new" | "n" => CommandResult::NewConversation,

        "list" | "l" => CommandResult::Message(store.read(|state| {
            ConversationCommand::list_text(state, active, chrono::Utc::now())
        })),

        "switch" | "s" => ConversationCommand::switch(args, store),

        "title" => ConversationCommand::rename(args, store, active),

        "model" | "m" => {
            let current = active
                .and_then(|id| store.conversation(id))
                .map(|c| c.model_name)
                .unwrap_or_default();
            ModelCommand::execute(args, &current, available_models)
        }

        "params" | "p" => ConversationCommand::params(args, store, active),

        "info" | "i" => ConversationCommand::info(store, active),

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?         Show this help message
  /new, /n              Start a new conversation
  /list, /l             List conversations
  /switch, /s <id>      Switch to a conversation (id or id prefix)
  /title <text>         Rename the current conversation
  /model, /m [name]     List models or switch to a model
  /params, /p <preset>  Apply sampling preset (balanced, creative, precise, code)
  /info, /i             Show details of the current conversation
  /quit, /exit, /q      Exit chathub

Press Ctrl-C while a reply is streaming to stop it."#
        .to_string()
}
