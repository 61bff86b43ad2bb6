//! /model command - list and switch models

use super::CommandResult;
use crate::utils::format_size;
use chathub_core::ModelInfo;
use chathub_ollama::{Comparison, ModelReply};

pub struct ModelCommand;

impl ModelCommand {
    /// Lists models without args, otherwise switches to the matching model
    pub fn execute(args: &str, current: &str, available_models: &[ModelInfo]) -> CommandResult {
        if args.is_empty() {
            return CommandResult::ListModels;
        }
        if available_models.is_empty() {
            // Nothing to match against; trust the name
            return CommandResult::ChangeModel(args.to_string());
        }
        match find_model(args, available_models) {
            Some(model) if model.name == current => {
                CommandResult::Message(format!("Already using {}", current))
            }
            Some(model) => CommandResult::ChangeModel(model.name.clone()),
            None => CommandResult::Message(format!(
                "No model found matching '{}'\nUse /model to list available models",
                args
            )),
        }
    }

    /// List models as text, marking the current one
    pub fn list_models_text(current: &str, models: &[ModelInfo]) -> String {
        if models.is_empty() {
            return "No models installed. Pull one with: chathub --pull <name>".to_string();
        }

        let mut output = String::from("Available models:\n");
        for model in models {
            let marker = if model.name == current { " *" } else { "" };
            let mut details = Vec::new();
            if let Some(size) = model.size {
                details.push(format_size(size));
            }
            if let Some(params) = model.details.as_ref().and_then(|d| d.parameter_size.as_deref()) {
                details.push(params.to_string());
            }
            if details.is_empty() {
                output.push_str(&format!("  {}{}\n", model.name, marker));
            } else {
                output.push_str(&format!("  {}{} ({})\n", model.name, marker, details.join(", ")));
            }
        }

        output.push_str("\nSwitch with: /model <name>");
        output
    }

    /// Both replies of a comparison, each under a header with its timing
    pub fn comparison_text(comparison: &Comparison) -> String {
        let section = |reply: &ModelReply| {
            format!(
                "== {} ({:.1}s) ==\n{}",
                reply.name,
                reply.duration_ms as f64 / 1000.0,
                reply.content.trim()
            )
        };
        format!(
            "{}\n\n{}",
            section(&comparison.first),
            section(&comparison.second)
        )
    }
}

pub fn find_model<'a>(query: &str, models: &'a [ModelInfo]) -> Option<&'a ModelInfo> {
    let query_lower = query.to_lowercase();

    // Exact match first, then with the implicit :latest tag
    if let Some(model) = models.iter().find(|m| {
        let name = m.name.to_lowercase();
        name == query_lower || name == format!("{}:latest", query_lower)
    }) {
        return Some(model);
    }

    models
        .iter()
        .find(|m| m.name.to_lowercase().contains(&query_lower))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<ModelInfo> {
        ["llama3.2:latest", "llama3.2:1b", "qwen2.5-coder:7b"]
            .into_iter()
            .map(|name| ModelInfo {
                name: name.to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_find_model() {
        let models = models();
        assert_eq!(find_model("llama3.2", &models).unwrap().name, "llama3.2:latest");
        assert_eq!(find_model("LLAMA3.2:1B", &models).unwrap().name, "llama3.2:1b");
        assert_eq!(find_model("coder", &models).unwrap().name, "qwen2.5-coder:7b");
        assert!(find_model("mistral", &models).is_none());
    }

    #[test]
    fn test_execute() {
        let models = models();
        assert_eq!(
            ModelCommand::execute("coder", "llama3.2:latest", &models),
            CommandResult::ChangeModel("qwen2.5-coder:7b".into())
        );
        assert!(matches!(
            ModelCommand::execute("mistral", "llama3.2:latest", &models),
            CommandResult::Message(m) if m.contains("No model found")
        ));
        assert!(matches!(
            ModelCommand::execute("llama3.2", "llama3.2:latest", &models),
            CommandResult::Message(m) if m.starts_with("Already using")
        ));
        assert_eq!(
            ModelCommand::execute("phi4", "llama3.2", &[]),
            CommandResult::ChangeModel("phi4".into())
        );
    }

    #[test]
    fn test_list_marks_current() {
        let text = ModelCommand::list_models_text("llama3.2:1b", &models());
        assert!(text.contains("  llama3.2:1b *\n"));
        assert!(text.contains("  qwen2.5-coder:7b\n"));
        assert!(ModelCommand::list_models_text("x", &[]).starts_with("No models installed"));
    }

    #[test]
    fn test_comparison_text() {
        let reply = |name: &str, content: &str, duration_ms| ModelReply {
            name: name.to_string(),
            content: content.to_string(),
            duration_ms,
        };
        let text = ModelCommand::comparison_text(&Comparison {
            first: reply("llama3.2", "Seven.\n", 1340),
            second: reply("qwen2.5", "Error: HTTP error: connection refused", 4),
        });
        assert_eq!(
            text,
            "== llama3.2 (1.3s) ==\nSeven.\n\n== qwen2.5 (0.0s) ==\nError: HTTP error: connection refused"
        );
    }
}
