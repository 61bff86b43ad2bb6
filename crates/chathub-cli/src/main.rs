//! chathub - local-first chat client for Ollama

mod chat;
mod commands;
mod config;
mod utils;

use anyhow::{Context, bail};
use chathub_core::{
    Backend, ChatRequest, Connection, Hydration, Message, ModelInfo, ModelParameters,
    SendCoordinator, SnapshotFile, Store, persist,
};
use chathub_ollama::OllamaClient;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, watch};
use tracing_subscriber::EnvFilter;

use crate::commands::{CommandResult, ConversationCommand, ModelCommand};
use crate::config::Config;

/// chathub - chat with local models, keep every conversation
#[derive(Parser, Debug)]
#[command(name = "chathub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model for new conversations
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama host
    #[arg(long)]
    host: Option<String>,

    /// Ollama port
    #[arg(long)]
    port: Option<u16>,

    /// Talk to Ollama over https
    #[arg(long)]
    https: bool,

    /// State snapshot file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Send a single prompt and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Continue a conversation by id or id prefix
    #[arg(long)]
    conversation: Option<String>,

    /// List saved conversations
    #[arg(long)]
    conversations: bool,

    /// Export all conversations to a JSON file
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Import conversations from a JSON export
    #[arg(long, value_name = "PATH")]
    import: Option<PathBuf>,

    /// List installed models
    #[arg(long)]
    models: bool,

    /// Answer the -c prompt with two models side by side
    #[arg(long, value_name = "A,B", value_delimiter = ',', requires = "command")]
    compare: Vec<String>,

    /// Download a model
    #[arg(long, value_name = "NAME")]
    pull: Option<String>,

    /// Remove an installed model
    #[arg(long, value_name = "NAME")]
    delete_model: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Server address after merging flags over the config file
struct Target {
    host: String,
    port: u16,
    use_https: bool,
}

impl Target {
    fn resolve(args: &Args, cfg: &Config) -> Self {
        Self {
            host: args
                .host
                .clone()
                .or_else(|| cfg.host.clone())
                .unwrap_or_else(|| config::DEFAULT_HOST.to_string()),
            port: args.port.or(cfg.port).unwrap_or(config::DEFAULT_PORT),
            use_https: args.https || cfg.use_https.unwrap_or(false),
        }
    }

    fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("chathub=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = Config::init().context("Error creating config")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = Config::load();
    let target = Target::resolve(&args, &cfg);
    let client = Arc::new(OllamaClient::new(&target.base_url())?);

    // Model management does not touch saved state
    if args.models {
        let models = client.list_models().await?;
        let current = args.model.as_deref().or(cfg.model.as_deref()).unwrap_or("");
        println!("{}", ModelCommand::list_models_text(current, &models));
        return Ok(());
    }
    if let Some(name) = &args.pull {
        println!("Pulling {} (this can take a while)...", name);
        println!("{}", client.pull_model(name).await?);
        return Ok(());
    }
    if let Some(name) = &args.delete_model {
        client.delete_model(name).await?;
        println!("Deleted {}", name);
        return Ok(());
    }
    if !args.compare.is_empty() {
        let [first, second] = args.compare.as_slice() else {
            bail!("--compare takes exactly two models, e.g. --compare llama3,qwen2.5");
        };
        let prompt = args.command.as_deref().unwrap_or_default();
        let request = ChatRequest {
            request_id: "compare".to_string(),
            model: first.clone(),
            messages: vec![Message::user(prompt)],
            system_prompt: None,
            parameters: ModelParameters::default(),
            stream: false,
        };
        let comparison = client.compare_models(first, second, &request).await;
        println!("{}", ModelCommand::comparison_text(&comparison));
        return Ok(());
    }

    let state_file = args.state_file.clone().unwrap_or_else(|| cfg.state_file());
    let (store, manager, hydration) = persist::open(
        SnapshotFile::new(&state_file),
        Duration::from_millis(cfg.persist_debounce_ms()),
    )
    .with_context(|| format!("Failed to load {}", state_file.display()))?;
    if let Hydration::VersionMismatch { found } = hydration {
        eprintln!(
            "Warning: ignoring {} (snapshot version {:?} is not supported)",
            state_file.display(),
            found
        );
    }

    let result = run(&args, &cfg, &target, &store, client).await;

    manager.shutdown().await;
    result
}

async fn run(
    args: &Args,
    cfg: &Config,
    target: &Target,
    store: &Store,
    client: Arc<OllamaClient>,
) -> anyhow::Result<()> {
    if args.conversations {
        let active = store.read(|s| s.active_conversation().map(|c| c.id.clone()));
        let listing = store.read(|s| {
            ConversationCommand::list_text(s, active.as_deref(), chrono::Utc::now())
        });
        println!("{}", listing);
        return Ok(());
    }

    if let Some(path) = &args.export {
        std::fs::write(path, store.export_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        let count = store.read(|s| s.conversations.len());
        println!("Exported {} conversations to {}", count, path.display());
        return Ok(());
    }

    if let Some(path) = &args.import {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let report = store.import_conversations(&json)?;
        println!(
            "Imported {} conversations ({} already present)",
            report.imported, report.skipped
        );
        return Ok(());
    }

    connect(store, client.as_ref(), target).await?;

    let available = client.list_models().await.unwrap_or_else(|e| {
        tracing::warn!("Failed to list models: {}", e);
        Vec::new()
    });
    let model = choose_model(args, cfg, store, &available)?;
    store.set_selected_model(Some(model.clone()));

    let backend: Arc<dyn Backend> = client.clone();
    let coordinator = SendCoordinator::new(store.clone(), backend);

    let conversation = match &args.conversation {
        Some(query) => {
            let id = store
                .read(|s| s.find_conversation(query).map(|c| c.id.clone()))
                .with_context(|| format!("No single conversation matches '{}'", query))?;
            store.set_active_conversation(Some(&id))?;
            Some(id)
        }
        None => None,
    };

    let (current_tx, current_rx) = watch::channel(conversation.clone());
    let quit = Arc::new(Notify::new());
    let interrupts = spawn_interrupt_handler(coordinator.clone(), current_rx, quit.clone());

    let result = match &args.command {
        Some(prompt) => {
            let id = match conversation {
                Some(id) => id,
                None => store.create_conversation(&model, None)?,
            };
            current_tx.send_replace(Some(id.clone()));
            let outcome =
                chat::send_and_print(&coordinator, store, &id, prompt, std::io::stdout()).await?;
            // Let the title land before the final snapshot
            if let Some(title) = outcome.title_task {
                let _ = title.await;
            }
            Ok(())
        }
        None => {
            let session = Session {
                store,
                coordinator: &coordinator,
                client: client.as_ref(),
                model,
                available,
                active: conversation
                    .or_else(|| store.read(|s| s.active_conversation().map(|c| c.id.clone()))),
                current: current_tx,
            };
            session.run(quit).await
        }
    };

    interrupts.abort();
    result
}

/// Make the configured server the active connection, recording it if new
async fn connect(store: &Store, client: &OllamaClient, target: &Target) -> anyhow::Result<()> {
    let existing = store.read(|s| {
        s.connections
            .iter()
            .find(|c| c.host == target.host && c.port == target.port && c.use_https == target.use_https)
            .map(|c| c.id.clone())
    });
    let id = match existing {
        Some(id) => id,
        None => store.add_connection(Connection::new(
            target.host.clone(),
            target.host.clone(),
            target.port,
            target.use_https,
        )),
    };

    if !store.activate_connection(client, &id).await? {
        bail!(
            "Cannot reach Ollama at {}. Is `ollama serve` running?",
            target.base_url()
        );
    }
    Ok(())
}

/// Flag, then config, then the last selection, then the first installed model
fn choose_model(
    args: &Args,
    cfg: &Config,
    store: &Store,
    available: &[ModelInfo],
) -> anyhow::Result<String> {
    let requested = args
        .model
        .clone()
        .or_else(|| cfg.model.clone())
        .or_else(|| store.read(|s| s.selected_model.clone()))
        .or_else(|| store.read(|s| s.settings.default_model.clone()));

    match requested {
        Some(name) => Ok(commands::find_model(&name, available)
            .map(|m| m.name.clone())
            .unwrap_or(name)),
        None => available
            .first()
            .map(|m| m.name.clone())
            .context("No models installed. Pull one with: chathub --pull <name>"),
    }
}

/// Ctrl-C stops the reply being generated; with nothing generating it quits
fn spawn_interrupt_handler(
    coordinator: SendCoordinator,
    current: watch::Receiver<Option<String>>,
    quit: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let conversation = current.borrow().clone();
            let stopped = conversation
                .as_deref()
                .map(|id| coordinator.stop(id))
                .unwrap_or(false);
            if stopped {
                tracing::debug!("Stopped reply on interrupt");
            } else {
                quit.notify_one();
            }
        }
    })
}

/// Interactive stdin/stdout loop
struct Session<'a> {
    store: &'a Store,
    coordinator: &'a SendCoordinator,
    client: &'a OllamaClient,
    model: String,
    available: Vec<ModelInfo>,
    active: Option<String>,
    current: watch::Sender<Option<String>>,
}

impl Session<'_> {
    async fn run(mut self, quit: Arc<Notify>) -> anyhow::Result<()> {
        if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
            eprintln!("chathub ({}) - /help for commands", self.model);
            eprintln!();
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = quit.notified() => {
                    println!();
                    break;
                }
            };
            // EOF
            let Some(line) = line else {
                break;
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if input.starts_with('/') {
                let result = commands::execute_command(
                    input,
                    self.store,
                    self.active.as_deref(),
                    &self.available,
                );
                if let Some(result) = result {
                    if !self.apply(result).await? {
                        break;
                    }
                }
                continue;
            }

            let id = self.ensure_conversation()?;
            if let Err(e) =
                chat::send_and_print(self.coordinator, self.store, &id, input, std::io::stdout())
                    .await
            {
                eprintln!("Error: {}", e);
            }
        }
        Ok(())
    }

    fn ensure_conversation(&mut self) -> anyhow::Result<String> {
        if let Some(id) = &self.active {
            if self.store.conversation(id).is_some() {
                return Ok(id.clone());
            }
        }
        let id = self.store.create_conversation(&self.model, None)?;
        self.set_active(id.clone());
        Ok(id)
    }

    fn set_active(&mut self, id: String) {
        self.current.send_replace(Some(id.clone()));
        self.active = Some(id);
    }

    /// Apply a command result; `false` means exit
    async fn apply(&mut self, result: CommandResult) -> anyhow::Result<bool> {
        match result {
            CommandResult::NewConversation => {
                let id = self.store.create_conversation(&self.model, None)?;
                println!("Started conversation {}", utils::short_id(&id));
                self.set_active(id);
            }
            CommandResult::Switch(id) => {
                self.store.set_active_conversation(Some(&id))?;
                let title = self
                    .store
                    .conversation(&id)
                    .map(|c| c.title)
                    .unwrap_or_default();
                println!("Switched to: {}", title);
                self.set_active(id);
            }
            CommandResult::ChangeModel(name) => {
                if let Some(id) = &self.active {
                    self.store.set_conversation_model(id, &name)?;
                }
                self.store.set_selected_model(Some(name.clone()));
                println!("Switched to: {}", name);
                self.model = name;
            }
            CommandResult::ListModels => {
                match self.client.list_models().await {
                    Ok(models) => self.available = models,
                    Err(e) => tracing::warn!("Failed to list models: {}", e),
                }
                let current = self
                    .active
                    .as_deref()
                    .and_then(|id| self.store.conversation(id))
                    .map(|c| c.model_name)
                    .unwrap_or_else(|| self.model.clone());
                println!("{}", ModelCommand::list_models_text(&current, &self.available));
            }
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Exit => return Ok(false),
            CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
        }
        Ok(true)
    }
}
