//! Composer Headless - Line-Oriented Chat Driver
//!
//! Drives one [`Composer`] from standard input and prints its events, so the
//! submission pipeline can be exercised without a UI surface.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the built-in echo backend as a guest
//! composer-headless
//!
//! # Talk to a real backend as a signed-in user
//! composer-headless --endpoint http://localhost:8080 --login alice
//!
//! # With config file and draft persistence
//! composer-headless --config ./composer.toml --drafts ./drafts.json
//!
//! # Verbose logging
//! RUST_LOG=debug composer-headless
//! ```

mod commands;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use composer_core::memory::{
    DailyUsageTracker, EchoTransport, MemoryAgentDirectory, MemoryAttachmentUploader,
    MemoryConversationStore, MemoryIdentityProvider,
};
use composer_core::{
    default_config_path, load_config_from_path, Agent, AgentId, AgentScope, ChatSession,
    ChatTransport, Collaborators, Composer, ComposerEvent, ConfigOverrides, ExchangeStatus,
    HttpTransport, LocalFile, ReloadOutcome, SubmitOutcome, User,
};

use commands::{content_type_for, Command, HELP};

/// Capacity of the Composer event channel
const EVENT_BUFFER: usize = 256;

/// Composer Headless - drive the submission pipeline from a terminal
#[derive(Parser, Debug)]
#[command(name = "composer-headless")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COMPOSER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Chat backend base URL; the echo backend is used when absent
    #[arg(short = 'e', long, env = "COMPOSER_ENDPOINT", value_name = "URL")]
    endpoint: Option<String>,

    /// Sign in as this user id instead of browsing as a guest
    #[arg(long, value_name = "USER_ID")]
    login: Option<String>,

    /// Model to start with
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Draft snapshot restored at start and written at exit
    #[arg(long, env = "COMPOSER_DRAFTS", value_name = "FILE")]
    drafts: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "COMPOSER_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "composer_headless={level},composer_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Agents offered by the in-memory directory
fn seed_agents(directory: &MemoryAgentDirectory) {
    directory.add(Agent {
        id: AgentId::new("agent-research"),
        slug: "research".to_string(),
        name: "Research Assistant".to_string(),
        system_prompt: "You find and summarize sources. Cite what you use.".to_string(),
        scope: AgentScope::Curated,
        creator_id: None,
    });
    directory.add(Agent {
        id: AgentId::new("agent-editor"),
        slug: "editor".to_string(),
        name: "Copy Editor".to_string(),
        system_prompt: "You tighten prose without changing its meaning.".to_string(),
        scope: AgentScope::Curated,
        creator_id: None,
    });
}

async fn read_attachment(path: &Path) -> Result<LocalFile> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();
    Ok(LocalFile::new(name, content_type_for(path), data))
}

/// Print Composer events until the channel closes
async fn print_events(mut rx: mpsc::Receiver<ComposerEvent>, composer: Arc<Composer>) {
    while let Some(event) = rx.recv().await {
        match event {
            ComposerEvent::Notify(notification) => {
                println!("[{:?}] {}", notification.status, notification.title);
            }
            ComposerEvent::AuthPromptRequested => {
                println!("[auth] Sign in (--login <id>) to keep chatting.");
            }
            ComposerEvent::Stream(ExchangeStatus::Ready) => {
                if let Some(reply) = composer.messages().last() {
                    println!("assistant> {}", reply.content);
                }
            }
            ComposerEvent::Stream(ExchangeStatus::Stopped) => println!("(stopped)"),
            ComposerEvent::Phase(phase) => {
                tracing::debug!(phase = phase.description(), "Phase");
            }
            ComposerEvent::Ledger(change) => tracing::debug!(?change, "Ledger"),
            ComposerEvent::Stream(status) => tracing::debug!(?status, "Stream"),
        }
    }
}

/// Apply one command; returns `false` to exit
async fn dispatch(composer: &Composer, session: &mut ChatSession, command: Command) -> bool {
    match command {
        Command::Send(text) => {
            composer.set_input(session, &text);
            let outcome = composer.submit(session).await;
            report(session, outcome);
        }
        Command::Suggest(text) => {
            let outcome = composer.handle_suggestion(session, &text).await;
            report(session, outcome);
        }
        Command::Reload => match composer.handle_reload(session).await {
            ReloadOutcome::Reissued { generation } => info!(generation, "Reloading"),
            ReloadOutcome::Refused(e) => println!("Cannot reload: {e}"),
            ReloadOutcome::Aborted => println!("Cannot reload without an identity"),
        },
        Command::Stop => {
            if !composer.stop() {
                println!("Nothing is streaming");
            }
        }
        Command::Attach(path) => match read_attachment(&path).await {
            Ok(file) => {
                if composer.stage_files(vec![file]).await {
                    println!("Staged: {}", composer.staged_files().join(", "));
                }
            }
            Err(e) => println!("{e:#}"),
        },
        Command::Detach(name) => {
            if !composer.remove_staged_file(&name) {
                println!("{name} is not staged");
            }
        }
        Command::Model(model) => {
            if composer.select_model(session, &model).await {
                println!("Model: {}", composer.selected_model());
            }
        }
        Command::Agent(slug) => {
            *session = session.clone().with_agent_slug(slug);
            match composer.apply_route(session).await {
                Some(agent) => println!("Agent: {}", agent.name),
                None => println!("No agent"),
            }
        }
        Command::New => {
            session.conversation_id = None;
            composer.open_conversation(session, Vec::new()).await;
            println!("New conversation");
        }
        Command::Messages => {
            for message in composer.messages() {
                println!("{:?}> {}", message.role, message.content);
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn report(session: &mut ChatSession, outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Sent {
            conversation_id, ..
        } => {
            session.conversation_id = Some(conversation_id);
        }
        SubmitOutcome::Ignored => println!("Still sending the previous message"),
        SubmitOutcome::Aborted => println!("Could not sign you in as a guest"),
        SubmitOutcome::RolledBack { .. } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Composer headless starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config_from_path(args.config.clone().or_else(default_config_path))
        .context("Failed to load configuration")?;
    let mut overrides = ConfigOverrides::new();
    if let Some(model) = args.model.clone() {
        overrides = overrides.with_default_model(model);
    }
    overrides.apply(&mut config);
    info!(source = ?config.source(), model = %config.default_model, "Configuration loaded");

    let usage = Arc::new(DailyUsageTracker::new());
    let transport: Arc<dyn ChatTransport> = match args.endpoint {
        Some(ref url) => Arc::new(HttpTransport::new(url.clone())?),
        None => Arc::new(EchoTransport::new().with_usage(usage.clone(), config.catalog.clone())),
    };
    if !transport.health_check().await {
        warn!(transport = transport.name(), "Chat backend is not reachable");
    }

    let agents = Arc::new(MemoryAgentDirectory::new());
    seed_agents(&agents);

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let collaborators = Collaborators {
        identity: Arc::new(MemoryIdentityProvider::new()),
        store: Arc::new(MemoryConversationStore::new()),
        usage,
        uploader: Arc::new(MemoryAttachmentUploader::new()),
        agents,
        transport,
    };
    let composer = Arc::new(Composer::new(config, collaborators, tx));

    if let Some(ref path) = args.drafts {
        match composer.drafts().restore(path).await {
            Ok(count) => info!(count, path = ?path, "Drafts restored"),
            Err(e) => warn!(error = %e, path = ?path, "Failed to restore drafts"),
        }
    }

    let mut session = match args.login {
        Some(id) => ChatSession::for_user(User::new(id)),
        None => ChatSession::guest(),
    };
    composer.refresh_agents(&session).await;
    composer.open_conversation(&session, Vec::new()).await;

    let printer = tokio::spawn(print_events(rx, composer.clone()));
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(command)) => {
                        if !dispatch(&composer, &mut session, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }
    }

    // Keep the unsent draft for the next run
    composer.set_input(&session, &composer.input());
    if let Some(ref path) = args.drafts {
        if let Err(e) = composer.drafts().persist(path).await {
            warn!(error = %e, path = ?path, "Failed to persist drafts");
        }
    }

    printer.abort();
    info!("Composer headless stopped");
    Ok(())
}
