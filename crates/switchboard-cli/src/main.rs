//! switchboard
//!
//! Runs conversations with a tool-using model from the command line. State
//! lives in a JSON file, so a conversation started in one invocation can be
//! continued or inspected in the next; deferred tools interrupted by an exit
//! are picked up again on the next start.

mod config;
mod display;
mod error;
mod providers;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use switchboard::{ConversationStore, Orchestrator, OrchestratorEvent, QueueRunner};
use switchboard_client::AnthropicClient;

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// How often `ask` re-reads the turn while deferred tools run.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `ask` waits for a conversation title before exiting.
const TITLE_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message and print the reply
    Ask {
        /// The message text
        text: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<Uuid>,

        /// Seconds to wait for deferred tools before giving up
        #[arg(long, default_value_t = 300)]
        wait: u64,
    },

    /// Print a stored conversation with its tool calls and their logs
    Show {
        /// Conversation id
        conversation: Uuid,
    },

    /// List the tools offered to the model
    Tools,
}

/// Initializes structured logging with tracing.
///
/// `SWITCHBOARD_LOG_FORMAT=json` selects machine-readable output, anything
/// else the human-readable format. `RUST_LOG` sets the filter. Records from
/// the library crates arrive through the `log` bridge.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("SWITCHBOARD_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchboard=info,switchboard_cli=info"));

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn trace_event(event: OrchestratorEvent) {
    match event {
        OrchestratorEvent::TurnProcessed { turn } => {
            info!(turn_id = %turn.id, "Turn processed");
        }
        OrchestratorEvent::TurnErrored { turn } => {
            warn!(turn_id = %turn.id, error = turn.error_message.as_deref().unwrap_or_default(), "Turn errored");
        }
        OrchestratorEvent::LogAppended { entry } => {
            debug!(invocation_id = %entry.invocation_id, level = entry.level.as_str(), "{}", entry.message);
        }
        OrchestratorEvent::InvocationSettled { invocation } => {
            info!(
                invocation_id = %invocation.id,
                tool = %invocation.tool_name,
                status = invocation.status.as_str(),
                "Tool invocation settled"
            );
        }
        OrchestratorEvent::ToolCompleted { invocation_id, .. } => {
            debug!(%invocation_id, "Tool reported completion");
        }
    }
}

/// Polls until the turn stops waiting. Returns false on Ctrl-C.
async fn wait_for_turn(store: &dyn ConversationStore, turn_id: Uuid) -> Result<bool> {
    loop {
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => return Ok(false),
        }
        if !store.turn(turn_id)?.is_awaiting_completion() {
            return Ok(true);
        }
    }
}

/// Lets background title requests finish before the runtime stops.
async fn finish_titles(orchestrator: &Orchestrator) {
    for task in orchestrator.take_title_tasks() {
        match tokio::time::timeout(TITLE_WAIT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Title task failed"),
            Err(_) => warn!("Gave up waiting for the conversation title"),
        }
    }
}

async fn ask(config: &AppConfig, text: &str, conversation: Option<Uuid>, wait: Duration) -> Result<()> {
    let store: Arc<dyn ConversationStore> = Arc::new(storage::open_store(&config.state_path()?)?);
    let registry = providers::build_registry(config, env_var)?;
    let model = AnthropicClient::new(config.client_config(env_var)?)?;

    let (runner, queue) = QueueRunner::channel();
    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::clone(&store),
            Arc::new(model),
            Arc::new(registry),
            Arc::new(runner),
        )
        .with_settings(config.orchestrator_settings())
        .with_event_callback(trace_event),
    );
    let worker = Arc::clone(&orchestrator).serve_deferred(queue);

    let recovery = orchestrator.recover().await?;
    if recovery != switchboard::Recovery::default() {
        info!(
            failed = recovery.failed,
            resubmitted = recovery.resubmitted,
            advanced = recovery.advanced,
            "Recovered interrupted work"
        );
    }

    let turn = orchestrator.start_conversation(text, conversation).await?;
    let turn_id = turn.id;

    if turn.is_awaiting_completion() {
        info!(%turn_id, "Waiting for deferred tools");
        let settled = tokio::time::timeout(wait, wait_for_turn(store.as_ref(), turn_id)).await;

        match settled {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                println!("{}", "Interrupted; unfinished tools are recovered on the next run.".yellow());
                println!("conversation: {}", turn.conversation_id);
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                println!("{}", "Stopped waiting; unfinished tools are recovered on the next run.".yellow());
                println!("conversation: {}", turn.conversation_id);
                return Ok(());
            }
        }
    }

    let turn = store.turn(turn_id)?;
    if turn.error {
        finish_titles(&orchestrator).await;
        return Err(CliError::Other(
            turn.error_message
                .unwrap_or_else(|| switchboard_common::DEFAULT_TURN_ERROR.to_string()),
        ));
    }

    let reply = store
        .responses_for_turn(turn_id)?
        .last()
        .map(switchboard_common::ModelResponse::text)
        .unwrap_or_default();
    display::print_reply(&reply);
    println!();
    println!("conversation: {}", turn.conversation_id.to_string().dimmed());

    finish_titles(&orchestrator).await;
    worker.abort();
    Ok(())
}

fn show(config: &AppConfig, conversation_id: Uuid) -> Result<()> {
    let store = storage::open_store(&config.state_path()?)?;
    let conversation = store.conversation(conversation_id)?;
    display::print_conversation_header(&conversation);

    for turn in store.turns(conversation_id)? {
        display::print_turn(&turn);
        for response in store.responses_for_turn(turn.id)? {
            display::print_response(&response);
            for invocation in store.invocations_for_response(response.id)? {
                let logs = store.logs_for_invocation(invocation.id)?;
                display::print_invocation(&invocation, &logs);
            }
        }
        println!();
    }
    Ok(())
}

fn tools(config: &AppConfig) -> Result<()> {
    let registry = providers::build_registry(config, env_var)?;
    display::print_catalogue(&registry.list_tools());
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    debug!(providers = config.providers.len(), "Loaded configuration");

    match args.command {
        Command::Ask {
            text,
            conversation,
            wait,
        } => ask(&config, &text, conversation, Duration::from_secs(wait)).await,
        Command::Show { conversation } => show(&config, conversation),
        Command::Tools => tools(&config),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
