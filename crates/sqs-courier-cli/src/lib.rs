//! # SQS Courier CLI
//!
//! Command-line front end for the `sqs-courier` library:
//! - `queues` lists queues, optionally by name prefix
//! - `send` sends one message
//! - `listen` prints and deletes messages from one or more queues until Ctrl-C
//! - `attributes` shows queue attributes
//!
//! Client settings come from an optional configuration file layered under
//! `SQS_COURIER__*` environment variables.

use clap::{Parser, Subcommand};
use sqs_courier::{
    handler_fn, ClientConfig, ConfigurationError, HandlerError, ListenerConfig,
    MultiQueueListener, Queue, QueueAttributes, QueueClient, QueueError,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// SQS Courier - send, inspect and consume queue messages
#[derive(Parser)]
#[command(name = "sqs-courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Signed client for SQS-style queue services")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SQS_COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List queues
    Queues {
        /// Only list queues whose name starts with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Send a message
    Send {
        /// Queue name or URL
        queue: String,

        /// Message body
        body: String,

        /// Delay before the message becomes visible, in seconds
        #[arg(short, long)]
        delay: Option<u32>,
    },

    /// Print and delete messages until interrupted
    Listen {
        /// Queue names or URLs
        #[arg(required = true)]
        queues: Vec<String>,

        /// Long-poll wait per receive, in seconds (0-20)
        #[arg(short, long, default_value = "5")]
        poll_time: u32,
    },

    /// Show queue attributes
    Attributes {
        /// Queue name or URL
        queue: String,

        /// Attribute names; all attributes when omitted
        names: Vec<String>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error("Queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl From<QueueError> for CliError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Configuration(e) => Self::Configuration(e),
            other => Self::Queue(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::QueueNotFound { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Logging { .. } => 6,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(cli.config.as_deref())?;
    let client = QueueClient::new(&config)?;

    execute_command(cli.command, &client, &mut std::io::stdout()).await
}

/// Install the global tracing subscriber.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })?;

    let json_layer = cli
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!cli.json_logs).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })
}

/// Load client configuration from `path` (if any) and the environment.
pub fn load_configuration(path: Option<&Path>) -> Result<ClientConfig, CliError> {
    let config = ClientConfig::load(path)?;
    info!(region = %config.region, "Loaded client configuration");
    Ok(config)
}

/// Run one command, writing its output to `out`.
pub async fn execute_command<W: Write>(
    command: Commands,
    client: &QueueClient,
    out: &mut W,
) -> Result<(), CliError> {
    match command {
        Commands::Queues { prefix } => {
            for queue in client.list_queues(prefix.as_deref()).await? {
                writeln!(out, "{}\t{}", queue.name(), queue.url())?;
            }
        }
        Commands::Send { queue, body, delay } => {
            let queue = resolve_queue(client, &queue).await?;
            let sent = match delay {
                Some(delay) => queue.send_with_delay(&body, delay).await?,
                None => queue.send(&body).await?,
            };
            writeln!(out, "{}", sent.message_id)?;
        }
        Commands::Listen { queues, poll_time } => {
            let mut resolved = Vec::with_capacity(queues.len());
            for queue in &queues {
                resolved.push(resolve_queue(client, queue).await?);
            }
            listen_until_interrupted(resolved, poll_time).await?;
        }
        Commands::Attributes { queue, names } => {
            let queue = resolve_queue(client, &queue).await?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            match queue.attributes(&names).await? {
                QueueAttributes::Single(value) => writeln!(out, "{}", value)?,
                QueueAttributes::Map(map) => {
                    let mut entries: Vec<_> = map.into_iter().collect();
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                    for (name, value) in entries {
                        writeln!(out, "{}={}", name, value)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Accept either a full queue URL or a queue name to look up.
async fn resolve_queue(client: &QueueClient, queue: &str) -> Result<Queue, CliError> {
    if queue.starts_with("http://") || queue.starts_with("https://") {
        return Ok(client.queue_from_url(queue)?);
    }

    client
        .get_queue(queue)
        .await?
        .ok_or_else(|| CliError::QueueNotFound {
            name: queue.to_string(),
        })
}

async fn listen_until_interrupted(queues: Vec<Queue>, poll_time: u32) -> Result<(), CliError> {
    let config = ListenerConfig::default().with_poll_time(poll_time);
    let mut listener = MultiQueueListener::new(queues, config)?;

    listener.listen(handler_fn(|message| async move {
        println!(
            "{}\t{}\t{}",
            message.queue().name(),
            message.id(),
            message.body()
        );
        message.delete().await?;
        Ok::<(), HandlerError>(())
    }));
    info!(queues = listener.queues().len(), "Listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, waiting for listeners to finish");
    listener.stop().await;
    Ok(())
}
