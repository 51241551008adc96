//! # Queue Manager CLI
//!
//! Command-line interface for working with a single managed queue.
//!
//! This module provides CLI commands for:
//! - Sending, receiving and deleting messages
//! - Purging and deleting the queue
//! - Reading approximate message counts
//! - Running the long-poll loop and printing what arrives
//!
//! Data goes to stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use queue_manager::{
    CancellationToken, DeleteOutcome, Message, QueueClient, QueueError,
    QueueManagerConfig, QueueMode, ReceiptHandle, SendRequest,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Manager CLI - work with a managed message queue
#[derive(Parser)]
#[command(name = "queue-manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, receive and poll messages on a managed queue")]
pub struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "QUEUE_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue name, overriding the configuration file
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Visibility timeout in seconds applied to every receive
    #[arg(long)]
    pub visibility_timeout: Option<u32>,

    /// AWS region override
    #[arg(long)]
    pub region: Option<String>,

    /// Service endpoint override, e.g. http://localhost:4566
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Logging level
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
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Send one message
    Send {
        /// Message body
        body: String,

        /// Delivery delay in seconds
        #[arg(short, long)]
        delay: Option<u32>,

        /// Message group (required for FIFO queues)
        #[arg(short, long)]
        group: Option<String>,

        /// Deduplication id for FIFO queues
        #[arg(long)]
        deduplication_id: Option<String>,
    },

    /// Receive messages without waiting
    Receive {
        /// Maximum number of messages (1-10)
        #[arg(short = 'n', long, default_value = "1")]
        max_messages: u32,

        /// Delete each message after printing it
        #[arg(long)]
        delete: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a message by receipt handle
    Delete {
        /// Receipt handle from a previous receive
        receipt_handle: String,
    },

    /// Remove every message from the queue
    Purge {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete the queue itself
    DeleteQueue {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show approximate message counts
    Counts {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Long-poll the queue and print messages until interrupted
    Poll {
        /// Long-poll wait per receive in seconds (0-20)
        #[arg(short, long)]
        wait_time: Option<u32>,

        /// Messages per receive (1-10)
        #[arg(short = 'n', long)]
        max_messages: Option<u32>,

        /// Leave messages in the queue after printing them
        #[arg(long)]
        skip_delete: bool,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// One JSON document per line
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output formatting failed: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Queue(QueueError::Configuration(_)) | Self::Queue(QueueError::Validation(_)) => 1,
            Self::Queue(QueueError::AuthenticationFailed { .. }) => 3,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) | Self::Output(_) => 5,
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

    let config = build_config(&cli)?;
    let client = QueueClient::sqs(config).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    execute_command(cli.command, &client, cancel, &mut stdout).await
}

/// Initialize logging based on CLI arguments. `RUST_LOG` wins over `--log-level`.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load file and environment configuration, then apply command-line overrides
pub fn build_config(cli: &Cli) -> Result<QueueManagerConfig, CliError> {
    let mut config = QueueManagerConfig::from_sources(cli.config.as_deref())?;

    if let Some(queue) = &cli.queue {
        config.queue_name = queue.clone();
        // A .fifo name given on the command line implies FIFO mode
        if queue.ends_with(".fifo") {
            config.queue_mode = QueueMode::Fifo;
        }
    }
    if let Some(visibility_timeout) = cli.visibility_timeout {
        config.visibility_timeout = visibility_timeout;
    }
    if let Some(region) = &cli.region {
        config.sqs.region = Some(region.clone());
    }
    if let Some(endpoint_url) = &cli.endpoint_url {
        config.sqs.endpoint_url = Some(endpoint_url.clone());
    }

    config.validate()?;
    Ok(config)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Run `command` against `client`, writing results to `out`
pub async fn execute_command<W: Write>(
    command: Commands,
    client: &QueueClient,
    cancel: CancellationToken,
    out: &mut W,
) -> Result<(), CliError> {
    match command {
        Commands::Send {
            body,
            delay,
            group,
            deduplication_id,
        } => {
            let mut request = SendRequest::new(body);
            request.delay_seconds = delay;
            request.message_group_id = group;
            request.deduplication_id = deduplication_id;

            let result = client.send_request(request).await?;
            match result.sequence_number {
                Some(sequence) => writeln!(out, "{}\t{}", result.message_id, sequence)?,
                None => writeln!(out, "{}", result.message_id)?,
            }
        }

        Commands::Receive {
            max_messages,
            delete,
            format,
        } => {
            let messages = client.receive_batch_of(max_messages).await?;
            for message in &messages {
                write_message(out, message, format)?;
                if delete {
                    client.delete(&message.receipt_handle).await?;
                }
            }
            info!(count = messages.len(), "Received messages");
        }

        Commands::Delete { receipt_handle } => {
            match client.delete(&ReceiptHandle::new(receipt_handle)).await? {
                DeleteOutcome::Deleted => writeln!(out, "deleted")?,
                DeleteOutcome::NotFound => writeln!(out, "not found")?,
            }
        }

        Commands::Purge { yes } => {
            require_confirmation(yes, "purge")?;
            client.purge().await?;
            writeln!(out, "purge requested for {}", client.queue_name())?;
        }

        Commands::DeleteQueue { yes } => {
            require_confirmation(yes, "delete-queue")?;
            client.delete_queue().await?;
            writeln!(out, "deleted queue {}", client.queue_name())?;
        }

        Commands::Counts { format } => {
            let counts = client.counts().await?;
            match format {
                OutputFormat::Text => {
                    writeln!(out, "visible:   {}", counts.visible)?;
                    writeln!(out, "in_flight: {}", counts.in_flight)?;
                    writeln!(out, "delayed:   {}", counts.delayed)?;
                    writeln!(out, "total:     {}", counts.total())?;
                }
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "visible": counts.visible,
                        "in_flight": counts.in_flight,
                        "delayed": counts.delayed,
                        "total": counts.total(),
                    });
                    writeln!(out, "{}", value)?;
                }
            }
        }

        Commands::Poll {
            wait_time,
            max_messages,
            skip_delete,
            limit,
            format,
        } => {
            execute_poll(
                client,
                PollArgs {
                    wait_time,
                    max_messages,
                    skip_delete,
                    limit,
                    format,
                },
                cancel,
                out,
            )
            .await?;
        }
    }

    Ok(())
}

struct PollArgs {
    wait_time: Option<u32>,
    max_messages: Option<u32>,
    skip_delete: bool,
    limit: Option<u64>,
    format: OutputFormat,
}

async fn execute_poll<W: Write>(
    client: &QueueClient,
    args: PollArgs,
    cancel: CancellationToken,
    out: &mut W,
) -> Result<(), CliError> {
    let mut poller_config = client.config().poller.clone();
    if let Some(wait_time) = args.wait_time {
        poller_config.wait_time = Some(wait_time);
    }
    if let Some(max_messages) = args.max_messages {
        poller_config.max_messages = max_messages;
    }
    poller_config.skip_delete = args.skip_delete || poller_config.skip_delete;
    poller_config.validate()?;

    // Messages are deleted only after they have been written out
    let mut printed = 0u64;
    let mut deleted = 0u64;
    loop {
        let batch_size = match args.limit {
            Some(limit) if printed >= limit => break,
            Some(limit) => {
                let remaining = u32::try_from(limit - printed).unwrap_or(u32::MAX);
                poller_config.max_messages.min(remaining)
            }
            None => poller_config.max_messages,
        };
        let poller = client
            .poller()
            .with_config(poller_config.clone().with_max_messages(batch_size));

        let messages = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = poller.next_batch() => batch?,
        };
        if messages.is_empty() {
            tokio::task::yield_now().await;
            continue;
        }

        for message in &messages {
            write_message(out, message, args.format)?;
            out.flush()?;
            printed += 1;

            if poller_config.skip_delete {
                continue;
            }
            match client.delete(&message.receipt_handle).await? {
                DeleteOutcome::Deleted => deleted += 1,
                DeleteOutcome::NotFound => warn!(
                    message_id = %message.message_id,
                    "Visibility timeout lapsed before delete, message may be redelivered"
                ),
            }
        }
    }

    info!(printed = printed, deleted = deleted, "Polling finished");
    Ok(())
}

fn require_confirmation(yes: bool, command: &str) -> Result<(), CliError> {
    if yes {
        return Ok(());
    }
    Err(CliError::InvalidArgument {
        arg: "yes".to_string(),
        message: format!("{} is destructive; pass --yes to confirm", command),
    })
}

#[derive(Serialize)]
struct MessageView<'a> {
    message_id: &'a str,
    receipt_handle: &'a str,
    body: &'a str,
    attributes: &'a HashMap<String, String>,
}

fn write_message<W: Write>(out: &mut W, message: &Message, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => writeln!(
            out,
            "{}\t{}\t{}",
            message.message_id, message.receipt_handle, message.body
        )?,
        OutputFormat::Json => {
            let view = MessageView {
                message_id: message.message_id.as_str(),
                receipt_handle: message.receipt_handle.as_str(),
                body: &message.body,
                attributes: &message.attributes,
            };
            writeln!(out, "{}", serde_json::to_string(&view)?)?;
        }
    }
    Ok(())
}
