// Copyright 2026 The Chatflow Stream Authors
// SPDX-License-Identifier: Apache-2.0

use std::convert::Infallible;
use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chatflow_stream::client::ChatClient;
use chatflow_stream::config::{self, ConfigSource};
use chatflow_stream::stream::{ChatEvent, EventSink, StreamOptions, StreamOutcome, StreamProcessor};
use chatflow_stream::transport::ChatRequest;

#[derive(Parser)]
#[command(name = "chatflow-stream", about = "Streaming chat event processor")]
struct Cli {
    /// Path to the chatflow.yaml config file
    #[arg(long, default_value = "chatflow.yaml", env = "CHATFLOW_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a query to the configured backend and print events as JSON lines
    Ask {
        query: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation_id: Option<String>,

        /// End-user identifier sent to the backend
        #[arg(long, default_value = "chatflow-cli")]
        user: String,

        /// App input variable, repeatable
        #[arg(long = "input", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,
    },

    /// Run a captured SSE transcript through the processor
    Replay {
        file: PathBuf,

        /// Bytes per chunk fed to the processor
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got \"{s}\"")),
    }
}

/// Prints every event as one JSON line on stdout and remembers the task id
/// so an interrupted generation can be stopped.
#[derive(Default)]
struct JsonLinesSink {
    task_id: Option<String>,
}

impl EventSink for JsonLinesSink {
    fn on_event(&mut self, event: ChatEvent) {
        if let Some(task_id) = event.task_id() {
            self.task_id = Some(task_id.to_string());
        }
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_err() {
                    tracing::debug!("stdout closed");
                }
            }
            Err(e) => tracing::warn!("failed to serialize event: {e}"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Ask {
            query,
            conversation_id,
            user,
            inputs,
        } => {
            let config = match config::load_config(&config::FileSource::new(&cli.config)) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("failed to load config: {e}");
                    std::process::exit(1);
                }
            };
            let mut request = ChatRequest::new(query, user);
            if let Some(id) = conversation_id {
                request = request.with_conversation(id);
            }
            for (key, value) in inputs {
                request = request.with_input(key, value);
            }
            ask(&config, request).await
        }
        Command::Replay { file, chunk_size } => {
            let options = match replay_options(&cli.config) {
                Ok(options) => options,
                Err(e) => {
                    tracing::error!("failed to load config: {e}");
                    std::process::exit(1);
                }
            };
            match replay(&file, chunk_size, options).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(file = %file.display(), "failed to read transcript: {e}");
                    std::process::exit(1);
                }
            }
        }
    };

    if !outcome.is_completed() {
        std::process::exit(1);
    }
}

async fn ask(config: &config::Config, request: ChatRequest) -> StreamOutcome {
    let client = ChatClient::from_config(config);
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            interrupt.cancel();
        }
    });

    let mut sink = JsonLinesSink::default();
    let outcome = client.send(&request, &mut sink, &cancel).await;

    if outcome == StreamOutcome::Cancelled {
        if let Some(task_id) = &sink.task_id {
            if let Err(e) = client.stop_responding(task_id, &request.user).await {
                tracing::warn!(task_id = %task_id, "stop request failed: {e}");
            }
        }
    }
    outcome
}

/// Stream options from the config file, or defaults when there is none.
fn replay_options(path: &std::path::Path) -> Result<StreamOptions, config::ConfigError> {
    let source = config::FileSource::new(path);
    if !source.exists() {
        tracing::debug!(path = %source.describe(), "no config file, using default stream options");
        return Ok(StreamOptions::default());
    }
    Ok(config::load_config(&source)?.stream)
}

async fn replay(
    file: &std::path::Path,
    chunk_size: usize,
    options: StreamOptions,
) -> std::io::Result<StreamOutcome> {
    let transcript = Bytes::from(tokio::fs::read(file).await?);
    let chunk_size = chunk_size.max(1);
    tracing::info!(file = %file.display(), bytes = transcript.len(), chunk_size, "replaying transcript");

    let chunks: Vec<Result<Bytes, Infallible>> = (0..transcript.len())
        .step_by(chunk_size)
        .map(|start| Ok(transcript.slice(start..(start + chunk_size).min(transcript.len()))))
        .collect();

    let mut sink = JsonLinesSink::default();
    let outcome = StreamProcessor::new(options)
        .run(200, tokio_stream::iter(chunks), &mut sink, &CancellationToken::new())
        .await;
    Ok(outcome)
}
