//! Subprocess runner for the local CLI backend.
//!
//! Spawns the CLI in stream-json mode and forwards its output over a
//! channel. Stdout lines are parsed into events, stderr lines are forwarded
//! as they arrive, and a final [`CliChunk::Exit`] reports how the process
//! ended. The child is spawned with `kill_on_drop` so a dropped receiver
//! tears the process down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::parser::parse_stream_line;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CLI produced no exit within {0:?}")]
    Timeout(Duration),
    #[error("I/O error reading CLI output: {0}")]
    Io(#[from] std::io::Error),
    #[error("CLI exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}

/// One unit of CLI output. `Exit` is always the final chunk.
#[derive(Debug)]
pub enum CliChunk {
    /// A parsed stream-json event object.
    Event(Map<String, Value>),
    /// One line of stderr, forwarded as it arrives.
    Stderr(String),
    /// Process termination: clean exit, non-zero exit, or timeout.
    Exit(Result<(), CliError>),
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub binary: String,
    pub timeout: Duration,
}

/// Spawns and supervises CLI turns.
#[derive(Debug, Clone)]
pub struct CliRunner {
    config: CliConfig,
}

impl CliRunner {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    /// Start one CLI turn and stream its output.
    ///
    /// A spawn failure is returned directly; everything after a successful
    /// spawn arrives as chunks, terminated by exactly one [`CliChunk::Exit`].
    pub fn run(
        &self,
        prompt: &str,
        working_dir: &str,
        resume: Option<&str>,
    ) -> Result<mpsc::Receiver<CliChunk>, CliError> {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("-p")
            .arg(prompt)
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--include-partial-messages");
        if let Some(session) = resume {
            command.arg("-r").arg(session);
        }
        command
            .current_dir(working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| CliError::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;

        debug!(binary = %self.config.binary, resume = ?resume, "spawned CLI turn");

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let timeout = self.config.timeout;

        // Collected stderr tail, attached to exit errors.
        let tail = Arc::new(Mutex::new(String::new()));

        let stderr_tx = tx.clone();
        let stderr_tail = Arc::clone(&tail);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                {
                    let mut tail = stderr_tail.lock().expect("stderr tail lock");
                    if !tail.is_empty() {
                        tail.push('\n');
                    }
                    tail.push_str(&line);
                }
                if stderr_tx.send(CliChunk::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            let mut lines = BufReader::new(stdout).lines();

            let exit = loop {
                match tokio::time::timeout_at(deadline, lines.next_line()).await {
                    Ok(Ok(Some(line))) => {
                        if let Some(event) = parse_stream_line(&line) {
                            if tx.send(CliChunk::Event(event)).await.is_err() {
                                // Receiver gone; kill_on_drop reaps the child.
                                return;
                            }
                        }
                    }
                    Ok(Ok(None)) => {
                        // Stdout closed; drain stderr before reading the tail.
                        let _ = stderr_task.await;
                        match child.wait().await {
                            Ok(status) if status.success() => break Ok(()),
                            Ok(status) => {
                                let stderr = tail.lock().expect("stderr tail lock").clone();
                                break Err(CliError::Exit {
                                    code: status.code(),
                                    stderr,
                                });
                            }
                            Err(err) => {
                                warn!(error = %err, "failed to reap CLI process");
                                break Err(CliError::Exit {
                                    code: None,
                                    stderr: err.to_string(),
                                });
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "error reading CLI stdout");
                        let _ = child.kill().await;
                        let _ = stderr_task.await;
                        break Err(CliError::Io(err));
                    }
                    Err(_) => {
                        let _ = child.kill().await;
                        stderr_task.abort();
                        break Err(CliError::Timeout(timeout));
                    }
                }
            };

            let _ = tx.send(CliChunk::Exit(exit)).await;
        });

        Ok(rx)
    }
}
