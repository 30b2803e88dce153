//! Turn orchestration: one prompt in, one streamed assistant reply out.
//!
//! The broker validates the session, takes the per-session turn lock, commits
//! the user message, then drives whichever backend the session's connection
//! selects. Both backends feed the same wire-event channel, and every turn
//! ends with exactly one terminal event (`done` or `error`). Partial
//! assistant output is committed even when a turn fails or the subscriber
//! goes away.

pub mod events;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::anthropic::{AnthropicClient, ChatMessage};
use crate::cli::{CliChunk, CliRunner};
use crate::store::Store;
use crate::store::models::{ConnectionKind, Role, Session};

use events::{WireEvent, extract_cli_session_id, extract_text_delta};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("a turn is already in flight for this session")]
    Busy,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

type LockRegistry = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Orchestrates turns across both backends.
pub struct TurnBroker {
    store: Store,
    cli: CliRunner,
    anthropic: AnthropicClient,
    turn_locks: LockRegistry,
}

impl TurnBroker {
    pub fn new(store: Store, cli: CliRunner, anthropic: AnthropicClient) -> Self {
        Self {
            store,
            cli,
            anthropic,
            turn_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a turn for `session_id` and return its event stream.
    ///
    /// Validation failures are returned before anything is written; once the
    /// receiver is handed back, the user message is committed and all further
    /// outcomes arrive in-stream.
    pub async fn begin_turn(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Value>, TurnError> {
        // Session existence is checked before the prompt, so an empty
        // prompt against an unknown session is a not-found, not a 400.
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| TurnError::SessionNotFound(session_id.to_string()))?;

        if prompt.trim().is_empty() {
            return Err(TurnError::EmptyPrompt);
        }

        let connection = self
            .store
            .find_connection(&session.connection_id)
            .await?
            .ok_or_else(|| TurnError::ConnectionNotFound(session.connection_id.clone()))?;

        let guard = self.acquire_turn_lock(session_id)?;

        self.store
            .append_message(session_id, Role::User, prompt)
            .await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = self.store.clone();
        let prompt = prompt.to_string();

        let registry = Arc::clone(&self.turn_locks);
        let lock_key = session_id.to_string();

        match connection.kind {
            ConnectionKind::ClaudeCodeCli { working_dir } => {
                let cli = self.cli.clone();
                tokio::spawn(async move {
                    drive_local(store, cli, session, working_dir, prompt, tx).await;
                    drop(guard);
                    release_turn_lock(&registry, &lock_key);
                });
            }
            ConnectionKind::AgentSdk { system_prompt } => {
                let anthropic = self.anthropic.clone();
                tokio::spawn(async move {
                    drive_remote(store, anthropic, session, system_prompt, tx).await;
                    drop(guard);
                    release_turn_lock(&registry, &lock_key);
                });
            }
        }

        Ok(rx)
    }

    fn acquire_turn_lock(&self, session_id: &str) -> Result<OwnedMutexGuard<()>, TurnError> {
        let lock = {
            let mut locks = self.turn_locks.lock().expect("turn lock registry");
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().map_err(|_| TurnError::Busy)
    }

    #[cfg(test)]
    fn turn_lock_count(&self) -> usize {
        self.turn_locks.lock().expect("turn lock registry").len()
    }
}

/// Drop a session's registry entry once no turn holds it, so the map does
/// not grow with every session ever prompted.
fn release_turn_lock(registry: &LockRegistry, session_id: &str) {
    let mut locks = registry.lock().expect("turn lock registry");
    if let Some(lock) = locks.get(session_id) {
        // strong_count == 1 means only the map still references the lock;
        // any concurrent acquire holds its own clone.
        if Arc::strong_count(lock) == 1 {
            locks.remove(session_id);
        }
    }
}

/// Drive a turn through the local CLI subprocess.
async fn drive_local(
    store: Store,
    cli: CliRunner,
    session: Session,
    working_dir: String,
    prompt: String,
    tx: mpsc::Sender<Value>,
) {
    let mut rx = match cli.run(&prompt, &working_dir, session.cli_session_id.as_deref()) {
        Ok(rx) => rx,
        Err(err) => {
            warn!(session = %session.id, error = %err, "failed to start CLI turn");
            finish_turn(&store, &session.id, "", Err(err.to_string()), &tx).await;
            return;
        }
    };

    let mut accumulated = String::new();
    let mut recorded_cli_session = session.cli_session_id.clone();

    let outcome = loop {
        let Some(chunk) = rx.recv().await else {
            // Runner task died without an exit chunk; treat as failure.
            break Err("CLI stream ended unexpectedly".to_string());
        };
        match chunk {
            CliChunk::Event(event) => {
                if let Some(cli_session) = extract_cli_session_id(&event) {
                    if recorded_cli_session.as_deref() != Some(cli_session) {
                        if let Err(err) = store.set_cli_session(&session.id, cli_session).await {
                            warn!(session = %session.id, error = %err, "failed to record CLI session id");
                        }
                        recorded_cli_session = Some(cli_session.to_string());
                    }
                }
                if let Some(text) = extract_text_delta(&event) {
                    accumulated.push_str(text);
                }
                if tx.send(Value::Object(event)).await.is_err() {
                    debug!(session = %session.id, "subscriber disconnected mid-turn");
                    // Dropping the runner channel kills the subprocess.
                    break Err("client disconnected".to_string());
                }
            }
            CliChunk::Stderr(line) => {
                debug!(session = %session.id, line = %line, "CLI stderr");
                if tx
                    .send(WireEvent::error(line).into_value())
                    .await
                    .is_err()
                {
                    break Err("client disconnected".to_string());
                }
            }
            CliChunk::Exit(Ok(())) => break Ok(()),
            CliChunk::Exit(Err(err)) => break Err(err.to_string()),
        }
    };

    finish_turn(&store, &session.id, &accumulated, outcome, &tx).await;
}

/// Drive a turn through the hosted Messages API.
async fn drive_remote(
    store: Store,
    anthropic: AnthropicClient,
    session: Session,
    system_prompt: Option<String>,
    tx: mpsc::Sender<Value>,
) {
    let history = match store.list_messages(&session.id).await {
        Ok(messages) => messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect::<Vec<_>>(),
        Err(err) => {
            finish_turn(&store, &session.id, "", Err(err.to_string()), &tx).await;
            return;
        }
    };

    let mut rx = match anthropic.stream_chat(history, system_prompt) {
        Ok(rx) => rx,
        Err(err) => {
            warn!(session = %session.id, error = %err, "failed to start API turn");
            finish_turn(&store, &session.id, "", Err(err.to_string()), &tx).await;
            return;
        }
    };

    let mut accumulated = String::new();

    let outcome = loop {
        match rx.recv().await {
            Some(Ok(text)) => {
                accumulated.push_str(&text);
                if tx
                    .send(WireEvent::text_delta(&text).into_value())
                    .await
                    .is_err()
                {
                    debug!(session = %session.id, "subscriber disconnected mid-turn");
                    break Err("client disconnected".to_string());
                }
            }
            Some(Err(err)) => break Err(err.to_string()),
            None => break Ok(()),
        }
    };

    finish_turn(&store, &session.id, &accumulated, outcome, &tx).await;
}

/// Commit whatever the turn produced and emit the terminal event.
///
/// Runs the same way for success, failure, and subscriber disconnect, so a
/// partial reply is never lost.
async fn finish_turn(
    store: &Store,
    session_id: &str,
    accumulated: &str,
    outcome: Result<(), String>,
    tx: &mpsc::Sender<Value>,
) {
    if !accumulated.is_empty() {
        if let Err(err) = store
            .append_message(session_id, Role::Assistant, accumulated)
            .await
        {
            warn!(session = %session_id, error = %err, "failed to commit assistant message");
        }
    }
    if let Err(err) = store
        .touch_session(session_id, Utc::now().timestamp_millis())
        .await
    {
        warn!(session = %session_id, error = %err, "failed to touch session");
    }

    match outcome {
        Ok(()) => {
            info!(session = %session_id, chars = accumulated.len(), "turn completed");
            let _ = tx.send(WireEvent::Done.into_value()).await;
        }
        Err(message) => {
            info!(session = %session_id, chars = accumulated.len(), error = %message, "turn failed");
            let _ = tx.send(WireEvent::error(message).into_value()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliConfig;
    use crate::config::AnthropicSettings;
    use crate::store::models::ProjectStatus;
    use crate::store::{Db, NewConnection};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Store, TurnBroker) {
        let temp = TempDir::new().unwrap();
        let db = Db::open(&temp.path().join("test.db")).await.unwrap();
        let store = Store::new(db);
        let broker = TurnBroker::new(
            store.clone(),
            CliRunner::new(CliConfig {
                binary: "/bin/false".to_string(),
                timeout: Duration::from_secs(1),
            }),
            AnthropicClient::new(AnthropicSettings {
                base_url: "http://127.0.0.1:1".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                max_tokens: 8192,
                api_key: Some("test-key".to_string()),
            }),
        );
        (temp, store, broker)
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_writes() {
        let (_temp, store, broker) = setup().await;
        let project = store
            .create_project("p", ProjectStatus::Waiting)
            .await
            .unwrap();
        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "c".to_string(),
                    kind: ConnectionKind::ClaudeCodeCli {
                        working_dir: "/tmp".to_string(),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();
        let session = store.create_session(&conn.id).await.unwrap();

        let err = broker.begin_turn(&session.id, "   ").await.unwrap_err();
        assert!(matches!(err, TurnError::EmptyPrompt));
        assert!(store.list_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (_temp, _store, broker) = setup().await;
        let err = broker.begin_turn("missing", "hello").await.unwrap_err();
        assert!(matches!(err, TurnError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_wins_over_empty_prompt() {
        let (_temp, _store, broker) = setup().await;
        let err = broker.begin_turn("missing", "   ").await.unwrap_err();
        assert!(matches!(err, TurnError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_turn_lock_evicted_after_turn() {
        let (_temp, store, broker) = setup().await;
        let project = store
            .create_project("p", ProjectStatus::Waiting)
            .await
            .unwrap();
        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "c".to_string(),
                    kind: ConnectionKind::ClaudeCodeCli {
                        working_dir: "/tmp".to_string(),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();
        let session = store.create_session(&conn.id).await.unwrap();

        let mut rx = broker.begin_turn(&session.id, "hello").await.unwrap();
        assert_eq!(broker.turn_lock_count(), 1);
        while rx.recv().await.is_some() {}

        // Eviction runs just after the stream closes.
        for _ in 0..100 {
            if broker.turn_lock_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.turn_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_cli_turn_commits_user_message_and_errors() {
        let (_temp, store, broker) = setup().await;
        let project = store
            .create_project("p", ProjectStatus::Waiting)
            .await
            .unwrap();
        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "c".to_string(),
                    kind: ConnectionKind::ClaudeCodeCli {
                        working_dir: "/tmp".to_string(),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();
        let session = store.create_session(&conn.id).await.unwrap();

        let mut rx = broker.begin_turn(&session.id, "hello").await.unwrap();

        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            terminal = Some(event);
        }
        let terminal = terminal.expect("stream produced a terminal event");
        assert_eq!(terminal["type"], "error");

        let messages = store.list_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
    }
}
