//! Streaming client for the hosted Anthropic Messages API.
//!
//! Opens an SSE stream against `/v1/messages` and forwards text fragments as
//! they arrive. Only `content_block_delta` events with `text_delta` payloads
//! carry text; everything else in the stream is bookkeeping and is skipped.

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AnthropicSettings;
use crate::store::models::Role;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum AnthropicError {
    #[error("no API key configured (set ANTHROPIC_API_KEY)")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// One turn of conversation history, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Client over the Messages API. Cheap to clone; the inner reqwest client
/// pools connections.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    settings: AnthropicSettings,
}

impl AnthropicClient {
    pub fn new(settings: AnthropicSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn api_key(&self) -> Result<String, AnthropicError> {
        if let Some(key) = &self.settings.api_key {
            return Ok(key.clone());
        }
        std::env::var("ANTHROPIC_API_KEY").map_err(|_| AnthropicError::MissingApiKey)
    }

    /// Stream one assistant reply for the given history.
    ///
    /// Text fragments arrive in order on the returned channel; the channel
    /// closes after the final fragment or after a single terminal error.
    pub fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system: Option<String>,
    ) -> Result<mpsc::Receiver<Result<String, AnthropicError>>, AnthropicError> {
        let api_key = self.api_key()?;

        let mut body = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }

        let request = self
            .http
            .post(format!("{}/v1/messages", self.settings.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let mut source = EventSource::new(request)
            .map_err(|err| AnthropicError::Request(err.to_string()))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {
                        debug!("anthropic stream opened");
                    }
                    Ok(Event::Message(message)) => {
                        let payload: Value = match serde_json::from_str(&message.data) {
                            Ok(value) => value,
                            Err(err) => {
                                warn!(error = %err, "skipping malformed stream payload");
                                continue;
                            }
                        };
                        match payload["type"].as_str() {
                            Some("content_block_delta") => {
                                if payload["delta"]["type"] == "text_delta" {
                                    if let Some(text) = payload["delta"]["text"].as_str() {
                                        if tx.send(Ok(text.to_string())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Some("message_stop") => break,
                            Some("error") => {
                                let detail = payload["error"]["message"]
                                    .as_str()
                                    .unwrap_or("unknown API error")
                                    .to_string();
                                let _ = tx.send(Err(AnthropicError::Api(detail))).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(err) => {
                        let _ = tx
                            .send(Err(AnthropicError::Stream(err.to_string())))
                            .await;
                        break;
                    }
                }
            }
            source.close();
        });

        Ok(rx)
    }
}
