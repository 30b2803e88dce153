//! SSE endpoint for submitting a prompt and streaming the reply.

use std::convert::Infallible;

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitPromptRequest {
    pub prompt: String,
}

/// Append a user message and stream the assistant's reply as SSE.
///
/// Validation failures surface as HTTP errors before the stream opens; once
/// it opens, the turn always ends with a single `done` or `error` event.
/// A missing or malformed body is a 400, same as an empty prompt.
pub async fn submit_prompt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<axum::Json<SubmitPromptRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let axum::Json(body) =
        body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    info!(session = %session_id, prompt_len = body.prompt.len(), "prompt submitted");

    let rx = state.broker.begin_turn(&session_id, &body.prompt).await?;

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok(Event::default().data(event.to_string())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
