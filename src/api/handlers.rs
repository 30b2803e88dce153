//! REST handlers for projects, connections, sessions, and transcripts.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::models::{ConnectionKind, ProjectStatus};
use crate::store::{ConnectionUpdate, NewConnection};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ========== Health ==========

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = if state.store.db().is_healthy().await {
        "ok"
    } else {
        "unavailable"
    };
    Json(json!({ "status": "ok", "database": database }))
}

// ========== Projects ==========

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let projects = state.store.list_projects().await?;
    Ok(Json(json!({ "projects": projects })))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let project = state
        .store
        .create_project(&body.name, body.status.unwrap_or(ProjectStatus::Waiting))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "project": project }))))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project = state
        .store
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {project_id}")))?;
    Ok(Json(json!({ "project": project })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub status: Option<ProjectStatus>,
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Value>> {
    let project = state
        .store
        .update_project(&project_id, body.name.as_deref(), body.status)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {project_id}")))?;
    Ok(Json(json!({ "project": project })))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_project(&project_id).await? {
        return Err(ApiError::not_found(format!("project {project_id}")));
    }
    Ok(Json(json!({ "success": true })))
}

// ========== Connections ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    #[serde(rename = "type")]
    pub connection_type: String,
    pub name: String,
    pub working_dir: Option<String>,
    pub system_prompt: Option<String>,
}

pub async fn create_connection(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateConnectionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("type and name are required"));
    }

    let kind = match body.connection_type.as_str() {
        "claude_code_cli" => ConnectionKind::ClaudeCodeCli {
            working_dir: body.working_dir.unwrap_or_else(default_working_dir),
        },
        "agent_sdk" => ConnectionKind::AgentSdk {
            system_prompt: body.system_prompt,
        },
        other => {
            return Err(ApiError::bad_request(format!(
                "invalid connection type: {other}"
            )));
        }
    };

    let connection = state
        .store
        .create_connection(
            &project_id,
            NewConnection {
                name: body.name,
                kind,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {project_id}")))?;

    Ok((StatusCode::CREATED, Json(json!({ "connection": connection }))))
}

fn default_working_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub working_dir: Option<String>,
    pub system_prompt: Option<String>,
}

pub async fn update_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    Json(body): Json<UpdateConnectionRequest>,
) -> ApiResult<Json<Value>> {
    let connection = state
        .store
        .update_connection(
            &connection_id,
            ConnectionUpdate {
                name: body.name,
                working_dir: body.working_dir,
                system_prompt: body.system_prompt,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {connection_id}")))?;
    Ok(Json(json!({ "connection": connection })))
}

pub async fn delete_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_connection(&connection_id).await? {
        return Err(ApiError::not_found(format!("connection {connection_id}")));
    }
    Ok(Json(json!({ "success": true })))
}

// ========== Sessions ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub connection_id: String,
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .find_connection(&body.connection_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("connection {}", body.connection_id)))?;

    let session = state.store.create_session(&body.connection_id).await?;
    Ok(Json(json!({ "sessionId": session.id })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = state
        .store
        .find_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id}")))?;
    let messages = state.store.list_messages(&session_id).await?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_session(&session_id).await? {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .find_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id}")))?;
    let messages = state.store.list_messages(&session_id).await?;
    Ok(Json(json!({ "messages": messages })))
}
