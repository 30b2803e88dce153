//! Data models for projects, connections, sessions, and messages.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Project display status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    ActionRequired,
    Waiting,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::ActionRequired => write!(f, "action_required"),
            ProjectStatus::Waiting => write!(f, "waiting"),
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action_required" => Ok(ProjectStatus::ActionRequired),
            "waiting" => Ok(ProjectStatus::Waiting),
            _ => Err(format!("unknown project status: {}", s)),
        }
    }
}

impl TryFrom<String> for ProjectStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A project groups backend connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub connections: Vec<Connection>,
}

/// A named, reusable backend configuration a session binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: ConnectionKind,
}

/// Backend variant. Closed union: the orchestrator matches exhaustively, so
/// adding a backend forces every dispatch site to be revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Local CLI subprocess bound to a working directory.
    ClaudeCodeCli {
        #[serde(rename = "workingDir")]
        working_dir: String,
    },
    /// Hosted streaming chat API with an optional system prompt.
    AgentSdk {
        #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
    },
}

impl ConnectionKind {
    /// The wire tag for this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ConnectionKind::ClaudeCodeCli { .. } => "claude_code_cli",
            ConnectionKind::AgentSdk { .. } => "agent_sdk",
        }
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A running conversation bound to one connection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub connection_id: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    /// Backend-reported session id, used to resume CLI conversational
    /// context across turns with `-r`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_session_id: Option<String>,
    /// Epoch milliseconds of the last completed or failed turn.
    pub last_activity: i64,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One transcript entry. Append-only per session; ordering is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}
