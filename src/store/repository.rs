//! Repository for broker database operations.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use sqlx::FromRow;
use uuid::Uuid;

use super::db::Db;
use super::models::{
    Connection, ConnectionKind, Message, Project, ProjectStatus, Role, Session, SessionStatus,
};

/// Fields for creating a connection.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub kind: ConnectionKind,
}

/// Editable connection fields. `None` leaves a field untouched; kind-specific
/// fields are ignored when they do not apply to the connection's variant.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub working_dir: Option<String>,
    pub system_prompt: Option<String>,
}

/// Raw connection row; `type` is flattened back into [`ConnectionKind`].
#[derive(Debug, FromRow)]
struct ConnectionRow {
    id: String,
    kind: String,
    name: String,
    working_dir: Option<String>,
    system_prompt: Option<String>,
}

impl ConnectionRow {
    fn into_connection(self) -> Result<Connection> {
        let kind = match self.kind.as_str() {
            "claude_code_cli" => ConnectionKind::ClaudeCodeCli {
                working_dir: self
                    .working_dir
                    .ok_or_else(|| anyhow!("connection {} is missing working_dir", self.id))?,
            },
            "agent_sdk" => ConnectionKind::AgentSdk {
                system_prompt: self.system_prompt,
            },
            other => return Err(anyhow!("unknown connection type: {}", other)),
        };
        Ok(Connection {
            id: self.id,
            name: self.name,
            kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    status: String,
}

/// Store for all broker records.
///
/// Passed explicitly into the API state and the turn orchestrator; every
/// append awaits the underlying INSERT before returning.
#[derive(Debug, Clone)]
pub struct Store {
    db: Db,
}

impl Store {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // ========== Projects ==========

    pub async fn create_project(&self, name: &str, status: ProjectStatus) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO projects (id, name, status) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(status.to_string())
            .execute(self.db.pool())
            .await
            .context("inserting project")?;

        Ok(Project {
            id,
            name: name.to_string(),
            status,
            connections: Vec::new(),
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, status FROM projects ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .context("listing projects")?;

        let mut projects = Vec::with_capacity(rows.len());
        for row in rows {
            projects.push(self.hydrate_project(row).await?);
        }
        Ok(projects)
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, status FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching project")?;

        match row {
            Some(row) => Ok(Some(self.hydrate_project(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        status: Option<ProjectStatus>,
    ) -> Result<Option<Project>> {
        let Some(mut project) = self.get_project(id).await? else {
            return Ok(None);
        };

        if let Some(name) = name {
            project.name = name.to_string();
        }
        if let Some(status) = status {
            project.status = status;
        }

        sqlx::query("UPDATE projects SET name = ?, status = ? WHERE id = ?")
            .bind(&project.name)
            .bind(project.status.to_string())
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("updating project")?;

        Ok(Some(project))
    }

    /// Delete a project and (via FK cascade) its connections.
    pub async fn delete_project(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("deleting project")?;
        Ok(result.rows_affected() > 0)
    }

    async fn hydrate_project(&self, row: ProjectRow) -> Result<Project> {
        let connections = self.list_connections(&row.id).await?;
        let status = row
            .status
            .parse::<ProjectStatus>()
            .map_err(|e| anyhow!(e))?;
        Ok(Project {
            id: row.id,
            name: row.name,
            status,
            connections,
        })
    }

    // ========== Connections ==========

    /// Create a connection under a project. Returns `None` if the project
    /// does not exist.
    pub async fn create_connection(
        &self,
        project_id: &str,
        new: NewConnection,
    ) -> Result<Option<Connection>> {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_one(self.db.pool())
            .await
            .context("checking project existence")?;
        if exists == 0 {
            return Ok(None);
        }

        let id = Uuid::new_v4().to_string();
        let (working_dir, system_prompt) = match &new.kind {
            ConnectionKind::ClaudeCodeCli { working_dir } => (Some(working_dir.clone()), None),
            ConnectionKind::AgentSdk { system_prompt } => (None, system_prompt.clone()),
        };

        sqlx::query(
            r#"
            INSERT INTO connections (id, project_id, type, name, working_dir, system_prompt)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(new.kind.type_tag())
        .bind(&new.name)
        .bind(&working_dir)
        .bind(&system_prompt)
        .execute(self.db.pool())
        .await
        .context("inserting connection")?;

        Ok(Some(Connection {
            id,
            name: new.name,
            kind: new.kind,
        }))
    }

    pub async fn list_connections(&self, project_id: &str) -> Result<Vec<Connection>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            r#"
            SELECT id, type AS kind, name, working_dir, system_prompt
            FROM connections
            WHERE project_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(self.db.pool())
        .await
        .context("listing connections")?;

        rows.into_iter().map(ConnectionRow::into_connection).collect()
    }

    pub async fn find_connection(&self, id: &str) -> Result<Option<Connection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT id, type AS kind, name, working_dir, system_prompt FROM connections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching connection")?;

        row.map(ConnectionRow::into_connection).transpose()
    }

    pub async fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<Option<Connection>> {
        let Some(mut conn) = self.find_connection(id).await? else {
            return Ok(None);
        };

        if let Some(name) = update.name {
            conn.name = name;
        }
        match &mut conn.kind {
            ConnectionKind::ClaudeCodeCli { working_dir } => {
                if let Some(dir) = update.working_dir {
                    *working_dir = dir;
                }
            }
            ConnectionKind::AgentSdk { system_prompt } => {
                if let Some(prompt) = update.system_prompt {
                    *system_prompt = Some(prompt);
                }
            }
        }

        let (working_dir, system_prompt) = match &conn.kind {
            ConnectionKind::ClaudeCodeCli { working_dir } => (Some(working_dir.clone()), None),
            ConnectionKind::AgentSdk { system_prompt } => (None, system_prompt.clone()),
        };

        sqlx::query(
            "UPDATE connections SET name = ?, working_dir = ?, system_prompt = ? WHERE id = ?",
        )
        .bind(&conn.name)
        .bind(&working_dir)
        .bind(&system_prompt)
        .bind(id)
        .execute(self.db.pool())
        .await
        .context("updating connection")?;

        Ok(Some(conn))
    }

    pub async fn delete_connection(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("deleting connection")?;
        Ok(result.rows_affected() > 0)
    }

    // ========== Sessions ==========

    pub async fn create_session(&self, connection_id: &str) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            status: SessionStatus::Active,
            cli_session_id: None,
            last_activity: Utc::now().timestamp_millis(),
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, connection_id, status, cli_session_id, last_activity)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.connection_id)
        .bind(session.status.to_string())
        .bind(&session.cli_session_id)
        .bind(session.last_activity)
        .execute(self.db.pool())
        .await
        .context("inserting session")?;

        Ok(session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, connection_id, status, cli_session_id, last_activity
            FROM sessions
            ORDER BY last_activity DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .context("listing sessions")
    }

    pub async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, connection_id, status, cli_session_id, last_activity
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching session")
    }

    /// Update the session's last-activity timestamp.
    pub async fn touch_session(&self, id: &str, activity_millis: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity = ? WHERE id = ?")
            .bind(activity_millis)
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("touching session")?;
        Ok(())
    }

    /// Remember the CLI's own session id for `-r` resumption.
    pub async fn set_cli_session(&self, id: &str, cli_session_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET cli_session_id = ? WHERE id = ?")
            .bind(cli_session_id)
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("setting cli session id")?;
        Ok(())
    }

    /// Delete a session and its transcript in one transaction.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("starting delete transaction")?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting session")?;

        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting session messages")?;

        tx.commit().await.context("committing delete")?;
        Ok(true)
    }

    // ========== Messages ==========

    /// Append one message to a session's transcript. The INSERT is awaited,
    /// so a returned message is durable.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(message.timestamp)
        .execute(self.db.pool())
        .await
        .context("inserting message")?;

        Ok(message)
    }

    /// List a session's transcript in insertion order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT id, role, content, timestamp
            FROM messages
            WHERE session_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(self.db.pool())
        .await
        .context("listing messages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Store) {
        let temp = TempDir::new().unwrap();
        let db = Db::open(&temp.path().join("test.db")).await.unwrap();
        (temp, Store::new(db))
    }

    #[tokio::test]
    async fn test_project_crud() {
        let (_temp, store) = setup().await;

        let project = store
            .create_project("ops", ProjectStatus::ActionRequired)
            .await
            .unwrap();
        assert_eq!(project.name, "ops");
        assert!(project.connections.is_empty());

        let fetched = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, project.id);

        let updated = store
            .update_project(&project.id, Some("ops-renamed"), Some(ProjectStatus::Waiting))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "ops-renamed");
        assert_eq!(updated.status, ProjectStatus::Waiting);

        assert!(store.delete_project(&project.id).await.unwrap());
        assert!(store.get_project(&project.id).await.unwrap().is_none());
        assert!(!store.delete_project(&project.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_crud_and_project_hydration() {
        let (_temp, store) = setup().await;

        let project = store
            .create_project("ops", ProjectStatus::Waiting)
            .await
            .unwrap();

        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "dev".to_string(),
                    kind: ConnectionKind::ClaudeCodeCli {
                        working_dir: "/tmp/proj".to_string(),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();

        let fetched = store.find_connection(&conn.id).await.unwrap().unwrap();
        assert!(
            matches!(fetched.kind, ConnectionKind::ClaudeCodeCli { ref working_dir } if working_dir == "/tmp/proj")
        );

        let hydrated = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(hydrated.connections.len(), 1);
        assert_eq!(hydrated.connections[0].id, conn.id);

        let updated = store
            .update_connection(
                &conn.id,
                ConnectionUpdate {
                    working_dir: Some("/tmp/other".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(updated.kind, ConnectionKind::ClaudeCodeCli { ref working_dir } if working_dir == "/tmp/other")
        );

        assert!(store.delete_connection(&conn.id).await.unwrap());
        assert!(store.find_connection(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_under_missing_project() {
        let (_temp, store) = setup().await;

        let result = store
            .create_connection(
                "nope",
                NewConnection {
                    name: "dev".to_string(),
                    kind: ConnectionKind::AgentSdk {
                        system_prompt: None,
                    },
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_transcript_ordering_and_cascade_delete() {
        let (_temp, store) = setup().await;

        let project = store
            .create_project("ops", ProjectStatus::Waiting)
            .await
            .unwrap();
        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "assistant".to_string(),
                    kind: ConnectionKind::AgentSdk {
                        system_prompt: Some("be helpful".to_string()),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();

        let session = store.create_session(&conn.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        store
            .append_message(&session.id, Role::User, "hello")
            .await
            .unwrap();
        store
            .append_message(&session.id, Role::Assistant, "hi there")
            .await
            .unwrap();

        let messages = store.list_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(store.find_session(&session.id).await.unwrap().is_none());
        assert!(store.list_messages(&session.id).await.unwrap().is_empty());
        assert!(!store.delete_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_and_cli_session() {
        let (_temp, store) = setup().await;

        let project = store
            .create_project("ops", ProjectStatus::Waiting)
            .await
            .unwrap();
        let conn = store
            .create_connection(
                &project.id,
                NewConnection {
                    name: "dev".to_string(),
                    kind: ConnectionKind::ClaudeCodeCli {
                        working_dir: "/tmp".to_string(),
                    },
                },
            )
            .await
            .unwrap()
            .unwrap();
        let session = store.create_session(&conn.id).await.unwrap();

        store.touch_session(&session.id, 12345).await.unwrap();
        store
            .set_cli_session(&session.id, "cli-abc")
            .await
            .unwrap();

        let fetched = store.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_activity, 12345);
        assert_eq!(fetched.cli_session_id.as_deref(), Some("cli-abc"));
    }
}
