//! Chat session repository for CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::DbPool;
use crate::stream::{ChatMessage, Role};
use crate::{Error, Result};

/// A persisted chat session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted message in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Request-shaped view of this message
    #[must_use]
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A session together with its messages, oldest first
#[derive(Debug, Clone, Serialize)]
pub struct SessionWithMessages {
    pub session: Session,
    pub messages: Vec<Message>,
}

const fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        topic: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role_from_str(&row.get::<_, String>(2)?).unwrap_or(Role::User),
        content: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// Session repository
#[derive(Clone)]
pub struct SessionRepo {
    pool: DbPool,
}

impl SessionRepo {
    /// Create a new session repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<super::DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Create a session with the given topic
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, topic: &str) -> Result<Session> {
        let conn = self.conn()?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO chat_sessions (id, topic, created_at) VALUES (?1, ?2, ?3)",
            [&id, topic, &now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(session_id = %id, topic, "created chat session");

        Ok(Session {
            id,
            topic: topic.to_string(),
            created_at: now,
        })
    }

    /// List all sessions, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, topic, created_at FROM chat_sessions
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let sessions = stmt
            .query_map([], session_from_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(sessions)
    }

    /// Get a session by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT id, topic, created_at FROM chat_sessions WHERE id = ?1",
            [id],
            session_from_row,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Change a session's topic
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist or the update fails
    pub fn rename(&self, id: &str, topic: &str) -> Result<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE chat_sessions SET topic = ?1 WHERE id = ?2",
                [topic, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a session and all of its messages
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist or the delete fails
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;

        let deleted = conn
            .execute("DELETE FROM chat_sessions WHERE id = ?1", [id])
            .map_err(|e| Error::Database(e.to_string()))?;

        if deleted == 0 {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        tracing::debug!(session_id = %id, "deleted chat session");
        Ok(())
    }

    /// Add a message to a session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_message(&self, session_id: &str, role: Role, content: &str) -> Result<Message> {
        let conn = self.conn()?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![&id, session_id, role_str(role), content, now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// All messages of a session, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, created_at
                 FROM messages WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let messages = stmt
            .query_map([session_id], message_from_row)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(messages)
    }

    /// Get a message by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT id, session_id, role, content, created_at FROM messages WHERE id = ?1",
            [id],
            message_from_row,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Replace a message's content
    ///
    /// # Errors
    ///
    /// Returns error if the message does not exist or the update fails
    pub fn update_message(&self, id: &str, content: &str) -> Result<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                [content, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    /// Delete a single message
    ///
    /// # Errors
    ///
    /// Returns error if the message does not exist or the delete fails
    pub fn delete_message(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;

        let deleted = conn
            .execute("DELETE FROM messages WHERE id = ?1", [id])
            .map_err(|e| Error::Database(e.to_string()))?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    /// Load a session with its full history
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist or a query fails
    pub fn with_messages(&self, id: &str) -> Result<SessionWithMessages> {
        let session = self
            .get(id)?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let messages = self.messages(id)?;
        Ok(SessionWithMessages { session, messages })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
