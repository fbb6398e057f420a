use std::path::Path;

use curacall_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

/// Persisted conversation metadata. `message_count` is populated on list
/// queries and zero elsewhere.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub mode: String,
    pub archived: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Single-row client preference record (`id` is always "default").
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRow {
    pub theme: String,
    pub voice_speed: String,
    pub auto_play: bool,
    pub save_conversations: bool,
    pub ai_model: String,
    pub response_length: String,
}

/// Durable storage for conversations, their messages, and client settings.
pub struct ConversationStore {
    conn: Connection,
}

impl ConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening conversation store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT 'New Conversation',
                    mode TEXT NOT NULL DEFAULT 'chat',
                    archived INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL
                        REFERENCES conversations(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation
                    ON messages(conversation_id, created_at);

                CREATE TABLE IF NOT EXISTS settings (
                    id TEXT PRIMARY KEY DEFAULT 'default',
                    theme TEXT NOT NULL DEFAULT 'dark-ocean',
                    voice_speed TEXT NOT NULL DEFAULT '1',
                    auto_play INTEGER NOT NULL DEFAULT 1,
                    save_conversations INTEGER NOT NULL DEFAULT 1,
                    ai_model TEXT NOT NULL DEFAULT 'llama3.1:8b',
                    response_length TEXT NOT NULL DEFAULT 'balanced'
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn create_conversation(&self, title: Option<&str>, mode: &str) -> Result<ConversationRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("New Conversation");
        self.conn
            .execute(
                "INSERT INTO conversations (id, title, mode, archived, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![id, title, mode, now.to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to create conversation: {e}")))?;

        Ok(ConversationRow {
            id,
            title: title.to_string(),
            mode: mode.to_string(),
            archived: false,
            created_at: now,
            updated_at: now,
            message_count: 0,
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.conn
            .query_row(
                "SELECT id, title, mode, archived, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![id],
                row_to_conversation,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load conversation: {e}")))
    }

    /// All conversations, most recently updated first, with message counts.
    pub fn list_conversations(&self) -> Result<Vec<ConversationRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.title, c.mode, c.archived, c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
                 FROM conversations c
                 ORDER BY c.updated_at DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare list query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let mut conv = row_to_conversation(row)?;
                conv.message_count = row.get(6)?;
                Ok(conv)
            })
            .map_err(|e| Error::Database(format!("failed to list conversations: {e}")))?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations
                .push(row.map_err(|e| Error::Database(format!("failed to read row: {e}")))?);
        }
        Ok(conversations)
    }

    /// Flip the archived flag; returns the updated row, `None` if unknown.
    pub fn set_archived(&self, id: &str, archived: bool) -> Result<Option<ConversationRow>> {
        let changed = self
            .conn
            .execute(
                "UPDATE conversations SET archived = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, archived as i64, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to update conversation: {e}")))?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_conversation(id)
    }

    /// Deletes the conversation and, via cascade, every message in it.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id])
            .map_err(|e| Error::Database(format!("failed to delete conversation: {e}")))?;
        Ok(deleted > 0)
    }

    /// Appends a message and bumps the owning conversation's updated
    /// timestamp in the same call.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<MessageRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        self.conn
            .execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, conversation_id, role, content, now.to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
        self.conn
            .execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, now.to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to bump conversation: {e}")))?;

        Ok(MessageRow {
            id,
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Messages in chronological order. Rowid breaks ties between messages
    /// created inside the same clock tick.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_id], row_to_message)
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| Error::Database(format!("failed to read row: {e}")))?);
        }
        Ok(messages)
    }

    pub fn count_non_system_messages(&self, conversation_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND role != 'system'",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count messages: {e}")))
    }

    /// The running summary row, if one exists. When several system rows are
    /// present (should not happen; the summarizer overwrites in place) the
    /// newest wins.
    pub fn latest_system_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.conn
            .query_row(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND role = 'system'
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![conversation_id],
                row_to_message,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load summary: {e}")))
    }

    /// Stores `content` as the conversation's single summary: the latest
    /// system row is rewritten in place, or one is inserted if none exists.
    pub fn upsert_summary(&self, conversation_id: &str, content: &str) -> Result<()> {
        match self.latest_system_message(conversation_id)? {
            Some(existing) => {
                self.conn
                    .execute(
                        "UPDATE messages SET content = ?2 WHERE id = ?1",
                        params![existing.id, content],
                    )
                    .map_err(|e| Error::Database(format!("failed to update summary: {e}")))?;
            }
            None => {
                self.append_message(conversation_id, "system", content)?;
            }
        }
        Ok(())
    }

    pub fn get_settings(&self) -> Result<SettingsRow> {
        let existing = self
            .conn
            .query_row(
                "SELECT theme, voice_speed, auto_play, save_conversations, ai_model,
                        response_length
                 FROM settings WHERE id = 'default'",
                [],
                row_to_settings,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load settings: {e}")))?;

        match existing {
            Some(settings) => Ok(settings),
            None => {
                self.conn
                    .execute("INSERT INTO settings (id) VALUES ('default')", [])
                    .map_err(|e| Error::Database(format!("failed to seed settings: {e}")))?;
                self.get_settings()
            }
        }
    }

    /// Partial settings update; `None` fields keep their current value.
    #[allow(clippy::too_many_arguments)]
    pub fn update_settings(
        &self,
        theme: Option<&str>,
        voice_speed: Option<&str>,
        auto_play: Option<bool>,
        save_conversations: Option<bool>,
        ai_model: Option<&str>,
        response_length: Option<&str>,
    ) -> Result<SettingsRow> {
        // Make sure the row exists before updating pieces of it.
        let _ = self.get_settings()?;
        self.conn
            .execute(
                "UPDATE settings SET
                    theme = COALESCE(?1, theme),
                    voice_speed = COALESCE(?2, voice_speed),
                    auto_play = COALESCE(?3, auto_play),
                    save_conversations = COALESCE(?4, save_conversations),
                    ai_model = COALESCE(?5, ai_model),
                    response_length = COALESCE(?6, response_length)
                 WHERE id = 'default'",
                params![
                    theme,
                    voice_speed,
                    auto_play.map(|b| b as i64),
                    save_conversations.map(|b| b as i64),
                    ai_model,
                    response_length
                ],
            )
            .map_err(|e| Error::Database(format!("failed to update settings: {e}")))?;
        self.get_settings()
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    let created_raw: String = row.get(4)?;
    let updated_raw: String = row.get(5)?;
    Ok(ConversationRow {
        id: row.get(0)?,
        title: row.get(1)?,
        mode: row.get(2)?,
        archived: row.get::<_, i64>(3)? != 0,
        created_at: parse_timestamp(&created_raw),
        updated_at: parse_timestamp(&updated_raw),
        message_count: 0,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let created_raw: String = row.get(4)?;
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_timestamp(&created_raw),
    })
}

fn row_to_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingsRow> {
    Ok(SettingsRow {
        theme: row.get(0)?,
        voice_speed: row.get(1)?,
        auto_play: row.get::<_, i64>(2)? != 0,
        save_conversations: row.get::<_, i64>(3)? != 0,
        ai_model: row.get(4)?,
        response_length: row.get(5)?,
    })
}

fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse timestamp '{value}': {e}, falling back to now");
            chrono::Utc::now()
        })
}
