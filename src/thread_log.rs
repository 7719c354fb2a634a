use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::pagination::{Paginated, PaginationOpts, paginate_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// One entry of the append-only log. `seq` is the per-log insertion order;
/// messages are never edited or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub author: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            author: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            author: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Narrow capability interface over the external message log. Messages are
/// totally ordered by insertion per thread; listing is newest first.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn create_thread(&self, organization_id: &str) -> anyhow::Result<String>;
    async fn save_message(&self, thread_id: &str, message: NewMessage) -> anyhow::Result<()>;
    async fn list_messages(
        &self,
        thread_id: &str,
        opts: &PaginationOpts,
    ) -> anyhow::Result<Paginated<ThreadMessage>>;
}

#[derive(Clone)]
pub struct SqliteMessageLog {
    pool: Pool<Sqlite>,
}

impl SqliteMessageLog {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn create_thread(&self, organization_id: &str) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO threads (id, organization_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(organization_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn save_message(&self, thread_id: &str, message: NewMessage) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO thread_messages (thread_id, role, content, author, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(thread_id)
        .bind(message.role.as_str())
        .bind(message.content)
        .bind(message.author)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        opts: &PaginationOpts,
    ) -> anyhow::Result<Paginated<ThreadMessage>> {
        let limit = opts.num_items as i64 + 1;
        let rows = match opts.cursor_seq() {
            Some(cursor) => {
                sqlx::query(
                    "SELECT seq, role, content, author, created_at FROM thread_messages \
                     WHERE thread_id = ?1 AND seq < ?2 ORDER BY seq DESC LIMIT ?3",
                )
                .bind(thread_id)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT seq, role, content, author, created_at FROM thread_messages \
                     WHERE thread_id = ?1 ORDER BY seq DESC LIMIT ?2",
                )
                .bind(thread_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let messages = rows
            .into_iter()
            .map(|row| {
                let role: String = row.get("role");
                let created_at: String = row.get("created_at");
                ThreadMessage {
                    seq: row.get("seq"),
                    role: MessageRole::parse(&role).unwrap_or(MessageRole::System),
                    content: row.get("content"),
                    author: row.try_get("author").ok(),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                }
            })
            .collect::<Vec<_>>();

        Ok(paginate_rows(messages, opts.num_items, |m| m.seq))
    }
}
