use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
};
use uuid::Uuid;

use crate::conversation::{ContactSession, Conversation, ConversationStatus};
use crate::pagination::{Paginated, PaginationOpts, paginate_rows};
use crate::settings::WidgetSettings;

/// Conversation-store surface: contact sessions, conversations, and widget
/// settings. Conversations never hard-delete; only `status` mutates.
#[async_trait]
pub trait SupportStore: Send + Sync {
    async fn create_contact_session(
        &self,
        organization_id: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<ContactSession>;
    async fn get_contact_session(&self, id: Uuid) -> anyhow::Result<Option<ContactSession>>;

    async fn create_conversation(
        &self,
        organization_id: &str,
        contact_session_id: Uuid,
        thread_id: &str,
    ) -> anyhow::Result<Conversation>;
    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>>;
    async fn get_conversation_by_thread(
        &self,
        thread_id: &str,
    ) -> anyhow::Result<Option<Conversation>>;
    /// Descending creation order, optionally filtered by status through the
    /// composite (status, organization) key.
    async fn list_conversations(
        &self,
        organization_id: &str,
        status: Option<ConversationStatus>,
        opts: &PaginationOpts,
    ) -> anyhow::Result<Paginated<Conversation>>;
    /// Raw setter: accepts any explicit target status. Returns false when the
    /// conversation does not exist.
    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
    ) -> anyhow::Result<bool>;

    async fn get_widget_settings(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<WidgetSettings>>;
    async fn upsert_widget_settings(
        &self,
        organization_id: &str,
        settings: WidgetSettings,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqliteSupportStore {
    pool: Pool<Sqlite>,
}

impl SqliteSupportStore {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The message log shares this pool; the tables stay separate.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".local").join("share")
        });
    let dir = base.join("echo_desk");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("desk.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    let id: String = row.get("id");
    let session_id: String = row.get("contact_session_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    Conversation {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        organization_id: row.get("organization_id"),
        contact_session_id: Uuid::parse_str(&session_id).unwrap_or_else(|_| Uuid::nil()),
        thread_id: row.get("thread_id"),
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::Unresolved),
        created_at: parse_timestamp(&created_at),
    }
}

#[async_trait]
impl SupportStore for SqliteSupportStore {
    async fn create_contact_session(
        &self,
        organization_id: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<ContactSession> {
        let session = ContactSession {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            expires_at,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO contact_sessions (id, organization_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.id.to_string())
        .bind(&session.organization_id)
        .bind(session.expires_at.to_rfc3339())
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    async fn get_contact_session(&self, id: Uuid) -> anyhow::Result<Option<ContactSession>> {
        let row = sqlx::query(
            "SELECT id, organization_id, expires_at, created_at FROM contact_sessions WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let expires_at: String = row.get("expires_at");
        let created_at: String = row.get("created_at");
        Ok(Some(ContactSession {
            id,
            organization_id: row.get("organization_id"),
            expires_at: parse_timestamp(&expires_at),
            created_at: parse_timestamp(&created_at),
        }))
    }

    async fn create_conversation(
        &self,
        organization_id: &str,
        contact_session_id: Uuid,
        thread_id: &str,
    ) -> anyhow::Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            organization_id: organization_id.to_string(),
            contact_session_id,
            thread_id: thread_id.to_string(),
            status: ConversationStatus::Unresolved,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO conversations (id, organization_id, contact_session_id, thread_id, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.organization_id)
        .bind(conversation.contact_session_id.to_string())
        .bind(&conversation.thread_id)
        .bind(conversation.status.as_str())
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, organization_id, contact_session_id, thread_id, status, created_at \
             FROM conversations WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| conversation_from_row(&r)))
    }

    async fn get_conversation_by_thread(
        &self,
        thread_id: &str,
    ) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, organization_id, contact_session_id, thread_id, status, created_at \
             FROM conversations WHERE thread_id = ?1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| conversation_from_row(&r)))
    }

    async fn list_conversations(
        &self,
        organization_id: &str,
        status: Option<ConversationStatus>,
        opts: &PaginationOpts,
    ) -> anyhow::Result<Paginated<Conversation>> {
        let limit = opts.num_items as i64 + 1;
        let cursor = opts.cursor_seq();
        let rows = match (status, cursor) {
            (Some(status), Some(cursor)) => {
                sqlx::query(
                    "SELECT seq, id, organization_id, contact_session_id, thread_id, status, created_at \
                     FROM conversations WHERE status = ?1 AND organization_id = ?2 AND seq < ?3 \
                     ORDER BY seq DESC LIMIT ?4",
                )
                .bind(status.as_str())
                .bind(organization_id)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query(
                    "SELECT seq, id, organization_id, contact_session_id, thread_id, status, created_at \
                     FROM conversations WHERE status = ?1 AND organization_id = ?2 \
                     ORDER BY seq DESC LIMIT ?3",
                )
                .bind(status.as_str())
                .bind(organization_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(cursor)) => {
                sqlx::query(
                    "SELECT seq, id, organization_id, contact_session_id, thread_id, status, created_at \
                     FROM conversations WHERE organization_id = ?1 AND seq < ?2 \
                     ORDER BY seq DESC LIMIT ?3",
                )
                .bind(organization_id)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(
                    "SELECT seq, id, organization_id, contact_session_id, thread_id, status, created_at \
                     FROM conversations WHERE organization_id = ?1 ORDER BY seq DESC LIMIT ?2",
                )
                .bind(organization_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let entries = rows
            .into_iter()
            .map(|row| {
                let seq: i64 = row.get("seq");
                (seq, conversation_from_row(&row))
            })
            .collect::<Vec<_>>();
        let page = paginate_rows(entries, opts.num_items, |(seq, _)| *seq);
        Ok(Paginated {
            page: page.page.into_iter().map(|(_, c)| c).collect(),
            is_done: page.is_done,
            continue_cursor: page.continue_cursor,
        })
    }

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE conversations SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get_widget_settings(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<WidgetSettings>> {
        let row = sqlx::query(
            "SELECT greeting, suggestions_json, voice_json FROM widget_settings WHERE organization_id = ?1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let greeting: Option<String> = row.try_get("greeting").ok();
        let suggestions_json: String = row.get("suggestions_json");
        let voice_json: String = row.get("voice_json");
        Ok(Some(WidgetSettings {
            greeting,
            default_suggestions: serde_json::from_str(&suggestions_json)?,
            voice: serde_json::from_str(&voice_json)?,
        }))
    }

    async fn upsert_widget_settings(
        &self,
        organization_id: &str,
        settings: WidgetSettings,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO widget_settings (organization_id, greeting, suggestions_json, voice_json, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(organization_id) DO UPDATE SET \
             greeting = excluded.greeting, suggestions_json = excluded.suggestions_json, \
             voice_json = excluded.voice_json, updated_at = excluded.updated_at",
        )
        .bind(organization_id)
        .bind(settings.greeting)
        .bind(serde_json::to_string(&settings.default_suggestions)?)
        .bind(serde_json::to_string(&settings.voice)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn test_store() -> (SqliteSupportStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").to_string_lossy());
        let store = SqliteSupportStore::initialize(Some(url)).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn contact_session_roundtrip() {
        let (store, _dir) = test_store().await;
        let expires_at = Utc::now() + Duration::hours(24);
        let session = store.create_contact_session("acme", expires_at).await.unwrap();

        let got = store.get_contact_session(session.id).await.unwrap().unwrap();
        assert_eq!(got.id, session.id);
        assert_eq!(got.organization_id, "acme");
        assert!(!got.is_expired(Utc::now()));

        let missing = store.get_contact_session(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn conversation_roundtrip_and_status_update() {
        let (store, _dir) = test_store().await;
        let session = store
            .create_contact_session("acme", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        let conversation = store
            .create_conversation("acme", session.id, "thread-1")
            .await
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Unresolved);

        let by_id = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(by_id.thread_id, "thread-1");

        let by_thread = store
            .get_conversation_by_thread("thread-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_thread.id, conversation.id);

        let updated = store
            .set_conversation_status(conversation.id, ConversationStatus::Escalated)
            .await
            .unwrap();
        assert!(updated);
        let got = store.get_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(got.status, ConversationStatus::Escalated);

        let missing = store
            .set_conversation_status(Uuid::new_v4(), ConversationStatus::Resolved)
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn list_conversations_orders_filters_and_paginates() {
        let (store, _dir) = test_store().await;
        let session = store
            .create_contact_session("acme", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        for i in 0..4 {
            let c = store
                .create_conversation("acme", session.id, &format!("thread-{i}"))
                .await
                .unwrap();
            if i % 2 == 0 {
                store
                    .set_conversation_status(c.id, ConversationStatus::Escalated)
                    .await
                    .unwrap();
            }
        }
        // another org's conversation must never appear
        let other = store
            .create_contact_session("globex", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        store
            .create_conversation("globex", other.id, "thread-x")
            .await
            .unwrap();

        let all = store
            .list_conversations("acme", None, &PaginationOpts::first(10))
            .await
            .unwrap();
        let threads: Vec<&str> = all.page.iter().map(|c| c.thread_id.as_str()).collect();
        assert_eq!(threads, vec!["thread-3", "thread-2", "thread-1", "thread-0"]);
        assert!(all.is_done);

        let escalated = store
            .list_conversations(
                "acme",
                Some(ConversationStatus::Escalated),
                &PaginationOpts::first(10),
            )
            .await
            .unwrap();
        let threads: Vec<&str> = escalated.page.iter().map(|c| c.thread_id.as_str()).collect();
        assert_eq!(threads, vec!["thread-2", "thread-0"]);

        let first = store
            .list_conversations("acme", None, &PaginationOpts::first(3))
            .await
            .unwrap();
        assert_eq!(first.page.len(), 3);
        assert!(!first.is_done);
        let mut opts = PaginationOpts::first(3);
        opts.cursor = first.continue_cursor;
        let rest = store.list_conversations("acme", None, &opts).await.unwrap();
        assert_eq!(rest.page.len(), 1);
        assert!(rest.is_done);
        assert_eq!(rest.page[0].thread_id, "thread-0");
    }

    #[tokio::test]
    async fn widget_settings_upsert_and_fetch() {
        let (store, _dir) = test_store().await;
        assert!(store.get_widget_settings("acme").await.unwrap().is_none());

        let settings = WidgetSettings {
            greeting: Some("Hi from Acme".into()),
            default_suggestions: vec!["Billing".into(), "Refunds".into()],
            ..Default::default()
        };
        store
            .upsert_widget_settings("acme", settings.clone())
            .await
            .unwrap();
        let got = store.get_widget_settings("acme").await.unwrap().unwrap();
        assert_eq!(got, settings);

        let replaced = WidgetSettings {
            greeting: None,
            ..settings
        };
        store
            .upsert_widget_settings("acme", replaced.clone())
            .await
            .unwrap();
        let got = store.get_widget_settings("acme").await.unwrap().unwrap();
        assert_eq!(got.greeting, None);
        assert_eq!(got.default_suggestions.len(), 2);
    }

    #[tokio::test]
    async fn pragmas_and_migrations_applied() {
        let (store, dir) = test_store().await;

        let row = sqlx::query("PRAGMA journal_mode;")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"));

        // re-running initialize on the same file must be idempotent
        let url = format!("sqlite://{}", dir.path().join("test.db").to_string_lossy());
        let _again = SqliteSupportStore::initialize(Some(url)).await.unwrap();
    }
}
