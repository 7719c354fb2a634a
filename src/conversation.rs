use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::thread_log::ThreadMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Unresolved,
    Escalated,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Unresolved => "unresolved",
            ConversationStatus::Escalated => "escalated",
            ConversationStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unresolved" => Some(ConversationStatus::Unresolved),
            "escalated" => Some(ConversationStatus::Escalated),
            "resolved" => Some(ConversationStatus::Resolved),
            _ => None,
        }
    }

    /// Dashboard toggle order. Policy only: the status setter accepts any
    /// explicit target and never enforces this cycle.
    pub fn cycled(self) -> Self {
        match self {
            ConversationStatus::Unresolved => ConversationStatus::Escalated,
            ConversationStatus::Escalated => ConversationStatus::Resolved,
            ConversationStatus::Resolved => ConversationStatus::Unresolved,
        }
    }
}

/// Anonymous widget visitor identity. Never mutated after creation; implicitly
/// dead once `expires_at` passes, and every operation re-checks that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSession {
    pub id: Uuid,
    pub organization_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ContactSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub organization_id: String,
    pub contact_session_id: Uuid,
    pub thread_id: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
}

/// Dashboard list entry: a conversation joined with its latest message and
/// owning session.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<ThreadMessage>,
    pub contact_session: ContactSession,
}
