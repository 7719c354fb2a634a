use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use metrics::counter;
use serde::Deserialize;
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationStatus, ConversationSummary};
use crate::error::ApiError;
use crate::identity::{IdentityProvider, OperatorIdentity};
use crate::pagination::{DEFAULT_PAGE_SIZE, Paginated, PaginationOpts};
use crate::server::AppState;
use crate::settings::WidgetSettings;
use crate::storage::SupportStore;
use crate::thread_log::{MessageLog, NewMessage, ThreadMessage};

pub const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";

pub(crate) async fn require_identity(
    provider: &dyn IdentityProvider,
    headers: &HeaderMap,
) -> Result<OperatorIdentity, ApiError> {
    let token = headers
        .get(OPERATOR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Identity not found"))?;
    let identity = provider
        .resolve(token)
        .await
        .ok_or_else(|| ApiError::unauthorized("Identity not found"))?;
    if identity.org_id.is_empty() {
        return Err(ApiError::unauthorized("Organization not found"));
    }
    Ok(identity)
}

async fn owned_conversation(
    store: &dyn SupportStore,
    id: Uuid,
    identity: &OperatorIdentity,
) -> Result<Conversation, ApiError> {
    let Some(conversation) = store.get_conversation(id).await? else {
        return Err(ApiError::not_found("Conversation not found"));
    };
    if conversation.organization_id != identity.org_id {
        return Err(ApiError::unauthorized("Invalid Organization ID"));
    }
    Ok(conversation)
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub status: Option<ConversationStatus>,
    pub num_items: Option<u32>,
    pub cursor: Option<String>,
}

/// Dashboard inbox: each entry carries the latest message and the owning
/// session. Entries whose session has lapsed are dropped from the page rather
/// than re-fetched, so a page may come back short.
pub async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Paginated<ConversationSummary>>, ApiError> {
    let identity = require_identity(state.identity.as_ref(), &headers).await?;

    let opts = PaginationOpts {
        num_items: query.num_items.unwrap_or(DEFAULT_PAGE_SIZE),
        cursor: query.cursor,
    };
    let page = state
        .store
        .list_conversations(&identity.org_id, query.status, &opts)
        .await?;

    let now = chrono::Utc::now();
    let mut entries = Vec::with_capacity(page.page.len());
    for conversation in page.page {
        let Some(session) = state
            .store
            .get_contact_session(conversation.contact_session_id)
            .await?
        else {
            continue;
        };
        if session.is_expired(now) {
            continue;
        }
        let last_message = state
            .log
            .list_messages(&conversation.thread_id, &PaginationOpts::first(1))
            .await?
            .page
            .into_iter()
            .next();
        entries.push(ConversationSummary {
            conversation,
            last_message,
            contact_session: session,
        });
    }

    Ok(Json(Paginated {
        page: entries,
        is_done: page.is_done,
        continue_cursor: page.continue_cursor,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: ConversationStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Conversation>, ApiError> {
    let identity = require_identity(state.identity.as_ref(), &headers).await?;
    let mut conversation = owned_conversation(state.store.as_ref(), id, &identity).await?;

    state.store.set_conversation_status(id, body.status).await?;
    conversation.status = body.status;
    counter!("conversation_status_updates_total").increment(1);
    tracing::info!(conversation = %id, status = body.status.as_str(), "status updated");
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct OperatorReplyBody {
    pub conversation_id: Uuid,
    pub prompt: String,
}

/// Direct human reply, bypassing the agent. The operator's family name is
/// recorded as the message author.
pub async fn operator_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OperatorReplyBody>,
) -> Result<Json<ThreadMessage>, ApiError> {
    let identity = require_identity(state.identity.as_ref(), &headers).await?;
    let conversation =
        owned_conversation(state.store.as_ref(), body.conversation_id, &identity).await?;
    if conversation.status == ConversationStatus::Resolved {
        return Err(ApiError::bad_request("Conversation resolved"));
    }

    state
        .log
        .save_message(
            &conversation.thread_id,
            NewMessage::assistant(body.prompt).with_author(&identity.family_name),
        )
        .await?;
    counter!("operator_replies_total").increment(1);

    let saved = state
        .log
        .list_messages(&conversation.thread_id, &PaginationOpts::first(1))
        .await?
        .page
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("reply not persisted"))?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub thread_id: String,
    pub num_items: Option<u32>,
    pub cursor: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Paginated<ThreadMessage>>, ApiError> {
    let identity = require_identity(state.identity.as_ref(), &headers).await?;
    let Some(conversation) = state
        .store
        .get_conversation_by_thread(&query.thread_id)
        .await?
    else {
        return Err(ApiError::not_found("Conversation not found"));
    };
    if conversation.organization_id != identity.org_id {
        return Err(ApiError::unauthorized("Invalid Organization ID"));
    }

    let opts = PaginationOpts {
        num_items: query.num_items.unwrap_or(DEFAULT_PAGE_SIZE),
        cursor: query.cursor,
    };
    let page = state.log.list_messages(&query.thread_id, &opts).await?;
    Ok(Json(page))
}

pub async fn upsert_widget_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<WidgetSettings>,
) -> Result<Json<WidgetSettings>, ApiError> {
    let identity = require_identity(state.identity.as_ref(), &headers).await?;
    state
        .store
        .upsert_widget_settings(&identity.org_id, settings.clone())
        .await?;
    Ok(Json(settings))
}
