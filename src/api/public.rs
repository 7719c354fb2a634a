use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ContactSession, Conversation, ConversationStatus};
use crate::error::ApiError;
use crate::pagination::{DEFAULT_PAGE_SIZE, Paginated, PaginationOpts};
use crate::server::AppState;
use crate::settings::{VoiceSettings, resolve_greeting};
use crate::storage::SupportStore;
use crate::thread_log::{MessageLog, NewMessage, ThreadMessage};

pub const SESSION_TTL_HOURS: i64 = 24;

/// Every public call re-validates the presented session against its expiry;
/// there is no cached validity.
pub(crate) async fn require_session(
    store: &dyn SupportStore,
    id: Uuid,
) -> Result<ContactSession, ApiError> {
    match store.get_contact_session(id).await? {
        Some(session) if !session.is_expired(Utc::now()) => Ok(session),
        _ => Err(ApiError::unauthorized("Invalid session")),
    }
}

async fn owned_conversation_by_thread(
    store: &dyn SupportStore,
    thread_id: &str,
    session: &ContactSession,
) -> Result<Conversation, ApiError> {
    let Some(conversation) = store.get_conversation_by_thread(thread_id).await? else {
        return Err(ApiError::not_found("Conversation not found"));
    };
    if conversation.contact_session_id != session.id {
        return Err(ApiError::unauthorized("Incorrect session"));
    }
    Ok(conversation)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub organization_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
    pub organization_id: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let expires_at = Utc::now() + Duration::hours(SESSION_TTL_HOURS);
    let session = state
        .store
        .create_contact_session(&body.organization_id, expires_at)
        .await?;
    Ok(Json(CreateSessionResponse {
        id: session.id,
        organization_id: session.organization_id,
        expires_at: session.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    pub organization_id: String,
    pub contact_session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub id: Uuid,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<CreateConversationResponse>, ApiError> {
    let session = require_session(state.store.as_ref(), body.contact_session_id).await?;
    if session.organization_id != body.organization_id {
        return Err(ApiError::unauthorized("Incorrect session"));
    }

    let thread_id = state.log.create_thread(&body.organization_id).await?;
    let settings = state
        .store
        .get_widget_settings(&body.organization_id)
        .await?;
    state
        .log
        .save_message(
            &thread_id,
            NewMessage::assistant(resolve_greeting(settings.as_ref())),
        )
        .await?;

    let conversation = state
        .store
        .create_conversation(&body.organization_id, session.id, &thread_id)
        .await?;
    counter!("conversations_created_total").increment(1);
    tracing::info!(conversation = %conversation.id, organization = %body.organization_id, "conversation created");
    Ok(Json(CreateConversationResponse {
        id: conversation.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub contact_session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationProjection {
    pub id: Uuid,
    pub status: ConversationStatus,
    pub thread_id: String,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<ConversationProjection>, ApiError> {
    let session = require_session(state.store.as_ref(), query.contact_session_id).await?;
    let Some(conversation) = state.store.get_conversation(id).await? else {
        return Err(ApiError::not_found("Conversation not found"));
    };
    if conversation.contact_session_id != session.id {
        return Err(ApiError::unauthorized("Incorrect session"));
    }
    Ok(Json(ConversationProjection {
        id: conversation.id,
        status: conversation.status,
        thread_id: conversation.thread_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub thread_id: String,
    pub contact_session_id: Uuid,
    pub num_items: Option<u32>,
    pub cursor: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Paginated<ThreadMessage>>, ApiError> {
    let session = require_session(state.store.as_ref(), query.contact_session_id).await?;
    owned_conversation_by_thread(state.store.as_ref(), &query.thread_id, &session).await?;

    let opts = PaginationOpts {
        num_items: query.num_items.unwrap_or(DEFAULT_PAGE_SIZE),
        cursor: query.cursor,
    };
    let page = state.log.list_messages(&query.thread_id, &opts).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct SubmitMessageBody {
    pub thread_id: String,
    pub contact_session_id: Uuid,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitMessageResponse {
    pub response: String,
}

/// Customer message: the higher-latency action path that hands the prompt to
/// the support agent bound to this thread.
pub async fn submit_message(
    State(state): State<AppState>,
    Json(body): Json<SubmitMessageBody>,
) -> Result<Json<SubmitMessageResponse>, ApiError> {
    let session = require_session(state.store.as_ref(), body.contact_session_id).await?;
    let conversation =
        owned_conversation_by_thread(state.store.as_ref(), &body.thread_id, &session).await?;
    if conversation.status == ConversationStatus::Resolved {
        return Err(ApiError::bad_request("Conversation resolved"));
    }

    let ctx = state.tool_context(Some(body.thread_id.clone()));
    let response = state.agent.generate(&state.tools, &ctx, &body.prompt).await?;
    counter!("customer_messages_total").increment(1);
    Ok(Json(SubmitMessageResponse { response }))
}

#[derive(Debug, Deserialize)]
pub struct WidgetSettingsQuery {
    pub organization_id: String,
}

#[derive(Debug, Serialize)]
pub struct WidgetConfigResponse {
    pub greeting: String,
    pub default_suggestions: Vec<String>,
    pub voice: VoiceSettings,
}

pub async fn get_widget_settings(
    State(state): State<AppState>,
    Query(query): Query<WidgetSettingsQuery>,
) -> Result<Json<WidgetConfigResponse>, ApiError> {
    let settings = state
        .store
        .get_widget_settings(&query.organization_id)
        .await?;
    let greeting = resolve_greeting(settings.as_ref());
    let settings = settings.unwrap_or_default();
    Ok(Json(WidgetConfigResponse {
        greeting,
        default_suggestions: settings.default_suggestions,
        voice: settings.voice,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::escalate::ESCALATED_MESSAGE;
    use crate::conversation::ConversationStatus;
    use crate::settings::{DEFAULT_GREETING, WidgetSettings};
    use crate::testing::{ScriptedModel, StaticIdentity, StaticRetrieval, test_state};
    use crate::thread_log::MessageRole;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn quiet_state(dir: &tempfile::TempDir) -> AppState {
        test_state(
            dir,
            Arc::new(ScriptedModel::default()),
            Arc::new(StaticRetrieval::default()),
            Arc::new(StaticIdentity::default()),
        )
        .await
    }

    async fn open_conversation(state: &AppState, org: &str) -> (Uuid, Uuid, String) {
        let session = create_session(
            State(state.clone()),
            Json(CreateSessionBody {
                organization_id: org.into(),
            }),
        )
        .await
        .unwrap()
        .0;
        let created = create_conversation(
            State(state.clone()),
            Json(CreateConversationBody {
                organization_id: org.into(),
                contact_session_id: session.id,
            }),
        )
        .await
        .unwrap()
        .0;
        let conversation = state.store.get_conversation(created.id).await.unwrap().unwrap();
        (session.id, created.id, conversation.thread_id)
    }

    #[tokio::test]
    async fn new_conversation_is_seeded_with_the_configured_greeting() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        state
            .store
            .upsert_widget_settings(
                "acme",
                WidgetSettings {
                    greeting: Some("Welcome to Acme support".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (session_id, _id, thread_id) = open_conversation(&state, "acme").await;

        let page = list_messages(
            State(state.clone()),
            Query(ListMessagesQuery {
                thread_id,
                contact_session_id: session_id,
                num_items: None,
                cursor: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(page.page.len(), 1);
        assert_eq!(page.page[0].role, MessageRole::Assistant);
        assert_eq!(page.page[0].content, "Welcome to Acme support");
    }

    #[tokio::test]
    async fn unconfigured_organization_gets_the_default_greeting() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        let (session_id, _id, thread_id) = open_conversation(&state, "globex").await;

        let page = list_messages(
            State(state.clone()),
            Query(ListMessagesQuery {
                thread_id,
                contact_session_id: session_id,
                num_items: None,
                cursor: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(page.page[0].content, DEFAULT_GREETING);
    }

    #[tokio::test]
    async fn expired_session_is_unauthorized_everywhere() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        let (_live, conversation_id, thread_id) = open_conversation(&state, "acme").await;

        let expired = state
            .store
            .create_contact_session("acme", Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        let err = create_conversation(
            State(state.clone()),
            Json(CreateConversationBody {
                organization_id: "acme".into(),
                contact_session_id: expired.id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = get_conversation(
            State(state.clone()),
            Path(conversation_id),
            Query(SessionQuery {
                contact_session_id: expired.id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = list_messages(
            State(state.clone()),
            Query(ListMessagesQuery {
                thread_id: thread_id.clone(),
                contact_session_id: expired.id,
                num_items: None,
                cursor: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = submit_message(
            State(state.clone()),
            Json(SubmitMessageBody {
                thread_id,
                contact_session_id: expired.id,
                prompt: "hello?".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn conversation_access_is_scoped_to_the_owning_session() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        let (_owner, conversation_id, thread_id) = open_conversation(&state, "acme").await;

        let stranger = state
            .store
            .create_contact_session("acme", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let err = get_conversation(
            State(state.clone()),
            Path(conversation_id),
            Query(SessionQuery {
                contact_session_id: stranger.id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(err.to_string(), "Incorrect session");

        let err = submit_message(
            State(state.clone()),
            Json(SubmitMessageBody {
                thread_id,
                contact_session_id: stranger.id,
                prompt: "hi".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = get_conversation(
            State(state.clone()),
            Path(Uuid::new_v4()),
            Query(SessionQuery {
                contact_session_id: stranger.id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn session_organization_must_match_the_requested_one() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        let session = create_session(
            State(state.clone()),
            Json(CreateSessionBody {
                organization_id: "acme".into(),
            }),
        )
        .await
        .unwrap()
        .0;

        let err = create_conversation(
            State(state.clone()),
            Json(CreateConversationBody {
                organization_id: "globex".into(),
                contact_session_id: session.id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn resolved_conversation_rejects_customer_messages() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;
        let (session_id, conversation_id, thread_id) = open_conversation(&state, "acme").await;
        state
            .store
            .set_conversation_status(conversation_id, ConversationStatus::Resolved)
            .await
            .unwrap();

        let err = submit_message(
            State(state.clone()),
            Json(SubmitMessageBody {
                thread_id,
                contact_session_id: session_id,
                prompt: "anyone there?".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(err.to_string(), "Conversation resolved");
    }

    #[tokio::test]
    async fn cancellation_request_escalates_end_to_end() {
        let dir = tempdir().unwrap();
        let state = test_state(
            &dir,
            Arc::new(ScriptedModel::new([
                "{\"tool\": \"escalate_conversation\", \"args\": {}}",
            ])),
            Arc::new(StaticRetrieval::default()),
            Arc::new(StaticIdentity::default()),
        )
        .await;
        let (session_id, conversation_id, thread_id) = open_conversation(&state, "acme").await;

        let response = submit_message(
            State(state.clone()),
            Json(SubmitMessageBody {
                thread_id: thread_id.clone(),
                contact_session_id: session_id,
                prompt: "I want to cancel".into(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(response.response, ESCALATED_MESSAGE);

        let conversation = state
            .store
            .get_conversation(conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.status, ConversationStatus::Escalated);

        let mut page = list_messages(
            State(state.clone()),
            Query(ListMessagesQuery {
                thread_id,
                contact_session_id: session_id,
                num_items: Some(10),
                cursor: None,
            }),
        )
        .await
        .unwrap()
        .0
        .page;
        page.reverse();
        let transcript: Vec<(MessageRole, &str)> = page
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            transcript,
            vec![
                (MessageRole::Assistant, DEFAULT_GREETING),
                (MessageRole::User, "I want to cancel"),
                (MessageRole::System, ESCALATED_MESSAGE),
            ]
        );
    }

    #[tokio::test]
    async fn widget_settings_endpoint_resolves_the_greeting() {
        let dir = tempdir().unwrap();
        let state = quiet_state(&dir).await;

        let config = get_widget_settings(
            State(state.clone()),
            Query(WidgetSettingsQuery {
                organization_id: "acme".into(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(config.greeting, DEFAULT_GREETING);
        assert!(config.default_suggestions.is_empty());

        state
            .store
            .upsert_widget_settings(
                "acme",
                WidgetSettings {
                    greeting: Some("Hi!".into()),
                    default_suggestions: vec!["Billing".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let config = get_widget_settings(
            State(state.clone()),
            Query(WidgetSettingsQuery {
                organization_id: "acme".into(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(config.greeting, "Hi!");
        assert_eq!(config.default_suggestions, vec!["Billing".to_string()]);
    }
}
