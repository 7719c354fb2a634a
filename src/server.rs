use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::agent::SupportAgent;
use crate::agent::tools::{ToolContext, ToolRegistry};
use crate::api::{private, public};
use crate::identity::IdentityProvider;
use crate::llm::LanguageModel;
use crate::retrieval::RetrievalIndex;
use crate::storage::SupportStore;
use crate::thread_log::MessageLog;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SupportStore>,
    pub log: Arc<dyn MessageLog>,
    pub retrieval: Arc<dyn RetrievalIndex>,
    pub llm: Arc<dyn LanguageModel>,
    pub identity: Arc<dyn IdentityProvider>,
    pub agent: SupportAgent,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    /// Tool execution scope for one agent turn. Tools reach their
    /// conversation only through this thread id.
    pub fn tool_context(&self, thread_id: Option<String>) -> ToolContext {
        ToolContext {
            thread_id,
            store: self.store.clone(),
            log: self.log.clone(),
            retrieval: self.retrieval.clone(),
            llm: self.llm.clone(),
            model: self.agent.model.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/public/sessions", post(public::create_session))
        .route("/v1/public/conversations", post(public::create_conversation))
        .route("/v1/public/conversations/:id", get(public::get_conversation))
        .route(
            "/v1/public/messages",
            post(public::submit_message).get(public::list_messages),
        )
        .route("/v1/public/settings", get(public::get_widget_settings))
        .route("/v1/private/conversations", get(private::list_conversations))
        .route(
            "/v1/private/conversations/:id/status",
            patch(private::update_status),
        )
        .route(
            "/v1/private/messages",
            post(private::operator_reply).get(private::list_messages),
        )
        .route(
            "/v1/private/settings",
            put(private::upsert_widget_settings),
        )
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    let app = router(state).route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
