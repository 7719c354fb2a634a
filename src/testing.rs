//! In-memory fakes for the external collaborators, shared across test modules.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::agent::tools::ToolRegistry;
use crate::agent::{DEFAULT_AGENT_NAME, DEFAULT_INSTRUCTIONS, SupportAgent};
use crate::identity::{IdentityProvider, OperatorIdentity};
use crate::llm::{LanguageModel, ModelRequest, ModelResponse};
use crate::retrieval::{RetrievalIndex, SearchResult};
use crate::server::AppState;
use crate::storage::SqliteSupportStore;
use crate::thread_log::SqliteMessageLog;

/// Full application state over a temp-dir database, with the external
/// collaborators swapped for the fakes below.
pub(crate) async fn test_state(
    dir: &tempfile::TempDir,
    llm: Arc<dyn LanguageModel>,
    retrieval: Arc<dyn RetrievalIndex>,
    identity: Arc<dyn IdentityProvider>,
) -> AppState {
    let url = format!("sqlite://{}", dir.path().join("test.db").to_string_lossy());
    let store = SqliteSupportStore::initialize(Some(url)).await.unwrap();
    let log = SqliteMessageLog::new(store.pool().clone());
    AppState {
        store: Arc::new(store),
        log: Arc::new(log),
        retrieval,
        llm,
        identity,
        agent: SupportAgent::new(DEFAULT_AGENT_NAME, "test-model", DEFAULT_INSTRUCTIONS),
        tools: Arc::new(ToolRegistry::with_default_tools()),
    }
}

/// Language model that replays a fixed list of replies in order.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _req: ModelRequest) -> anyhow::Result<ModelResponse> {
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .context("scripted model ran out of replies")?;
        Ok(ModelResponse {
            content,
            model: "scripted".into(),
        })
    }
}

/// Retrieval index that returns one canned result and records every call.
#[derive(Default)]
pub(crate) struct StaticRetrieval {
    result: SearchResult,
    calls: Mutex<Vec<(String, String, usize)>>,
}

impl StaticRetrieval {
    pub fn with_result(result: SearchResult) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalIndex for StaticRetrieval {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<SearchResult> {
        self.calls
            .lock()
            .unwrap()
            .push((namespace.to_string(), query.to_string(), limit));
        Ok(self.result.clone())
    }
}

/// Identity provider backed by an explicit token table; unlike the env-based
/// one it can hand out identities with an empty organization.
#[derive(Default)]
pub(crate) struct StaticIdentity {
    entries: HashMap<String, OperatorIdentity>,
}

impl StaticIdentity {
    pub fn with(token: &str, org_id: &str, family_name: &str) -> Self {
        let mut identity = Self::default();
        identity.add(token, org_id, family_name);
        identity
    }

    pub fn add(&mut self, token: &str, org_id: &str, family_name: &str) {
        self.entries.insert(
            token.to_string(),
            OperatorIdentity {
                org_id: org_id.to_string(),
                family_name: family_name.to_string(),
            },
        );
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve(&self, token: &str) -> Option<OperatorIdentity> {
        self.entries.get(token).cloned()
    }
}
