use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEntry {
    pub title: Option<String>,
    pub text: String,
}

/// Ranked entries plus the concatenated text blob the retrieval service
/// already assembled from them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResult {
    pub entries: Vec<SearchEntry>,
    pub text: String,
}

/// Namespace-scoped semantic search over an organization's knowledge base.
/// The ranking itself is owned by the retrieval service behind this trait.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<SearchResult>;
}

#[derive(Clone)]
pub struct HttpRetrievalIndex {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl HttpRetrievalIndex {
    pub fn from_env() -> Self {
        let base_url = std::env::var("RETRIEVAL_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7272".into());
        let api_key = std::env::var("RETRIEVAL_API_KEY").ok();
        Self { base_url, api_key }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    namespace: &'a str,
    query: &'a str,
    limit: usize,
}

#[async_trait]
impl RetrievalIndex for HttpRetrievalIndex {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<SearchResult> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let client = reqwest::Client::new();
        let mut rb = client.post(url).json(&SearchRequest {
            namespace,
            query,
            limit,
        });
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("retrieval search failed: {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}
