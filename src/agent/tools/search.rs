use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;

use super::{Tool, ToolContext};
use crate::llm::{ChatMessage, ModelRequest};
use crate::thread_log::NewMessage;

/// Instruction for the secondary call that turns raw retrieved snippets into
/// an answer. Kept separate from retrieval so the ranking stays swappable.
pub const SEARCH_INTERPRETER_PROMPT: &str = "You answer customer-support questions \
using only the search results provided. Ground every statement in those results; \
if they do not contain the answer, say so plainly and suggest contacting a human \
operator. Keep the answer short and conversational.";

const SEARCH_LIMIT: usize = 5;

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Search the organization's knowledge base for information relevant to the customer's question; args: {\"query\": string}"
    }

    async fn run(&self, ctx: &ToolContext, args: Value) -> String {
        let Some(thread_id) = ctx.thread_id.as_deref() else {
            return "Missing thread ID".into();
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return "Missing search query".into();
        };
        match search_and_answer(ctx, thread_id, query).await {
            Ok(answer) => answer,
            Err(err) => format!("Search failed: {err}"),
        }
    }
}

async fn search_and_answer(
    ctx: &ToolContext,
    thread_id: &str,
    query: &str,
) -> anyhow::Result<String> {
    let Some(conversation) = ctx.store.get_conversation_by_thread(thread_id).await? else {
        return Ok("Conversation not found".into());
    };

    let result = ctx
        .retrieval
        .search(&conversation.organization_id, query, SEARCH_LIMIT)
        .await?;
    counter!("agent_searches_total").increment(1);

    let titles = result
        .entries
        .iter()
        .filter_map(|e| e.title.as_deref())
        .collect::<Vec<_>>()
        .join(", ");
    let context_text = format!(
        "Found results in {titles}. Here is the context:\n\n{}",
        result.text
    );

    let response = ctx
        .llm
        .generate(ModelRequest {
            model: ctx.model.clone(),
            messages: vec![
                ChatMessage::system(SEARCH_INTERPRETER_PROMPT),
                ChatMessage::user(format!(
                    "User asked: \"{query}\"\n\nSearch results:{context_text}"
                )),
            ],
            temperature: None,
            max_tokens: None,
        })
        .await?;

    ctx.log
        .save_message(thread_id, NewMessage::assistant(response.content.clone()))
        .await?;

    Ok(response.content)
}
