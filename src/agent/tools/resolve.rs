use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;

use super::{Tool, ToolContext};
use crate::conversation::ConversationStatus;
use crate::thread_log::NewMessage;

pub const RESOLVED_MESSAGE: &str = "Conversation resolved";

pub struct ResolveConversationTool;

#[async_trait]
impl Tool for ResolveConversationTool {
    fn name(&self) -> &'static str {
        "resolve_conversation"
    }

    fn description(&self) -> &'static str {
        "Resolve the current conversation when the customer's issue is fully handled"
    }

    fn ends_turn(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ToolContext, _args: Value) -> String {
        let Some(thread_id) = ctx.thread_id.as_deref() else {
            return "Missing thread ID".into();
        };
        match transition(ctx, thread_id).await {
            Ok(message) => message,
            Err(err) => format!("Failed to resolve conversation: {err}"),
        }
    }
}

async fn transition(ctx: &ToolContext, thread_id: &str) -> anyhow::Result<String> {
    let Some(conversation) = ctx.store.get_conversation_by_thread(thread_id).await? else {
        return Ok("Conversation not found".into());
    };
    ctx.store
        .set_conversation_status(conversation.id, ConversationStatus::Resolved)
        .await?;
    ctx.log
        .save_message(thread_id, NewMessage::system(RESOLVED_MESSAGE))
        .await?;
    counter!("agent_conversations_resolved_total").increment(1);
    tracing::info!(conversation = %conversation.id, "conversation resolved by agent");
    Ok(RESOLVED_MESSAGE.into())
}
