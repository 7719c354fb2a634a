use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;

use super::{Tool, ToolContext};
use crate::conversation::ConversationStatus;
use crate::thread_log::NewMessage;

pub const ESCALATED_MESSAGE: &str = "Conversation escalated to a human operator";

pub struct EscalateConversationTool;

#[async_trait]
impl Tool for EscalateConversationTool {
    fn name(&self) -> &'static str {
        "escalate_conversation"
    }

    fn description(&self) -> &'static str {
        "Escalate the current conversation to a human operator"
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
            Err(err) => format!("Failed to escalate conversation: {err}"),
        }
    }
}

async fn transition(ctx: &ToolContext, thread_id: &str) -> anyhow::Result<String> {
    let Some(conversation) = ctx.store.get_conversation_by_thread(thread_id).await? else {
        return Ok("Conversation not found".into());
    };
    ctx.store
        .set_conversation_status(conversation.id, ConversationStatus::Escalated)
        .await?;
    ctx.log
        .save_message(thread_id, NewMessage::system(ESCALATED_MESSAGE))
        .await?;
    counter!("agent_conversations_escalated_total").increment(1);
    tracing::info!(conversation = %conversation.id, "conversation escalated by agent");
    Ok(ESCALATED_MESSAGE.into())
}
