use anyhow::Context as _;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::llm::{ChatMessage, ModelRequest};
use crate::pagination::PaginationOpts;
use crate::thread_log::{MessageLog, MessageRole, NewMessage, ThreadMessage};

pub mod tools;

use tools::{ToolContext, ToolRegistry};

pub const DEFAULT_AGENT_NAME: &str = "Agent Echo";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful customer support assistant. \
Answer from the conversation so far. Use the search tool before answering product \
questions. Escalate when the customer asks for a human operator or you cannot help, \
and resolve the conversation once the customer confirms their issue is handled.";

const MAX_TOOL_ROUNDS: usize = 4;
const HISTORY_PAGE_SIZE: u32 = 50;
const MAX_HISTORY_MESSAGES: usize = 200;

/// Stateless agent configuration, bound per-call to a thread through the
/// [`ToolContext`]. One `generate` call is one turn.
#[derive(Clone)]
pub struct SupportAgent {
    pub name: String,
    pub model: String,
    pub instructions: String,
}

impl SupportAgent {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: instructions.into(),
        }
    }

    /// Run one generation turn: append the prompt, replay the thread history
    /// to the model, dispatch tool directives, and finalize. A turn may end
    /// after a state-transition tool without a further assistant message.
    pub async fn generate(
        &self,
        registry: &ToolRegistry,
        ctx: &ToolContext,
        prompt: &str,
    ) -> anyhow::Result<String> {
        let thread_id = ctx
            .thread_id
            .clone()
            .context("generation requires a thread id")?;

        ctx.log
            .save_message(&thread_id, NewMessage::user(prompt))
            .await?;

        let history = load_history(ctx.log.as_ref(), &thread_id).await?;
        let mut transcript = Vec::with_capacity(history.len() + 1);
        transcript.push(ChatMessage::system(self.system_prompt(registry)));
        transcript.extend(history.iter().map(chat_message));

        let mut last_tool_response = String::new();
        for round in 0..MAX_TOOL_ROUNDS {
            let response = ctx
                .llm
                .generate(ModelRequest {
                    model: self.model.clone(),
                    messages: transcript.clone(),
                    temperature: None,
                    max_tokens: None,
                })
                .await?;

            let Some(call) = parse_tool_call(&response.content) else {
                let text = response.content.trim().to_string();
                ctx.log
                    .save_message(
                        &thread_id,
                        NewMessage::assistant(text.clone()).with_author(self.name.clone()),
                    )
                    .await?;
                return Ok(text);
            };

            debug!(tool = %call.name, round, "agent requested tool");
            counter!("agent_tool_calls_total").increment(1);
            transcript.push(ChatMessage::assistant(response.content.clone()));

            let Some(tool) = registry.get(&call.name) else {
                transcript.push(ChatMessage::system(format!("Unknown tool: {}", call.name)));
                continue;
            };

            let result = tool.run(ctx, call.args).await;
            if tool.ends_turn() {
                return Ok(result);
            }
            transcript.push(ChatMessage::system(format!(
                "Tool {} returned: {result}",
                call.name
            )));
            last_tool_response = result;
        }

        // Tool rounds exhausted without a final text; the last tool response
        // stands in for it.
        Ok(last_tool_response)
    }

    fn system_prompt(&self, registry: &ToolRegistry) -> String {
        format!(
            "{}\n\n{}",
            self.instructions,
            registry.protocol_block()
        )
    }
}

fn chat_message(message: &ThreadMessage) -> ChatMessage {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };
    ChatMessage {
        role: role.into(),
        content: message.content.clone(),
    }
}

/// Replay the thread oldest-first; the log itself lists newest-first.
async fn load_history(
    log: &dyn MessageLog,
    thread_id: &str,
) -> anyhow::Result<Vec<ThreadMessage>> {
    let mut collected = Vec::new();
    let mut opts = PaginationOpts::first(HISTORY_PAGE_SIZE);
    loop {
        let page = log.list_messages(thread_id, &opts).await?;
        let is_done = page.is_done;
        opts.cursor = page.continue_cursor.clone();
        collected.extend(page.page);
        if is_done || collected.len() >= MAX_HISTORY_MESSAGES {
            break;
        }
    }
    collected.reverse();
    Ok(collected)
}

#[derive(Debug, PartialEq)]
pub(crate) struct ToolCall {
    pub name: String,
    pub args: Value,
}

/// A tool directive is a lone JSON object `{"tool": name, "args": {...}}`,
/// optionally fenced. Anything else is final assistant text.
pub(crate) fn parse_tool_call(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();
    let candidate = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.split("```").next().unwrap_or("").trim()
        }
        None => trimmed,
    };
    let value: Value = serde_json::from_str(candidate).ok()?;
    let name = value.get("tool")?.as_str()?.to_string();
    let args = value
        .get("args")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ToolCall { name, args })
}
