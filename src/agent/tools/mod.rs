use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::LanguageModel;
use crate::retrieval::RetrievalIndex;
use crate::storage::SupportStore;
use crate::thread_log::MessageLog;

pub mod escalate;
pub mod resolve;
pub mod search;

/// Execution context handed to a tool. The conversation is identified solely
/// through `thread_id`; tool arguments never carry a conversation id, so a
/// crafted call cannot target an unrelated conversation.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: Option<String>,
    pub store: Arc<dyn SupportStore>,
    pub log: Arc<dyn MessageLog>,
    pub retrieval: Arc<dyn RetrievalIndex>,
    pub llm: Arc<dyn LanguageModel>,
    pub model: String,
}

/// A capability the agent may invoke mid-generation. Outcomes are plain
/// strings; failures degrade to a descriptive string so a misfiring tool
/// never aborts the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Terminal tools end the generation turn without a further assistant
    /// message; the tool has already appended its own.
    fn ends_turn(&self) -> bool {
        false
    }
    async fn run(&self, ctx: &ToolContext, args: Value) -> String;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_default_tools() -> Self {
        let mut r = Self::new();
        r.register(Box::new(resolve::ResolveConversationTool));
        r.register(Box::new(escalate::EscalateConversationTool));
        r.register(Box::new(search::SearchTool));
        r
    }

    pub fn register(&mut self, t: Box<dyn Tool>) {
        self.tools.push(t);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().map(|b| b.as_ref()).find(|t| t.name() == name)
    }

    /// Tool section of the agent's system prompt.
    pub fn protocol_block(&self) -> String {
        let mut block = String::from(
            "To use a tool, reply with exactly one JSON object and nothing else: \
             {\"tool\": \"<name>\", \"args\": {...}}.\nAvailable tools:\n",
        );
        for tool in &self.tools {
            block.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }
        block
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_default_tools()
    }
}
