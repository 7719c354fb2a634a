use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod agent;
mod api;
mod conversation;
mod error;
mod identity;
mod llm;
mod pagination;
mod retrieval;
mod server;
mod settings;
mod storage;
#[cfg(test)]
mod testing;
mod thread_log;

use agent::tools::ToolRegistry;
use agent::{DEFAULT_AGENT_NAME, DEFAULT_INSTRUCTIONS, SupportAgent};

#[derive(Debug, Parser)]
#[command(name = "echo_desk")]
#[command(about = "Multi-tenant customer support chat backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:7070")]
        listen: String,
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start {
            listen,
            database_url,
        } => {
            let addr: SocketAddr = listen.parse()?;

            let store = storage::SqliteSupportStore::initialize(database_url).await?;
            let log = thread_log::SqliteMessageLog::new(store.pool().clone());
            let model =
                std::env::var("SUPPORT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

            let state = server::AppState {
                store: Arc::new(store),
                log: Arc::new(log),
                retrieval: Arc::new(retrieval::HttpRetrievalIndex::from_env()),
                llm: Arc::new(llm::OpenAICompatible::from_env()),
                identity: Arc::new(identity::EnvTokenIdentity::from_env()),
                agent: SupportAgent::new(DEFAULT_AGENT_NAME, model, DEFAULT_INSTRUCTIONS),
                tools: Arc::new(ToolRegistry::with_default_tools()),
            };
            server::serve(addr, state).await?;
        }
    }
    Ok(())
}
