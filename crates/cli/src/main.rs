//! `dagwright` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the API server.
//! - `migrate`  run pending database migrations.
//! - `validate` validate a DAG JSON file and print its execution order.
//! - `edit`     apply edit operations to a DAG JSON file offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::{MemoryStore, PgStore};
use engine::modifier::generate_step_id;
use engine::{
    apply_tool_calls_to_dag, sort_steps, validate_dag, Dag, DagToolCall, EngineConfig,
    ModifyRequest, ToolRef,
};
use providers::http::{
    ChatCompletionsGenerator, HttpGeneratorConfig, HttpToolService, HttpToolServiceConfig,
};
use providers::ToolRecord;

#[derive(Parser)]
#[command(name = "dagwright", about = "AI workflow DAG engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve(ServeArgs),
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a DAG definition JSON file.
    Validate {
        /// Path to the DAG JSON file (`{ "steps": [...] }`).
        path: PathBuf,
        /// JSON array of allowed tool references.
        #[arg(long)]
        tools: Option<PathBuf>,
    },
    /// Apply a JSON array of edit operations to a DAG and print the result.
    Edit {
        dag: PathBuf,
        operations: PathBuf,
        /// JSON array of tool records available to `update_step`.  Without
        /// it, `update_step` clears the tools of every step it edits.
        #[arg(long)]
        tools: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: String,
    /// Postgres connection string; without it everything is kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_base_url: String,
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    llm_api_key: String,
    #[arg(long, env = "TOOL_SERVICE_URL", default_value = "http://localhost:9000")]
    tool_service_url: String,
    #[arg(long, env = "TOOL_SERVICE_API_KEY")]
    tool_service_api_key: Option<String>,
    #[arg(long, env = "PROPOSAL_TTL_SECS", default_value_t = 900)]
    proposal_ttl_secs: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
            Ok(())
        }
        Command::Validate { path, tools } => {
            let dag: Dag = read_json(&path)?;
            let allowed: Option<Vec<ToolRef>> = tools.as_deref().map(read_json).transpose()?;

            if let Err(e) = validate_dag(&dag, allowed.as_deref()) {
                bail!("❌ Validation failed: {e}");
            }
            let order: Vec<String> = sort_steps(&dag.steps).into_iter().map(|s| s.id).collect();
            println!("✅ DAG is valid. Execution order: {order:?}");
            Ok(())
        }
        Command::Edit {
            dag,
            operations,
            tools,
        } => {
            let dag: Dag = read_json(&dag)?;
            let calls: Vec<DagToolCall> = read_json(&operations)?;
            let available: Vec<ToolRecord> = match tools.as_deref() {
                Some(path) => read_json(path)?,
                None => Vec::new(),
            };

            let mut id_generator = generate_step_id;
            let edited = apply_tool_calls_to_dag(ModifyRequest {
                dag: &dag,
                tool_calls: &calls,
                available_tools: &available,
                id_generator: &mut id_generator,
            })?;

            let allowed: Option<Vec<ToolRef>> = tools
                .is_some()
                .then(|| available.iter().map(ToolRef::from).collect());
            validate_dag(&edited, allowed.as_deref())?;

            println!("{}", serde_json::to_string_pretty(&edited)?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let tool_service = Arc::new(HttpToolService::new(HttpToolServiceConfig {
        base_url: args.tool_service_url,
        api_key: args.tool_service_api_key,
    }));
    let generator = Arc::new(ChatCompletionsGenerator::new(HttpGeneratorConfig {
        base_url: args.llm_base_url,
        api_key: args.llm_api_key,
        ..HttpGeneratorConfig::default()
    }));
    let config = EngineConfig::with_proposal_ttl_secs(args.proposal_ttl_secs);

    let state = match args.database_url {
        Some(url) => {
            let pool = db::pool::create_pool(&url, 10)
                .await
                .context("failed to connect to database")?;
            let store = Arc::new(PgStore::new(pool));
            api::AppState::new(
                store.clone(),
                store.clone(),
                store,
                tool_service.clone(),
                tool_service,
                generator,
                config,
            )
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            let store = Arc::new(MemoryStore::new());
            api::AppState::new(
                store.clone(),
                store.clone(),
                store,
                tool_service.clone(),
                tool_service,
                generator,
                config,
            )
        }
    };

    info!("Starting API server on {}", args.bind);
    api::serve(&args.bind, state).await?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    serde_json::from_value(value).with_context(|| format!("unexpected shape in {}", path.display()))
}
