//! Command-line front end for the gateway: reads an `ExecuteArgs` JSON body
//! from a file or stdin, runs it through [`gateway_core::Gateway`], and
//! prints the resulting `ExecuteResponse` JSON to stdout.

use clap::Parser;
use gateway_core::capability::{CapabilityRegistry, CapabilityStore};
use gateway_core::executor::{FakeInvoker, ToolInvoker, WorkflowStore};
use gateway_core::hypergraph::HypergraphStore;
use gateway_core::ranker::SHGATRanker;
use gateway_core::threshold::ThresholdManager;
use gateway_core::tool::{Routing, Tool, ToolId, ToolRegistry};
use gateway_core::trace::TraceStore;
use gateway_core::vector::{DeterministicHashEmbedder, Vector};
use gateway_core::{ExecuteArgs, Gateway, GatewayConfig};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Capability-learning execution gateway")]
struct Cli {
    /// Path to an `ExecuteArgs` JSON file. Reads stdin if omitted.
    #[arg(long)]
    request: Option<PathBuf>,

    /// Path to a JSON file describing the tools this gateway knows about
    /// and the canned responses they return (the tool-provider boundary is
    /// out of scope for this crate; this is a stand-in for a real MCP
    /// connection). See `demos/tools.json` for the expected shape.
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Sqlite database path. Defaults to an in-memory database, so state
    /// does not persist across invocations unless this is set.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(serde::Deserialize)]
struct ToolFixture {
    id: String,
    #[serde(default)]
    pure: bool,
    #[serde(default)]
    elevated: bool,
    #[serde(default)]
    cloud: bool,
    #[serde(default = "serde_json::Value::default")]
    result: serde_json::Value,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response).expect("response always serializes"));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<gateway_core::ExecuteResponse, gateway_core::Error> {
    let request_body = match &cli.request {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| gateway_core::Error::invalid_argument(format!("reading {}: {e}", path.display())))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| gateway_core::Error::invalid_argument(format!("reading stdin: {e}")))?;
            buf
        }
    };
    let args: ExecuteArgs = serde_json::from_str(&request_body)?;

    let pool = match &cli.db {
        Some(path) => gateway_core::store::SqlitePool::open(path)?,
        None => gateway_core::store::SqlitePool::open_in_memory()?,
    };

    let (tools, invoker) = load_tools(cli.tools.as_deref())?;
    let gateway = Gateway::new(
        GatewayConfig::default(),
        tools,
        CapabilityRegistry::new(pool.clone()),
        CapabilityStore::new(pool.clone()),
        HypergraphStore::new(pool.clone()),
        Arc::new(SHGATRanker::new(HypergraphStore::new(pool.clone()), true)),
        ThresholdManager::new(pool.clone()),
        invoker,
        WorkflowStore::new(pool.clone()),
        Arc::new(DeterministicHashEmbedder::default()),
        TraceStore::new(pool),
    );

    gateway.execute(args).await
}

fn load_tools(path: Option<&std::path::Path>) -> Result<(Arc<ToolRegistry>, Arc<dyn ToolInvoker>), gateway_core::Error> {
    let registry = ToolRegistry::new();
    let mut invoker = FakeInvoker::new();

    if let Some(path) = path {
        let body = std::fs::read_to_string(path)
            .map_err(|e| gateway_core::Error::invalid_argument(format!("reading {}: {e}", path.display())))?;
        let fixtures: Vec<ToolFixture> = serde_json::from_str(&body)?;
        for fixture in fixtures {
            let id = ToolId::parse(&fixture.id)?;
            registry.register(Tool {
                id: id.clone(),
                name: fixture.id.clone(),
                description: String::new(),
                input_schema: serde_json::json!({}),
                output_schema: None,
                embedding: Vector::new(vec![1.0, 0.0])?,
                success_stats: Default::default(),
                pure: fixture.pure,
                routing: if fixture.cloud { Routing::Cloud } else { Routing::Local },
                elevated: fixture.elevated,
            });
            invoker = invoker.with_result(id, fixture.result);
        }
    }

    Ok((Arc::new(registry), Arc::new(invoker)))
}
