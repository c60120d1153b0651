use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dagflow_core::{EngineConfig, Orchestrator, WorkflowDefinition, WorkflowId};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "dagflow")]
#[command(about = "Register and execute DAG workflows", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dagflow.toml", env = "DAGFLOW_CONFIG")]
    config: PathBuf,

    /// Data directory for storage
    #[arg(short, long, default_value = "./data", env = "DAGFLOW_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the workflow described by a TOML definition file
    Register { definition: PathBuf },

    /// Execute a registered workflow and print its sink results
    Run {
        workflow_id: String,

        /// Cancel the run if it has not finished after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print a workflow's operators, edges and execution order
    Inspect { workflow_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagflow=info,dagflow_core=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("Data directory: {}", args.data_dir.display());

    let config = EngineConfig::load(&args.config, args.data_dir)?;
    let orchestrator = Orchestrator::from_config(&config).await?;

    match args.command {
        Command::Register { definition } => register(&orchestrator, definition).await,
        Command::Run {
            workflow_id,
            timeout_secs,
        } => run(&orchestrator, workflow_id.into(), timeout_secs).await,
        Command::Inspect { workflow_id } => inspect(&orchestrator, workflow_id.into()).await,
    }
}

async fn register(orchestrator: &Orchestrator, path: PathBuf) -> Result<()> {
    let definition = WorkflowDefinition::load(&path)?;
    orchestrator
        .register_definition(&definition)
        .await
        .with_context(|| format!("Failed to register {}", path.display()))?;
    println!("registered {}", definition.id);
    Ok(())
}

async fn run(
    orchestrator: &Orchestrator,
    workflow_id: WorkflowId,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let token = CancellationToken::new();
    let watchdog = spawn_watchdog(token.clone(), timeout_secs);

    let outcome = orchestrator
        .execute_workflow_with_cancellation(workflow_id.clone(), token)
        .await;
    watchdog.abort();
    let results = outcome.with_context(|| format!("Workflow {} failed", workflow_id))?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Cancel `token` on Ctrl-C or once `timeout_secs` elapse
fn spawn_watchdog(token: CancellationToken, timeout_secs: Option<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match timeout_secs {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        tracing::warn!(secs, "Run deadline reached, cancelling");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("Interrupted, cancelling");
                    }
                }
            }
            None => {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling");
                }
            }
        }
        token.cancel();
    })
}

async fn inspect(orchestrator: &Orchestrator, workflow_id: WorkflowId) -> Result<()> {
    let workflow = orchestrator.load_workflow(workflow_id).await?;

    let name = |vertex: usize| {
        workflow
            .operator_at(vertex)
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("#{}", vertex))
    };

    let order = match workflow.graph.topological_order() {
        Ok(order) => serde_json::json!(order.into_iter().map(name).collect::<Vec<_>>()),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    let edges: Vec<_> = workflow
        .graph
        .edges()
        .into_iter()
        .map(|(from, to)| [name(from), name(to)])
        .collect();

    let report = serde_json::json!({
        "id": workflow.id,
        "registered_at": workflow.registered_at,
        "operators": workflow.operator_index,
        "edges": edges,
        "sinks": workflow.graph.sinks().into_iter().map(name).collect::<Vec<_>>(),
        "order": order,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args =
            Args::try_parse_from(["dagflow", "run", "wf001", "--timeout-secs", "5"]).unwrap();
        assert_eq!(args.config, PathBuf::from("dagflow.toml"));
        match args.command {
            Command::Run {
                workflow_id,
                timeout_secs,
            } => {
                assert_eq!(workflow_id, "wf001");
                assert_eq!(timeout_secs, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_register_with_data_dir() {
        let args = Args::try_parse_from([
            "dagflow",
            "--data-dir",
            "/tmp/flows",
            "register",
            "demos/sum.toml",
        ])
        .unwrap();
        assert_eq!(args.data_dir, PathBuf::from("/tmp/flows"));
        assert!(matches!(args.command, Command::Register { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_cancels_at_deadline() {
        let token = CancellationToken::new();
        let watchdog = spawn_watchdog(token.clone(), Some(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert!(watchdog.await.is_ok());
    }

    #[tokio::test]
    async fn test_aborted_watchdog_leaves_token_alone() {
        let token = CancellationToken::new();
        let watchdog = spawn_watchdog(token.clone(), None);

        watchdog.abort();
        assert!(watchdog.await.unwrap_err().is_cancelled());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_register_then_inspect_and_run() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let definition = temp_dir.path().join("sum.toml");
        std::fs::write(
            &definition,
            r#"
            id = "sum"
            dependencies = [["a", "c"], ["b", "c"]]

            [[operators]]
            id = "a"
            executable = { kind = "expression", expr = { const = 1 } }

            [[operators]]
            id = "b"
            executable = { kind = "expression", expr = { const = 2 } }

            [[operators]]
            id = "c"
            executable = { kind = "expression", expr = "sum_inputs" }
            "#,
        )
        .unwrap();

        let config = EngineConfig::load(
            &temp_dir.path().join("dagflow.toml"),
            temp_dir.path().join("data"),
        )
        .unwrap();
        let orchestrator = Orchestrator::from_config(&config).await.unwrap();

        register(&orchestrator, definition).await.unwrap();
        inspect(&orchestrator, "sum".into()).await.unwrap();
        run(&orchestrator, "sum".into(), Some(30)).await.unwrap();
        assert!(inspect(&orchestrator, "missing".into()).await.is_err());
    }
}
