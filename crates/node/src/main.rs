use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use stratus_core::{FunctionRegistry, JobId, Runtime, RuntimeConfig, RuntimeError, Workflow};

#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(about = "Distributed workflow execution engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stratus.toml", env = "STRATUS_CONFIG")]
    config: PathBuf,

    /// Override the number of workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow from a JSON file and print its result
    Run {
        /// Workflow definition
        workflow: PathBuf,

        /// Job name shown in logs
        #[arg(long, default_value = "cli")]
        name: String,
    },
    /// Print the effective configuration
    Info,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stratus=info,stratus_core=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = RuntimeConfig::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
        config.validate()?;
    }

    match args.command {
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run { workflow, name } => run(&config, &workflow, name).await,
    }
}

async fn run(config: &RuntimeConfig, path: &Path, name: String) -> Result<()> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read workflow {}", path.display()))?;
    let workflow = Workflow::decode(&content).context("Failed to parse workflow")?;

    tracing::info!("Starting Stratus with {} workers", config.workers);
    let runtime = Runtime::new(config, FunctionRegistry::new())?;

    let handle = runtime.submit(name, workflow).await;
    let job_id = handle.job_id();
    tracing::info!("Submitted job {}", job_id);

    let join = handle.join();
    tokio::pin!(join);
    let result = tokio::select! {
        result = &mut join => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling job {}", job_id);
            cancel_then_join(&runtime, &job_id, join).await
        }
    };

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    runtime.shutdown();
    Ok(())
}

/// Cancel the job and wait for its outcome. A job that finished before the
/// cancel landed keeps its own result.
async fn cancel_then_join<F>(runtime: &Runtime, job_id: &JobId, join: F) -> Result<Value, RuntimeError>
where
    F: Future<Output = Result<Value, RuntimeError>>,
{
    if let Err(error) = runtime.cancel(job_id).await {
        tracing::debug!("Job {} already finished: {}", job_id, error);
    }
    join.await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let args = Args::try_parse_from(["stratus", "--workers", "8", "run", "race.json"]).unwrap();
        assert_eq!(args.workers, Some(8));
        assert_eq!(args.config, PathBuf::from("stratus.toml"));
        match args.command {
            Command::Run { workflow, name } => {
                assert_eq!(workflow, PathBuf::from("race.json"));
                assert_eq!(name, "cli");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_workflow_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("workflow.json");
        let workflow = Workflow::parallel(vec![Workflow::ret(1), Workflow::ret(2)]);
        std::fs::write(&path, workflow.encode().unwrap()).unwrap();

        let config = RuntimeConfig {
            workers: 2,
            ..RuntimeConfig::default()
        };
        run(&config, &path, "test".to_string()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_after_completion_keeps_result() {
        let runtime = Runtime::local(1, FunctionRegistry::new());
        let handle = runtime.submit("finished", Workflow::ret(7)).await;
        let job_id = handle.job_id();
        while !handle.is_finished() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let value = cancel_then_join(&runtime, &job_id, handle.join()).await.unwrap();
        assert_eq!(value, serde_json::json!(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_cancels_running_job() {
        let runtime = Runtime::local(1, FunctionRegistry::new());
        let handle = runtime.submit("sleeping", Workflow::sleep(60_000)).await;
        let job_id = handle.job_id();

        let result = cancel_then_join(&runtime, &job_id, handle.join()).await;
        assert!(matches!(result, Err(RuntimeError::Cancelled(id)) if id == job_id));
    }
}
