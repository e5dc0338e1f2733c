//! swarmctl CLI entry point.
//!
//! Thin binary boundary: loads `AppConfig`, initializes logging, builds the
//! store/semaphore/runner adapters, and dispatches into either the
//! single-agent `IterationLoop` or the multi-task `PipelineExecutor`.
//! Pipeline/task descriptors are read and parsed here with plain
//! `serde_yaml` — the core only exposes the typed structs, this binary is
//! "whatever front-end supplies the bytes".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use swarmctl::application::agent_runner::ProcessCommandRunner;
use swarmctl::application::iteration_loop::IterationLoop;
use swarmctl::application::pipeline_executor::PipelineExecutor;
use swarmctl::application::writer_group::WriterGroup;
use swarmctl::domain::models::agent_record::AgentRecord;
use swarmctl::domain::models::pipeline::PipelineSpec;
use swarmctl::domain::models::task::TaskSpec;
use swarmctl::infrastructure::config::ConfigLoader;
use swarmctl::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};
use swarmctl::infrastructure::semaphore::FileSemaphore;
use swarmctl::infrastructure::store::StateStore;

#[derive(Parser)]
#[command(name = "swarmctl", version, about = "Execution substrate for long-running multi-step AI coding agent sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise a single agent through its configured iteration count.
    Agent(AgentArgs),
    /// Supervise a DAG pipeline through its configured iteration count.
    Pipeline(PipelineArgs),
}

#[derive(Parser)]
struct AgentArgs {
    /// Unique id to register this run under in the state store.
    #[arg(long)]
    id: String,
    /// Human-readable name stored on the record.
    #[arg(long)]
    name: String,
    /// Prompt text sent to the wrapped CLI every iteration.
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,
    /// File containing the prompt text.
    #[arg(long)]
    prompt_file: Option<PathBuf>,
    /// Model name substituted into `{model}` in `command`.
    #[arg(long, default_value = "sonnet")]
    model: String,
    /// Whitespace-separated program + args, with an optional `{model}` placeholder.
    #[arg(long)]
    command: String,
    /// Iteration cap; 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    iterations: u32,
    /// Working directory the child process runs in.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,
}

#[derive(Parser)]
struct PipelineArgs {
    /// Unique id to register this run's supervisor record under.
    #[arg(long)]
    id: String,
    /// Path to a YAML file declaring `tasks:` and `pipelines:`.
    #[arg(long)]
    file: PathBuf,
    /// Name of the pipeline (within `file`) to run.
    #[arg(long)]
    pipeline: String,
    /// Model name tasks fall back to when they set no override.
    #[arg(long, default_value = "sonnet")]
    model: String,
    /// Whitespace-separated program + args, with an optional `{model}` placeholder.
    #[arg(long)]
    command: String,
    /// Working directory every task runs in, and the base for relative
    /// `prompt_file`/`{{include: ...}}` paths.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,
}

/// On-disk shape of a pipeline descriptor file: a flat list of task
/// definitions plus the named pipelines that reference them by name.
#[derive(Debug, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    tasks: Vec<TaskSpec>,
    #[serde(default)]
    pipelines: Vec<PipelineSpec>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger = LoggerImpl::init(&log_config_from(&config.logging, &config.store.log_dir))
        .context("failed to initialize logging")?;

    match cli.command {
        Commands::Agent(args) => run_agent(args, &config).await,
        Commands::Pipeline(args) => run_pipeline(args, &config).await,
    }
}

async fn run_agent(args: AgentArgs, config: &swarmctl::AppConfig) -> Result<()> {
    let prompt = resolve_prompt(args.prompt, args.prompt_file)?;
    let store = StateStore::new(&config.store.path);
    let runner = Arc::new(ProcessCommandRunner::new());
    let loop_ = IterationLoop::new(store, runner, config.executor.clone(), config.pricing.clone());

    let log_file = format!("{}.log", args.id);
    let record = AgentRecord::new(
        &args.id,
        &args.name,
        std::process::id(),
        prompt,
        &args.model,
        &args.command,
        args.iterations,
        log_file,
        args.working_dir.display().to_string(),
        Utc::now(),
    );

    let finished = loop_.run(record).await.context("agent iteration loop failed")?;
    tracing::info!(agent_id = %finished.id, exit_reason = ?finished.exit_reason, "agent run finished");
    Ok(())
}

async fn run_pipeline(args: PipelineArgs, config: &swarmctl::AppConfig) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read pipeline file '{}'", args.file.display()))?;
    let file: PipelineFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse pipeline file '{}'", args.file.display()))?;

    let pipeline = file
        .pipelines
        .into_iter()
        .find(|p| p.name == args.pipeline)
        .ok_or_else(|| anyhow::anyhow!("no pipeline named '{}' in '{}'", args.pipeline, args.file.display()))?;
    let tasks: HashMap<String, TaskSpec> = file.tasks.into_iter().map(|t| (t.name.clone(), t)).collect();
    for name in &pipeline.tasks {
        if !tasks.contains_key(name) {
            bail!("pipeline '{}' names task '{name}' with no matching task definition", pipeline.name);
        }
    }

    let store = StateStore::new(&config.store.path);
    let semaphore = FileSemaphore::new(&config.semaphore.lock_dir, config.semaphore.retry_interval_ms);
    let runner = Arc::new(ProcessCommandRunner::new());
    let executor = PipelineExecutor::new(
        store,
        semaphore,
        runner,
        config.executor.clone(),
        config.semaphore.clone(),
        config.pricing.clone(),
        &config.store.output_root,
        &args.working_dir,
    );

    let mut task_names: Vec<&str> = pipeline.tasks.iter().map(String::as_str).collect();
    task_names.push("pipeline");
    let writer = WriterGroup::new(&task_names, Box::new(std::io::stdout()));

    let supervisor = AgentRecord::new(
        &args.id,
        &pipeline.name,
        std::process::id(),
        "",
        &args.model,
        &args.command,
        pipeline.iterations,
        format!("{}.log", args.id),
        args.working_dir.display().to_string(),
        Utc::now(),
    );

    let finished = executor.run(supervisor, pipeline, tasks, writer).await.context("pipeline execution failed")?;
    tracing::info!(agent_id = %finished.id, exit_reason = ?finished.exit_reason, "pipeline run finished");
    Ok(())
}

fn resolve_prompt(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    match (inline, file) {
        (Some(text), None) => Ok(text),
        (None, Some(path)) => {
            std::fs::read_to_string(&path).with_context(|| format!("failed to read prompt file '{}'", path.display()))
        }
        (None, None) => bail!("one of --prompt or --prompt-file is required"),
        (Some(_), Some(_)) => bail!("--prompt and --prompt-file are mutually exclusive"),
    }
}

fn log_config_from(logging: &swarmctl::domain::models::config::LoggingConfig, log_dir: &str) -> LogConfig {
    LogConfig {
        level: logging.level.clone(),
        format: if logging.format.eq_ignore_ascii_case("json") { LogFormat::Json } else { LogFormat::Pretty },
        log_dir: logging.log_to_file.then(|| PathBuf::from(log_dir)),
        enable_stdout: true,
        rotation: RotationPolicy::Daily,
        retention_days: i64::from(logging.retention_days),
    }
}
