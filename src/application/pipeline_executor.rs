//! Pipeline executor: runs a task DAG once per configured iteration,
//! composing each task's prompt, launching it through the cross-process
//! semaphore and the agent runner, routing failures through conditional
//! edges instead of aborting the DAG, and persisting cumulative usage into
//! a supervisor `AgentRecord` after every scheduling step.
//!
//! Follows a "compute ready set, launch concurrently, drain, recompute"
//! loop shape, and reuses `application::iteration_loop`'s pause/terminate
//! protocol applied here at the iteration boundary rather than per CLI call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::agent_record::{AgentRecord, ExitReason, TerminateMode, TimeoutReason};
use crate::domain::models::config::{ExecutorConfig, PricingConfig, SemaphoreConfig};
use crate::domain::models::dag::{DagError, TaskDag};
use crate::domain::models::pipeline::PipelineSpec;
use crate::domain::models::task::{TaskSpec, TaskStatus};
use crate::domain::models::usage::UsageStats;
use crate::domain::ports::command_runner::{
    CommandOutcome, CommandRunner, CommandRunnerError, CommandSpec, OutputCallback, UsageCallback,
};
use crate::infrastructure::semaphore::file_semaphore::FileSemaphore;
use crate::infrastructure::store::file_store::{StateStore, StoreError};

use super::dag_engine::{DagEngine, DagEngineError, StatusTracker};
use super::pricing::apply_fallback_pricing;
use super::prompt_composer::{PromptComposer, PromptContext, PromptError};
use super::writer_group::WriterGroup;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    DagEngine(#[from] DagEngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pipeline '{0}' names task '{1}' with no matching task definition")]
    UnknownTaskDefinition(String, String),
}

/// Outcome of one DAG iteration, reported once the scheduling loop drains.
#[derive(Debug, Clone, Default)]
pub struct IterationSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

/// Result of running one task's single invocation.
enum TaskRunOutcome {
    Succeeded(CommandOutcome),
    Failed(String),
    TimedOut,
}

struct Inner {
    store: StateStore,
    semaphore: FileSemaphore,
    runner: Arc<dyn CommandRunner>,
    config: ExecutorConfig,
    semaphore_config: SemaphoreConfig,
    pricing: PricingConfig,
    output_root: PathBuf,
    base_dir: PathBuf,
}

/// Drives a pipeline's DAG through its configured iteration count. Cheap to
/// clone (an `Arc` around its fixed configuration) so a per-task future can
/// own a copy of it across a `tokio::spawn` boundary instead of borrowing.
#[derive(Clone)]
pub struct PipelineExecutor {
    inner: Arc<Inner>,
}

impl PipelineExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StateStore,
        semaphore: FileSemaphore,
        runner: Arc<dyn CommandRunner>,
        config: ExecutorConfig,
        semaphore_config: SemaphoreConfig,
        pricing: PricingConfig,
        output_root: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                semaphore,
                runner,
                config,
                semaphore_config,
                pricing,
                output_root: output_root.into(),
                base_dir: base_dir.into(),
            }),
        }
    }

    /// Run `pipeline` to completion against `tasks`, registering `supervisor`
    /// in the store and driving one DAG iteration at a time until an exit
    /// condition fires. The pipeline-wide model/command/working directory
    /// default to the supervisor record's own fields; a task's `model` is
    /// the only per-task override the task descriptor supports.
    pub async fn run(
        &self,
        mut supervisor: AgentRecord,
        pipeline: PipelineSpec,
        tasks: HashMap<String, TaskSpec>,
        writer: WriterGroup,
    ) -> Result<AgentRecord, ExecutorError> {
        self.inner.store.register(supervisor.clone()).await?;

        let dag = match build_dag(&pipeline, &tasks) {
            Ok(dag) => dag,
            Err(e) => {
                supervisor.terminate(ExitReason::Error, Utc::now());
                let _ = self.inner.store.update(supervisor.clone()).await;
                return Err(e);
            }
        };
        let engine = match DagEngine::new(dag) {
            Ok(engine) => engine,
            Err(e) => {
                supervisor.terminate(ExitReason::Error, Utc::now());
                let _ = self.inner.store.update(supervisor.clone()).await;
                return Err(e.into());
            }
        };

        let total_deadline = if self.inner.config.total_timeout_secs == 0 {
            None
        } else {
            Some(tokio::time::Instant::now() + Duration::from_secs(self.inner.config.total_timeout_secs))
        };

        let interrupted = Arc::new(AtomicBool::new(false));
        let signal_task = {
            let interrupted = interrupted.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupted.store(true, Ordering::SeqCst);
                }
            })
        };

        let mut cumulative = supervisor.usage.clone();
        let mut iteration = supervisor.current_iteration.max(1);

        let run_result: Result<ExitReason, ExecutorError> = 'outer: loop {
            if !pipeline.is_unbounded() && iteration > pipeline.iterations {
                break Ok(ExitReason::Completed);
            }
            if total_timeout_fired(total_deadline) {
                supervisor.timeout_reason = Some(TimeoutReason::Total);
                break Ok(ExitReason::Killed);
            }

            if let Some(latest) = self.inner.store.get(&supervisor.id).await? {
                adopt_external_changes(&mut supervisor, &latest);
                if let Some(reason) = check_terminate_mode(&latest, iteration) {
                    break Ok(reason);
                }
                if latest.paused {
                    match self.wait_while_paused(&mut supervisor, total_deadline).await {
                        Ok(Some(reason)) => break Ok(reason),
                        Ok(None) => {}
                        Err(e) => break Err(e.into()),
                    }
                }
            }

            supervisor.current_iteration = iteration;
            self.persist(&supervisor).await?;

            let run_id = format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), Uuid::new_v4());
            let output_dir = self.inner.output_root.join(&run_id);
            if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
                tracing::error!(run_id = %run_id, error = %e, "failed to create pipeline output directory");
            }
            tracing::info!(pipeline = %pipeline.name, iteration, run_id = %run_id, "starting DAG iteration");

            let summary = match self
                .run_dag_iteration(&engine, &pipeline, &tasks, &supervisor, &output_dir, iteration, &writer, &mut cumulative)
                .await
            {
                Ok(summary) => summary,
                Err(e) => break 'outer Err(e),
            };

            supervisor.usage.replace_with_totals(&cumulative);
            apply_fallback_pricing(&mut supervisor.usage, &supervisor.model, &self.inner.pricing);
            if summary.failed.is_empty() {
                supervisor.successful_iterations += 1;
            } else {
                supervisor.failed_iterations += 1;
                supervisor.last_error = Some(format!("tasks failed this iteration: {:?}", summary.failed));
            }
            self.persist(&supervisor).await?;

            tracing::info!(
                pipeline = %pipeline.name,
                iteration,
                succeeded = summary.succeeded.len(),
                failed = summary.failed.len(),
                skipped = summary.skipped.len(),
                "DAG iteration finished"
            );

            if interrupted.load(Ordering::SeqCst) {
                break Ok(ExitReason::Signal);
            }
            if total_timeout_fired(total_deadline) {
                supervisor.timeout_reason = Some(TimeoutReason::Total);
                break Ok(ExitReason::Killed);
            }

            iteration += 1;
        };

        signal_task.abort();

        match run_result {
            Ok(reason) => {
                supervisor.terminate(reason, Utc::now());
                self.persist(&supervisor).await?;
                Ok(supervisor)
            }
            Err(e) => {
                supervisor.terminate(ExitReason::Error, Utc::now());
                let _ = self.inner.store.update(supervisor.clone()).await;
                Err(e)
            }
        }
    }

    /// Drive one DAG iteration's scheduling loop to completion: repeatedly
    /// compute the ready set, launch it (chunked by the pipeline's advisory
    /// `parallelism` hint, staggered within a chunk), and await it before
    /// recomputing readiness, until every task reaches a terminal status.
    #[allow(clippy::too_many_arguments)]
    async fn run_dag_iteration(
        &self,
        engine: &DagEngine,
        pipeline: &PipelineSpec,
        tasks: &HashMap<String, TaskSpec>,
        supervisor: &AgentRecord,
        output_dir: &Path,
        iteration: u32,
        writer: &WriterGroup,
        cumulative: &mut UsageStats,
    ) -> Result<IterationSummary, ExecutorError> {
        let mut tracker = engine.new_tracker();
        let mut summary = IterationSummary::default();
        let running: Arc<Mutex<HashMap<String, UsageStats>>> = Arc::new(Mutex::new(HashMap::new()));
        let stagger = Duration::from_millis(self.inner.config.launch_stagger_ms);
        let chunk_size = pipeline.parallelism.filter(|&n| n > 0).unwrap_or(usize::MAX);

        loop {
            let step = engine.step(&mut tracker)?;
            for name in &step.skipped {
                writer.writer_for("pipeline").write_line(&format!("{name} skipped")).await.ok();
                summary.skipped.push(name.clone());
            }
            if step.done {
                break;
            }

            for chunk in step.ready.chunks(chunk_size) {
                for name in chunk {
                    tracker.set(name, TaskStatus::Running);
                }

                let mut handles = Vec::with_capacity(chunk.len());
                for (i, name) in chunk.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(stagger).await;
                    }
                    let executor = self.clone();
                    let task = tasks[name].clone();
                    let name = name.clone();
                    let running = running.clone();
                    let supervisor = supervisor.clone();
                    let output_dir = output_dir.to_path_buf();
                    let writer = writer.clone();
                    handles.push((
                        name.clone(),
                        tokio::spawn(async move { executor.run_task(name, task, supervisor, output_dir, iteration, writer, running).await }),
                    ));
                }

                for (name, handle) in handles {
                    let outcome = handle.await.unwrap_or(TaskOutcome {
                        status: TaskStatus::Failed,
                        usage: UsageStats::default(),
                        error: Some("task runtime panicked".to_string()),
                    });
                    running.lock().await.remove(&name);
                    cumulative.accumulate(&outcome.usage);
                    tracker.set(&name, outcome.status);
                    match outcome.status {
                        TaskStatus::Succeeded => summary.succeeded.push(name),
                        TaskStatus::Failed => {
                            if let Some(error) = &outcome.error {
                                writer.writer_for(&name).write_line(&format!("failed: {error}")).await.ok();
                            }
                            summary.failed.push(name);
                        }
                        other => unreachable!("task run only ever reports succeeded/failed, got {other:?}"),
                    }
                }

                let live_total = {
                    let guard = running.lock().await;
                    let mut total = cumulative.clone();
                    for usage in guard.values() {
                        total.accumulate(usage);
                    }
                    total
                };
                let mut live_record = supervisor.clone();
                live_record.usage.replace_with_totals(&live_total);
                apply_fallback_pricing(&mut live_record.usage, &supervisor.model, &self.inner.pricing);
                let _ = self.inner.store.update(live_record).await;
            }
        }

        Ok(summary)
    }

    /// Run one task's single invocation: acquire its semaphore slot, compose
    /// its prompt, run it through the agent runner, and release the slot.
    /// Never returns an `Err`; every failure mode (semaphore, prompt
    /// composition, runner, timeout) is folded into a `Failed` `TaskOutcome`
    /// so a single task's trouble never halts the DAG.
    async fn run_task(
        &self,
        name: String,
        task: TaskSpec,
        supervisor: AgentRecord,
        output_dir: PathBuf,
        iteration: u32,
        writer: WriterGroup,
        running: Arc<Mutex<HashMap<String, UsageStats>>>,
    ) -> TaskOutcome {
        let concurrency = task.concurrency.unwrap_or(self.inner.semaphore_config.default_concurrency);
        let permit = match self.inner.semaphore.acquire(&name, concurrency).await {
            Ok(permit) => permit,
            Err(e) => return failed(format!("semaphore acquire failed: {e}")),
        };

        let outputs = read_existing_outputs(&output_dir).await;
        let agent_id = format!("{name}-iter{iteration}-{}", Uuid::new_v4());
        let ctx = PromptContext {
            task_id: name.clone(),
            agent_id,
            iteration,
            output_dir: output_dir.clone(),
            outputs,
            max_include_depth: self.inner.config.max_include_depth,
        };

        let composer = PromptComposer::new(&self.inner.base_dir);
        let prompt = match composer.compose(&task, &ctx) {
            Ok(prompt) => prompt,
            Err(e) => {
                permit.release();
                return failed(prompt_error_message(&e));
            }
        };

        let model = task.model.clone().unwrap_or_else(|| supervisor.model.clone());
        let spec = build_task_command_spec(&supervisor, &model, prompt);

        let prefixed = Arc::new(writer.writer_for(&name));
        let output_callback: OutputCallback = {
            let prefixed = prefixed.clone();
            Arc::new(move |line: &str| {
                let prefixed = prefixed.clone();
                let line = line.to_string();
                tokio::spawn(async move {
                    let _ = prefixed.write_line(&line).await;
                });
            })
        };
        let usage_callback: UsageCallback = {
            let running = running.clone();
            let name = name.clone();
            Arc::new(move |usage: UsageStats| {
                let running = running.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    running.lock().await.insert(name, usage);
                });
            })
        };

        let outcome = self.run_one_task_invocation(spec, self.inner.config.iteration_timeout_secs, usage_callback, output_callback).await;
        let _ = prefixed.flush().await;
        permit.release();

        match outcome {
            TaskRunOutcome::Succeeded(result) => {
                if result.succeeded {
                    TaskOutcome { status: TaskStatus::Succeeded, usage: result.usage, error: None }
                } else {
                    TaskOutcome {
                        status: TaskStatus::Failed,
                        usage: result.usage,
                        error: Some(format!("command exited with code {:?}", result.exit_code)),
                    }
                }
            }
            TaskRunOutcome::Failed(message) => failed(message),
            TaskRunOutcome::TimedOut => failed("timed out".to_string()),
        }
    }

    async fn run_one_task_invocation(
        &self,
        spec: CommandSpec,
        timeout_secs: u64,
        usage_callback: UsageCallback,
        output_callback: OutputCallback,
    ) -> TaskRunOutcome {
        let mut running = match self.inner.runner.spawn(spec).await {
            Ok(running) => running,
            Err(e) => return TaskRunOutcome::Failed(e.to_string()),
        };
        running.set_usage_callback(usage_callback);
        running.set_output_callback(output_callback);

        if timeout_secs == 0 {
            return match running.wait().await {
                Ok(outcome) => TaskRunOutcome::Succeeded(outcome),
                Err(e) => TaskRunOutcome::Failed(runner_error_message(&e)),
            };
        }

        tokio::select! {
            result = running.wait() => match result {
                Ok(outcome) => TaskRunOutcome::Succeeded(outcome),
                Err(e) => TaskRunOutcome::Failed(runner_error_message(&e)),
            },
            () = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                running.signal_term().await;
                tokio::select! {
                    result = running.wait() => match result {
                        Ok(outcome) => TaskRunOutcome::Succeeded(outcome),
                        Err(_) => TaskRunOutcome::TimedOut,
                    },
                    () = tokio::time::sleep(self.grace_period()) => {
                        running.kill().await;
                        TaskRunOutcome::TimedOut
                    }
                }
            }
        }
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.inner.config.kill_grace_period_ms)
    }

    /// Poll the record every `pause_poll_interval_ms` until `paused` clears,
    /// allowing an `immediate` terminate to wake the loop early. Identical
    /// protocol to `IterationLoop::wait_while_paused`, applied here at the
    /// pipeline's iteration boundary.
    async fn wait_while_paused(
        &self,
        supervisor: &mut AgentRecord,
        total_deadline: Option<tokio::time::Instant>,
    ) -> Result<Option<ExitReason>, StoreError> {
        supervisor.paused_at = Some(Utc::now());
        self.persist(supervisor).await?;

        loop {
            if total_timeout_fired(total_deadline) {
                supervisor.timeout_reason = Some(TimeoutReason::Total);
                return Ok(Some(ExitReason::Killed));
            }
            tokio::time::sleep(Duration::from_millis(self.inner.config.pause_poll_interval_ms)).await;

            let Some(latest) = self.inner.store.get(&supervisor.id).await? else { continue };
            if matches!(latest.terminate_mode, Some(TerminateMode::Immediate)) {
                return Ok(Some(ExitReason::Killed));
            }
            if !latest.paused {
                supervisor.paused = false;
                supervisor.paused_at = None;
                adopt_external_changes(supervisor, &latest);
                self.persist(supervisor).await?;
                return Ok(None);
            }
        }
    }

    async fn persist(&self, supervisor: &AgentRecord) -> Result<(), StoreError> {
        self.inner.store.update(supervisor.clone()).await
    }
}

/// Outcome of running one task once, as reported back to the scheduling
/// loop. `status` is always `Succeeded` or `Failed`; `Skipped` is decided
/// exclusively by `DagEngine::apply_forced_skips`, never by a running task.
struct TaskOutcome {
    status: TaskStatus,
    usage: UsageStats,
    error: Option<String>,
}

fn failed(message: String) -> TaskOutcome {
    TaskOutcome { status: TaskStatus::Failed, usage: UsageStats::default(), error: Some(message) }
}

fn build_dag(pipeline: &PipelineSpec, tasks: &HashMap<String, TaskSpec>) -> Result<TaskDag, ExecutorError> {
    let mut edges = Vec::with_capacity(pipeline.tasks.len());
    for name in &pipeline.tasks {
        let task = tasks
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownTaskDefinition(pipeline.name.clone(), name.clone()))?;
        edges.push((name.clone(), task.dependencies()));
    }
    Ok(TaskDag::from_edges(edges)?)
}

/// Scan `output_dir` for `{task_name}.txt` artifacts left by prior tasks
/// this iteration, keyed by task name for `{{output: <task>}}` substitution.
async fn read_existing_outputs(output_dir: &Path) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    let Ok(mut entries) = tokio::fs::read_dir(output_dir).await else { return outputs };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            outputs.insert(stem.to_string(), contents);
        }
    }
    outputs
}

/// Builds a task's child invocation from the supervisor's `command`
/// descriptor (whitespace-separated program + args, with `{model}`
/// substituted by the task's resolved model), reusing the supervisor's
/// working directory for every task in the pipeline.
fn build_task_command_spec(supervisor: &AgentRecord, model: &str, prompt: String) -> CommandSpec {
    let resolved = supervisor.command.replace("{model}", model);
    let mut parts = resolved.split_whitespace();
    let program = parts.next().unwrap_or_default().to_string();
    let args = parts.map(str::to_string).collect();
    CommandSpec { program, args, working_dir: PathBuf::from(&supervisor.working_dir), prompt }
}

fn total_timeout_fired(deadline: Option<tokio::time::Instant>) -> bool {
    deadline.is_some_and(|d| tokio::time::Instant::now() >= d)
}

fn runner_error_message(err: &CommandRunnerError) -> String {
    err.to_string()
}

fn prompt_error_message(err: &PromptError) -> String {
    err.to_string()
}

fn adopt_external_changes(supervisor: &mut AgentRecord, latest: &AgentRecord) {
    if latest.iterations != supervisor.iterations {
        tracing::info!(agent_id = %supervisor.id, old = supervisor.iterations, new = latest.iterations, "iteration cap changed externally");
        supervisor.iterations = latest.iterations;
    }
    if latest.model != supervisor.model {
        tracing::info!(agent_id = %supervisor.id, old = %supervisor.model, new = %latest.model, "model changed externally");
        supervisor.model.clone_from(&latest.model);
    }
    supervisor.paused = latest.paused;
    supervisor.terminate_mode = latest.terminate_mode;
}

/// Returns `Some(reason)` if `terminate_mode` demands an immediate exit at
/// iteration `i`. The `after_iteration` gate is `i > 1`, same reading as
/// the single-agent loop's.
fn check_terminate_mode(supervisor: &AgentRecord, i: u32) -> Option<ExitReason> {
    match supervisor.terminate_mode {
        Some(TerminateMode::Immediate) => Some(ExitReason::Killed),
        Some(TerminateMode::AfterIteration) if i > 1 => Some(ExitReason::Killed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use tempfile::tempdir;

    struct ScriptedRunner {
        outcomes: Mutex<VecDeque<Result<CommandOutcome, CommandRunnerError>>>,
    }

    struct ScriptedHandle {
        outcome: Option<Result<CommandOutcome, CommandRunnerError>>,
        usage_callback: Option<UsageCallback>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn spawn(&self, _spec: CommandSpec) -> Result<Box<dyn crate::domain::ports::command_runner::RunningCommand>, CommandRunnerError> {
            let outcome = self.outcomes.lock().await.pop_front().expect("scripted outcome available");
            Ok(Box::new(ScriptedHandle { outcome: Some(outcome), usage_callback: None }))
        }
    }

    #[async_trait]
    impl crate::domain::ports::command_runner::RunningCommand for ScriptedHandle {
        fn pid(&self) -> Option<u32> {
            None
        }

        async fn wait(&mut self) -> Result<CommandOutcome, CommandRunnerError> {
            let outcome = self.outcome.take().expect("wait called once");
            if let (Ok(result), Some(callback)) = (&outcome, &self.usage_callback) {
                callback(result.usage.clone());
            }
            outcome
        }

        async fn signal_term(&mut self) {}
        async fn kill(&mut self) {}

        fn set_usage_callback(&mut self, callback: UsageCallback) {
            self.usage_callback = Some(callback);
        }
    }

    fn outcome(succeeded: bool, input_tokens: u64, output_tokens: u64) -> Result<CommandOutcome, CommandRunnerError> {
        Ok(CommandOutcome {
            succeeded,
            exit_code: Some(if succeeded { 0 } else { 1 }),
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            usage: UsageStats { input_tokens, output_tokens, cost_usd: 0.0, current_task: None },
        })
    }

    fn task(name: &str, depends_on: Vec<crate::domain::models::task::DependencySpec>) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            prompt: Some(format!("run {name}")),
            prompt_file: None,
            prompt_string: None,
            model: None,
            prefix: None,
            suffix: None,
            depends_on,
            concurrency: None,
        }
    }

    fn supervisor() -> AgentRecord {
        AgentRecord::new("sup1", "pipeline-demo", 123, "unused", "sonnet", "test-cli {model}", 1, "sup1.log", "/tmp", Utc::now())
    }

    fn executor(dir: &Path, runner: Arc<dyn CommandRunner>) -> PipelineExecutor {
        PipelineExecutor::new(
            StateStore::new(dir.join("state.json")),
            FileSemaphore::new(dir.join("locks"), 10),
            runner,
            ExecutorConfig { launch_stagger_ms: 0, iteration_timeout_secs: 0, total_timeout_secs: 0, ..ExecutorConfig::default() },
            SemaphoreConfig::default(),
            PricingConfig::default(),
            dir.join("outputs"),
            dir,
        )
    }

    struct NullSink;
    impl io::Write for NullSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn dep(source: &str) -> crate::domain::models::task::DependencySpec {
        crate::domain::models::task::DependencySpec::Name(source.to_string())
    }

    #[tokio::test]
    async fn linear_pipeline_one_iteration_completes() {
        let dir = tempdir().unwrap();
        let outcomes = VecDeque::from(vec![outcome(true, 1, 1), outcome(true, 1, 1)]);
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner { outcomes: Mutex::new(outcomes) });

        let exec = executor(dir.path(), runner);
        let pipeline = PipelineSpec { name: "p".into(), iterations: 1, tasks: vec!["a".into(), "b".into()], parallelism: None };
        let mut tasks = HashMap::new();
        tasks.insert("a".to_string(), task("a", vec![]));
        tasks.insert("b".to_string(), task("b", vec![dep("a")]));

        let writer = WriterGroup::new(&["a", "b", "pipeline"], Box::new(NullSink));
        let record = exec.run(supervisor(), pipeline, tasks, writer).await.unwrap();

        assert_eq!(record.status, crate::domain::models::agent_record::AgentStatus::Terminated);
        assert_eq!(record.exit_reason, Some(ExitReason::Completed));
        assert_eq!(record.successful_iterations, 1);
        assert_eq!(record.failed_iterations, 0);
        assert_eq!(record.usage.input_tokens, 2);
        assert_eq!(record.usage.output_tokens, 2);
    }

    #[tokio::test]
    async fn failure_edge_routes_around_failed_task() {
        let dir = tempdir().unwrap();
        // "a" runs alone first (b/c both wait on it); once it fails, "c" is
        // forced-skipped and only "b" (the `failure`-edge task) becomes ready.
        let outcomes = VecDeque::from(vec![outcome(false, 0, 0), outcome(true, 1, 1)]);
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner { outcomes: Mutex::new(outcomes) });

        let exec = executor(dir.path(), runner);
        let pipeline =
            PipelineSpec { name: "p".into(), iterations: 1, tasks: vec!["a".into(), "b".into(), "c".into()], parallelism: None };
        let mut tasks = HashMap::new();
        tasks.insert("a".to_string(), task("a", vec![]));
        tasks.insert(
            "b".to_string(),
            task(
                "b",
                vec![crate::domain::models::task::DependencySpec::Explicit {
                    task: "a".into(),
                    condition: crate::domain::models::task::EdgeCondition::Failure,
                }],
            ),
        );
        tasks.insert("c".to_string(), task("c", vec![dep("a")]));

        let writer = WriterGroup::new(&["a", "b", "c", "pipeline"], Box::new(NullSink));
        let record = exec.run(supervisor(), pipeline, tasks, writer).await.unwrap();

        assert_eq!(record.failed_iterations, 1);
        assert_eq!(record.exit_reason, Some(ExitReason::Completed));
    }

    #[tokio::test]
    async fn cyclic_pipeline_is_rejected_before_any_task_runs() {
        let dir = tempdir().unwrap();
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner { outcomes: Mutex::new(VecDeque::new()) });
        let exec = executor(dir.path(), runner);
        let pipeline = PipelineSpec { name: "p".into(), iterations: 1, tasks: vec!["a".into(), "b".into()], parallelism: None };
        let mut tasks = HashMap::new();
        tasks.insert("a".to_string(), task("a", vec![dep("b")]));
        tasks.insert("b".to_string(), task("b", vec![dep("a")]));

        let writer = WriterGroup::new(&["a", "b"], Box::new(NullSink));
        let err = exec.run(supervisor(), pipeline, tasks, writer).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Dag(DagError::CycleDetected(_))));
    }

    #[tokio::test]
    async fn unknown_task_in_pipeline_list_is_rejected() {
        let dir = tempdir().unwrap();
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner { outcomes: Mutex::new(VecDeque::new()) });
        let exec = executor(dir.path(), runner);
        let pipeline = PipelineSpec { name: "p".into(), iterations: 1, tasks: vec!["ghost".into()], parallelism: None };
        let writer = WriterGroup::new(&["ghost"], Box::new(NullSink));
        let err = exec.run(supervisor(), pipeline, HashMap::new(), writer).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownTaskDefinition(_, name) if name == "ghost"));
    }
}
