//! Iteration loop: drives one supervised `AgentRecord` through up to
//! `iterations` runs of its prompt against a wrapped CLI, honoring
//! state-driven pause/resume/terminate and per-iteration/total timeouts,
//! and persisting cumulative usage after every iteration.
//!
//! Follows an "iterate, check cancellation, persist, repeat" shape,
//! narrowed to a single-agent contract rather than a multi-strategy
//! convergence search.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::agent_record::{AgentRecord, ExitReason, TerminateMode, TimeoutReason};
use crate::domain::models::config::{ExecutorConfig, PricingConfig};
use crate::domain::models::usage::UsageStats;
use crate::domain::ports::command_runner::{CommandOutcome, CommandRunner, CommandRunnerError, CommandSpec, RunningCommand};
use crate::infrastructure::store::file_store::{StateStore, StoreError};

use super::pricing::apply_fallback_pricing;

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why one iteration's command invocation ended.
enum IterationOutcome {
    Succeeded(CommandOutcome),
    /// A `CommandRunnerError`'s message, or a synthesized timeout message.
    Failed(String),
    TimedOut,
}

/// Drives a single agent through its configured iteration count. Holds no
/// per-run state itself; `run` takes ownership of the record for the
/// duration of the loop and returns the final persisted record.
pub struct IterationLoop {
    store: StateStore,
    runner: Arc<dyn CommandRunner>,
    config: ExecutorConfig,
    pricing: PricingConfig,
}

impl IterationLoop {
    pub fn new(store: StateStore, runner: Arc<dyn CommandRunner>, config: ExecutorConfig, pricing: PricingConfig) -> Self {
        Self { store, runner, config, pricing }
    }

    /// Run `record` to completion: registers it in the store, then drives
    /// iterations until an exit condition fires, persisting along the way.
    /// Returns the final terminated record.
    pub async fn run(&self, mut record: AgentRecord) -> Result<AgentRecord, LoopError> {
        self.store.register(record.clone()).await?;

        let total_deadline = if self.config.total_timeout_secs == 0 {
            None
        } else {
            Some(tokio::time::Instant::now() + Duration::from_secs(self.config.total_timeout_secs))
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

        let mut iteration = record.current_iteration.max(1);
        let exit_reason = loop {
            if !record.is_unbounded() && iteration > record.iterations {
                break ExitReason::Completed;
            }
            if total_timeout_fired(total_deadline) {
                record.timeout_reason = Some(TimeoutReason::Total);
                break ExitReason::Killed;
            }

            if let Some(latest) = self.store.get(&record.id).await? {
                self.adopt_external_changes(&mut record, &latest);
                if let Some(reason) = self.check_terminate_mode(&latest, iteration) {
                    break reason;
                }
                if latest.paused {
                    if let Some(reason) = self.wait_while_paused(&mut record, total_deadline).await? {
                        break reason;
                    }
                }
            }

            record.current_iteration = iteration;
            self.persist(&record).await?;

            let agent_id = format!("{}-iter{}-{}", record.id, iteration, Uuid::new_v4());
            let prompt = inject_iteration_tokens(&record.prompt, &agent_id, iteration);
            let spec = build_command_spec(&record, prompt);

            // Snapshot the record as of just before this iteration's command
            // starts; each usage update the CLI reports is already an
            // absolute running total for the iteration, not a delta, so the
            // callback replaces rather than accumulates (mirroring
            // `IterationOutcome::Succeeded`'s own `replace_with_totals` below
            // and `pipeline_executor`'s per-task `running` map).
            let iteration_base = record.clone();
            let store_for_callback = self.store.clone();
            let pricing_for_callback = self.pricing.clone();
            let outcome = self
                .run_one_iteration(spec, self.config.iteration_timeout_secs, move |usage| {
                    let live_record = live_usage_record(&iteration_base, &usage, &pricing_for_callback);
                    let store = store_for_callback.clone();
                    tokio::spawn(async move {
                        let _ = store.update(live_record).await;
                    });
                })
                .await;

            match outcome {
                IterationOutcome::Succeeded(result) => {
                    record.successful_iterations += 1;
                    record.usage.replace_with_totals(&result.usage);
                    apply_fallback_pricing(&mut record.usage, &record.model, &self.pricing);
                    if !result.succeeded {
                        record.last_error = Some(format!("command exited with code {:?}", result.exit_code));
                    }
                }
                IterationOutcome::Failed(message) => {
                    record.failed_iterations += 1;
                    record.last_error = Some(message);
                }
                IterationOutcome::TimedOut => {
                    record.failed_iterations += 1;
                    record.last_error = Some("timed out".to_string());
                    record.timeout_reason = Some(TimeoutReason::Iteration);
                    self.persist(&record).await?;
                    record.timeout_reason = None;
                }
            }
            self.persist(&record).await?;

            if interrupted.load(Ordering::SeqCst) {
                break ExitReason::Signal;
            }
            if total_timeout_fired(total_deadline) {
                record.timeout_reason = Some(TimeoutReason::Total);
                break ExitReason::Killed;
            }

            iteration += 1;
        };

        signal_task.abort();
        record.terminate(exit_reason, Utc::now());
        self.persist(&record).await?;
        Ok(record)
    }

    async fn run_one_iteration(
        &self,
        spec: CommandSpec,
        timeout_secs: u64,
        usage_callback: impl Fn(UsageStats) + Send + Sync + 'static,
    ) -> IterationOutcome {
        let mut running = match self.runner.spawn(spec).await {
            Ok(running) => running,
            Err(e) => return IterationOutcome::Failed(runner_error_message(&e)),
        };
        running.set_usage_callback(Arc::new(usage_callback));

        if timeout_secs == 0 {
            return match running.wait().await {
                Ok(outcome) => IterationOutcome::Succeeded(outcome),
                Err(e) => IterationOutcome::Failed(runner_error_message(&e)),
            };
        }

        tokio::select! {
            result = running.wait() => match result {
                Ok(outcome) => IterationOutcome::Succeeded(outcome),
                Err(e) => IterationOutcome::Failed(runner_error_message(&e)),
            },
            () = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                running.signal_term().await;
                tokio::select! {
                    result = running.wait() => match result {
                        Ok(outcome) => IterationOutcome::Succeeded(outcome),
                        Err(_) => IterationOutcome::TimedOut,
                    },
                    () = tokio::time::sleep(self.grace_period()) => {
                        running.kill().await;
                        IterationOutcome::TimedOut
                    }
                }
            }
        }
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.config.kill_grace_period_ms)
    }

    fn adopt_external_changes(&self, record: &mut AgentRecord, latest: &AgentRecord) {
        if latest.iterations != record.iterations {
            tracing::info!(agent_id = %record.id, old = record.iterations, new = latest.iterations, "iteration cap changed externally");
            record.iterations = latest.iterations;
        }
        if latest.model != record.model {
            tracing::info!(agent_id = %record.id, old = %record.model, new = %latest.model, "model changed externally");
            record.model.clone_from(&latest.model);
        }
        record.paused = latest.paused;
        record.terminate_mode = latest.terminate_mode;
    }

    /// Returns `Some(reason)` if `terminate_mode` demands an immediate exit
    /// at iteration `i`. The `after_iteration` gate is `i > 1`, per
    /// DESIGN.md's decision to read "after iteration" as "after the first
    /// completed one".
    fn check_terminate_mode(&self, record: &AgentRecord, i: u32) -> Option<ExitReason> {
        match record.terminate_mode {
            Some(TerminateMode::Immediate) => Some(ExitReason::Killed),
            Some(TerminateMode::AfterIteration) if i > 1 => Some(ExitReason::Killed),
            _ => None,
        }
    }

    /// Poll the record every `pause_poll_interval_ms` until `paused`
    /// clears, allowing an `immediate` terminate to wake the loop early.
    /// Returns `Some(reason)` if the wait ended in a terminal exit rather
    /// than a resume.
    async fn wait_while_paused(
        &self,
        record: &mut AgentRecord,
        total_deadline: Option<tokio::time::Instant>,
    ) -> Result<Option<ExitReason>, LoopError> {
        record.paused_at = Some(Utc::now());
        self.persist(record).await?;

        loop {
            if total_timeout_fired(total_deadline) {
                record.timeout_reason = Some(TimeoutReason::Total);
                return Ok(Some(ExitReason::Killed));
            }
            tokio::time::sleep(Duration::from_millis(self.config.pause_poll_interval_ms)).await;

            let Some(latest) = self.store.get(&record.id).await? else { continue };
            if matches!(latest.terminate_mode, Some(TerminateMode::Immediate)) {
                return Ok(Some(ExitReason::Killed));
            }
            if !latest.paused {
                record.paused = false;
                record.paused_at = None;
                self.adopt_external_changes(record, &latest);
                self.persist(record).await?;
                return Ok(None);
            }
        }
    }

    async fn persist(&self, record: &AgentRecord) -> Result<(), LoopError> {
        self.store.update(record.clone()).await?;
        Ok(())
    }
}

fn total_timeout_fired(deadline: Option<tokio::time::Instant>) -> bool {
    deadline.is_some_and(|d| tokio::time::Instant::now() >= d)
}

fn runner_error_message(err: &CommandRunnerError) -> String {
    err.to_string()
}

/// Build the record a mid-iteration usage callback should persist: `base`
/// with its usage replaced by the freshly reported `usage` (itself an
/// absolute running total, not a delta) and fallback pricing reapplied.
fn live_usage_record(base: &AgentRecord, usage: &UsageStats, pricing: &PricingConfig) -> AgentRecord {
    let mut live_record = base.clone();
    live_record.usage.replace_with_totals(usage);
    apply_fallback_pricing(&mut live_record.usage, &live_record.model, pricing);
    live_record
}

/// Injects the iteration-scoped tokens every composed prompt carries.
/// Task-graph-scoped tokens (`task_id`, `output_dir`) are the pipeline
/// executor's concern; the single-agent loop only ever has an iteration
/// number and a freshly generated agent id.
fn inject_iteration_tokens(prompt: &str, agent_id: &str, iteration: u32) -> String {
    prompt.replace("{{agent_id}}", agent_id).replace("{{iteration}}", &iteration.to_string())
}

/// Builds the child invocation from the record's `command` descriptor:
/// whitespace-separated program + args, with a `{model}` placeholder
/// substituted.
fn build_command_spec(record: &AgentRecord, prompt: String) -> CommandSpec {
    let resolved = record.command.replace("{model}", &record.model);
    let mut parts = resolved.split_whitespace();
    let program = parts.next().unwrap_or_default().to_string();
    let args = parts.map(str::to_string).collect();
    CommandSpec { program, args, working_dir: PathBuf::from(&record.working_dir), prompt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct ScriptedRunner {
        outcomes: Mutex<std::collections::VecDeque<Result<CommandOutcome, CommandRunnerError>>>,
    }

    struct ScriptedHandle {
        outcome: Option<Result<CommandOutcome, CommandRunnerError>>,
        usage_callback: Option<crate::domain::ports::command_runner::UsageCallback>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn spawn(&self, _spec: CommandSpec) -> Result<Box<dyn RunningCommand>, CommandRunnerError> {
            let outcome = self.outcomes.lock().await.pop_front().expect("scripted outcome available");
            Ok(Box::new(ScriptedHandle { outcome: Some(outcome), usage_callback: None }))
        }
    }

    #[async_trait]
    impl RunningCommand for ScriptedHandle {
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

        fn set_usage_callback(&mut self, callback: crate::domain::ports::command_runner::UsageCallback) {
            self.usage_callback = Some(callback);
        }
    }

    fn sample_record(iterations: u32) -> AgentRecord {
        AgentRecord::new("a1", "demo", 999, "hello {{iteration}}", "sonnet", "echo", iterations, "a1.log", "/tmp", Utc::now())
    }

    fn default_loop(store: StateStore, runner: Arc<dyn CommandRunner>) -> IterationLoop {
        IterationLoop::new(
            store,
            runner,
            ExecutorConfig { total_timeout_secs: 0, iteration_timeout_secs: 0, ..ExecutorConfig::default() },
            PricingConfig::default(),
        )
    }

    #[tokio::test]
    async fn runs_configured_iterations_and_terminates_completed() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(
                (0..3)
                    .map(|_| {
                        Ok(CommandOutcome {
                            succeeded: true,
                            exit_code: Some(0),
                            stdout_tail: String::new(),
                            stderr_tail: String::new(),
                            usage: UsageStats { input_tokens: 1, output_tokens: 1, cost_usd: 0.0, current_task: None },
                        })
                    })
                    .collect(),
            ),
        });
        let loop_ = default_loop(store, runner);

        let record = loop_.run(sample_record(3)).await.unwrap();
        assert_eq!(record.status, crate::domain::models::agent_record::AgentStatus::Terminated);
        assert_eq!(record.exit_reason, Some(ExitReason::Completed));
        assert_eq!(record.successful_iterations, 3);
        assert_eq!(record.failed_iterations, 0);
        assert_eq!(record.usage.input_tokens, 1);
    }

    #[tokio::test]
    async fn runner_error_counts_as_failed_iteration_and_continues() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(
                vec![
                    Err(CommandRunnerError::SpawnFailed("boom".into())),
                    Ok(CommandOutcome {
                        succeeded: true,
                        exit_code: Some(0),
                        stdout_tail: String::new(),
                        stderr_tail: String::new(),
                        usage: UsageStats::default(),
                    }),
                ]
                .into(),
            ),
        });
        let loop_ = default_loop(store, runner);

        let record = loop_.run(sample_record(2)).await.unwrap();
        assert_eq!(record.failed_iterations, 1);
        assert_eq!(record.successful_iterations, 1);
        assert_eq!(record.last_error.as_deref(), Some("failed to spawn command: boom"));
    }

    #[tokio::test]
    async fn immediate_terminate_stops_before_first_iteration_runs() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut record = sample_record(5);
        record.terminate_mode = Some(TerminateMode::Immediate);

        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner { outcomes: Mutex::new(std::collections::VecDeque::new()) });
        let loop_ = default_loop(store, runner);

        let finished = loop_.run(record.clone()).await.unwrap();
        assert_eq!(finished.exit_reason, Some(ExitReason::Killed));
        assert_eq!(finished.successful_iterations, 0);
    }

    #[test]
    fn live_usage_record_replaces_totals_and_applies_fallback_pricing() {
        let base = sample_record(3);
        let usage = UsageStats { input_tokens: 10, output_tokens: 20, cost_usd: 0.0, current_task: Some("writing".into()) };

        let live = live_usage_record(&base, &usage, &PricingConfig::default());

        assert_eq!(live.id, base.id);
        assert_eq!(live.usage.input_tokens, 10);
        assert_eq!(live.usage.output_tokens, 20);
        assert_eq!(live.usage.current_task.as_deref(), Some("writing"));
    }

    #[tokio::test]
    async fn usage_callback_persists_live_progress_mid_iteration() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(
                vec![Ok(CommandOutcome {
                    succeeded: true,
                    exit_code: Some(0),
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                    usage: UsageStats { input_tokens: 7, output_tokens: 9, cost_usd: 0.25, current_task: None },
                })]
                .into(),
            ),
        });
        let loop_ = default_loop(store.clone(), runner);

        let record = loop_.run(sample_record(1)).await.unwrap();

        // The callback fires synchronously inside the scripted `wait()` and
        // spawns a store write; give it a beat to land before asserting.
        for _ in 0..50 {
            if store.get(&record.id).await.unwrap().is_some_and(|r| r.usage.input_tokens == 7) {
                break;
            }
            tokio::task::yield_now().await;
        }

        let persisted = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(persisted.usage.input_tokens, 7);
        assert_eq!(persisted.usage.output_tokens, 9);
    }
}
