//! Agent runner: the real `CommandRunner` that spawns a coding-agent CLI as
//! a child process, feeds it a prompt on stdin, and enforces the process
//! group kill discipline a long-running agent needs (graceful signal, grace
//! period, then a hard kill of the whole group).
//!
//! Follows a spawn/stdin-write/stdout-drain/timeout shape, and a
//! graceful-then-forced kill sequence for the child process group. `nix`'s
//! `process`/`signal` features back the group-kill half of this module (see
//! DESIGN.md for why process groups are used here).

use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::domain::models::usage::UsageStats;
use crate::domain::ports::command_runner::{
    CommandOutcome, CommandRunner, CommandRunnerError, CommandSpec, OutputCallback, RunningCommand,
    UsageCallback,
};

/// How many trailing lines of stdout/stderr to retain for `last_error`
/// reporting and writer-group display.
const TAIL_LINES: usize = 200;

/// Spawns a real child process per iteration via `tokio::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn spawn(&self, spec: CommandSpec) -> Result<Box<dyn RunningCommand>, CommandRunnerError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        new_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandRunnerError::ProgramNotFound(spec.program.clone())
            } else {
                CommandRunnerError::SpawnFailed(e.to_string())
            }
        })?;

        let pid = child.id();

        let mut stdin = child.stdin.take().ok_or_else(|| CommandRunnerError::SpawnFailed("no stdin handle".into()))?;
        stdin.write_all(spec.prompt.as_bytes()).await.map_err(|e| CommandRunnerError::StdinWriteFailed(e.to_string()))?;
        drop(stdin);

        Ok(Box::new(ProcessHandle {
            child: Some(child),
            pid,
            terminating: false,
            usage_callback: None,
            output_callback: None,
        }))
    }
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt as _;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

struct ProcessHandle {
    child: Option<Child>,
    pid: Option<u32>,
    terminating: bool,
    usage_callback: Option<UsageCallback>,
    output_callback: Option<OutputCallback>,
}

#[async_trait]
impl RunningCommand for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<CommandOutcome, CommandRunnerError> {
        let mut child = self.child.take().ok_or_else(|| CommandRunnerError::WaitFailed("already awaited".into()))?;

        let stdout = child.stdout.take().ok_or_else(|| CommandRunnerError::WaitFailed("no stdout handle".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| CommandRunnerError::WaitFailed("no stderr handle".into()))?;

        let usage_callback = self.usage_callback.clone();
        let output_callback = self.output_callback.clone();
        let stdout_task = tokio::spawn(drain_tail_streaming(stdout, usage_callback, output_callback));
        let stderr_task = tokio::spawn(drain_tail(stderr));

        let status = child.wait().await.map_err(|e| CommandRunnerError::WaitFailed(e.to_string()))?;
        let (stdout_tail, streamed_usage) =
            stdout_task.await.map_err(|e| CommandRunnerError::WaitFailed(e.to_string()))?;
        let stderr_tail = stderr_task.await.map_err(|e| CommandRunnerError::WaitFailed(e.to_string()))?;

        let usage = if streamed_usage == UsageStats::default() {
            parse_usage_from_output(&stdout_tail)
        } else {
            streamed_usage
        };

        Ok(CommandOutcome {
            succeeded: status.success(),
            exit_code: status.code(),
            stdout_tail,
            stderr_tail,
            usage,
        })
    }

    async fn signal_term(&mut self) {
        if self.terminating {
            return;
        }
        self.terminating = true;
        if let Some(pid) = self.pid {
            let _ = signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGTERM);
        }
    }

    async fn kill(&mut self) {
        if let Some(pid) = self.pid {
            if signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL).is_err() {
                kill_descendants(pid);
            }
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }

    fn set_usage_callback(&mut self, callback: UsageCallback) {
        self.usage_callback = Some(callback);
    }

    fn set_output_callback(&mut self, callback: OutputCallback) {
        self.output_callback = Some(callback);
    }
}

/// Read every line from `reader` and keep only the last `TAIL_LINES` of
/// them, joined back into one string.
async fn drain_tail(reader: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = std::collections::VecDeque::with_capacity(TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Like `drain_tail`, but additionally parses each line for a fresh usage
/// update (invoking `usage_callback` immediately when one is found, at
/// whatever frequency the child emits them) and mirrors every line through
/// `output_callback` as it arrives. Returns the tail alongside the last
/// usage observed, so `wait` can fall back to a post-hoc tail scan if the
/// stream never carried one.
async fn drain_tail_streaming(
    reader: impl tokio::io::AsyncRead + Unpin,
    usage_callback: Option<UsageCallback>,
    output_callback: Option<OutputCallback>,
) -> (String, UsageStats) {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = std::collections::VecDeque::with_capacity(TAIL_LINES);
    let mut last_usage = UsageStats::default();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(callback) = &output_callback {
            callback(&line);
        }
        if let Some(usage) = parse_usage_line(&line) {
            last_usage = usage.clone();
            if let Some(callback) = &usage_callback {
                callback(usage);
            }
        }
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    (tail.into_iter().collect::<Vec<_>>().join("\n"), last_usage)
}

/// Parse one line as a JSON object carrying `usage`/`cost_usd`-shaped
/// fields, returning `None` unless it actually contains nonzero usage.
fn parse_usage_line(line: &str) -> Option<UsageStats> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value = serde_json::from_str::<serde_json::Value>(trimmed).ok()?;
    let input_tokens = value
        .pointer("/usage/input_tokens")
        .or_else(|| value.pointer("/input_tokens"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    let output_tokens = value
        .pointer("/usage/output_tokens")
        .or_else(|| value.pointer("/output_tokens"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    let cost_usd = value
        .get("total_cost_usd")
        .or_else(|| value.get("cost_usd"))
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    if input_tokens > 0 || output_tokens > 0 || cost_usd > 0.0 {
        Some(UsageStats { input_tokens, output_tokens, cost_usd, current_task: None })
    } else {
        None
    }
}

/// Best-effort extraction of usage/cost fields from a CLI's buffered output
/// tail, scanning from the end. Fallback for when the live stream never
/// carried a parseable usage line (e.g. it only appears once, right before
/// the tail window was filled).
fn parse_usage_from_output(output: &str) -> UsageStats {
    output.lines().rev().find_map(parse_usage_line).unwrap_or_default()
}

/// Fallback for when killing the process group itself failed (e.g. we're
/// not its group leader): walk `/proc` for children of `pid`, depth-first,
/// killing leaves before their parents so a reparented child never survives
/// its supervisor.
#[cfg(target_os = "linux")]
fn kill_descendants(pid: u32) {
    let mut stack = vec![pid];
    let mut order = Vec::new();
    while let Some(current) = stack.pop() {
        order.push(current);
        for child in direct_children(current) {
            stack.push(child);
        }
    }
    for pid in order.into_iter().rev() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(target_os = "linux")]
fn direct_children(pid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else { return Vec::new() };
    let mut children = Vec::new();
    for entry in entries.flatten() {
        let Ok(candidate) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
        let stat_path = entry.path().join("stat");
        let Ok(stat) = std::fs::read_to_string(stat_path) else { continue };
        if let Some(ppid) = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().nth(1)) {
            if ppid.parse::<u32>() == Ok(pid) {
                children.push(candidate);
            }
        }
    }
    children
}

#[cfg(not(target_os = "linux"))]
fn kill_descendants(_pid: u32) {}
