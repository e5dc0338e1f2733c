//! Prompt composition: resolves a task's base prompt text, inlines
//! `{{include: <path>}}` directives (depth-bounded, cycle-checked), splices
//! in `{{output: <task>}}` artifacts from the current iteration's output
//! directory, wraps the result in the task's `prefix`/`suffix`, and injects
//! the per-iteration tokens (task id, agent id, iteration number, output
//! directory) every composed prompt carries.
//!
//! Follows a "resolve a prompt from a dictionary of named fragments" shape;
//! the include-depth/cycle bookkeeping is authored fresh against the bound
//! `ExecutorConfig::max_include_depth` provides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::models::task::{PromptSource, PromptSourceError, TaskSpec};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    PromptSource(#[from] PromptSourceError),

    #[error("failed to read prompt file '{path}': {source}")]
    ReadFailed { path: PathBuf, source: String },

    #[error("include '{0}' exceeds max include depth")]
    MaxDepthExceeded(PathBuf),

    #[error("circular include detected: {0}")]
    CircularInclude(String),

    #[error("unterminated '{{{{{0}' directive")]
    UnterminatedDirective(&'static str),
}

/// Per-iteration context a task's prompt is composed against.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub task_id: String,
    pub agent_id: String,
    pub iteration: u32,
    pub output_dir: PathBuf,
    /// Prior tasks' artifacts for this iteration, keyed by task name, as
    /// read from `{output_dir}/{task_name}.txt`.
    pub outputs: HashMap<String, String>,
    pub max_include_depth: u32,
}

/// Placeholder substituted for `{{output: <task>}}` when that task has no
/// artifact yet this iteration (never ran, or produced nothing).
const NO_OUTPUT_PLACEHOLDER: &str = "[no output]";

/// Resolves a task's base prompt text, then applies the directive pipeline
/// in order: includes, output substitution, prefix/suffix wrapping, token
/// injection.
pub struct PromptComposer<'a> {
    base_dir: &'a Path,
}

impl<'a> PromptComposer<'a> {
    /// `base_dir` anchors relative `prompt_file` and `{{include: ...}}`
    /// paths (the pipeline's working directory).
    pub fn new(base_dir: &'a Path) -> Self {
        Self { base_dir }
    }

    pub fn compose(&self, task: &TaskSpec, ctx: &PromptContext) -> Result<String, PromptError> {
        let base_text = match task.prompt_source()? {
            PromptSource::Inline(text) => text,
            PromptSource::File(path) => self.read_file(&self.resolve(&path))?,
        };

        let mut stack = Vec::new();
        let included = self.expand_includes(&base_text, 0, ctx.max_include_depth, &mut stack)?;
        let with_outputs = substitute_outputs(&included, &ctx.outputs);
        let wrapped = wrap(&with_outputs, task.prefix.as_deref(), task.suffix.as_deref());
        Ok(inject_tokens(&wrapped, ctx))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn read_file(&self, path: &Path) -> Result<String, PromptError> {
        std::fs::read_to_string(path).map_err(|e| PromptError::ReadFailed { path: path.to_path_buf(), source: e.to_string() })
    }

    /// Recursively inline every `{{include: <path>}}` directive found in
    /// `text`. `stack` holds the canonicalized paths of includes currently
    /// being expanded, so a file that (directly or transitively) includes
    /// itself is rejected rather than looping forever.
    fn expand_includes(
        &self,
        text: &str,
        depth: u32,
        max_depth: u32,
        stack: &mut Vec<PathBuf>,
    ) -> Result<String, PromptError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let Some(start) = rest.find("{{include:") else {
                out.push_str(rest);
                break;
            };
            out.push_str(&rest[..start]);
            let after_tag = &rest[start + "{{include:".len()..];
            let Some(end) = after_tag.find("}}") else {
                return Err(PromptError::UnterminatedDirective("include:"));
            };
            let raw_path = after_tag[..end].trim();
            let resolved = self.resolve(Path::new(raw_path));
            let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());

            if depth + 1 > max_depth {
                return Err(PromptError::MaxDepthExceeded(resolved));
            }
            if stack.contains(&canonical) {
                return Err(PromptError::CircularInclude(resolved.display().to_string()));
            }

            let included_text = self.read_file(&resolved)?;
            stack.push(canonical);
            let expanded = self.expand_includes(&included_text, depth + 1, max_depth, stack)?;
            stack.pop();
            out.push_str(&expanded);

            rest = &after_tag[end + "}}".len()..];
        }
        Ok(out)
    }
}

/// Replace every `{{output: <task>}}` with that task's artifact text (or
/// the stable "no output" placeholder). Not recursive: output artifacts are
/// inlined verbatim, never re-scanned for further directives.
fn substitute_outputs(text: &str, outputs: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(start) = rest.find("{{output:") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_tag = &rest[start + "{{output:".len()..];
        let Some(end) = after_tag.find("}}") else {
            out.push_str("{{output:");
            rest = after_tag;
            continue;
        };
        let task_name = after_tag[..end].trim();
        out.push_str(outputs.get(task_name).map_or(NO_OUTPUT_PLACEHOLDER, String::as_str));
        rest = &after_tag[end + "}}".len()..];
    }
    out
}

fn wrap(text: &str, prefix: Option<&str>, suffix: Option<&str>) -> String {
    let mut result = String::new();
    if let Some(prefix) = prefix {
        result.push_str(prefix);
    }
    result.push_str(text);
    if let Some(suffix) = suffix {
        result.push_str(suffix);
    }
    result
}

/// Final pass: literal token substitution for the per-iteration identifiers
/// every composed prompt carries.
fn inject_tokens(text: &str, ctx: &PromptContext) -> String {
    text.replace("{{task_id}}", &ctx.task_id)
        .replace("{{agent_id}}", &ctx.agent_id)
        .replace("{{iteration}}", &ctx.iteration.to_string())
        .replace("{{output_dir}}", &ctx.output_dir.display().to_string())
}
