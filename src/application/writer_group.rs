//! Prefixed writer group: multiplexes each running task's stdout/stderr
//! onto one shared terminal stream, each line prefixed with a colored,
//! right-padded task name so concurrent output stays attributable.
//!
//! Uses the `colored::Colorize` palette with `NO_COLOR`-respecting style;
//! the shared writer follows a "one mutex around a single `io::Write` sink"
//! shape, with a per-writer byte buffer so raw child-process output can be
//! pushed through it without the caller pre-splitting lines itself.

use std::io::{self, Write as _};
use std::sync::Arc;

use colored::{Color, Colorize};
use tokio::sync::Mutex;

const PALETTE: &[Color] =
    &[Color::Cyan, Color::Magenta, Color::Yellow, Color::Green, Color::Blue, Color::Red, Color::BrightCyan, Color::BrightMagenta];

/// Shared state behind every `PrefixedWriter` handed out by a `WriterGroup`:
/// the padding width (the longest registered task name) and a mutex around
/// the underlying sink so concurrent writers don't interleave mid-line.
struct Shared {
    sink: Mutex<Box<dyn io::Write + Send>>,
    prefix_width: usize,
}

/// Owns the shared sink and hands out one `PrefixedWriter` per task name.
#[derive(Clone)]
pub struct WriterGroup {
    shared: Arc<Shared>,
}

impl WriterGroup {
    /// `task_names` are used only to compute the shared padding width so
    /// every prefix lines up regardless of which task's output arrives
    /// first.
    pub fn new(task_names: &[impl AsRef<str>], sink: Box<dyn io::Write + Send>) -> Self {
        let prefix_width = task_names.iter().map(|n| n.as_ref().len()).max().unwrap_or(0);
        Self { shared: Arc::new(Shared { sink: Mutex::new(sink), prefix_width }) }
    }

    pub fn writer_for(&self, task_name: impl Into<String>) -> PrefixedWriter {
        let task_name = task_name.into();
        let color = PALETTE[task_name_hash(&task_name) % PALETTE.len()];
        PrefixedWriter { shared: self.shared.clone(), task_name, color, buffer: Mutex::new(Vec::new()) }
    }
}

fn task_name_hash(name: &str) -> usize {
    name.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
}

/// One task's handle onto the shared sink. Bytes pushed through `push`
/// accumulate in a private buffer; each complete line found is emitted to
/// the shared sink immediately, prefixed and flushed. Trailing bytes with
/// no terminator stay buffered until the next `push` or an explicit
/// `flush`, which emits them as one synthesized line.
pub struct PrefixedWriter {
    shared: Arc<Shared>,
    task_name: String,
    color: Color,
    buffer: Mutex<Vec<u8>>,
}

impl PrefixedWriter {
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Append raw bytes (no assumption they end on a line boundary).
    /// Emits one prefixed line per `\n` found; leftover bytes stay
    /// buffered.
    pub async fn push(&self, bytes: &[u8]) -> io::Result<()> {
        let mut buffer = self.buffer.lock().await;
        buffer.extend_from_slice(bytes);
        loop {
            let Some(pos) = buffer.iter().position(|&b| b == b'\n') else { break };
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.emit(&line).await?;
        }
        Ok(())
    }

    /// Emit any buffered bytes as one line with a synthesized terminator,
    /// then clear the buffer. A no-op if nothing is buffered.
    pub async fn flush(&self) -> io::Result<()> {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer).into_owned();
        buffer.clear();
        drop(buffer);
        self.emit(&line).await
    }

    /// Write one already-complete line (no trailing newline expected) to
    /// the shared sink, prefixed and flushed immediately. For callers that
    /// already have whole lines and don't need byte-level buffering.
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        self.emit(line).await
    }

    async fn emit(&self, line: &str) -> io::Result<()> {
        let padded = format!("{:<width$}", self.task_name, width = self.shared.prefix_width);
        let prefix = padded.color(self.color).bold();
        let mut sink = self.shared.sink.lock().await;
        writeln!(sink, "{prefix} | {line}")?;
        sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink(Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writer_prefixes_and_pads_to_the_longest_name() {
        colored::control::set_override(true);
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = WriterGroup::new(&["build", "lint-everything"], Box::new(VecSink(buf.clone())));
        let build = group.writer_for("build");
        build.write_line("ok").await.unwrap();

        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        let stripped = strip_ansi(&output);
        assert!(stripped.starts_with("build           | ok"), "got: {stripped:?}");
    }

    #[tokio::test]
    async fn two_writers_share_the_same_sink() {
        colored::control::set_override(false);
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = WriterGroup::new(&["a", "b"], Box::new(VecSink(buf.clone())));
        let wa = group.writer_for("a");
        let wb = group.writer_for("b");
        wa.write_line("one").await.unwrap();
        wb.write_line("two").await.unwrap();

        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("one"));
        assert!(output.contains("two"));
    }

    #[tokio::test]
    async fn push_splits_on_newlines_and_buffers_partial_tail() {
        colored::control::set_override(false);
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = WriterGroup::new(&["build"], Box::new(VecSink(buf.clone())));
        let writer = group.writer_for("build");

        writer.push(b"line one\nline tw").await.unwrap();
        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("line one"));
        assert!(!output.contains("line tw"), "partial trailing bytes must stay buffered");

        writer.push(b"o\n").await.unwrap();
        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("line two"));
    }

    #[tokio::test]
    async fn flush_emits_leftover_buffer_as_one_line() {
        colored::control::set_override(false);
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let group = WriterGroup::new(&["build"], Box::new(VecSink(buf.clone())));
        let writer = group.writer_for("build");

        writer.push(b"no newline yet").await.unwrap();
        assert!(buf.lock().unwrap().is_empty());

        writer.flush().await.unwrap();
        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("no newline yet"));

        writer.flush().await.unwrap();
        let len_after_first_flush = buf.lock().unwrap().len();
        writer.flush().await.unwrap();
        assert_eq!(buf.lock().unwrap().len(), len_after_first_flush, "flushing an empty buffer is a no-op");
    }

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            if c == '\u{1b}' {
                in_escape = true;
                continue;
            }
            if in_escape {
                if c == 'm' {
                    in_escape = false;
                }
                continue;
            }
            out.push(c);
        }
        out
    }
}
