//! Token/cost usage telemetry parsed from a running agent's output.

use serde::{Deserialize, Serialize};

/// A snapshot of cumulative usage for one agent invocation, as reported by
/// the wrapped CLI's own output. Fields only ever grow within one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in US dollars as reported by the CLI. `0.0` is treated as "not
    /// reported" by the pricing fallback (see `application::pricing`).
    /// Serialized as `total_cost_usd` to match the state-store's external
    /// field name for this column.
    #[serde(rename = "total_cost_usd")]
    pub cost_usd: f64,
    /// Free-form "what am I doing" hint surfaced by some CLIs.
    pub current_task: Option<String>,
}

impl UsageStats {
    /// Merge a fresher snapshot `other` into `self`, keeping the richer of
    /// the two `current_task` hints and summing token/cost deltas when
    /// `other` represents a delta rather than a running total.
    pub fn accumulate(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
        if other.current_task.is_some() {
            self.current_task.clone_from(&other.current_task);
        }
    }

    /// Replace with the latest absolute totals reported by the CLI.
    pub fn replace_with_totals(&mut self, totals: &Self) {
        self.input_tokens = totals.input_tokens;
        self.output_tokens = totals.output_tokens;
        self.cost_usd = totals.cost_usd;
        if totals.current_task.is_some() {
            self.current_task.clone_from(&totals.current_task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_sums_deltas() {
        let mut total = UsageStats::default();
        total.accumulate(&UsageStats { input_tokens: 10, output_tokens: 5, cost_usd: 0.01, current_task: None });
        total.accumulate(&UsageStats { input_tokens: 3, output_tokens: 2, cost_usd: 0.002, current_task: Some("writing tests".into()) });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
        assert!((total.cost_usd - 0.012).abs() < 1e-9);
        assert_eq!(total.current_task.as_deref(), Some("writing tests"));
    }

    #[test]
    fn replace_with_totals_overwrites() {
        let mut total = UsageStats { input_tokens: 100, output_tokens: 50, cost_usd: 1.0, current_task: None };
        total.replace_with_totals(&UsageStats { input_tokens: 120, output_tokens: 60, cost_usd: 1.2, current_task: None });
        assert_eq!(total.input_tokens, 120);
        assert_eq!(total.output_tokens, 60);
    }
}
