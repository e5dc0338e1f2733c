//! Cost recompute: translates cumulative token totals into a dollar figure
//! against the configured per-model price table.
//!
//! A price table keyed by model, used to derive cost from token counts for
//! the single `total_cost_usd` field `AgentRecord` carries. Per DESIGN.md's
//! decision on the pricing fallback, this is consulted only when the
//! runner-reported cost for an iteration is exactly `0.0` — a nonzero
//! CLI-reported cost always wins and is never overwritten.

use crate::domain::models::config::PricingConfig;
use crate::domain::models::usage::UsageStats;

/// Recompute `usage.cost_usd` from the price table when the runner reported
/// exactly `0.0`, leaving a nonzero reported cost untouched.
pub fn apply_fallback_pricing(usage: &mut UsageStats, model: &str, pricing: &PricingConfig) {
    if usage.cost_usd != 0.0 {
        return;
    }
    if let Some(estimated) = estimate_cost(usage, model, pricing) {
        usage.cost_usd = estimated;
    }
}

/// `$/token` cost for `usage`'s token counts under `model`'s price entry, or
/// `None` if the model isn't in the table.
fn estimate_cost(usage: &UsageStats, model: &str, pricing: &PricingConfig) -> Option<f64> {
    let price = pricing.models.get(model)?;
    let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * price.input_per_million;
    let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * price.output_per_million;
    Some(input_cost + output_cost)
}
