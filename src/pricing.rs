// ── Model pricing & cost estimation ───────────────────────────────────────
// Carried near-verbatim from the teacher's `engine/pricing.rs::model_price`/
// `estimate_cost_usd` — the per-model USD-per-million-token table and the
// cache-aware cost formula are unrelated to anything spec-specific, just
// current list prices, so there's no reason to rederive them. The
// teacher's `classify_task_complexity` is dropped: spec's own `classifier`
// module (C5) replaces it with a different, source-aware algorithm.

use crate::atoms::types::ModelPrice;

pub fn model_price(model: &str) -> ModelPrice {
    let m = model.split('/').next_back().unwrap_or(model);
    match m {
        s if s.starts_with("claude-3-haiku") => ModelPrice { input: 0.25, output: 1.25 },
        s if s.starts_with("claude-haiku-4") => ModelPrice { input: 1.00, output: 5.00 },
        s if s.starts_with("claude-sonnet-4") || s.starts_with("claude-3-5-sonnet") || s.starts_with("claude-3-sonnet") => ModelPrice { input: 3.00, output: 15.00 },
        s if s.starts_with("claude-opus-4") || s.starts_with("claude-3-opus") => ModelPrice { input: 15.00, output: 75.00 },
        s if s.starts_with("gemini-3.1-pro") => ModelPrice { input: 2.50, output: 15.00 },
        s if s.starts_with("gemini-3-deep-think") => ModelPrice { input: 5.00, output: 25.00 },
        s if s.starts_with("gemini-3-flash") => ModelPrice { input: 0.20, output: 0.80 },
        s if s.starts_with("gemini-2.5-flash-lite") => ModelPrice { input: 0.05, output: 0.20 },
        s if s.starts_with("gemini-2.0-flash") || s.starts_with("gemini-2.5-flash") => ModelPrice { input: 0.15, output: 0.60 },
        s if s.starts_with("gemini-2.5-pro") || s.starts_with("gemini-1.5-pro") || s.starts_with("gemini-pro") => ModelPrice { input: 1.25, output: 10.00 },
        s if s.starts_with("gpt-4o-mini") || s.starts_with("gpt-4.1-mini") || s.starts_with("gpt-4.1-nano") => ModelPrice { input: 0.15, output: 0.60 },
        s if s.starts_with("gpt-4o") || s.starts_with("gpt-4.1") => ModelPrice { input: 2.50, output: 10.00 },
        s if s.starts_with("o4-mini") || s.starts_with("o3-mini") => ModelPrice { input: 1.10, output: 4.40 },
        s if s.starts_with("o3") || s.starts_with("o1") => ModelPrice { input: 10.00, output: 40.00 },
        s if s.starts_with("deepseek-chat") || s.starts_with("deepseek-v3") => ModelPrice { input: 0.27, output: 1.10 },
        s if s.starts_with("deepseek-reasoner") || s.starts_with("deepseek-r1") => ModelPrice { input: 0.55, output: 2.19 },
        _ => ModelPrice { input: 0.50, output: 2.00 },
    }
}

/// Estimates USD cost from token counts and model name. Cache-read tokens
/// are billed at 10% of the input rate, cache-creation tokens at 25%,
/// matching Anthropic prompt-caching economics; providers that don't
/// report cache tokens simply pass zero for both.
pub fn estimate_cost_usd(model: &str, input: u64, output: u64, cache_read: u64, cache_create: u64) -> f64 {
    let p = model_price(model);
    let regular_input = input.saturating_sub(cache_read + cache_create);
    let input_cost = (regular_input as f64 * p.input / 1_000_000.0) + (cache_read as f64 * p.input * 0.10 / 1_000_000.0) + (cache_create as f64 * p.input * 0.25 / 1_000_000.0);
    let output_cost = output as f64 * p.output / 1_000_000.0;
    input_cost + output_cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_provider_prefix() {
        let a = model_price("anthropic/claude-sonnet-4-20250514");
        let b = model_price("claude-sonnet-4-20250514");
        assert_eq!(a.input, b.input);
        assert_eq!(a.output, b.output);
    }

    #[test]
    fn unknown_model_falls_back_to_default_price() {
        let p = model_price("some-future-model-9000");
        assert_eq!(p.input, 0.50);
        assert_eq!(p.output, 2.00);
    }

    #[test]
    fn cache_read_tokens_billed_at_a_discount() {
        let full_price = estimate_cost_usd("gpt-4o", 1_000_000, 0, 0, 0);
        let cached = estimate_cost_usd("gpt-4o", 1_000_000, 0, 1_000_000, 0);
        assert!(cached < full_price);
        assert!((cached - full_price * 0.10).abs() < 1e-9);
    }
}
