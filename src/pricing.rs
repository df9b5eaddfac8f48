//! Process-wide read-only pricing configuration: provider → model →
//! USD per 1M tokens. Loaded once, never mutated.

/// (model_id, input $/1M tokens, output $/1M tokens)
type PriceRow = (&'static str, f64, f64);

const OPENAI_STANDARD: &[PriceRow] = &[
    ("gpt-5.2", 1.75, 14.00),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5-nano", 0.05, 0.40),
];

const ANTHROPIC_BASE: &[PriceRow] = &[
    ("claude-sonnet-4-20250514", 3.00, 15.00),
    ("claude-haiku-4-5-20251001", 1.00, 5.00),
    ("claude-3-haiku-20240307", 0.25, 1.25),
];

const GEMINI_BASE: &[PriceRow] = &[("gemini-2.5-flash", 0.30, 2.50)];

/// Default model per provider, used when an unknown model id shows up in a
/// recorded run so cost stays an estimate instead of a hard failure.
const PROVIDER_DEFAULTS: &[(&str, &str)] = &[
    ("openai", "gpt-5.2"),
    ("anthropic", "claude-3-haiku-20240307"),
    ("gemini", "gemini-2.5-flash"),
];

fn table_for(provider: &str) -> &'static [PriceRow] {
    match provider {
        "openai" => OPENAI_STANDARD,
        "gemini" => GEMINI_BASE,
        _ => ANTHROPIC_BASE,
    }
}

/// Return (input $/1M, output $/1M) for a model, falling back to the
/// provider's default model when the id is unknown.
pub fn pricing_for(model_id: &str, provider: &str) -> (f64, f64) {
    let table = table_for(provider);
    if let Some((_, input, output)) = table.iter().find(|(id, _, _)| *id == model_id) {
        return (*input, *output);
    }
    let default_id = PROVIDER_DEFAULTS
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, id)| *id)
        .unwrap_or("claude-3-haiku-20240307");
    table
        .iter()
        .find(|(id, _, _)| *id == default_id)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((0.0, 0.0))
}

pub fn cost_usd(model_id: &str, provider: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_per_m, output_per_m) = pricing_for(model_id, provider);
    (input_tokens as f64 / 1_000_000.0) * input_per_m
        + (output_tokens as f64 / 1_000_000.0) * output_per_m
}

#[cfg(test)]
mod tests {
    use super::{cost_usd, pricing_for};

    #[test]
    fn known_model_uses_its_own_rates() {
        let (input, output) = pricing_for("gpt-5-nano", "openai");
        assert_eq!(input, 0.05);
        assert_eq!(output, 0.40);
    }

    #[test]
    fn unknown_model_falls_back_to_provider_default() {
        let (input, output) = pricing_for("gpt-6-preview", "openai");
        assert_eq!((input, output), (1.75, 14.00));

        let (input, output) = pricing_for("claude-unknown", "anthropic");
        assert_eq!((input, output), (0.25, 1.25));
    }

    #[test]
    fn cost_scales_per_million_tokens() {
        let cost = cost_usd("gemini-2.5-flash", "gemini", 1_000_000, 2_000_000);
        assert!((cost - (0.30 + 5.00)).abs() < 1e-9);
    }
}
