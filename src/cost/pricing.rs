//! Pricing tables - per-model rates with family fallback

use crate::provider::{models, ProviderKind};

/// USD per 1K tokens, input and output priced independently
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Applied when a model matches neither the catalog nor a known family
///
/// Deliberately conservative (top of the builtin catalog) so unknown
/// models over-bill rather than under-bill.
pub const DEFAULT_RATE: Rate = Rate {
    input_per_1k: 0.01,
    output_per_1k: 0.03,
};

const FAMILIES: &[(&str, Rate)] = &[
    (
        "claude-3-opus",
        Rate {
            input_per_1k: 0.015,
            output_per_1k: 0.075,
        },
    ),
    (
        "haiku",
        Rate {
            input_per_1k: 0.0008,
            output_per_1k: 0.004,
        },
    ),
    (
        "claude",
        Rate {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        },
    ),
    (
        "gpt-4o-mini",
        Rate {
            input_per_1k: 0.00015,
            output_per_1k: 0.0006,
        },
    ),
    (
        "gpt-4o",
        Rate {
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        },
    ),
    (
        "gpt-4",
        Rate {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
        },
    ),
    (
        "gpt-3.5",
        Rate {
            input_per_1k: 0.0005,
            output_per_1k: 0.0015,
        },
    ),
    (
        "embedding",
        Rate {
            input_per_1k: 0.00002,
            output_per_1k: 0.0,
        },
    ),
    (
        "llama",
        Rate {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        },
    ),
    (
        "mistral",
        Rate {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        },
    ),
    (
        "qwen",
        Rate {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        },
    ),
];

/// Look up the rate for a model
///
/// Exact catalog match first, then family substring match, then the
/// conservative default. Never fails.
pub fn rate_for(provider: ProviderKind, model: &str) -> Rate {
    if let Some(descriptor) = models::find(model) {
        if descriptor.provider == provider {
            return Rate {
                input_per_1k: descriptor.input_cost_per_1k,
                output_per_1k: descriptor.output_cost_per_1k,
            };
        }
    }

    // Local backends are free regardless of the model id
    if provider == ProviderKind::Ollama {
        return Rate {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        };
    }

    let lower = model.to_lowercase();
    for (family, rate) in FAMILIES {
        if lower.contains(family) {
            return *rate;
        }
    }

    DEFAULT_RATE
}

/// Price a call
pub fn calculate_cost(
    provider: ProviderKind,
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
) -> f64 {
    let rate = rate_for(provider, model);
    (input_tokens as f64 / 1000.0) * rate.input_per_1k
        + (output_tokens as f64 / 1000.0) * rate.output_per_1k
}
