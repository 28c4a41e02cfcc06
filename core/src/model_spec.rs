//! Model context-window lookup (folds in the otherwise-empty teacher
//! `model-spec-core` crate concept — here a simple in-process table rather
//! than a separate workspace member, since no source file for it was
//! available to adapt).

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Static facts about a model needed by the compaction budget check (§4.6)
/// and the adapter's request assembly (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_vision: bool,
}

static TABLE: Lazy<HashMap<&'static str, ModelSpec>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "gpt-4o",
        ModelSpec { context_window: 128_000, max_output_tokens: 16_384, supports_vision: true },
    );
    m.insert(
        "gpt-4o-mini",
        ModelSpec { context_window: 128_000, max_output_tokens: 16_384, supports_vision: true },
    );
    m.insert(
        "o1",
        ModelSpec { context_window: 200_000, max_output_tokens: 100_000, supports_vision: true },
    );
    m.insert(
        "claude-3-5-sonnet",
        ModelSpec { context_window: 200_000, max_output_tokens: 8_192, supports_vision: true },
    );
    m.insert(
        "claude-3-5-haiku",
        ModelSpec { context_window: 200_000, max_output_tokens: 8_192, supports_vision: false },
    );
    m.insert(
        "gemini-1.5-pro",
        ModelSpec { context_window: 2_000_000, max_output_tokens: 8_192, supports_vision: true },
    );
    m
});

/// Default used when a model id isn't in the table: conservative rather than
/// optimistic, so compaction triggers earlier instead of overflowing a
/// provider's real limit.
const FALLBACK: ModelSpec =
    ModelSpec { context_window: 32_000, max_output_tokens: 4_096, supports_vision: false };

pub fn lookup(model_id: &str) -> ModelSpec {
    TABLE.get(model_id).copied().unwrap_or(FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_returns_its_window() {
        assert_eq!(lookup("gpt-4o").context_window, 128_000);
    }

    #[test]
    fn unknown_model_falls_back_conservatively() {
        let spec = lookup("some-new-model-nobody-heard-of");
        assert_eq!(spec.context_window, FALLBACK.context_window);
    }
}
