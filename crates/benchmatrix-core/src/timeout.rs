//! Per-item generation deadline policy.
//!
//! The deadline is a pure function of model size, backend and precision tier
//! so that a run's stored plan is enough to reproduce every timeout it used.

use crate::model::BackendId;

/// Lowest deadline ever handed out.
pub const TIMEOUT_FLOOR_MS: u64 = 60_000;
/// Highest deadline ever handed out.
pub const TIMEOUT_CEILING_MS: u64 = 1_800_000;
/// Base allowance when the caller does not override it.
pub const DEFAULT_BASE_MS: u64 = 120_000;
/// Added once per started block of ten billion parameters.
pub const PER_10B_INCREMENT_MS: u64 = 60_000;
/// Models at or above this size get the flat large-model buffer.
pub const LARGE_MODEL_THRESHOLD_B: f64 = 30.0;
pub const LARGE_MODEL_BUFFER_MS: u64 = 120_000;
/// Multiplier for unquantized or near-unquantized weights.
pub const HIGH_PRECISION_FACTOR: f64 = 1.5;

const GOOSE_OVERHEAD_MS: u64 = 60_000;
const OPENCODE_BASE_OVERHEAD_MS: u64 = 30_000;
const OPENCODE_PER_10B_OVERHEAD_MS: u64 = 15_000;

// Anything larger is already pinned to the ceiling; capping keeps the
// integer arithmetic below from overflowing on absurd inputs.
const MAX_PARAMETERS_B: f64 = 100_000.0;

const HIGH_PRECISION_MARKERS: &[&str] = &["fp16", "bf16", "fp32", "f16", "f32", "q8_0"];

/// Compute the generation deadline in milliseconds.
///
/// `precision_tag` is usually the model name (or just its tag); it only
/// matters whether it names a high-precision numeric format. Non-finite or
/// negative parameter counts are treated as zero (or the cap, for `+inf`).
pub fn timeout_ms(
    parameters_b: f64,
    backend: BackendId,
    user_base_ms: Option<u64>,
    precision_tag: Option<&str>,
) -> u64 {
    let params = normalize_parameters(parameters_b);
    let blocks = (params / 10.0).ceil() as u64;

    let base = user_base_ms.unwrap_or(DEFAULT_BASE_MS);
    let size_term = blocks * PER_10B_INCREMENT_MS;
    let backend_term = backend_overhead_ms(backend, blocks);
    let large_term = if params >= LARGE_MODEL_THRESHOLD_B {
        LARGE_MODEL_BUFFER_MS
    } else {
        0
    };

    let mut total = base
        .saturating_add(size_term)
        .saturating_add(backend_term)
        .saturating_add(large_term);

    if precision_tag.is_some_and(is_high_precision) {
        total = (total as f64 * HIGH_PRECISION_FACTOR).round() as u64;
    }

    total.clamp(TIMEOUT_FLOOR_MS, TIMEOUT_CEILING_MS)
}

fn normalize_parameters(parameters_b: f64) -> f64 {
    if parameters_b.is_nan() || parameters_b <= 0.0 {
        0.0
    } else {
        parameters_b.min(MAX_PARAMETERS_B)
    }
}

fn backend_overhead_ms(backend: BackendId, blocks: u64) -> u64 {
    match backend {
        BackendId::Ollama => 0,
        BackendId::Goose => GOOSE_OVERHEAD_MS,
        // The attached server warms the model itself, which costs more the
        // bigger the model is.
        BackendId::Opencode => OPENCODE_BASE_OVERHEAD_MS + blocks * OPENCODE_PER_10B_OVERHEAD_MS,
    }
}

/// Whether a model name or tag names an unquantized/near-unquantized format.
pub fn is_high_precision(tag: &str) -> bool {
    let tag = tag.to_lowercase();
    HIGH_PRECISION_MARKERS.iter().any(|m| tag.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_model_on_ollama() {
        // 7B → one block
        assert_eq!(timeout_ms(7.0, BackendId::Ollama, None, None), 180_000);
    }

    #[test]
    fn blocks_round_up() {
        let at_10 = timeout_ms(10.0, BackendId::Ollama, None, None);
        let at_10_1 = timeout_ms(10.1, BackendId::Ollama, None, None);
        assert_eq!(at_10_1 - at_10, PER_10B_INCREMENT_MS);
    }

    #[test]
    fn opencode_overhead_scales_with_size() {
        let small = timeout_ms(7.0, BackendId::Opencode, None, None);
        let medium = timeout_ms(14.0, BackendId::Opencode, None, None);
        assert_eq!(small, 120_000 + 60_000 + 30_000 + 15_000);
        assert_eq!(medium - small, PER_10B_INCREMENT_MS + OPENCODE_PER_10B_OVERHEAD_MS);
    }

    #[test]
    fn goose_overhead_is_flat() {
        let ollama = timeout_ms(7.0, BackendId::Ollama, None, None);
        let goose = timeout_ms(7.0, BackendId::Goose, None, None);
        assert_eq!(goose - ollama, GOOSE_OVERHEAD_MS);
    }

    #[test]
    fn large_model_buffer_applies_at_threshold() {
        let below = timeout_ms(29.0, BackendId::Ollama, None, None);
        let at = timeout_ms(30.0, BackendId::Ollama, None, None);
        assert_eq!(at - below, LARGE_MODEL_BUFFER_MS);
    }

    #[test]
    fn high_precision_multiplies() {
        let q4 = timeout_ms(7.0, BackendId::Ollama, None, Some("qwen2.5-coder:7b-q4_K_M"));
        let fp16 = timeout_ms(7.0, BackendId::Ollama, None, Some("qwen2.5-coder:7b-fp16"));
        assert_eq!(q4, 180_000);
        assert_eq!(fp16, 270_000);
    }

    #[test]
    fn user_base_replaces_default() {
        assert_eq!(timeout_ms(0.0, BackendId::Ollama, Some(90_000), None), 90_000);
        // Floor still applies
        assert_eq!(timeout_ms(0.0, BackendId::Ollama, Some(1), None), TIMEOUT_FLOOR_MS);
    }

    #[test]
    fn clamped_to_ceiling() {
        assert_eq!(
            timeout_ms(f64::INFINITY, BackendId::Opencode, None, Some("fp32")),
            TIMEOUT_CEILING_MS
        );
        assert_eq!(timeout_ms(405.0, BackendId::Goose, None, None), TIMEOUT_CEILING_MS);
    }

    #[test]
    fn garbage_parameters_are_total() {
        assert_eq!(
            timeout_ms(f64::NAN, BackendId::Ollama, None, None),
            timeout_ms(0.0, BackendId::Ollama, None, None)
        );
        assert_eq!(
            timeout_ms(-3.0, BackendId::Ollama, None, None),
            timeout_ms(0.0, BackendId::Ollama, None, None)
        );
    }

    #[test]
    fn monotonic_and_bounded_for_every_backend() {
        for backend in BackendId::ALL {
            for tag in [None, Some("bf16")] {
                for base in [None, Some(1), Some(3_000_000)] {
                    let mut previous = 0;
                    for step in 0..=2_000 {
                        let p = step as f64 * 0.25;
                        let t = timeout_ms(p, backend, base, tag);
                        assert!(t >= previous, "{backend} p={p} went down: {t} < {previous}");
                        assert!((TIMEOUT_FLOOR_MS..=TIMEOUT_CEILING_MS).contains(&t));
                        previous = t;
                    }
                }
            }
        }
    }

    #[test]
    fn deterministic() {
        let a = timeout_ms(13.5, BackendId::Opencode, Some(100_000), Some("q8_0"));
        let b = timeout_ms(13.5, BackendId::Opencode, Some(100_000), Some("q8_0"));
        assert_eq!(a, b);
    }

    #[test]
    fn precision_markers() {
        assert!(is_high_precision("llama3.1:8b-instruct-FP16"));
        assert!(is_high_precision("model:bf16"));
        assert!(is_high_precision("codellama:7b-q8_0"));
        assert!(!is_high_precision("codellama:7b-q4_0"));
        assert!(!is_high_precision("qwen2.5-coder:7b"));
    }
}
