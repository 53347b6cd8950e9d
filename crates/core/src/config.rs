//! Environment-driven configuration knobs.
//!
//! Mirrors the original implementation's `_feature_flag_enabled` /
//! `_env_float` / `_env_int` helpers: every knob is read from the process
//! environment at the point of decision, never cached, so tests (and
//! callers embedding this engine) can flip behavior by setting a var
//! before the call that needs it.

use std::env;

/// Read a boolean feature flag. Accepts `1`/`true`/`yes` (case-insensitive)
/// as enabled; anything else, or an unset var, is disabled.
pub fn feature_flag_enabled(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Read a float-valued knob, falling back to `default` on absence or
/// parse failure.
pub fn env_float(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

/// Read an integer-valued knob, falling back to `default` on absence or
/// parse failure.
pub fn env_int(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

/// Whether the syllable_flow lyric propagation strategy is permitted.
/// Downgrades silently to `strict_onset` when disabled (§4.5).
pub const SYLLABLE_FLOW_FLAG: &str = "VOICEPARTS_ENABLE_SYLLABLE_FLOW";

/// Maximum number of repair-loop iterations before giving up (§4.8).
pub const REPAIR_MAX_ATTEMPTS: &str = "VOICEPARTS_REPAIR_MAX_ATTEMPTS";
pub const REPAIR_MAX_ATTEMPTS_DEFAULT: i64 = 2;

/// Onset-overlap tolerance, in beats, used by the structural validator
/// and the chord splitter's non-overlap enforcement.
pub const OVERLAP_EPSILON: f64 = 1e-5;

pub fn syllable_flow_enabled() -> bool {
    feature_flag_enabled(SYLLABLE_FLOW_FLAG, true)
}

pub fn repair_max_attempts() -> i64 {
    env_int(REPAIR_MAX_ATTEMPTS, REPAIR_MAX_ATTEMPTS_DEFAULT)
}
