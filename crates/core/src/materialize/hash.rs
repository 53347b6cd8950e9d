//! Content hashing for the Materializer (§4.10). Canonical JSON means
//! sorted keys and no whitespace; `serde_json::Map` is a `BTreeMap` in
//! this crate (the `preserve_order` feature is never enabled), so
//! `serde_json::to_string` on a `Value` already yields sorted keys.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::analyzer::is_generic_part_name;
use crate::types::Score;

/// Serialize `value` as canonical JSON: sorted keys, compact, stable
/// number formatting.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 16-hex-char prefix of `SHA-256(canonical_json({title, tempos, parts}))`.
pub fn score_fingerprint(score: &Score) -> Result<String> {
    let payload = serde_json::json!({
        "title": score.title,
        "tempos": score.tempos,
        "parts": score.parts,
    });
    let hash = sha256_hex(&canonical_json(&payload)?);
    Ok(hash[..16].to_string())
}

/// Full `SHA-256` hex of the canonical JSON transform payload.
pub fn transform_hash<T: Serialize>(payload: &T) -> Result<String> {
    Ok(sha256_hex(&canonical_json(payload)?))
}

pub fn transform_id(part_index: usize, voice_part_id: &str, hash: &str) -> String {
    format!("vp:part{}:{}:{}", part_index, voice_part_id, &hash[..12.min(hash.len())])
}

pub fn derived_part_id(hash: &str) -> String {
    format!("P_DERIVED_{}", hash[..10.min(hash.len())].to_ascii_uppercase())
}

/// Derived-part naming cascade (§4.10): prefer the source part's
/// human-facing name, else fall back to its `part_id` or a generic label.
pub fn build_derived_part_name(
    source_part_name: &str,
    source_part_id: &str,
    source_part_index: usize,
    target_voice_part_id: &str,
) -> String {
    if !source_part_name.trim().is_empty() && !is_generic_part_name(source_part_name) {
        return format!("{} - {} (Derived)", source_part_name, target_voice_part_id);
    }
    if !source_part_id.trim().is_empty() {
        return format!("{} - {} (Derived)", source_part_id, target_voice_part_id);
    }
    format!("Part {} - {} (Derived)", source_part_index, target_voice_part_id)
}
