//! Process-global artifact index and per-key lock map (§4.10, §5).
//!
//! Lock ordering is always outer (lock-map mutex) → inner (per-key
//! mutex); the outer mutex is released before any work happens under the
//! inner one. Grounded in the teacher's [`lazy_static`] usage for
//! process-global static data ([`crate::types`] callers, `cache.rs`'s
//! cache-dir pattern) and the original implementation's
//! `threading.Lock()`-per-key map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::AppendedPartRef;

#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub transform_id: String,
    pub transform_hash: String,
    pub score_fingerprint: String,
    pub appended_part_ref: Option<AppendedPartRef>,
    pub modified_musicxml_path: Option<String>,
}

lazy_static::lazy_static! {
    static ref ARTIFACT_INDEX: Mutex<HashMap<String, ArtifactEntry>> = Mutex::new(HashMap::new());
    static ref ARTIFACT_LOCKS: Mutex<HashMap<String, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

/// `artifact_key = "<score_fingerprint>:<transform_hash>"`.
pub fn artifact_key(score_fingerprint: &str, transform_hash: &str) -> String {
    format!("{}:{}", score_fingerprint, transform_hash)
}

/// `lock_key = "<source_musicxml_path or 'memory'>:<artifact_key>"`.
pub fn lock_key(source_musicxml_path: Option<&str>, artifact_key: &str) -> String {
    format!("{}:{}", source_musicxml_path.unwrap_or("memory"), artifact_key)
}

/// Find or create the per-key mutex for `lock_key`, briefly holding the
/// lock-map mutex, then release it before the caller locks the returned
/// mutex.
pub fn get_artifact_lock(lock_key: &str) -> Arc<Mutex<()>> {
    let mut locks = ARTIFACT_LOCKS.lock().expect("artifact lock map poisoned");
    locks.entry(lock_key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

pub fn get_artifact(artifact_key: &str) -> Option<ArtifactEntry> {
    ARTIFACT_INDEX.lock().expect("artifact index poisoned").get(artifact_key).cloned()
}

pub fn store_artifact(artifact_key: &str, entry: ArtifactEntry) {
    ARTIFACT_INDEX.lock().expect("artifact index poisoned").insert(artifact_key.to_string(), entry);
}
