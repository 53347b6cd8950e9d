//! Internal error type.
//!
//! Most pipeline outcomes are not errors — a failed lint pass, an
//! unresolved region, or a validation failure is an ordinary `Ok` value
//! carrying a status (see [`crate::plan`], [`crate::validate`]). This type
//! is reserved for conditions that should never occur given a well-formed
//! `Score`/`Plan`, plus genuine I/O failure in the Materializer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoicePartError {
    #[error("part index {0} out of range (score has {1} parts)")]
    PartIndexOutOfRange(usize, usize),

    #[error("voice part '{0}' not found in part {1}")]
    VoicePartNotFound(String, usize),

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("artifact lock poisoned for key '{0}'")]
    LockPoisoned(String),

    #[error("materialization failed: {0}")]
    Materialization(#[from] anyhow::Error),
}
