//! Error taxonomy for chain adapters
//!
//! Adapters report expected conditions through `ChainError`; the reconciler
//! decides what each kind means for a swap.

use crate::types::fail_reason;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Endpoint unreachable, timed out or returned garbage; retry next pass
    #[error("rpc unavailable: {0}")]
    Unavailable(String),

    /// Data from the chain could not be decoded into what we expect
    #[error("decode failure: {0}")]
    Decode(String),

    /// The node refused a submission
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// The outgoing nonce/epoch state cannot be trusted; no sends until fixed
    #[error("sequence state corrupt: {0}")]
    SequenceState(String),
}

impl ChainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::SequenceState(_))
    }

    /// Text stored as `fail_reason` when this error ends a swap
    pub fn fail_reason(&self) -> String {
        match self {
            ChainError::Rejected(message) if !message.trim().is_empty() => message.clone(),
            _ => fail_reason::UNKNOWN.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChainError::Decode(e.to_string())
        } else {
            ChainError::Unavailable(e.to_string())
        }
    }
}

/// True when an eyre report wraps a fatal `ChainError`
pub fn is_fatal_report(report: &eyre::Report) -> bool {
    if let Some(err) = report.downcast_ref::<ChainError>() {
        return err.is_fatal();
    }
    report
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ChainError>())
        .any(ChainError::is_fatal)
}
