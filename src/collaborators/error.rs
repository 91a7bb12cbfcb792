//! Collaborator error types.
//!
//! All of these are per-item failures: the affected item or batch is
//! dropped and reported, the pipeline keeps going.

use thiserror::Error;

use crate::model::{Identifier, MessageId};

/// Identifier lookup failed.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No record for identifier {0}")]
    NotFound(Identifier),

    #[error("Lookup backend error for {identifier}: {reason}")]
    Backend { identifier: Identifier, reason: String },
}

/// Batch message resolution failed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch too large: {size} records, max {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Batch backend error: {0}")]
    Backend(String),
}

/// Spam classification failed.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Classification quota exceeded: {current}/{max} concurrent calls")]
    QuotaExceeded { current: usize, max: usize },

    #[error("Classifier backend error for message {id}: {reason}")]
    Backend { id: MessageId, reason: String },
}

impl ClassifyError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Backend { .. } => "backend",
        }
    }
}

impl LookupError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Backend { .. } => "backend",
        }
    }
}

impl BatchError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "too_large",
            Self::Backend(_) => "backend",
        }
    }
}
