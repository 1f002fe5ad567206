use thiserror::Error;

use crate::types::StoreError;

/// Outcomes that stop a consistency check before it reaches a verdict.
///
/// Inconsistencies found in the store are never errors; they are counted in
/// the [`ConsistencySummary`](super::ConsistencySummary).
#[derive(Debug, Error)]
pub enum CheckError {
    /// The options cannot produce a runnable check, e.g. a memory budget that
    /// fits no entity at all.
    #[error("consistency check incomplete: invalid configuration: {0}")]
    Configuration(String),
    /// A record, page or index entry could not be read.
    #[error("consistency check incomplete: {0}")]
    Incomplete(#[source] StoreError),
    /// The cancel flag was raised while the check was running.
    #[error("consistency check cancelled")]
    Cancelled,
}

impl CheckError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        CheckError::Configuration(message.into())
    }

    /// `true` when the check could not determine whether the store is
    /// consistent.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CheckError::Configuration(_) | CheckError::Incomplete(_))
    }

    /// `true` when the run was stopped through its cancel flag.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CheckError::Cancelled)
    }
}

impl From<StoreError> for CheckError {
    fn from(err: StoreError) -> Self {
        CheckError::Incomplete(err)
    }
}

/// Result type alias for consistency checks.
pub type Result<T> = std::result::Result<T, CheckError>;
