//! Round Errors
//!
//! Every failure of a core operation is returned to the caller as a
//! [`RoundError`]. Only [`RoundError::ConcurrentModification`] is worth
//! retrying.

use crate::game::state::{RoundId, RoundStatus};
use crate::store::StoreError;

/// Errors from round coordination.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoundError {
    /// Referenced round has no record.
    #[error("Round {0} not found")]
    RoundNotFound(RoundId),

    /// Submission or mutation attempted outside the playing state.
    #[error("Round {round_id} is {status}, not playing")]
    RoundNotPlaying {
        /// Round that rejected the mutation.
        round_id: RoundId,
        /// Status at the time of the attempt.
        status: RoundStatus,
    },

    /// Latitude or longitude out of range (or not finite).
    #[error("Invalid position ({lat}, {lng})")]
    InvalidPosition {
        /// Submitted latitude.
        lat: f64,
        /// Submitted longitude.
        lng: f64,
    },

    /// A conditional write lost a race; retry the whole operation.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The persistent store failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Lifecycle step not allowed from the current status.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: RoundStatus,
        /// Requested status.
        to: RoundStatus,
    },
}

impl RoundError {
    /// Whether the caller should retry the same logical operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RoundError::ConcurrentModification(_))
    }
}

impl From<StoreError> for RoundError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reason) => RoundError::ConcurrentModification(reason),
            StoreError::NotFound(id) => RoundError::RoundNotFound(id),
            StoreError::Unavailable(reason) => RoundError::StorageUnavailable(reason),
        }
    }
}
