//! Round Storage
//!
//! The persistence contract the coordinator depends on. Writes are
//! conditional: a round update names the version it was read at, and
//! creating a round names the active-round pointer it expects to replace.

pub mod memory;

use async_trait::async_trait;

use crate::game::state::{Round, RoundId};

pub use memory::MemoryStore;

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A conditional write found a different current value.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No round with this id.
    #[error("round {0} not found")]
    NotFound(RoundId),

    /// Backend failure.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Durable round storage keyed by id, plus the active-round pointer.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Fetch a round.
    async fn get(&self, id: RoundId) -> Result<Option<Round>, StoreError>;

    /// Current value of the active-round pointer.
    async fn active_round_id(&self) -> Result<Option<RoundId>, StoreError>;

    /// Highest round number ever stored (0 when empty).
    async fn latest_round_number(&self) -> Result<u64, StoreError>;

    /// Insert `round` and point the active pointer at it, in one step.
    ///
    /// Fails with `Conflict` unless the pointer still equals
    /// `expected_active` and the round's number is unused. Returns the
    /// round as stored (version 1).
    async fn insert_active(
        &self,
        round: Round,
        expected_active: Option<RoundId>,
    ) -> Result<Round, StoreError>;

    /// Replace a round if its stored version equals `expected_version`.
    ///
    /// Returns the round as stored, with its version bumped.
    async fn update(&self, round: Round, expected_version: u64) -> Result<Round, StoreError>;
}
