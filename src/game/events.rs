//! Round Events
//!
//! One event per committed state change, carrying the full round as it
//! was written.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHash;
use crate::game::state::{PlayerId, Round, RoundSummary};

/// What changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEventKind {
    /// A new round entered playing.
    RoundStarted,
    /// A player's submission was recorded or replaced.
    SubmissionRecorded {
        /// Submitting player.
        player_id: PlayerId,
    },
    /// The zone was revealed and survival frozen.
    RoundRevealed {
        /// Outcome counts.
        summary: RoundSummary,
    },
    /// The round reached its terminal state.
    RoundFinished,
}

/// A committed change and the round snapshot it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    /// What changed
    pub kind: RoundEventKind,
    /// Round after the change
    pub round: Round,
    /// `Round::compute_hash` of `round`
    pub state_hash: StateHash,
    /// When the change was committed
    pub at: DateTime<Utc>,
}

impl RoundEvent {
    /// Create a new event.
    pub fn new(kind: RoundEventKind, round: &Round, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            state_hash: round.compute_hash(),
            round: round.clone(),
            at,
        }
    }

    /// Create round started event.
    pub fn round_started(round: &Round, at: DateTime<Utc>) -> Self {
        Self::new(RoundEventKind::RoundStarted, round, at)
    }

    /// Create submission recorded event.
    pub fn submission_recorded(round: &Round, player_id: PlayerId, at: DateTime<Utc>) -> Self {
        Self::new(RoundEventKind::SubmissionRecorded { player_id }, round, at)
    }

    /// Create round revealed event.
    pub fn round_revealed(round: &Round, at: DateTime<Utc>) -> Self {
        Self::new(RoundEventKind::RoundRevealed { summary: round.summary() }, round, at)
    }

    /// Create round finished event.
    pub fn round_finished(round: &Round, at: DateTime<Utc>) -> Self {
        Self::new(RoundEventKind::RoundFinished, round, at)
    }

    /// Whether this event supersedes `current` for an observer.
    ///
    /// Newer round number wins; within a round, a higher version wins.
    pub fn supersedes(&self, current: &Round) -> bool {
        if self.round.id() == current.id() {
            self.round.version() > current.version()
        } else {
            self.round.number() > current.number()
        }
    }
}
