//! Round Coordination
//!
//! Everything that decides what a round is and how it moves.
//!
//! ## Module Structure
//!
//! - `state`: Round, submissions, identifiers, lifecycle transitions
//! - `zone`: Zone generation and survival evaluation
//! - `ledger`: Per-round submission map and per-round locks
//! - `round`: The coordinator driving start, submit, and tick
//! - `events`: Committed-change events for observers
//! - `error`: Error taxonomy

pub mod state;
pub mod zone;
pub mod ledger;
pub mod round;
pub mod events;
pub mod error;

// Re-export key types
pub use state::{Round, RoundId, RoundStatus, PlayerId, Submission, Survival, Zone, RoundSummary};
pub use zone::{ZoneConfig, ZoneEngine, evaluate_survival};
pub use ledger::{SubmissionLedger, RoundLocks};
pub use round::{RoundCoordinator, StartOutcome, TickResult};
pub use events::{RoundEvent, RoundEventKind};
pub use error::RoundError;
