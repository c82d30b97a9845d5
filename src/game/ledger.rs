//! Submission Ledger
//!
//! Per-round submissions keyed by player, plus the per-round lock registry
//! that serializes every mutation of a round. An upsert is a single map
//! insert made while holding the round's lock, so concurrent players can
//! never overwrite each other's entries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::OwnedMutexGuard;

use crate::core::geo::GeoPosition;
use crate::game::state::{PlayerId, RoundId, Submission, Survival};

/// Returned when writing to a ledger that has been frozen by a reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Ledger is frozen")]
pub struct LedgerFrozen;

/// Submissions for one round, at most one per player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionLedger {
    entries: BTreeMap<PlayerId, Submission>,
    frozen: bool,
}

impl SubmissionLedger {
    /// Empty, writable ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing entry for `player_id` with a fresh one.
    pub fn upsert(
        &mut self,
        player_id: PlayerId,
        position: GeoPosition,
        now: DateTime<Utc>,
    ) -> Result<Submission, LedgerFrozen> {
        if self.frozen {
            return Err(LedgerFrozen);
        }

        let submission = Submission {
            player_id: player_id.clone(),
            position,
            submitted_at: now,
            alive: Survival::Unknown,
        };
        self.entries.insert(player_id, submission.clone());
        Ok(submission)
    }

    /// Write survival outcomes and make the ledger read-only.
    ///
    /// Outcomes are applied only to entries still `Unknown`; a second
    /// freeze leaves earlier results untouched.
    pub fn freeze(&mut self, outcomes: &BTreeMap<PlayerId, bool>) {
        for (player_id, submission) in self.entries.iter_mut() {
            if submission.alive != Survival::Unknown {
                continue;
            }
            if let Some(alive) = outcomes.get(player_id) {
                submission.alive = Survival::from(*alive);
            }
        }
        self.frozen = true;
    }

    /// Whether a reveal has frozen the ledger.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Submission for one player.
    pub fn get(&self, player_id: &PlayerId) -> Option<&Submission> {
        self.entries.get(player_id)
    }

    /// Whether the player has submitted.
    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.entries.contains_key(player_id)
    }

    /// Number of distinct players.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No submissions yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submissions in player-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Submission> {
        self.entries.values()
    }
}

// =============================================================================
// PER-ROUND LOCKS
// =============================================================================

/// Registry of one async mutex per round id.
///
/// Every read-modify-write of a round happens while holding its guard.
#[derive(Debug, Default)]
pub struct RoundLocks {
    locks: Mutex<BTreeMap<RoundId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoundLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a round.
    pub async fn lock(&self, round_id: RoundId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(round_id).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Drop registry entries nobody holds or waits on.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of tracked rounds.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// No tracked rounds.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_one_entry_per_player() {
        let mut ledger = SubmissionLedger::new();
        ledger.upsert("a".into(), GeoPosition::new(1.0, 1.0), t(1)).unwrap();
        ledger.upsert("b".into(), GeoPosition::new(2.0, 2.0), t(2)).unwrap();
        ledger.upsert("a".into(), GeoPosition::new(3.0, 3.0), t(3)).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(&"a".into()).unwrap().position, GeoPosition::new(3.0, 3.0));
    }

    #[test]
    fn test_frozen_ledger_rejects_writes() {
        let mut ledger = SubmissionLedger::new();
        ledger.upsert("a".into(), GeoPosition::new(1.0, 1.0), t(1)).unwrap();
        ledger.freeze(&BTreeMap::new());

        assert!(ledger.is_frozen());
        assert_eq!(ledger.upsert("b".into(), GeoPosition::new(0.0, 0.0), t(2)), Err(LedgerFrozen));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_freeze_is_write_once() {
        let mut ledger = SubmissionLedger::new();
        ledger.upsert("a".into(), GeoPosition::new(1.0, 1.0), t(1)).unwrap();

        let first: BTreeMap<PlayerId, bool> = BTreeMap::from([("a".into(), true)]);
        let second: BTreeMap<PlayerId, bool> = BTreeMap::from([("a".into(), false)]);
        ledger.freeze(&first);
        ledger.freeze(&second);

        assert_eq!(ledger.get(&"a".into()).unwrap().alive, Survival::Alive);
    }

    #[tokio::test]
    async fn test_round_lock_is_exclusive() {
        let locks = Arc::new(RoundLocks::new());
        let id = RoundId::new_v4();

        let guard = locks.lock(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_rounds_do_not_block() {
        let locks = RoundLocks::new();
        let _a = locks.lock(RoundId::new_v4()).await;
        let _b = locks.lock(RoundId::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = RoundLocks::new();
        let held = RoundId::new_v4();
        let _guard = locks.lock(held).await;
        {
            let _released = locks.lock(RoundId::new_v4()).await;
        }

        locks.prune();
        assert_eq!(locks.len(), 1);
    }
}
