//! Round State Definitions
//!
//! A [`Round`] owns its zone and its submissions. The zone is fixed at
//! creation and every lifecycle step is a checked method, so a round can
//! only move forward: waiting, playing, revealed, finished.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::geo::GeoPosition;
use crate::core::hash::{StateHash, StateHasher};
use crate::game::error::RoundError;
use crate::game::ledger::SubmissionLedger;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Caller-supplied player identifier. Opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique round identifier, assigned at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub uuid::Uuid);

impl RoundId {
    /// Generate a fresh random id.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse from a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Round lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RoundStatus {
    /// Created, not yet accepting submissions.
    Waiting = 0,
    /// Accepting submissions until the timer runs out.
    Playing = 1,
    /// Zone visible, survival computed.
    Revealed = 2,
    /// Terminal.
    Finished = 3,
}

impl RoundStatus {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Waiting => "waiting",
            RoundStatus::Playing => "playing",
            RoundStatus::Revealed => "revealed",
            RoundStatus::Finished => "finished",
        }
    }

    /// Waiting or playing.
    pub fn is_active(self) -> bool {
        matches!(self, RoundStatus::Waiting | RoundStatus::Playing)
    }

    /// The only status reachable from this one.
    pub fn next(self) -> Option<RoundStatus> {
        match self {
            RoundStatus::Waiting => Some(RoundStatus::Playing),
            RoundStatus::Playing => Some(RoundStatus::Revealed),
            RoundStatus::Revealed => Some(RoundStatus::Finished),
            RoundStatus::Finished => None,
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ZONE & SUBMISSION
// =============================================================================

/// Circular target zone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone center
    pub center: GeoPosition,
    /// Zone radius (km, positive)
    pub radius_km: f64,
}

impl Zone {
    /// Create a zone.
    pub const fn new(center: GeoPosition, radius_km: f64) -> Self {
        Self { center, radius_km }
    }

    /// Whether `point` survives against this zone.
    #[inline]
    pub fn contains(&self, point: GeoPosition) -> bool {
        crate::core::geo::is_inside_zone(point, self.center, self.radius_km)
    }
}

/// Tri-state survival flag. `Unknown` until the round is revealed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Survival {
    /// Not evaluated yet.
    #[default]
    Unknown,
    /// Inside the zone at reveal.
    Alive,
    /// Outside the zone at reveal.
    Dead,
}

impl Survival {
    /// `None` while unknown.
    pub fn as_option(self) -> Option<bool> {
        match self {
            Survival::Unknown => None,
            Survival::Alive => Some(true),
            Survival::Dead => Some(false),
        }
    }
}

impl From<bool> for Survival {
    fn from(alive: bool) -> Self {
        if alive {
            Survival::Alive
        } else {
            Survival::Dead
        }
    }
}

/// One player's guess for a round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitting player
    pub player_id: PlayerId,
    /// Guessed position
    pub position: GeoPosition,
    /// When the guess was recorded
    pub submitted_at: DateTime<Utc>,
    /// Survival, frozen at reveal
    pub alive: Survival,
}

/// Survivor counts for a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Distinct players who submitted
    pub players: usize,
    /// Players inside the zone
    pub alive: usize,
    /// Players outside the zone
    pub dead: usize,
}

// =============================================================================
// ROUND
// =============================================================================

/// One timed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Round {
    id: RoundId,
    number: u64,
    status: RoundStatus,
    zone: Zone,
    zone_seed: u64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    revealed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    submissions: SubmissionLedger,
    version: u64,
}

impl Round {
    /// Create a waiting round with a fixed zone.
    pub fn new(
        id: RoundId,
        number: u64,
        zone: Zone,
        zone_seed: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            status: RoundStatus::Waiting,
            zone,
            zone_seed,
            created_at,
            started_at: None,
            revealed_at: None,
            finished_at: None,
            submissions: SubmissionLedger::new(),
            version: 0,
        }
    }

    /// Round id.
    pub fn id(&self) -> RoundId {
        self.id
    }

    /// Sequence number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Current status.
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    /// Target zone.
    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Seed the zone was drawn from.
    pub fn zone_seed(&self) -> u64 {
        self.zone_seed
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set once on entering playing.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Set once on entering revealed.
    pub fn revealed_at(&self) -> Option<DateTime<Utc>> {
        self.revealed_at
    }

    /// Set once on entering finished.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Recorded submissions.
    pub fn submissions(&self) -> &SubmissionLedger {
        &self.submissions
    }

    /// Store write counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Time since the round started; zero before start or under clock skew.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.started_at
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or_default()
    }

    /// Time since reveal; zero if not revealed.
    pub fn since_reveal(&self, now: DateTime<Utc>) -> Duration {
        self.revealed_at
            .and_then(|revealed| (now - revealed).to_std().ok())
            .unwrap_or_default()
    }

    /// Play time left, for client timers.
    pub fn time_remaining(&self, now: DateTime<Utc>, round_duration: Duration) -> Duration {
        match self.status {
            RoundStatus::Waiting => round_duration,
            RoundStatus::Playing => round_duration.saturating_sub(self.elapsed(now)),
            RoundStatus::Revealed | RoundStatus::Finished => Duration::ZERO,
        }
    }

    /// Whether the round still holds the active slot at `now`.
    ///
    /// Purely time based: a started round stays current until `window`
    /// has elapsed since its start, whatever its status.
    pub fn is_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(_) => self.elapsed(now) < window,
            None => self.status == RoundStatus::Waiting,
        }
    }

    fn transition(&mut self, to: RoundStatus) -> Result<(), RoundError> {
        if self.status.next() != Some(to) {
            return Err(RoundError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// Waiting -> playing.
    pub fn begin_playing(&mut self, now: DateTime<Utc>) -> Result<(), RoundError> {
        self.transition(RoundStatus::Playing)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Record or replace a player's submission. Only while playing.
    pub fn record_submission(
        &mut self,
        player_id: PlayerId,
        position: GeoPosition,
        now: DateTime<Utc>,
    ) -> Result<Submission, RoundError> {
        if !position.is_valid() {
            return Err(RoundError::InvalidPosition { lat: position.lat, lng: position.lng });
        }
        if self.status != RoundStatus::Playing {
            return Err(RoundError::RoundNotPlaying { round_id: self.id, status: self.status });
        }

        self.submissions
            .upsert(player_id, position, now)
            .map_err(|_| RoundError::RoundNotPlaying { round_id: self.id, status: self.status })
    }

    /// Playing -> revealed, freezing each submission's survival.
    pub fn reveal(
        &mut self,
        now: DateTime<Utc>,
        outcomes: &BTreeMap<PlayerId, bool>,
    ) -> Result<(), RoundError> {
        self.transition(RoundStatus::Revealed)?;
        self.revealed_at = Some(now);
        self.submissions.freeze(outcomes);
        Ok(())
    }

    /// Revealed -> finished.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<(), RoundError> {
        self.transition(RoundStatus::Finished)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Players marked alive.
    pub fn survivors(&self) -> Vec<&PlayerId> {
        self.submissions
            .iter()
            .filter(|s| s.alive == Survival::Alive)
            .map(|s| &s.player_id)
            .collect()
    }

    /// Players marked dead.
    pub fn casualties(&self) -> Vec<&PlayerId> {
        self.submissions
            .iter()
            .filter(|s| s.alive == Survival::Dead)
            .map(|s| &s.player_id)
            .collect()
    }

    /// Survivor counts.
    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            players: self.submissions.len(),
            alive: self.survivors().len(),
            dead: self.casualties().len(),
        }
    }

    /// Hash of the zone and submissions.
    ///
    /// Status, timestamps of the round itself and the version are left out,
    /// so the hash only changes when evaluated inputs or outcomes change.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_round_state();
        hasher.update_uuid(self.id.as_bytes());
        hasher.update_u64(self.number);
        hasher.update_u64(self.zone_seed);
        hasher.update_position(self.zone.center);
        hasher.update_f64(self.zone.radius_km);

        hasher.update_u64(self.submissions.len() as u64);
        for submission in self.submissions.iter() {
            hasher.update_str(submission.player_id.as_str());
            hasher.update_position(submission.position);
            hasher.update_i64(submission.submitted_at.timestamp_millis());
            hasher.update_u8(submission.alive as u8);
        }

        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn playing_round() -> Round {
        let zone = Zone::new(GeoPosition::new(0.0, 0.0), 100.0);
        let mut round = Round::new(RoundId::new_v4(), 1, zone, 42, t(0));
        round.begin_playing(t(0)).unwrap();
        round
    }

    #[test]
    fn test_new_round_is_waiting() {
        let zone = Zone::new(GeoPosition::new(10.0, 20.0), 6000.0);
        let round = Round::new(RoundId::new_v4(), 7, zone, 1, t(0));
        assert_eq!(round.status(), RoundStatus::Waiting);
        assert_eq!(round.number(), 7);
        assert!(round.started_at().is_none());
        assert!(round.submissions().is_empty());
    }

    #[test]
    fn test_lifecycle_forward_only() {
        let mut round = playing_round();
        assert_eq!(round.started_at(), Some(t(0)));

        round.reveal(t(60), &BTreeMap::new()).unwrap();
        assert_eq!(round.revealed_at(), Some(t(60)));

        round.finish(t(60)).unwrap();
        assert_eq!(round.status(), RoundStatus::Finished);

        let err = round.begin_playing(t(61)).unwrap_err();
        assert_eq!(
            err,
            RoundError::InvalidTransition { from: RoundStatus::Finished, to: RoundStatus::Playing }
        );
    }

    #[test]
    fn test_cannot_skip_reveal() {
        let mut round = playing_round();
        assert!(matches!(round.finish(t(60)), Err(RoundError::InvalidTransition { .. })));
        assert_eq!(round.status(), RoundStatus::Playing);
    }

    #[test]
    fn test_started_at_set_once() {
        let mut round = playing_round();
        assert!(round.begin_playing(t(5)).is_err());
        assert_eq!(round.started_at(), Some(t(0)));
    }

    #[test]
    fn test_submission_requires_playing() {
        let zone = Zone::new(GeoPosition::new(0.0, 0.0), 100.0);
        let mut round = Round::new(RoundId::new_v4(), 1, zone, 42, t(0));

        let err = round
            .record_submission("a".into(), GeoPosition::new(0.0, 0.0), t(1))
            .unwrap_err();
        assert!(matches!(err, RoundError::RoundNotPlaying { status: RoundStatus::Waiting, .. }));
    }

    #[test]
    fn test_submission_rejects_invalid_position() {
        let mut round = playing_round();
        let err = round
            .record_submission("a".into(), GeoPosition::new(95.0, 0.0), t(1))
            .unwrap_err();
        assert!(matches!(err, RoundError::InvalidPosition { .. }));
        assert!(round.submissions().is_empty());
    }

    #[test]
    fn test_resubmission_replaces() {
        let mut round = playing_round();
        round.record_submission("a".into(), GeoPosition::new(1.0, 1.0), t(1)).unwrap();
        round.record_submission("a".into(), GeoPosition::new(2.0, 2.0), t(2)).unwrap();

        assert_eq!(round.submissions().len(), 1);
        let sub = round.submissions().get(&"a".into()).unwrap();
        assert_eq!(sub.position, GeoPosition::new(2.0, 2.0));
        assert_eq!(sub.submitted_at, t(2));
    }

    #[test]
    fn test_reveal_freezes_submissions() {
        let mut round = playing_round();
        round.record_submission("a".into(), GeoPosition::new(0.0, 0.0), t(1)).unwrap();
        round.record_submission("b".into(), GeoPosition::new(10.0, 10.0), t(2)).unwrap();

        let outcomes: BTreeMap<PlayerId, bool> =
            BTreeMap::from([("a".into(), true), ("b".into(), false)]);
        round.reveal(t(60), &outcomes).unwrap();

        assert_eq!(round.summary(), RoundSummary { players: 2, alive: 1, dead: 1 });
        assert_eq!(round.survivors(), vec![&PlayerId::from("a")]);

        let err = round
            .record_submission("c".into(), GeoPosition::new(0.0, 0.0), t(61))
            .unwrap_err();
        assert!(matches!(err, RoundError::RoundNotPlaying { status: RoundStatus::Revealed, .. }));
    }

    #[test]
    fn test_timing_helpers() {
        let window = Duration::from_secs(70);
        let duration = Duration::from_secs(60);
        let round = playing_round();

        assert_eq!(round.elapsed(t(30)), Duration::from_secs(30));
        assert_eq!(round.time_remaining(t(30), duration), Duration::from_secs(30));
        assert_eq!(round.time_remaining(t(90), duration), Duration::ZERO);

        assert!(round.is_within(window, t(69)));
        assert!(!round.is_within(window, t(70)));

        // Clock skew: a start in the future counts as just started
        assert_eq!(round.elapsed(t(-5)), Duration::ZERO);
    }

    #[test]
    fn test_hash_tracks_submissions() {
        let mut round = playing_round();
        let empty = round.compute_hash();
        assert_eq!(empty, round.compute_hash());

        round.record_submission("a".into(), GeoPosition::new(0.0, 0.0), t(1)).unwrap();
        assert_ne!(empty, round.compute_hash());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&RoundStatus::Revealed).unwrap();
        assert_eq!(json, "\"revealed\"");
        let id = PlayerId::new("fid:3");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"fid:3\"");
    }
}
