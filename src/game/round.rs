//! Round Coordinator
//!
//! Owns the round lifecycle. All entry points used by outer layers live
//! here: `start_round`, `accept_submission`, `tick`, `get_current_round`.
//!
//! ## Locking
//!
//! - `start_lock` spans the whole read-pointer / create / write-pointer
//!   sequence, so two concurrent starts cannot both see "no active round".
//! - Every read-modify-write of one round holds that round's guard from
//!   [`RoundLocks`]. Lock order is always `start_lock` before a round lock.
//! - Store writes are conditional on top of that; a lost race surfaces as
//!   [`RoundError::ConcurrentModification`].

use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::core::clock::Clock;
use crate::core::geo::GeoPosition;
use crate::core::rng::{derive_round_seed, DeterministicRng};
use crate::game::error::RoundError;
use crate::game::events::RoundEvent;
use crate::game::ledger::RoundLocks;
use crate::game::state::{PlayerId, Round, RoundId, RoundStatus, Submission};
use crate::game::zone::{evaluate_survival, ZoneEngine};
use crate::network::feed::ChangeNotifier;
use crate::store::RoundStore;

/// Result of `start_round`.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A new round was created and is playing.
    Started(Round),
    /// The current round is still inside its active window.
    AlreadyRunning(Round),
}

impl StartOutcome {
    /// The round either way.
    pub fn round(&self) -> &Round {
        match self {
            StartOutcome::Started(round) | StartOutcome::AlreadyRunning(round) => round,
        }
    }

    /// Take the round.
    pub fn into_round(self) -> Round {
        match self {
            StartOutcome::Started(round) | StartOutcome::AlreadyRunning(round) => round,
        }
    }

    /// Whether a new round was created.
    pub fn is_new(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Result of a tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickResult {
    /// Statuses entered this tick, in order
    pub transitions: Vec<RoundStatus>,
    /// Round after the last transition (if any happened)
    pub round: Option<Round>,
}

impl TickResult {
    /// Whether anything changed.
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Drives rounds through their lifecycle.
pub struct RoundCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn RoundStore>,
    clock: Arc<dyn Clock>,
    notifier: ChangeNotifier,
    zones: ZoneEngine,
    seeds: Mutex<DeterministicRng>,
    start_lock: tokio::sync::Mutex<()>,
    round_locks: RoundLocks,
}

impl RoundCoordinator {
    /// Create a coordinator.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn RoundStore>,
        clock: Arc<dyn Clock>,
        notifier: ChangeNotifier,
    ) -> Self {
        let seeds = match config.rng_seed {
            Some(seed) => DeterministicRng::new(seed),
            None => DeterministicRng::from_entropy(),
        };

        Self {
            zones: ZoneEngine::new(config.zone),
            config,
            store,
            clock,
            notifier,
            seeds: Mutex::new(seeds),
            start_lock: tokio::sync::Mutex::new(()),
            round_locks: RoundLocks::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Injected clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Feed receiving every committed change.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    // =========================================================================
    // START
    // =========================================================================

    /// Start a round, or return the current one if it is still active.
    ///
    /// A stale current round that never got its reveal (the timer was not
    /// running) is closed out first, so no two rounds are ever playing.
    pub async fn start_round(&self) -> Result<StartOutcome, RoundError> {
        let _start_guard = self.start_lock.lock().await;
        let now = self.clock.now();

        let current_id = self.store.active_round_id().await?;
        if let Some(id) = current_id {
            if let Some(current) = self.store.get(id).await? {
                let still_playing = current.status() == RoundStatus::Playing
                    && current.elapsed(now) < self.config.round_duration;
                if still_playing || current.is_within(self.config.active_window, now) {
                    debug!("Round #{} already running", current.number());
                    return Ok(StartOutcome::AlreadyRunning(current));
                }
                if current.status() != RoundStatus::Finished {
                    warn!("Closing stale round #{} ({})", current.number(), current.status());
                    self.advance(id, now, true).await?;
                }
            }
        }

        let number = self.store.latest_round_number().await? + 1;
        let zone_seed = derive_round_seed(self.next_base_seed(), number);
        let zone = self.zones.generate_zone(&mut DeterministicRng::new(zone_seed));

        let mut round = Round::new(RoundId::new_v4(), number, zone, zone_seed, now);
        round.begin_playing(now)?;

        let round = self.store.insert_active(round, current_id).await?;

        info!(
            "Round #{} started ({}), zone {} r={}km",
            round.number(),
            round.id(),
            round.zone().center,
            round.zone().radius_km
        );
        self.notifier.publish(RoundEvent::round_started(&round, now));

        Ok(StartOutcome::Started(round))
    }

    fn next_base_seed(&self) -> u64 {
        let mut rng = self.seeds.lock().unwrap_or_else(|e| e.into_inner());
        rng.next_u64()
    }

    // =========================================================================
    // SUBMIT
    // =========================================================================

    /// Record a player's guess, replacing any earlier guess by that player.
    pub async fn accept_submission(
        &self,
        round_id: RoundId,
        player_id: PlayerId,
        position: GeoPosition,
    ) -> Result<Submission, RoundError> {
        if !position.is_valid() {
            return Err(RoundError::InvalidPosition { lat: position.lat, lng: position.lng });
        }

        let round_guard = self.round_locks.lock(round_id).await;
        let now = self.clock.now();

        let Some(mut round) = self.store.get(round_id).await? else {
            // Unknown ids must not leave registry entries behind
            drop(round_guard);
            self.round_locks.prune();
            return Err(RoundError::RoundNotFound(round_id));
        };
        let expected_version = round.version();

        let submission = round.record_submission(player_id.clone(), position, now)?;
        let round = self.store.update(round, expected_version).await?;

        debug!(
            "Round #{}: {} submitted {} ({} players)",
            round.number(),
            player_id,
            position,
            round.submissions().len()
        );
        self.notifier.publish(RoundEvent::submission_recorded(&round, player_id, now));
        drop(round_guard);

        Ok(submission)
    }

    /// Same as `accept_submission` with raw coordinates.
    pub async fn submit(
        &self,
        round_id: RoundId,
        player_id: impl Into<PlayerId>,
        lat: f64,
        lng: f64,
    ) -> Result<Submission, RoundError> {
        self.accept_submission(round_id, player_id.into(), GeoPosition::new(lat, lng))
            .await
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance the current round if its timers have run out.
    ///
    /// Playing rounds past `round_duration` are revealed; revealed rounds
    /// past `finish_delay` are finished. With a zero delay both happen in
    /// one call.
    pub async fn tick(&self) -> Result<TickResult, RoundError> {
        let Some(id) = self.store.active_round_id().await? else {
            return Ok(TickResult::default());
        };
        let now = self.clock.now();
        self.advance(id, now, false).await
    }

    async fn advance(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<TickResult, RoundError> {
        let round_guard = self.round_locks.lock(round_id).await;
        let mut result = TickResult::default();

        let Some(mut round) = self.store.get(round_id).await? else {
            return Ok(result);
        };

        if round.status() == RoundStatus::Waiting && force {
            let expected_version = round.version();
            round.begin_playing(now)?;
            round = self.store.update(round, expected_version).await?;
        }

        if round.status() == RoundStatus::Playing
            && (force || round.elapsed(now) >= self.config.round_duration)
        {
            let expected_version = round.version();
            let outcomes = evaluate_survival(&round);
            round.reveal(now, &outcomes)?;
            round = self.store.update(round, expected_version).await?;

            let summary = round.summary();
            info!(
                "Round #{} revealed: {} players, {} alive, {} dead",
                round.number(),
                summary.players,
                summary.alive,
                summary.dead
            );
            self.notifier.publish(RoundEvent::round_revealed(&round, now));
            result.transitions.push(RoundStatus::Revealed);
        }

        if round.status() == RoundStatus::Revealed
            && (force || round.since_reveal(now) >= self.config.finish_delay)
        {
            let expected_version = round.version();
            round.finish(now)?;
            round = self.store.update(round, expected_version).await?;

            info!("Round #{} finished", round.number());
            self.notifier.publish(RoundEvent::round_finished(&round, now));
            result.transitions.push(RoundStatus::Finished);
        }

        let finished = round.status() == RoundStatus::Finished;
        if result.changed() {
            result.round = Some(round);
        }

        drop(round_guard);
        if finished {
            self.round_locks.prune();
        }

        Ok(result)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Round the active pointer references, if any.
    pub async fn get_current_round(&self) -> Result<Option<Round>, RoundError> {
        match self.store.active_round_id().await? {
            Some(id) => Ok(self.store.get(id).await?),
            None => Ok(None),
        }
    }

    /// Fetch a round by id.
    pub async fn get_round(&self, round_id: RoundId) -> Result<Round, RoundError> {
        self.store
            .get(round_id)
            .await?
            .ok_or(RoundError::RoundNotFound(round_id))
    }

    /// Subscribe to the feed, then fetch the current snapshot.
    ///
    /// Subscribing first means nothing committed after the snapshot can be
    /// missed; anything older than the snapshot that still arrives is
    /// dropped by [`crate::network::feed::RoundFeedView`].
    pub async fn attach(
        &self,
    ) -> Result<(broadcast::Receiver<RoundEvent>, Option<Round>), RoundError> {
        let rx = self.notifier.subscribe();
        let snapshot = self.get_current_round().await?;
        Ok((rx, snapshot))
    }
}
