//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::error::RoundError;
use crate::game::events::{RoundEvent, RoundEventKind};
use crate::game::state::{Round, RoundStatus, Submission};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a round (no-op while one is active).
    StartRound,

    /// Submit or replace a guess.
    Submit(SubmitRequest),

    /// Request the current round.
    GetCurrentRound,

    /// Ping for latency measurement.
    Ping {
        /// Client send time, echoed back.
        timestamp: u64,
    },
}

/// A player's guess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Round identifier (UUID string).
    pub round_id: String,
    /// Player identifier, taken as supplied.
    pub player_id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current round snapshot (reply to `start_round`, `get_current_round`,
    /// and sent once on attach).
    Round {
        /// Current round, if any has been started.
        round: Option<RoundSnapshot>,
    },

    /// Pushed change from the feed.
    Update(RoundUpdate),

    /// Submission accepted.
    SubmitAck(SubmitAck),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server clock (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why the connection is closing.
        reason: String,
    },
}

/// One player's entry as seen on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    /// Player identifier.
    pub player_id: String,
    /// Guessed latitude.
    pub lat: f64,
    /// Guessed longitude.
    pub lng: f64,
    /// Milliseconds since the Unix epoch.
    pub submitted_at: i64,
    /// Survival, once revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
}

impl From<&Submission> for PlayerEntry {
    fn from(submission: &Submission) -> Self {
        Self {
            player_id: submission.player_id.to_string(),
            lat: submission.position.lat,
            lng: submission.position.lng,
            submitted_at: submission.submitted_at.timestamp_millis(),
            alive: submission.alive.as_option(),
        }
    }
}

/// Zone as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneInfo {
    /// Center latitude.
    pub lat: f64,
    /// Center longitude.
    pub lng: f64,
    /// Radius in kilometers.
    pub radius_km: f64,
}

/// Round state sent to clients.
///
/// The zone stays hidden until the round is revealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round identifier.
    pub round_id: String,
    /// Sequential number.
    pub number: u64,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Store version the snapshot was taken at.
    pub version: u64,
    /// Start time (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Reveal time (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<i64>,
    /// Finish time (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    /// Play time left in milliseconds.
    pub time_remaining_ms: u64,
    /// Zone, once revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneInfo>,
    /// Submissions ordered by player.
    pub players: Vec<PlayerEntry>,
    /// Round state hash (hex).
    pub state_hash: String,
}

impl RoundSnapshot {
    /// Build from a round as of `now`.
    pub fn from_round(round: &Round, now: DateTime<Utc>, round_duration: Duration) -> Self {
        let zone = match round.status() {
            RoundStatus::Revealed | RoundStatus::Finished => Some(ZoneInfo {
                lat: round.zone().center.lat,
                lng: round.zone().center.lng,
                radius_km: round.zone().radius_km,
            }),
            RoundStatus::Waiting | RoundStatus::Playing => None,
        };

        Self {
            round_id: round.id().to_string(),
            number: round.number(),
            status: round.status(),
            version: round.version(),
            started_at: round.started_at().map(|t| t.timestamp_millis()),
            revealed_at: round.revealed_at().map(|t| t.timestamp_millis()),
            finished_at: round.finished_at().map(|t| t.timestamp_millis()),
            time_remaining_ms: round.time_remaining(now, round_duration).as_millis() as u64,
            zone,
            players: round.submissions().iter().map(PlayerEntry::from).collect(),
            state_hash: hex::encode(round.compute_hash()),
        }
    }
}

/// A change pushed to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundUpdate {
    /// What changed.
    pub event: RoundEventKind,
    /// Round after the change.
    pub round: RoundSnapshot,
    /// Commit time (ms since epoch).
    pub at: i64,
}

impl RoundUpdate {
    /// Build from a feed event.
    pub fn from_event(event: &RoundEvent, now: DateTime<Utc>, round_duration: Duration) -> Self {
        Self {
            event: event.kind.clone(),
            round: RoundSnapshot::from_round(&event.round, now, round_duration),
            at: event.at.timestamp_millis(),
        }
    }
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    /// Round identifier.
    pub round_id: String,
    /// Player identifier.
    pub player_id: String,
    /// Server receive time (ms since epoch).
    pub submitted_at: i64,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Create an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<&RoundError> for ServerError {
    fn from(err: &RoundError) -> Self {
        Self::new(ErrorCode::from(err), err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unparseable message or identifier.
    InvalidMessage,
    /// Coordinates out of range.
    InvalidPosition,
    /// No such round.
    RoundNotFound,
    /// Round no longer accepts submissions.
    RoundNotPlaying,
    /// Lost a race; retry.
    Conflict,
    /// Storage failure.
    StorageUnavailable,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&RoundError> for ErrorCode {
    fn from(err: &RoundError) -> Self {
        match err {
            RoundError::RoundNotFound(_) => ErrorCode::RoundNotFound,
            RoundError::RoundNotPlaying { .. } => ErrorCode::RoundNotPlaying,
            RoundError::InvalidPosition { .. } => ErrorCode::InvalidPosition,
            RoundError::ConcurrentModification(_) => ErrorCode::Conflict,
            RoundError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            RoundError::InvalidTransition { .. } => ErrorCode::InternalError,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::TimeZone;

    use crate::core::geo::GeoPosition;
    use crate::game::state::{PlayerId, RoundId, Zone};

    fn playing_round() -> (Round, DateTime<Utc>) {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let zone = Zone::new(GeoPosition::new(48.85, 2.35), 500.0);
        let mut round = Round::new(RoundId::new_v4(), 3, zone, 11, now);
        round.begin_playing(now).unwrap();
        round.record_submission("alice".into(), GeoPosition::new(48.0, 2.0), now).unwrap();
        round.record_submission("bob".into(), GeoPosition::new(-33.9, 151.2), now).unwrap();
        (round, now)
    }

    #[test]
    fn test_client_message_parse() {
        let json = r#"{"type":"submit","round_id":"r1","player_id":"p1","lat":1.5,"lng":-2.0}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Submit(SubmitRequest {
                round_id: "r1".into(),
                player_id: "p1".into(),
                lat: 1.5,
                lng: -2.0,
            })
        );

        let start = ClientMessage::from_json(r#"{"type":"start_round"}"#).unwrap();
        assert_eq!(start, ClientMessage::StartRound);
        assert!(ClientMessage::from_json(r#"{"type":"get_current_round"}"#).is_ok());
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_snapshot_hides_zone_while_playing() {
        let (round, now) = playing_round();
        let later = now + chrono::Duration::seconds(20);
        let snapshot = RoundSnapshot::from_round(&round, later, Duration::from_secs(60));

        assert_eq!(snapshot.status, RoundStatus::Playing);
        assert!(snapshot.zone.is_none());
        assert_eq!(snapshot.time_remaining_ms, 40_000);
        assert_eq!(snapshot.started_at, Some(now.timestamp_millis()));
        assert_eq!(snapshot.revealed_at, None);
        assert_eq!(snapshot.finished_at, None);
        assert_eq!(snapshot.players.len(), 2);
        assert!(snapshot.players.iter().all(|p| p.alive.is_none()));

        let json = ServerMessage::Round { round: Some(snapshot) }.to_json().unwrap();
        assert!(!json.contains("radius_km"));
        assert!(json.contains(r#""status":"playing""#));
    }

    #[test]
    fn test_snapshot_shows_zone_after_reveal() {
        let (mut round, now) = playing_round();
        let outcomes = BTreeMap::from([
            (PlayerId::from("alice"), true),
            (PlayerId::from("bob"), false),
        ]);
        round.reveal(now, &outcomes).unwrap();

        let snapshot = RoundSnapshot::from_round(&round, now, Duration::from_secs(60));
        assert_eq!(snapshot.zone.unwrap().radius_km, 500.0);
        assert_eq!(snapshot.time_remaining_ms, 0);
        assert_eq!(snapshot.players[0].player_id, "alice");
        assert_eq!(snapshot.players[0].alive, Some(true));
        assert_eq!(snapshot.players[1].alive, Some(false));
        assert_eq!(snapshot.state_hash, hex::encode(round.compute_hash()));
        assert_eq!(snapshot.revealed_at, Some(now.timestamp_millis()));
        assert_eq!(snapshot.finished_at, None);

        let finished_at = now + chrono::Duration::seconds(2);
        round.finish(finished_at).unwrap();
        let snapshot = RoundSnapshot::from_round(&round, finished_at, Duration::from_secs(60));
        assert_eq!(snapshot.finished_at, Some(finished_at.timestamp_millis()));
        assert_eq!(snapshot.status, RoundStatus::Finished);
    }

    #[test]
    fn test_update_message() {
        let (round, now) = playing_round();
        let event = RoundEvent::submission_recorded(&round, "bob".into(), now);
        let msg = ServerMessage::Update(RoundUpdate::from_event(&event, now, Duration::from_secs(60)));

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"update""#));
        assert!(json.contains(r#""kind":"submission_recorded""#));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_codes() {
        let err = RoundError::RoundNotFound(RoundId::new_v4());
        let msg = ServerMessage::Error(ServerError::from(&err));
        let json = msg.to_json().unwrap();
        assert!(json.contains("round_not_found"));

        let conflict = RoundError::ConcurrentModification("x".into());
        assert_eq!(ErrorCode::from(&conflict), ErrorCode::Conflict);
    }
}
