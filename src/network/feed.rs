//! Change Feed
//!
//! Fan-out of committed round changes to observers. Publishing never
//! waits: a receiver that falls behind loses the oldest updates and is
//! told so on its next `recv`, while the coordinator moves on.

use tokio::sync::broadcast;
use tracing::trace;

use crate::game::events::RoundEvent;
use crate::game::state::Round;

/// Default number of buffered updates per receiver.
pub const FEED_CAPACITY: usize = 256;

/// Publishes round changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<RoundEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(FEED_CAPACITY)
    }
}

impl ChangeNotifier {
    /// Create a notifier buffering `capacity` updates per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current receivers. Returns how many there were.
    pub fn publish(&self, event: RoundEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No feed subscribers");
                0
            }
        }
    }

    /// New receiver seeing every update published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }

    /// Live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// An observer's view of the current round.
///
/// Attach by subscribing first, then seeding the view with one snapshot
/// fetch; afterwards only feed updates move it, and an update older than
/// what the view holds is dropped.
#[derive(Debug, Clone, Default)]
pub struct RoundFeedView {
    current: Option<Round>,
}

impl RoundFeedView {
    /// Seed from a snapshot.
    pub fn from_snapshot(snapshot: Option<Round>) -> Self {
        Self { current: snapshot }
    }

    /// Apply an update. Returns whether the view changed.
    pub fn apply(&mut self, event: &RoundEvent) -> bool {
        let newer = match &self.current {
            Some(current) => event.supersedes(current),
            None => true,
        };
        if newer {
            self.current = Some(event.round.clone());
        }
        newer
    }

    /// Round being shown.
    pub fn current(&self) -> Option<&Round> {
        self.current.as_ref()
    }
}
