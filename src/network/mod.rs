//! Network Layer
//!
//! Change feed and WebSocket front end. Nothing here decides round
//! outcomes; every command goes through `game::RoundCoordinator`.

pub mod feed;
pub mod protocol;
pub mod server;

pub use feed::{ChangeNotifier, RoundFeedView, FEED_CAPACITY};
pub use protocol::{ClientMessage, ServerMessage, RoundSnapshot, RoundUpdate, ErrorCode};
pub use server::{GameServer, GameServerError};
