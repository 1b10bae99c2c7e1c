//! Game simulation modules

pub mod grid;
pub mod hazard;
pub mod physics;
pub mod room;
pub mod snapshot;

pub use room::{GameRoom, RoomHandle, RoomRegistry};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::game::room::JoinError;
use crate::ws::protocol::{KeyState, ServerMsg};

/// Per-session channel for messages addressed to one client
pub type Outbox = mpsc::UnboundedSender<ServerMsg>;

/// Client intent routed to a room task. The session gateway maps wire
/// messages onto this closed set; rooms dispatch by exhaustive match.
#[derive(Debug)]
pub enum RoomCommand {
    /// Add a session to the room. The responder carries join rejections
    /// back to the originating client only.
    Join {
        session_id: Uuid,
        nickname: String,
        outbox: Outbox,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },

    /// Start the match (host only)
    Start { session_id: Uuid },

    /// Replace a player's held-key state
    KeyUpdate { session_id: Uuid, keys: KeyState },

    /// Drop a bomb at the player's occupied cell
    PlaceBomb { session_id: Uuid },

    /// Vote for a rematch
    RequestRematch { session_id: Uuid },

    /// Session disconnected
    Leave { session_id: Uuid },
}
