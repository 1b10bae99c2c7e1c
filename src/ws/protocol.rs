//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::grid::Grid;
use crate::game::room::RoomStatus;

/// Held movement keys reported by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Facing direction of a player sprite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "n")]
    North,
    #[default]
    #[serde(rename = "s")]
    South,
    #[serde(rename = "e")]
    East,
    #[serde(rename = "w")]
    West,
}

/// Blast-shape role of an explosion cell, used by the client to pick a sprite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlastKind {
    #[serde(rename = "center")]
    Center,
    #[serde(rename = "h")]
    Horizontal,
    #[serde(rename = "v")]
    Vertical,
    /// Directional tips of a blast arm that reached full range
    #[serde(rename = "n")]
    North,
    #[serde(rename = "s")]
    South,
    #[serde(rename = "e")]
    East,
    #[serde(rename = "w")]
    West,
}

/// A single grid cell covered by an explosion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastCell {
    pub col: i32,
    pub row: i32,
    #[serde(rename = "type")]
    pub kind: BlastKind,
}

/// Payload of intents that carry no data. Clients send these either bare
/// (`{"type":"placeBomb"}`) or with an empty object (`"payload":{}`); the
/// `Option` content accepts both forms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Open a new room and join it as host
    CreateGame { nickname: String },

    /// Join an existing room by code
    #[serde(rename_all = "camelCase")]
    JoinGame { game_id: String, nickname: String },

    /// Start the match (host only, needs at least 2 players)
    StartGame(Option<EmptyPayload>),

    /// Replace the sender's held-key state
    KeyUpdate { keys: KeyState },

    /// Drop a bomb at the sender's current cell
    PlaceBomb(Option<EmptyPayload>),

    /// Vote for a rematch after the match finished
    RequestRematch(Option<EmptyPayload>),
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    #[serde(rename_all = "camelCase")]
    Connected { client_id: Uuid },

    /// Roster change while the room is in the lobby
    #[serde(rename_all = "camelCase")]
    LobbyUpdate {
        game_id: String,
        players: Vec<PlayerSnapshot>,
        host_id: Uuid,
    },

    /// Match started (initial state included)
    #[serde(rename_all = "camelCase")]
    GameStarted { game_state: GameState },

    /// Per-tick state snapshot
    #[serde(rename_all = "camelCase")]
    GameUpdate { game_state: GameState },

    /// Match outcome; `winner_nickname` is null on a draw
    #[serde(rename_all = "camelCase")]
    GameOver {
        winner_nickname: Option<String>,
        votes: usize,
        total_players: usize,
    },

    /// Rematch vote tally changed
    #[serde(rename_all = "camelCase")]
    RematchUpdate { votes: usize, total_players: usize },

    /// Room torn down (rematch window expired)
    GameClosed { message: String },

    /// Protocol error, sent only to the offending client
    Error { message: String },

    /// Legacy notification: a player dropped during an active match
    OpponentDisconnected,
}

/// Full room state as broadcast to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub players: Vec<PlayerSnapshot>,
    pub bombs: Vec<BombSnapshot>,
    pub explosions: Vec<ExplosionSnapshot>,
    pub grid: Grid,
    pub status: RoomStatus,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Seat number within the room
    pub id: u8,
    pub nickname: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub is_alive: bool,
    pub bombs_max: u32,
    pub bomb_power: u32,
}

/// Live bomb in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BombSnapshot {
    pub col: i32,
    pub row: i32,
    /// Seat number of the owning player
    pub owner: u8,
    pub power: u32,
}

/// Live explosion in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplosionSnapshot {
    pub cells: Vec<BlastCell>,
}
