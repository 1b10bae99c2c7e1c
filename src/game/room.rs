//! Room state, lifecycle state machine and authoritative tick loop

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::grid::{occupied_cell, Grid, Tile};
use crate::game::hazard::{Bomb, Explosion, HazardSystem, BOMB_FUSE};
use crate::game::physics::MovementSystem;
use crate::game::snapshot;
use crate::game::{Outbox, RoomCommand};
use crate::util::time::TICK_DURATION_MICROS;
use crate::ws::protocol::{Direction, KeyState, ServerMsg};

/// Room capacity (the spawn table has four corners)
pub const MAX_PLAYERS: usize = 4;

/// Minimum players before the host may start
pub const MIN_PLAYERS: usize = 2;

/// How long a finished room waits for a unanimous rematch vote
pub const REMATCH_WINDOW: Duration = Duration::from_secs(30);

/// Room code alphabet: uppercase letters minus the ambiguous O/0 pair,
/// plus digits 1-9
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ123456789";
const ROOM_CODE_LEN: usize = 5;

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Lobby, accepting joins
    Waiting,
    /// Match in progress
    Active,
    /// Match over, rematch window open
    Finished,
}

/// Why a join request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Game not found.")]
    NotFound,
    #[error("Game has already started.")]
    Started,
    #[error("Game is full.")]
    Full,
    #[error("Nickname is already taken.")]
    NicknameTaken,
}

/// Player state in a room (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub session_id: Uuid,
    /// Seat number, also the spawn-corner index
    pub seat: u8,
    pub nickname: String,

    // Position and movement
    pub x: f32,
    pub y: f32,
    pub facing: Direction,
    pub keys: KeyState,

    pub alive: bool,
    pub bombs_max: u32,
    pub bomb_power: u32,
}

impl PlayerState {
    pub fn new(session_id: Uuid, seat: u8, nickname: String) -> Self {
        let (x, y) = Grid::spawn_point(seat);
        Self {
            session_id,
            seat,
            nickname,
            x,
            y,
            facing: Direction::default(),
            keys: KeyState::default(),
            alive: true,
            bombs_max: 1,
            bomb_power: 2,
        }
    }

    /// Reposition at the seat spawn and clear transient match state
    fn respawn(&mut self) {
        let (x, y) = Grid::spawn_point(self.seat);
        self.x = x;
        self.y = y;
        self.facing = Direction::default();
        self.keys = KeyState::default();
        self.alive = true;
    }
}

/// A connected client of a room
#[derive(Debug, Clone)]
pub struct SessionSeat {
    pub session_id: Uuid,
    pub outbox: Outbox,
}

/// Room state (owned by the room task)
pub struct RoomState {
    pub code: String,
    pub status: RoomStatus,
    pub sessions: Vec<SessionSeat>,
    pub players: Vec<PlayerState>,
    pub grid: Grid,
    pub bombs: Vec<Bomb>,
    pub explosions: Vec<Explosion>,
    pub host: Uuid,
    pub rematch_votes: HashSet<Uuid>,
    pub rematch_deadline: Option<Instant>,
    pub last_update: Instant,
}

impl RoomState {
    pub fn new(code: String) -> Self {
        Self {
            code,
            status: RoomStatus::Waiting,
            sessions: Vec::new(),
            players: Vec::new(),
            grid: Grid::initial(),
            bombs: Vec::new(),
            explosions: Vec::new(),
            host: Uuid::nil(),
            rematch_votes: HashSet::new(),
            rematch_deadline: None,
            last_update: Instant::now(),
        }
    }

    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    fn player(&self, session_id: Uuid) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.session_id == session_id)
    }

    fn player_mut(&mut self, session_id: Uuid) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.session_id == session_id)
    }
}

/// Handle to a running room task
#[derive(Clone)]
pub struct RoomHandle {
    pub code: String,
    pub command_tx: mpsc::Sender<RoomCommand>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all live rooms, keyed by room code
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn get(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|r| r.value().clone())
    }

    pub fn insert(&self, handle: RoomHandle) {
        self.rooms.insert(handle.code.clone(), handle);
    }

    pub fn remove(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.remove(code).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Generate a room code that does not collide with any live room
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a room, register it and spawn its task. The registry entry is
    /// removed when the task ends, whatever the teardown path was.
    pub fn open_room(self: &Arc<Self>) -> RoomHandle {
        let code = self.generate_code();
        let (room, handle) = GameRoom::new(code.clone());
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            room.run().await;
            registry.remove(&code);
            info!(room = %code, "Room removed from registry");
        });

        handle
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game room: lifecycle state machine plus tick driver
pub struct GameRoom {
    state: RoomState,
    command_rx: mpsc::Receiver<RoomCommand>,
    player_count: Arc<AtomicUsize>,
    /// Set on every terminal transition; the task loop exits when true
    done: bool,
}

impl GameRoom {
    pub fn new(code: String) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            code: code.clone(),
            command_tx,
            player_count: player_count.clone(),
        };

        let room = Self {
            state: RoomState::new(code),
            command_rx,
            player_count,
            done: false,
        };

        (room, handle)
    }

    /// Run the room task: commands are handled to completion between ticks,
    /// so a message and a tick never interleave mid-mutation. The tick branch
    /// is armed only while the match is active; the rematch deadline only
    /// while finished. Dropping out of this loop is the single teardown path
    /// and cancels both timers structurally.
    pub async fn run(mut self) {
        info!(room = %self.state.code, "Room opened");

        let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let rematch_deadline = self.state.rematch_deadline;

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            let was_active = self.state.status == RoomStatus::Active;
                            self.handle_command(cmd);
                            if !was_active && self.state.status == RoomStatus::Active {
                                ticker.reset();
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick(), if self.state.status == RoomStatus::Active => {
                    self.run_tick();
                }
                _ = rematch_expiry(rematch_deadline), if rematch_deadline.is_some() => {
                    self.close_expired();
                }
            }

            if self.done {
                break;
            }
        }

        info!(room = %self.state.code, "Room task ended");
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                session_id,
                nickname,
                outbox,
                reply,
            } => self.handle_join(session_id, nickname, outbox, reply),
            RoomCommand::Start { session_id } => self.handle_start(session_id),
            RoomCommand::KeyUpdate { session_id, keys } => {
                if let Some(player) = self.state.player_mut(session_id) {
                    player.keys = keys;
                }
            }
            RoomCommand::PlaceBomb { session_id } => self.handle_place_bomb(session_id),
            RoomCommand::RequestRematch { session_id } => self.handle_rematch(session_id),
            RoomCommand::Leave { session_id } => self.handle_leave(session_id),
        }
    }

    fn handle_join(
        &mut self,
        session_id: Uuid,
        nickname: String,
        outbox: Outbox,
        reply: tokio::sync::oneshot::Sender<Result<(), JoinError>>,
    ) {
        let verdict = self.admit(session_id, nickname, outbox);
        let accepted = verdict.is_ok();
        let _ = reply.send(verdict);

        if accepted {
            self.player_count
                .store(self.state.sessions.len(), Ordering::Relaxed);
            info!(
                room = %self.state.code,
                session_id = %session_id,
                player_count = self.state.players.len(),
                "Player joined room"
            );
            self.broadcast_lobby();
        }
    }

    fn admit(&mut self, session_id: Uuid, nickname: String, outbox: Outbox) -> Result<(), JoinError> {
        if self.state.status != RoomStatus::Waiting {
            return Err(JoinError::Started);
        }
        if self.state.players.len() >= MAX_PLAYERS {
            return Err(JoinError::Full);
        }
        if self
            .state
            .players
            .iter()
            .any(|p| p.nickname.eq_ignore_ascii_case(&nickname))
        {
            return Err(JoinError::NicknameTaken);
        }

        // First session in becomes host
        if self.state.sessions.is_empty() {
            self.state.host = session_id;
        }

        let seat = self.state.players.len() as u8;
        self.state.sessions.push(SessionSeat { session_id, outbox });
        self.state.players.push(PlayerState::new(session_id, seat, nickname));
        Ok(())
    }

    fn handle_start(&mut self, session_id: Uuid) {
        if self.state.status != RoomStatus::Waiting {
            self.send_to(session_id, &ServerMsg::Error {
                message: "Game has already started.".to_string(),
            });
            return;
        }
        if session_id != self.state.host {
            self.send_to(session_id, &ServerMsg::Error {
                message: "Only the host can start the game.".to_string(),
            });
            return;
        }
        if self.state.players.len() < MIN_PLAYERS {
            self.send_to(session_id, &ServerMsg::Error {
                message: "Need at least 2 players to start.".to_string(),
            });
            return;
        }

        self.state.status = RoomStatus::Active;
        self.state.last_update = Instant::now();
        info!(
            room = %self.state.code,
            player_count = self.state.players.len(),
            "Match started"
        );
        self.broadcast(&ServerMsg::GameStarted {
            game_state: snapshot::build(&self.state),
        });
    }

    fn handle_place_bomb(&mut self, session_id: Uuid) {
        if self.state.status != RoomStatus::Active {
            return;
        }
        // Expected races (dead player, bomb limit, occupied cell) are no-ops
        let Some(player) = self.state.player(session_id).filter(|p| p.alive) else {
            return;
        };
        let (seat, power) = (player.seat, player.bomb_power);
        let (col, row) = occupied_cell(player.x, player.y);

        let owned = self.state.bombs.iter().filter(|b| b.owner == seat).count();
        if owned >= player.bombs_max as usize {
            return;
        }
        if self.state.grid.tile(col, row) != Some(Tile::Empty) {
            return;
        }

        self.state.grid.set(col, row, Tile::Bomb);
        self.state.bombs.push(Bomb {
            col,
            row,
            power,
            owner: seat,
            detonates_at: Instant::now() + BOMB_FUSE,
        });
    }

    fn handle_rematch(&mut self, session_id: Uuid) {
        if self.state.status != RoomStatus::Finished {
            return;
        }
        if !self
            .state
            .sessions
            .iter()
            .any(|s| s.session_id == session_id)
        {
            return;
        }

        // HashSet makes repeat votes from one session count once
        self.state.rematch_votes.insert(session_id);
        let votes = self.state.rematch_votes.len();
        let total = self.state.sessions.len();
        self.broadcast(&ServerMsg::RematchUpdate {
            votes,
            total_players: total,
        });

        if votes >= total {
            self.reset_room();
        }
    }

    /// Unanimous rematch: fresh grid and hazards, same identities and seats
    fn reset_room(&mut self) {
        info!(room = %self.state.code, "Rematch accepted, resetting room");

        let connected: HashSet<Uuid> =
            self.state.sessions.iter().map(|s| s.session_id).collect();
        self.state.players.retain(|p| connected.contains(&p.session_id));

        self.state.grid = Grid::initial();
        self.state.bombs.clear();
        self.state.explosions.clear();
        self.state.rematch_votes.clear();
        self.state.rematch_deadline = None;
        for player in &mut self.state.players {
            player.respawn();
        }

        self.state.status = RoomStatus::Active;
        self.state.last_update = Instant::now();
        self.broadcast(&ServerMsg::GameStarted {
            game_state: snapshot::build(&self.state),
        });
    }

    fn handle_leave(&mut self, session_id: Uuid) {
        let Some(pos) = self
            .state
            .sessions
            .iter()
            .position(|s| s.session_id == session_id)
        else {
            return;
        };
        self.state.sessions.remove(pos);
        self.state.rematch_votes.remove(&session_id);
        self.player_count
            .store(self.state.sessions.len(), Ordering::Relaxed);

        info!(
            room = %self.state.code,
            session_id = %session_id,
            remaining = self.state.sessions.len(),
            "Session left room"
        );

        if self.state.sessions.is_empty() {
            self.done = true;
            return;
        }

        // Host role transfers to the first remaining session
        if self.state.host == session_id {
            self.state.host = self.state.sessions[0].session_id;
        }

        match self.state.status {
            RoomStatus::Waiting => {
                // Pre-start leave removes the player and compacts seats
                self.state.players.retain(|p| p.session_id != session_id);
                for (i, player) in self.state.players.iter_mut().enumerate() {
                    player.seat = i as u8;
                    player.respawn();
                }
                self.broadcast_lobby();
            }
            RoomStatus::Active => {
                // Keep the roster entry so win bookkeeping stays consistent;
                // the next tick resolves the win condition
                if let Some(player) = self.state.player_mut(session_id) {
                    player.alive = false;
                }
                self.broadcast(&ServerMsg::OpponentDisconnected);
            }
            RoomStatus::Finished => {
                // The departed vote may have been the holdout
                if self.state.rematch_votes.len() >= self.state.sessions.len() {
                    self.reset_room();
                }
            }
        }
    }

    /// Advance the simulation by one tick. Pipeline order is a gameplay
    /// invariant: movement, then bomb countdown, then explosion aging, then
    /// death checks, then the win check.
    fn run_tick(&mut self) {
        let now = Instant::now();
        self.state.last_update = now;

        let RoomState {
            grid,
            players,
            bombs,
            explosions,
            ..
        } = &mut self.state;

        for player in players.iter_mut() {
            MovementSystem::resolve(grid, player);
        }
        HazardSystem::update_bombs(grid, bombs, explosions, now);
        HazardSystem::expire_explosions(explosions, now);
        HazardSystem::check_deaths(players, explosions);

        if self.state.alive_count() <= 1 {
            let winner = self
                .state
                .players
                .iter()
                .find(|p| p.alive)
                .map(|p| p.nickname.clone());
            self.finish_match(winner);
            return;
        }

        self.broadcast(&ServerMsg::GameUpdate {
            game_state: snapshot::build(&self.state),
        });
    }

    fn finish_match(&mut self, winner: Option<String>) {
        self.state.status = RoomStatus::Finished;
        self.state.rematch_votes.clear();
        self.state.rematch_deadline = Some(Instant::now() + REMATCH_WINDOW);

        info!(
            room = %self.state.code,
            winner = winner.as_deref().unwrap_or("<draw>"),
            "Match finished"
        );

        // Final state so clients render the killing blast, then the verdict
        self.broadcast(&ServerMsg::GameUpdate {
            game_state: snapshot::build(&self.state),
        });
        self.broadcast(&ServerMsg::GameOver {
            winner_nickname: winner,
            votes: 0,
            total_players: self.state.sessions.len(),
        });
    }

    fn close_expired(&mut self) {
        info!(
            room = %self.state.code,
            idle = ?self.state.last_update.elapsed(),
            "Rematch window expired, closing room"
        );
        self.broadcast(&ServerMsg::GameClosed {
            message: "Rematch window expired.".to_string(),
        });
        self.done = true;
    }

    fn broadcast(&self, msg: &ServerMsg) {
        for session in &self.state.sessions {
            // A full/closed outbox means the session is going away; Leave
            // will follow through the gateway
            let _ = session.outbox.send(msg.clone());
        }
    }

    fn send_to(&self, session_id: Uuid, msg: &ServerMsg) {
        if let Some(session) = self
            .state
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
        {
            let _ = session.outbox.send(msg.clone());
        } else {
            debug!(room = %self.state.code, session_id = %session_id, "No such session");
        }
    }

    fn broadcast_lobby(&self) {
        self.broadcast(&ServerMsg::LobbyUpdate {
            game_id: self.state.code.clone(),
            players: snapshot::player_snapshots(&self.state.players),
            host_id: self.state.host,
        });
    }
}

async fn rematch_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::TILE_SIZE;
    use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

    struct TestSession {
        id: Uuid,
        rx: UnboundedReceiver<ServerMsg>,
    }

    impl TestSession {
        fn drain(&mut self) -> Vec<ServerMsg> {
            let mut msgs = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                msgs.push(msg);
            }
            msgs
        }
    }

    fn join(room: &mut GameRoom, nickname: &str) -> (TestSession, Result<(), JoinError>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        room.handle_command(RoomCommand::Join {
            session_id: id,
            nickname: nickname.to_string(),
            outbox,
            reply: reply_tx,
        });
        let verdict = reply_rx.try_recv().expect("join always gets a reply");
        (TestSession { id, rx }, verdict)
    }

    fn two_player_match() -> (GameRoom, TestSession, TestSession) {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        let (ada, verdict) = join(&mut room, "ada");
        verdict.unwrap();
        let (bob, verdict) = join(&mut room, "bob");
        verdict.unwrap();
        room.handle_command(RoomCommand::Start { session_id: ada.id });
        assert_eq!(room.state.status, RoomStatus::Active);
        (room, ada, bob)
    }

    #[test]
    fn duplicate_nickname_is_rejected_case_insensitively() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        let (_ada, verdict) = join(&mut room, "Ada");
        verdict.unwrap();

        let (_imposter, verdict) = join(&mut room, "ada");
        let err = verdict.unwrap_err();
        assert_eq!(err, JoinError::NicknameTaken);
        assert_eq!(err.to_string(), "Nickname is already taken.");
        assert_eq!(room.state.players.len(), 1);
    }

    #[test]
    fn join_rejected_when_full_or_started() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        for name in ["a", "b", "c", "d"] {
            let (_s, verdict) = join(&mut room, name);
            verdict.unwrap();
        }
        let (_s, verdict) = join(&mut room, "e");
        assert_eq!(verdict.unwrap_err(), JoinError::Full);

        room.state.status = RoomStatus::Active;
        let (_s, verdict) = join(&mut room, "f");
        assert_eq!(verdict.unwrap_err(), JoinError::Started);
    }

    #[test]
    fn only_host_with_enough_players_can_start() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        let (mut ada, _) = join(&mut room, "ada");

        // Alone: refused
        room.handle_command(RoomCommand::Start { session_id: ada.id });
        assert_eq!(room.state.status, RoomStatus::Waiting);
        assert!(ada.drain().iter().any(|m| matches!(
            m,
            ServerMsg::Error { message } if message == "Need at least 2 players to start."
        )));

        let (mut bob, _) = join(&mut room, "bob");

        // Non-host: refused
        room.handle_command(RoomCommand::Start { session_id: bob.id });
        assert_eq!(room.state.status, RoomStatus::Waiting);
        assert!(bob.drain().iter().any(|m| matches!(
            m,
            ServerMsg::Error { message } if message == "Only the host can start the game."
        )));

        // Host with two players: match begins
        room.handle_command(RoomCommand::Start { session_id: ada.id });
        assert_eq!(room.state.status, RoomStatus::Active);
        assert!(ada
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMsg::GameStarted { .. })));
    }

    #[test]
    fn bomb_placement_respects_limit_and_occupied_cells() {
        let (mut room, ada, bob) = two_player_match();

        room.handle_command(RoomCommand::PlaceBomb { session_id: ada.id });
        assert_eq!(room.state.bombs.len(), 1);

        // Bomb limit: a second placement from the same player is a no-op
        room.handle_command(RoomCommand::PlaceBomb { session_id: ada.id });
        assert_eq!(room.state.bombs.len(), 1);

        // Occupied cell: force a bomb tile under bob, then try to place
        let player = room.state.player(bob.id).unwrap();
        let (col, row) = occupied_cell(player.x, player.y);
        room.state.grid.set(col, row, Tile::Bomb);
        let grid_before = room.state.grid.clone();

        room.handle_command(RoomCommand::PlaceBomb { session_id: bob.id });
        assert_eq!(room.state.bombs.len(), 1);
        assert_eq!(room.state.grid, grid_before);
    }

    #[test]
    fn dead_players_cannot_place_bombs() {
        let (mut room, ada, _bob) = two_player_match();
        room.state.player_mut(ada.id).unwrap().alive = false;

        room.handle_command(RoomCommand::PlaceBomb { session_id: ada.id });
        assert!(room.state.bombs.is_empty());
    }

    #[test]
    fn sole_survivor_wins() {
        let (mut room, mut ada, bob) = two_player_match();
        room.state.player_mut(bob.id).unwrap().alive = false;

        room.run_tick();
        assert_eq!(room.state.status, RoomStatus::Finished);
        assert!(ada.drain().iter().any(|m| matches!(
            m,
            ServerMsg::GameOver { winner_nickname: Some(name), total_players: 2, .. }
                if name == "ada"
        )));
    }

    #[test]
    fn simultaneous_deaths_are_a_draw() {
        let (mut room, mut ada, bob) = two_player_match();
        room.state.player_mut(ada.id).unwrap().alive = false;
        room.state.player_mut(bob.id).unwrap().alive = false;

        room.run_tick();
        assert_eq!(room.state.status, RoomStatus::Finished);
        assert!(ada.drain().iter().any(|m| matches!(
            m,
            ServerMsg::GameOver { winner_nickname: None, .. }
        )));
    }

    #[test]
    fn repeat_rematch_votes_count_once() {
        let (mut room, mut ada, _bob) = two_player_match();
        room.state.player_mut(ada.id).unwrap().alive = false;
        room.state.player_mut(_bob.id).unwrap().alive = false;
        room.run_tick();
        assert_eq!(room.state.status, RoomStatus::Finished);
        ada.drain();

        room.handle_command(RoomCommand::RequestRematch { session_id: ada.id });
        room.handle_command(RoomCommand::RequestRematch { session_id: ada.id });

        assert_eq!(room.state.rematch_votes.len(), 1);
        assert_eq!(room.state.status, RoomStatus::Finished);
        let updates: Vec<_> = ada
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::RematchUpdate { .. }))
            .collect();
        assert_eq!(updates.len(), 2);
        for update in updates {
            match update {
                ServerMsg::RematchUpdate { votes, total_players } => {
                    assert_eq!(votes, 1);
                    assert_eq!(total_players, 2);
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn unanimous_rematch_resets_the_room() {
        let (mut room, mut ada, bob) = two_player_match();

        // Scar the grid and state, then finish the match
        room.handle_command(RoomCommand::PlaceBomb { session_id: ada.id });
        room.state.player_mut(bob.id).unwrap().alive = false;
        room.run_tick();
        assert_eq!(room.state.status, RoomStatus::Finished);
        ada.drain();

        room.handle_command(RoomCommand::RequestRematch { session_id: ada.id });
        room.handle_command(RoomCommand::RequestRematch { session_id: bob.id });

        assert_eq!(room.state.status, RoomStatus::Active);
        assert_eq!(room.state.grid, Grid::initial());
        assert!(room.state.bombs.is_empty());
        assert!(room.state.explosions.is_empty());
        assert!(room.state.rematch_votes.is_empty());
        assert_eq!(room.state.rematch_deadline, None);
        for player in &room.state.players {
            assert!(player.alive);
            let (x, y) = Grid::spawn_point(player.seat);
            assert_eq!((player.x, player.y), (x, y));
        }
        assert!(ada
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMsg::GameStarted { .. })));
    }

    #[test]
    fn host_disconnect_promotes_first_remaining_session() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        let (host, _) = join(&mut room, "host");
        let (mut second, _) = join(&mut room, "second");
        let (_third, _) = join(&mut room, "third");
        second.drain();

        room.handle_command(RoomCommand::Leave { session_id: host.id });

        assert_eq!(room.state.host, second.id);
        assert_eq!(room.state.players.len(), 2);
        let lobby = second
            .drain()
            .into_iter()
            .rev()
            .find(|m| matches!(m, ServerMsg::LobbyUpdate { .. }))
            .expect("lobby update after host left");
        match lobby {
            ServerMsg::LobbyUpdate { players, host_id, .. } => {
                assert_eq!(players.len(), 2);
                assert_eq!(host_id, second.id);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn mid_match_disconnect_marks_dead_and_keeps_roster() {
        let (mut room, mut ada, bob) = two_player_match();
        ada.drain();

        room.handle_command(RoomCommand::Leave { session_id: bob.id });

        assert_eq!(room.state.players.len(), 2);
        assert!(!room.state.player(bob.id).unwrap().alive);
        assert!(ada
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMsg::OpponentDisconnected)));

        // Win bookkeeping resolves on the next tick
        room.run_tick();
        assert_eq!(room.state.status, RoomStatus::Finished);
    }

    #[test]
    fn room_with_no_sessions_is_done() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        let (ada, _) = join(&mut room, "ada");
        room.handle_command(RoomCommand::Leave { session_id: ada.id });
        assert!(room.done);
    }

    #[test]
    fn generated_codes_use_the_fixed_alphabet() {
        let registry = RoomRegistry::new();
        for _ in 0..32 {
            let code = registry.generate_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unconsumed_rematch_window_closes_the_room() {
        let (room, handle) = GameRoom::new("TESTX".to_string());
        let task = tokio::spawn(room.run());

        let mut sessions = Vec::new();
        for name in ["ada", "bob"] {
            let (outbox, rx) = mpsc::unbounded_channel();
            let (reply_tx, reply_rx) = oneshot::channel();
            let id = Uuid::new_v4();
            handle
                .command_tx
                .send(RoomCommand::Join {
                    session_id: id,
                    nickname: name.to_string(),
                    outbox,
                    reply: reply_tx,
                })
                .await
                .unwrap();
            reply_rx.await.unwrap().unwrap();
            sessions.push(TestSession { id, rx });
        }

        handle
            .command_tx
            .send(RoomCommand::Start {
                session_id: sessions[0].id,
            })
            .await
            .unwrap();
        // Host drops a bomb and stands on it; bob survives at his corner
        handle
            .command_tx
            .send(RoomCommand::PlaceBomb {
                session_id: sessions[0].id,
            })
            .await
            .unwrap();

        // Fuse (3s) plus the untouched 30s rematch window
        tokio::time::sleep(Duration::from_secs(40)).await;

        // The task ending proves the scheduler and rematch timer are gone
        task.await.unwrap();

        let msgs = sessions[1].drain();
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::GameOver { winner_nickname: Some(name), .. } if name == "bob"
        )));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::GameClosed { .. })));
    }

    #[test]
    fn players_spawn_at_seat_corners() {
        let (mut room, _handle) = GameRoom::new("TEST1".to_string());
        for name in ["a", "b", "c", "d"] {
            let (_s, verdict) = join(&mut room, name);
            verdict.unwrap();
        }
        let positions: Vec<_> = room.state.players.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(positions[0], (TILE_SIZE, TILE_SIZE));
        assert_eq!(positions.len(), 4);
        // All four corners are distinct
        let unique: HashSet<_> = positions
            .iter()
            .map(|&(x, y)| (x as i32, y as i32))
            .collect();
        assert_eq!(unique.len(), 4);
    }
}
