//! Snapshot building for broadcast to room members

use crate::game::room::{PlayerState, RoomState};
use crate::ws::protocol::{BombSnapshot, ExplosionSnapshot, GameState, PlayerSnapshot};

/// Build the full room state payload sent in `gameStarted`/`gameUpdate`
pub fn build(state: &RoomState) -> GameState {
    GameState {
        players: player_snapshots(&state.players),
        bombs: state
            .bombs
            .iter()
            .map(|b| BombSnapshot {
                col: b.col,
                row: b.row,
                owner: b.owner,
                power: b.power,
            })
            .collect(),
        explosions: state
            .explosions
            .iter()
            .map(|e| ExplosionSnapshot {
                cells: e.cells.clone(),
            })
            .collect(),
        grid: state.grid.clone(),
        status: state.status,
    }
}

pub fn player_snapshots(players: &[PlayerState]) -> Vec<PlayerSnapshot> {
    players
        .iter()
        .map(|p| PlayerSnapshot {
            id: p.seat,
            nickname: p.nickname.clone(),
            x: p.x,
            y: p.y,
            direction: p.facing,
            is_alive: p.alive,
            bombs_max: p.bombs_max,
            bomb_power: p.bomb_power,
        })
        .collect()
}
