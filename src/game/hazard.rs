//! Bomb fuses, explosion propagation, death detection

use tokio::time::{Duration, Instant};

use crate::game::grid::{occupied_cell, Grid, Tile};
use crate::game::room::PlayerState;
use crate::ws::protocol::{BlastCell, BlastKind};

/// Fuse length from placement to detonation
pub const BOMB_FUSE: Duration = Duration::from_millis(3000);

/// Visible lifetime of an explosion (it hit-tests for this long)
pub const EXPLOSION_TTL: Duration = Duration::from_millis(500);

/// A placed bomb awaiting detonation
#[derive(Debug, Clone)]
pub struct Bomb {
    pub col: i32,
    pub row: i32,
    pub power: u32,
    /// Seat number of the owning player
    pub owner: u8,
    pub detonates_at: Instant,
}

/// A live explosion, purely transient
#[derive(Debug, Clone)]
pub struct Explosion {
    pub cells: Vec<BlastCell>,
    pub expires_at: Instant,
}

impl Explosion {
    pub fn covers(&self, col: i32, row: i32) -> bool {
        self.cells.iter().any(|c| c.col == col && c.row == row)
    }
}

/// Discrete hazard systems: bomb countdown, blast propagation, deaths
pub struct HazardSystem;

impl HazardSystem {
    /// Detonate every bomb whose timestamp has passed: clear its grid cell,
    /// spawn the explosion, drop it from the live list.
    pub fn update_bombs(
        grid: &mut Grid,
        bombs: &mut Vec<Bomb>,
        explosions: &mut Vec<Explosion>,
        now: Instant,
    ) {
        let mut i = 0;
        while i < bombs.len() {
            if now >= bombs[i].detonates_at {
                let bomb = bombs.remove(i);
                grid.set(bomb.col, bomb.row, Tile::Empty);
                explosions.push(Self::spawn_explosion(
                    grid, bomb.col, bomb.row, bomb.power, now,
                ));
            } else {
                i += 1;
            }
        }
    }

    /// Propagate a blast from its origin cell. Each cardinal arm extends up to
    /// `power` cells, stopping before walls and map edges, and stopping after
    /// (and clearing) the first crate. An arm that reaches full range gets a
    /// directional tip, intermediate cells are tagged h/v.
    pub fn spawn_explosion(grid: &mut Grid, col: i32, row: i32, power: u32, now: Instant) -> Explosion {
        let mut cells = vec![BlastCell {
            col,
            row,
            kind: BlastKind::Center,
        }];

        let arms = [
            (0i32, 1i32, BlastKind::South, BlastKind::Vertical),
            (0, -1, BlastKind::North, BlastKind::Vertical),
            (1, 0, BlastKind::East, BlastKind::Horizontal),
            (-1, 0, BlastKind::West, BlastKind::Horizontal),
        ];

        for (dx, dy, tip, body) in arms {
            for i in 1..=power as i32 {
                let next_col = col + dx * i;
                let next_row = row + dy * i;

                let tile = match grid.tile(next_col, next_row) {
                    None | Some(Tile::Wall) => break,
                    Some(tile) => tile,
                };

                let kind = if i == power as i32 { tip } else { body };
                cells.push(BlastCell {
                    col: next_col,
                    row: next_row,
                    kind,
                });

                if tile == Tile::Crate {
                    grid.set(next_col, next_row, Tile::Empty);
                    break;
                }
            }
        }

        Explosion {
            cells,
            expires_at: now + EXPLOSION_TTL,
        }
    }

    /// Drop explosions whose lifetime has elapsed
    pub fn expire_explosions(explosions: &mut Vec<Explosion>, now: Instant) {
        explosions.retain(|e| now < e.expires_at);
    }

    /// Kill every alive player whose occupied cell lies inside a live blast
    pub fn check_deaths(players: &mut [PlayerState], explosions: &[Explosion]) {
        for player in players.iter_mut().filter(|p| p.alive) {
            let (col, row) = occupied_cell(player.x, player.y);
            if explosions.iter().any(|e| e.covers(col, row)) {
                player.alive = false;
            }
        }
    }
}
