//! Player movement resolution against the tile grid

use crate::game::grid::{Grid, Tile, TILE_SIZE};
use crate::game::room::PlayerState;
use crate::ws::protocol::{Direction, KeyState};

/// Movement speed in world units per tick
pub const PLAYER_SPEED: f32 = 2.0;

/// Player bounding box edge length (fraction of a tile)
pub const PLAYER_BOX: f32 = TILE_SIZE * 0.7;

/// Corner-sampling movement system. One axis of motion per tick, each axis
/// validated independently against the four bounding-box corners.
pub struct MovementSystem;

impl MovementSystem {
    /// Derive the axis-priority velocity for this tick from held keys.
    /// Priority order: up, down, left, right; never diagonal.
    pub fn intent(keys: &KeyState) -> (f32, f32, Option<Direction>) {
        if keys.up {
            (0.0, -PLAYER_SPEED, Some(Direction::North))
        } else if keys.down {
            (0.0, PLAYER_SPEED, Some(Direction::South))
        } else if keys.left {
            (-PLAYER_SPEED, 0.0, Some(Direction::West))
        } else if keys.right {
            (PLAYER_SPEED, 0.0, Some(Direction::East))
        } else {
            (0.0, 0.0, None)
        }
    }

    /// Advance one player by one tick
    pub fn resolve(grid: &Grid, player: &mut PlayerState) {
        if !player.alive {
            return;
        }

        let (dx, dy, facing) = Self::intent(&player.keys);
        if let Some(facing) = facing {
            player.facing = facing;
        }
        if dx == 0.0 && dy == 0.0 {
            return;
        }

        // Resolve axes independently: x first, then y from the updated x
        if !Self::blocked(grid, player.x, player.y, player.x + dx, player.y) {
            player.x += dx;
        }
        if !Self::blocked(grid, player.x, player.y, player.x, player.y + dy) {
            player.y += dy;
        }
    }

    /// Corner-sampling collision test for a candidate position.
    /// A corner blocks when it lands out of bounds, on a wall, or on a crate.
    /// A bomb tile blocks unless the current bounding box already overlaps
    /// that cell, which lets a player walk off a bomb it just placed.
    pub fn blocked(grid: &Grid, cur_x: f32, cur_y: f32, cand_x: f32, cand_y: f32) -> bool {
        let current_cells = Self::corners(cur_x, cur_y).map(Self::cell_of);

        for corner in Self::corners(cand_x, cand_y) {
            let cell = Self::cell_of(corner);
            match grid.tile(cell.0, cell.1) {
                None | Some(Tile::Wall) | Some(Tile::Crate) => return true,
                Some(Tile::Bomb) => {
                    if !current_cells.contains(&cell) {
                        return true;
                    }
                }
                Some(Tile::Empty) => {}
            }
        }
        false
    }

    /// Bounding-box corners: top-left, top-right, bottom-left, bottom-right
    fn corners(x: f32, y: f32) -> [(f32, f32); 4] {
        [
            (x, y),
            (x + PLAYER_BOX, y),
            (x, y + PLAYER_BOX),
            (x + PLAYER_BOX, y + PLAYER_BOX),
        ]
    }

    fn cell_of((x, y): (f32, f32)) -> (i32, i32) {
        (
            (x / TILE_SIZE).floor() as i32,
            (y / TILE_SIZE).floor() as i32,
        )
    }
}
