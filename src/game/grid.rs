//! Tile grid model and coordinate geometry

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Map dimensions in tiles
pub const MAP_WIDTH: usize = 17;
pub const MAP_HEIGHT: usize = 13;

/// Tile edge length in world units (pixels on the reference client)
pub const TILE_SIZE: f32 = 48.0;

/// Inward offset from a player's top-left corner to its representative point.
/// This is the center of the 0.7-tile bounding box and is the single
/// convention used for both bomb placement and death detection.
pub const CELL_POINT_OFFSET: f32 = TILE_SIZE * 0.35;

/// A single map tile. Serialized as its numeric code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Empty,
    /// Destructible crate, cleared by explosions
    Crate,
    /// Indestructible wall
    Wall,
    /// Cell occupied by a live bomb
    Bomb,
}

impl Tile {
    pub fn code(self) -> u8 {
        match self {
            Tile::Empty => 0,
            Tile::Crate => 1,
            Tile::Wall => 2,
            Tile::Bomb => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Tile::Empty),
            1 => Some(Tile::Crate),
            2 => Some(Tile::Wall),
            3 => Some(Tile::Bomb),
            _ => None,
        }
    }
}

impl Serialize for Tile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Tile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Tile::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown tile code {}", code)))
    }
}

/// Initial map layout: outer wall ring, even-parity interior pillars, crates
/// elsewhere, with the four spawn corners (and a few scattered cells) cleared.
const INITIAL_LAYOUT: [[u8; MAP_WIDTH]; MAP_HEIGHT] = [
    [2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2],
    [2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 2],
    [2, 0, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 0, 2],
    [2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2],
    [2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2],
    [2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2],
    [2, 1, 2, 1, 2, 1, 2, 0, 2, 1, 2, 1, 2, 1, 2, 1, 2],
    [2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2],
    [2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2],
    [2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2],
    [2, 0, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 0, 2, 0, 2],
    [2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 2],
    [2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2],
];

/// Spawn corners by seat index, as (col, row)
const SPAWN_CELLS: [(usize, usize); 4] = [
    (1, 1),
    (MAP_WIDTH - 2, MAP_HEIGHT - 2),
    (MAP_WIDTH - 2, 1),
    (1, MAP_HEIGHT - 2),
];

/// The room-owned tile map. One instance per room, never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    tiles: Vec<Vec<Tile>>,
}

impl Grid {
    /// Deep-copy of the static initial layout
    pub fn initial() -> Self {
        let tiles = INITIAL_LAYOUT
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&code| Tile::from_code(code).unwrap_or(Tile::Wall))
                    .collect()
            })
            .collect();
        Self { tiles }
    }

    pub fn in_bounds(col: i32, row: i32) -> bool {
        col >= 0 && col < MAP_WIDTH as i32 && row >= 0 && row < MAP_HEIGHT as i32
    }

    /// Bounds-checked tile lookup
    pub fn tile(&self, col: i32, row: i32) -> Option<Tile> {
        if Self::in_bounds(col, row) {
            Some(self.tiles[row as usize][col as usize])
        } else {
            None
        }
    }

    /// Direct cell assignment (hazard engine only). Out-of-bounds is a no-op.
    pub fn set(&mut self, col: i32, row: i32, tile: Tile) {
        if Self::in_bounds(col, row) {
            self.tiles[row as usize][col as usize] = tile;
        }
    }

    /// World-space spawn position for a seat index (up to 4 seats)
    pub fn spawn_point(seat: u8) -> (f32, f32) {
        let (col, row) = SPAWN_CELLS[seat as usize % SPAWN_CELLS.len()];
        (col as f32 * TILE_SIZE, row as f32 * TILE_SIZE)
    }
}

/// Grid cell occupied by a player's representative point
pub fn occupied_cell(x: f32, y: f32) -> (i32, i32) {
    (
        ((x + CELL_POINT_OFFSET) / TILE_SIZE).floor() as i32,
        ((y + CELL_POINT_OFFSET) / TILE_SIZE).floor() as i32,
    )
}
