//! Arena geometry: grid, river, bridges, tower slots and legal placement.
//!
//! All coordinates are canonical arena pixels with the origin at the
//! top-left corner. Side 0 defends the bottom half, side 1 the top half.
//! Peers never flip coordinates; a renderer that wants its own side at the
//! bottom mirrors at draw time.

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec2Fixed};

/// Tile size that card distances and speeds are expressed in.
pub const REFERENCE_TILE_SIZE: u32 = 22;

/// Tower attack range in tiles.
pub const TOWER_RANGE_TILES: Fixed = Fixed::lit("5.5");

/// King tower hit points.
pub const KING_TOWER_HEALTH: u32 = 4000;

/// Princess tower hit points.
pub const PRINCESS_TOWER_HEALTH: u32 = 2500;

/// Damage per tower shot.
pub const TOWER_DAMAGE: u32 = 90;

/// Milliseconds between tower shots.
pub const TOWER_HIT_SPEED_MS: u32 = 800;

/// Where a tower stands at match setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TowerSlot {
    /// Defending side.
    pub side: u8,
    /// King or princess.
    pub is_king: bool,
    /// Centre of the tower.
    pub position: Vec2Fixed,
}

/// Grid dimensions and landmarks of the arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArenaLayout {
    /// Columns in the grid.
    pub cols: u32,
    /// Rows in the grid.
    pub rows: u32,
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Row occupied by the river.
    pub river_row: u32,
    /// Columns carrying a bridge, left then right.
    pub bridge_cols: [u32; 2],
    /// King tower row on side 0; side 1 uses the mirrored row.
    pub king_row: u32,
    /// Princess tower row on side 0; side 1 uses the mirrored row.
    pub princess_row: u32,
}

impl Default for ArenaLayout {
    fn default() -> Self {
        Self {
            cols: 24,
            rows: 45,
            tile_size: REFERENCE_TILE_SIZE,
            river_row: 22,
            bridge_cols: [6, 17],
            king_row: 41,
            princess_row: 35,
        }
    }
}

impl ArenaLayout {
    /// Arena width in pixels.
    #[must_use]
    pub fn width(&self) -> Fixed {
        Fixed::from_num(self.cols * self.tile_size)
    }

    /// Arena height in pixels.
    #[must_use]
    pub fn height(&self) -> Fixed {
        Fixed::from_num(self.rows * self.tile_size)
    }

    /// Tile size as a fixed-point value.
    #[must_use]
    pub fn tile(&self) -> Fixed {
        Fixed::from_num(self.tile_size)
    }

    /// Convert a tile count into pixels.
    #[must_use]
    pub fn tiles_to_px(&self, tiles: Fixed) -> Fixed {
        tiles * self.tile()
    }

    /// Rescale a distance given at the reference tile size to this layout.
    #[must_use]
    pub fn scale_px(&self, reference_px: u32) -> Fixed {
        Fixed::from_num(reference_px) * self.tile() / Fixed::from_num(REFERENCE_TILE_SIZE)
    }

    /// Centre of the tile at `(col, row)`.
    #[must_use]
    pub fn tile_center(&self, col: u32, row: u32) -> Vec2Fixed {
        let half = self.tile() / Fixed::from_num(2);
        Vec2Fixed::new(
            Fixed::from_num(col) * self.tile() + half,
            Fixed::from_num(row) * self.tile() + half,
        )
    }

    /// Grid row containing the pixel coordinate `y`.
    #[must_use]
    pub fn row_of(&self, y: Fixed) -> i64 {
        (y / self.tile()).floor().to_num::<i64>()
    }

    /// Vertical centre of the river.
    #[must_use]
    pub fn river_y(&self) -> Fixed {
        self.tile_center(0, self.river_row).y
    }

    /// Horizontal centres of both bridges.
    #[must_use]
    pub fn bridge_xs(&self) -> [Fixed; 2] {
        [
            self.tile_center(self.bridge_cols[0], 0).x,
            self.tile_center(self.bridge_cols[1], 0).x,
        ]
    }

    /// Pixel y a side's troops march toward when nothing else is in view.
    #[must_use]
    pub fn enemy_baseline(&self, side: u8) -> Fixed {
        if side == 0 {
            Fixed::ZERO
        } else {
            self.height()
        }
    }

    /// Mirror a side-0 row onto the side-1 half.
    #[must_use]
    pub const fn mirror_row(&self, row: u32) -> u32 {
        self.rows - 1 - row
    }

    /// The three tower slots of `side`: king first, then left and right princess.
    #[must_use]
    pub fn tower_slots(&self, side: u8) -> [TowerSlot; 3] {
        let (king_row, princess_row) = if side == 0 {
            (self.king_row, self.princess_row)
        } else {
            (self.mirror_row(self.king_row), self.mirror_row(self.princess_row))
        };
        let king_y = self.tile_center(0, king_row).y;
        let princess_y = self.tile_center(0, princess_row).y;
        let [left_x, right_x] = self.bridge_xs();
        // The king straddles the centre line between columns 11 and 12.
        let centre_x = self.width() / Fixed::from_num(2);

        [
            TowerSlot {
                side,
                is_king: true,
                position: Vec2Fixed::new(centre_x, king_y),
            },
            TowerSlot {
                side,
                is_king: false,
                position: Vec2Fixed::new(left_x, princess_y),
            },
            TowerSlot {
                side,
                is_king: false,
                position: Vec2Fixed::new(right_x, princess_y),
            },
        ]
    }

    /// Whether `position` lies inside the arena.
    #[must_use]
    pub fn contains(&self, position: Vec2Fixed) -> bool {
        position.x >= Fixed::ZERO
            && position.y >= Fixed::ZERO
            && position.x < self.width()
            && position.y < self.height()
    }

    /// Whether `side` may deploy a troop at `position`.
    ///
    /// Side 0 owns the rows below the river, side 1 the rows above it.
    /// The river row belongs to nobody.
    #[must_use]
    pub fn is_on_half(&self, side: u8, position: Vec2Fixed) -> bool {
        if !self.contains(position) {
            return false;
        }
        let row = self.row_of(position.y);
        let river = i64::from(self.river_row);
        if side == 0 {
            row > river
        } else {
            row < river
        }
    }

    /// Whether a straight walk between the two points crosses the river.
    #[must_use]
    pub fn crosses_river(&self, from: Vec2Fixed, to: Vec2Fixed) -> bool {
        let river = i64::from(self.river_row);
        let a = self.row_of(from.y);
        let b = self.row_of(to.y);
        (a < river && b > river) || (a > river && b < river)
    }
}
