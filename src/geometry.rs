//! Position types and the coordinate algebra they share: floor-division,
//! quarter-turn rotation, and the diagonal row/col mapping used by the tile
//! iterator and painter's-algorithm ordering.

use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Top of the chunk in sections (`320 / 16`).
pub const CHUNK_TOP: i32 = 20;
/// Bottom of the chunk in sections (`-64 / 16`).
pub const CHUNK_LOW: i32 = -4;

/// Rounds toward negative infinity, unlike `/` which truncates toward zero.
pub fn floordiv(a: i32, b: i32) -> i32 {
    let d = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}

/// Identifies a 512x512-block region (32x32 chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Parses `r.<x>.<z>.mca`, mirroring the on-disk naming convention.
    pub fn from_filename(name: &str) -> Option<Self> {
        let name = name.strip_prefix("r.")?;
        let name = name.strip_suffix(".mca")?;
        let (x, z) = name.split_once('.')?;
        Some(Self::new(x.parse().ok()?, z.parse().ok()?))
    }

    pub fn format_filename(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Quarter-turn rotation: `(x, z) -> (-z, x)`, applied `k` times.
    pub fn rotated(self, k: u8) -> Self {
        let mut pos = self;
        for _ in 0..(k % 4) {
            pos = Self::new(-pos.z, pos.x);
        }
        pos
    }
}

/// Identifies a 16x16 block column of unbounded vertical extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn from_block(block: BlockPos) -> Self {
        Self::new(floordiv(block.x, 16), floordiv(block.z, 16))
    }

    pub fn region(&self) -> RegionPos {
        RegionPos::new(floordiv(self.x, 32), floordiv(self.z, 32))
    }

    /// Chunk position within its region, `0..32` on each axis.
    pub fn local_in_region(&self) -> (i32, i32) {
        (self.x.rem_euclid(32), self.z.rem_euclid(32))
    }

    pub fn row(&self) -> i32 {
        self.z - self.x
    }

    pub fn col(&self) -> i32 {
        self.x + self.z
    }

    pub fn from_row_col(row: i32, col: i32) -> Self {
        Self::new((col - row) / 2, (col + row) / 2)
    }

    /// Quarter-turn rotation of a region-local chunk index: `(x, z) -> (31-z, x)`.
    pub fn rotated(self, k: u8) -> Self {
        let mut pos = self;
        for _ in 0..(k % 4) {
            pos = Self::new(31 - pos.z, pos.x);
        }
        pos
    }
}

/// Absolute block position. `y` is vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub z: i32,
    pub y: i32,
}

impl BlockPos {
    pub const DIR_NORTH: BlockPos = BlockPos { x: 0, z: -1, y: 0 };
    pub const DIR_SOUTH: BlockPos = BlockPos { x: 0, z: 1, y: 0 };
    pub const DIR_EAST: BlockPos = BlockPos { x: 1, z: 0, y: 0 };
    pub const DIR_WEST: BlockPos = BlockPos { x: -1, z: 0, y: 0 };
    pub const DIR_TOP: BlockPos = BlockPos { x: 0, z: 0, y: 1 };
    pub const DIR_BOTTOM: BlockPos = BlockPos { x: 0, z: 0, y: -1 };

    pub fn new(x: i32, z: i32, y: i32) -> Self {
        Self { x, z, y }
    }

    pub fn row(&self) -> i32 {
        self.z - self.x + (CHUNK_TOP * 16 - self.y) * 4
    }

    pub fn col(&self) -> i32 {
        self.x + self.z
    }
}

impl Add for BlockPos {
    type Output = BlockPos;
    fn add(self, rhs: BlockPos) -> BlockPos {
        BlockPos::new(self.x + rhs.x, self.z + rhs.z, self.y + rhs.y)
    }
}

impl Sub for BlockPos {
    type Output = BlockPos;
    fn sub(self, rhs: BlockPos) -> BlockPos {
        BlockPos::new(self.x - rhs.x, self.z - rhs.z, self.y - rhs.y)
    }
}

impl AddAssign for BlockPos {
    fn add_assign(&mut self, rhs: BlockPos) {
        *self = *self + rhs;
    }
}

impl SubAssign for BlockPos {
    fn sub_assign(&mut self, rhs: BlockPos) {
        *self = *self - rhs;
    }
}

/// Total order used for painter's-algorithm compositing: `y` primary,
/// `x` descending tiebreak, then `z`.
impl PartialOrd for BlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlockPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.y
            .cmp(&other.y)
            .then_with(|| other.x.cmp(&self.x))
            .then_with(|| self.z.cmp(&other.z))
    }
}

/// Chunk-local block position; `x`/`z` in `0..16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalBlockPos {
    pub x: i32,
    pub z: i32,
    pub y: i32,
}

impl LocalBlockPos {
    pub fn new(x: i32, z: i32, y: i32) -> Self {
        Self { x, z, y }
    }

    pub fn from_block(pos: BlockPos) -> Self {
        Self::new(pos.x.rem_euclid(16), pos.z.rem_euclid(16), pos.y)
    }

    pub fn row(&self) -> i32 {
        self.z - self.x + (CHUNK_TOP * 16 - self.y) * 4
    }

    pub fn col(&self) -> i32 {
        self.x + self.z
    }

    pub fn to_global(&self, chunk: ChunkPos) -> BlockPos {
        BlockPos::new(self.x + chunk.x * 16, self.z + chunk.z * 16, self.y)
    }

    /// Rotates a local position by `k` quarter-turns about the chunk center,
    /// used to invert a world rotation before indexing section data.
    pub fn rotated(self, k: u8) -> Self {
        let mut pos = self;
        for _ in 0..(k % 4) {
            pos = Self::new(15 - pos.z, pos.x, pos.y);
        }
        pos
    }
}

impl PartialOrd for LocalBlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalBlockPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.y
            .cmp(&other.y)
            .then_with(|| other.x.cmp(&self.x))
            .then_with(|| self.z.cmp(&other.z))
    }
}

/// Output tile grid position; tiles are rendered diagonally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn floordiv_matches_truncating_div_for_positive() {
        assert_eq!(floordiv(17, 5), 3);
        assert_eq!(floordiv(15, 5), 3);
    }

    #[test]
    fn floordiv_rounds_toward_negative_infinity() {
        assert_eq!(floordiv(-1, 16), -1);
        assert_eq!(floordiv(-16, 16), -1);
        assert_eq!(floordiv(-17, 16), -2);
    }

    proptest! {
        #[test]
        fn floordiv_bracket_invariant(a in any::<i32>(), b in 1..10000i32) {
            let d = floordiv(a, b);
            prop_assert!(d as i64 * b as i64 <= a as i64);
            prop_assert!(a as i64 <= d as i64 * b as i64 + b as i64 - 1);
        }
    }

    #[test]
    fn local_block_pos_wraps_negative_coordinates() {
        let local = LocalBlockPos::from_block(BlockPos::new(-1, -17, 5));
        assert_eq!(local.x, 15);
        assert_eq!(local.z, 15);
    }

    #[test]
    fn chunk_pos_row_col_roundtrip() {
        let chunk = ChunkPos::new(5, -3);
        let rt = ChunkPos::from_row_col(chunk.row(), chunk.col());
        assert_eq!(chunk, rt);
    }

    #[test]
    fn region_filename_roundtrip() {
        let pos = RegionPos::new(-2, 7);
        let name = pos.format_filename();
        assert_eq!(RegionPos::from_filename(&name), Some(pos));
    }

    #[test]
    fn region_rotation_four_times_is_identity() {
        let pos = RegionPos::new(3, -9);
        assert_eq!(pos.rotated(4), pos);
    }

    #[test]
    fn chunk_rotation_four_times_is_identity() {
        let pos = ChunkPos::new(11, 4);
        assert_eq!(pos.rotated(4), pos);
    }

    #[test]
    fn block_pos_order_is_y_then_descending_x_then_z() {
        let a = BlockPos::new(0, 0, 0);
        let b = BlockPos::new(-1, 0, 0);
        assert!(a < b, "smaller x should sort after larger x at equal y");
    }
}
