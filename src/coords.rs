use std::fmt::{Display, Formatter};

/// Width of a chunk along x and z, in blocks.
pub(crate) const CHUNK_EDGE: i32 = 16;
/// Height of a chunk column, in blocks.
pub(crate) const CHUNK_HEIGHT: i32 = 128;
pub(crate) const BLOCKS_PER_CHUNK: usize = (CHUNK_EDGE * CHUNK_EDGE * CHUNK_HEIGHT) as usize;
/// Number of chunks along each axis of a shard.
pub(crate) const SHARD_SIZE: i32 = 16;
pub(crate) const CHUNKS_PER_SHARD: usize = (SHARD_SIZE * SHARD_SIZE) as usize;

/// Floors `value / divisor` for a positive divisor. Integer division in rust truncates towards
/// zero, so negative values are corrected by hand.
fn floor_div(value: i32, divisor: i32) -> i32 {
    if value < 0 {
        (value + 1) / divisor - 1
    } else {
        value / divisor
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ChunkSide {
    North,
    East,
    South,
    West,
}

impl ChunkSide {
    pub(crate) const ALL: [ChunkSide; 4] = [
        ChunkSide::North,
        ChunkSide::East,
        ChunkSide::South,
        ChunkSide::West,
    ];

    pub(crate) fn opposite(self) -> Self {
        match self {
            ChunkSide::North => ChunkSide::South,
            ChunkSide::East => ChunkSide::West,
            ChunkSide::South => ChunkSide::North,
            ChunkSide::West => ChunkSide::East,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ChunkSide::North => 0,
            ChunkSide::East => 1,
            ChunkSide::South => 2,
            ChunkSide::West => 3,
        }
    }

    fn offset(self) -> (i32, i32) {
        match self {
            ChunkSide::North => (0, -1),
            ChunkSide::East => (1, 0),
            ChunkSide::South => (0, 1),
            ChunkSide::West => (-1, 0),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ChunkXz {
    pub(crate) x: i32,
    pub(crate) z: i32,
}

impl ChunkXz {
    pub(crate) fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /**
     * Returns the shard this chunk belongs to.
     */
    pub(crate) fn shard(&self) -> ShardXz {
        ShardXz::new(floor_div(self.x, SHARD_SIZE), floor_div(self.z, SHARD_SIZE))
    }

    pub(crate) fn neighbour(&self, side: ChunkSide) -> Option<ChunkXz> {
        let (dx, dz) = side.offset();
        Some(ChunkXz::new(
            self.x.checked_add(dx)?,
            self.z.checked_add(dz)?,
        ))
    }

    /**
     * Returns the world position of the block at the given chunk-local position, or None if the
     * result is not representable.
     */
    pub(crate) fn block_xyz(&self, sub: SubChunkXyz) -> Option<BlockXyz> {
        let x = self.x.checked_mul(CHUNK_EDGE)?.checked_add(sub.x as i32)?;
        let z = self.z.checked_mul(CHUNK_EDGE)?.checked_add(sub.z as i32)?;
        Some(BlockXyz::new(x, sub.y as i32, z))
    }
}

impl Display for ChunkXz {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk({}, {})", self.x, self.z)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ShardXz {
    pub(crate) x: i32,
    pub(crate) z: i32,
}

impl ShardXz {
    pub(crate) fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk in the shard's lowest corner. Shard coordinates come from floor-dividing a valid
    /// chunk coordinate, so multiplying back cannot overflow.
    pub(crate) fn origin(&self) -> ChunkXz {
        ChunkXz::new(self.x * SHARD_SIZE, self.z * SHARD_SIZE)
    }

    /**
     * Returns the dense index of the chunk within this shard's chunk array, or None if the chunk
     * belongs to another shard.
     */
    pub(crate) fn chunk_index(&self, chunk: ChunkXz) -> Option<usize> {
        if chunk.shard() != *self {
            return None;
        }
        let origin = self.origin();
        let x = (chunk.x - origin.x) as usize;
        let z = (chunk.z - origin.z) as usize;
        Some(z * SHARD_SIZE as usize + x)
    }

    pub(crate) fn chunk_at(&self, index: usize) -> ChunkXz {
        let origin = self.origin();
        ChunkXz::new(
            origin.x + (index % SHARD_SIZE as usize) as i32,
            origin.z + (index / SHARD_SIZE as usize) as i32,
        )
    }
}

impl Display for ShardXz {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard({}, {})", self.x, self.z)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockXyz {
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) z: i32,
}

impl BlockXyz {
    pub(crate) fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub(crate) fn chunk(&self) -> ChunkXz {
        ChunkXz::new(floor_div(self.x, CHUNK_EDGE), floor_div(self.z, CHUNK_EDGE))
    }

    /**
     * Returns the chunk-local position of this block, or None when it lies above or below the
     * world.
     */
    pub(crate) fn sub_chunk(&self) -> Option<SubChunkXyz> {
        if self.y < 0 || self.y >= CHUNK_HEIGHT {
            return None;
        }
        Some(SubChunkXyz::new(
            self.x.rem_euclid(CHUNK_EDGE) as u8,
            self.y as u8,
            self.z.rem_euclid(CHUNK_EDGE) as u8,
        ))
    }

    pub(crate) fn offset(&self, dx: i32, dy: i32, dz: i32) -> Option<BlockXyz> {
        Some(BlockXyz::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// Centre of the block's top face, where dropped items appear.
    pub(crate) fn drop_position(&self) -> AbsXyz {
        AbsXyz::new(self.x as f64 + 0.5, self.y as f64 + 0.5, self.z as f64 + 0.5)
    }
}

impl Display for BlockXyz {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Position of a block within its chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SubChunkXyz {
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) z: u8,
}

impl SubChunkXyz {
    pub(crate) fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// All edges this block touches. A corner block touches two.
    pub(crate) fn edges(&self) -> Vec<ChunkSide> {
        let last = (CHUNK_EDGE - 1) as u8;
        let mut sides = Vec::with_capacity(2);
        if self.x == last {
            sides.push(ChunkSide::East);
        } else if self.x == 0 {
            sides.push(ChunkSide::West);
        }
        if self.z == last {
            sides.push(ChunkSide::South);
        } else if self.z == 0 {
            sides.push(ChunkSide::North);
        }
        sides
    }
}

/**
 * Dense index into a chunk's flat block arrays. Columns are stored contiguously:
 * `index = y + z * HEIGHT + x * HEIGHT * EDGE`.
 */
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct BlockIndex(pub(crate) u16);

impl BlockIndex {
    pub(crate) fn new(sub: SubChunkXyz) -> Option<Self> {
        if sub.x as i32 >= CHUNK_EDGE || sub.z as i32 >= CHUNK_EDGE || sub.y as i32 >= CHUNK_HEIGHT {
            return None;
        }
        let index = sub.y as usize
            + sub.z as usize * CHUNK_HEIGHT as usize
            + sub.x as usize * (CHUNK_HEIGHT * CHUNK_EDGE) as usize;
        Some(Self(index as u16))
    }

    pub(crate) fn sub_chunk(&self) -> SubChunkXyz {
        let index = self.0 as usize;
        let height = CHUNK_HEIGHT as usize;
        let edge = CHUNK_EDGE as usize;
        SubChunkXyz::new(
            (index / (height * edge)) as u8,
            (index % height) as u8,
            ((index / height) % edge) as u8,
        )
    }

    pub(crate) fn get(&self) -> usize {
        self.0 as usize
    }
}

/// World position of an entity.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub(crate) struct AbsXyz {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) z: f64,
}

impl AbsXyz {
    pub(crate) fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /**
     * Returns the block containing this position, or None if it is outside of the representable
     * block range.
     */
    pub(crate) fn block(&self) -> Option<BlockXyz> {
        fn to_block(value: f64) -> Option<i32> {
            let floored = value.floor();
            if !floored.is_finite() || floored < i32::MIN as f64 || floored > i32::MAX as f64 {
                None
            } else {
                Some(floored as i32)
            }
        }
        Some(BlockXyz::new(
            to_block(self.x)?,
            to_block(self.y)?,
            to_block(self.z)?,
        ))
    }

    pub(crate) fn distance_sq(&self, other: &AbsXyz) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Velocity in blocks per tick.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub(crate) struct AbsVelocity {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) z: f64,
}

impl AbsVelocity {
    pub(crate) fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub(crate) struct LookDegrees {
    pub(crate) yaw: f32,
    pub(crate) pitch: f32,
}
