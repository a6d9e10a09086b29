use crate::block::{BlockId, AIR};
use crate::coords::{ChunkSide, SubChunkXyz, CHUNK_EDGE, CHUNK_HEIGHT};

pub(crate) const EDGE_LEN: usize = (CHUNK_EDGE * CHUNK_HEIGHT) as usize;

/// One block change on the face between two chunks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct EdgeDelta {
    /// Position along the face: z for east and west, x for north and south.
    pub(crate) along: u8,
    pub(crate) y: u8,
    pub(crate) block: BlockId,
}

impl EdgeDelta {
    fn index(&self) -> usize {
        self.along as usize * CHUNK_HEIGHT as usize + self.y as usize
    }
}

/// Where a chunk-local position sits on the face towards `side`.
pub(crate) fn along(side: ChunkSide, sub: SubChunkXyz) -> u8 {
    match side {
        ChunkSide::East | ChunkSide::West => sub.z,
        ChunkSide::North | ChunkSide::South => sub.x,
    }
}

/// The chunk-local position at `along`, `y` on the face towards `side`.
pub(crate) fn edge_position(side: ChunkSide, along: u8, y: u8) -> SubChunkXyz {
    let far = (CHUNK_EDGE - 1) as u8;
    match side {
        ChunkSide::East => SubChunkXyz::new(far, y, along),
        ChunkSide::West => SubChunkXyz::new(0, y, along),
        ChunkSide::South => SubChunkXyz::new(along, y, far),
        ChunkSide::North => SubChunkXyz::new(along, y, 0),
    }
}

#[derive(Clone, Debug)]
struct Side {
    /// The neighbour's blocks on its face towards us.
    edge: Vec<BlockId>,
    active: bool,
    /// Changes to our own face, waiting to be sent to the neighbour.
    pending: Vec<EdgeDelta>,
}

impl Side {
    fn new() -> Self {
        Self {
            edge: vec![AIR; EDGE_LEN],
            active: false,
            pending: vec![],
        }
    }
}

/**
 * A chunk's view of the blocks just across each of its four faces. The view is refreshed in full
 * when two chunks link up and kept current with deltas afterwards, so it may lag the neighbour by
 * up to one tick.
 */
#[derive(Clone, Debug)]
pub(crate) struct SideCache {
    sides: [Side; 4],
}

impl SideCache {
    pub(crate) fn new() -> Self {
        Self {
            sides: [Side::new(), Side::new(), Side::new(), Side::new()],
        }
    }

    /// Replaces the cached face with a full copy from the neighbour and marks it live.
    pub(crate) fn set_edge(&mut self, side: ChunkSide, edge: Vec<BlockId>) {
        let cached = &mut self.sides[side.index()];
        if edge.len() != EDGE_LEN {
            return;
        }
        cached.edge = edge;
        cached.active = true;
    }

    pub(crate) fn unlink(&mut self, side: ChunkSide) {
        let cached = &mut self.sides[side.index()];
        cached.active = false;
        cached.edge.fill(AIR);
    }

    pub(crate) fn is_active(&self, side: ChunkSide) -> bool {
        self.sides[side.index()].active
    }

    /// Merges deltas from the neighbour. Deltas arriving for an unlinked side are dropped.
    pub(crate) fn apply(&mut self, side: ChunkSide, deltas: &[EdgeDelta]) {
        let cached = &mut self.sides[side.index()];
        if !cached.active {
            return;
        }
        for delta in deltas {
            if let Some(block) = cached.edge.get_mut(delta.index()) {
                *block = delta.block;
            }
        }
    }

    /// The neighbour's block at `along`, `y`, or None if the side has not been linked.
    pub(crate) fn block(&self, side: ChunkSide, along: u8, y: u8) -> Option<BlockId> {
        let cached = &self.sides[side.index()];
        if !cached.active {
            return None;
        }
        let delta = EdgeDelta { along, y, block: AIR };
        cached.edge.get(delta.index()).copied()
    }

    pub(crate) fn record(&mut self, side: ChunkSide, delta: EdgeDelta) {
        self.sides[side.index()].pending.push(delta);
    }

    pub(crate) fn take_pending(&mut self, side: ChunkSide) -> Vec<EdgeDelta> {
        std::mem::take(&mut self.sides[side.index()].pending)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deltas_apply_only_to_linked_sides() {
        let mut cache = SideCache::new();
        let delta = EdgeDelta { along: 0, y: 64, block: BlockId(1) };
        cache.apply(ChunkSide::West, &[delta]);
        assert_eq!(cache.block(ChunkSide::West, 0, 64), None);

        cache.set_edge(ChunkSide::West, vec![AIR; EDGE_LEN]);
        assert_eq!(cache.block(ChunkSide::West, 0, 64), Some(AIR));
        cache.apply(ChunkSide::West, &[delta]);
        assert_eq!(cache.block(ChunkSide::West, 0, 64), Some(BlockId(1)));

        cache.unlink(ChunkSide::West);
        assert!(!cache.is_active(ChunkSide::West));
        assert_eq!(cache.block(ChunkSide::West, 0, 64), None);
    }

    #[test]
    fn pending_deltas_are_taken_once() {
        let mut cache = SideCache::new();
        let delta = EdgeDelta { along: 3, y: 10, block: BlockId(4) };
        cache.record(ChunkSide::North, delta);
        assert_eq!(cache.take_pending(ChunkSide::North), vec![delta]);
        assert!(cache.take_pending(ChunkSide::North).is_empty());
    }

    #[test]
    fn edge_positions_face_the_side() {
        let sub = edge_position(ChunkSide::East, 5, 70);
        assert_eq!(sub, SubChunkXyz::new(15, 70, 5));
        assert!(sub.edges().contains(&ChunkSide::East));
        assert_eq!(along(ChunkSide::East, sub), 5);
        assert_eq!(edge_position(ChunkSide::North, 2, 1), SubChunkXyz::new(2, 1, 0));
    }
}
