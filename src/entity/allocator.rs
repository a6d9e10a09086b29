use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use log::error;

use crate::entity::EntityId;
use crate::err::WorldError;

struct AllocatorState {
    /// Lowest id that has never been issued.
    next: i64,
    /// Ids below `next` that were handed back.
    freed: BTreeSet<i32>,
}

/**
 * The world-wide source of entity ids. Every shard shares one allocator; the lock is held only
 * for the lookup itself.
 */
pub(crate) struct EntityIdAllocator {
    max: i32,
    state: Mutex<AllocatorState>,
}

impl EntityIdAllocator {
    pub(crate) fn new() -> Self {
        Self::with_max(i32::MAX)
    }

    /// Allocator that issues ids in `0..=max`.
    pub(crate) fn with_max(max: i32) -> Self {
        Self {
            max,
            state: Mutex::new(AllocatorState {
                next: 0,
                freed: BTreeSet::new(),
            }),
        }
    }

    /**
     * Returns the lowest id not currently in use.
     */
    pub(crate) fn allocate(&self) -> Result<EntityId, WorldError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.freed.pop_first() {
            return Ok(EntityId(id));
        }
        if state.next > self.max as i64 {
            error!("All {} entity ids are in use", self.max as i64 + 1);
            return Err(WorldError::ResourceExhausted);
        }
        let id = state.next as i32;
        state.next += 1;
        Ok(EntityId(id))
    }

    pub(crate) fn free(&self, id: EntityId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if (id.0 as i64) < state.next && id.0 >= 0 {
            state.freed.insert(id.0);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reuses_lowest_freed_id() {
        let allocator = EntityIdAllocator::new();
        assert_eq!(allocator.allocate().unwrap(), EntityId(0));
        assert_eq!(allocator.allocate().unwrap(), EntityId(1));
        assert_eq!(allocator.allocate().unwrap(), EntityId(2));
        allocator.free(EntityId(1));
        assert_eq!(allocator.allocate().unwrap(), EntityId(1));
        assert_eq!(allocator.allocate().unwrap(), EntityId(3));
    }

    #[test]
    fn freeing_unissued_id_is_ignored() {
        let allocator = EntityIdAllocator::new();
        allocator.free(EntityId(40));
        assert_eq!(allocator.allocate().unwrap(), EntityId(0));
        assert_eq!(allocator.allocate().unwrap(), EntityId(1));
    }

    #[test]
    fn exhaustion_is_reported() {
        let allocator = EntityIdAllocator::with_max(1);
        assert!(allocator.allocate().is_ok());
        assert!(allocator.allocate().is_ok());
        let err = allocator.allocate().unwrap_err();
        assert!(matches!(err, WorldError::ResourceExhausted));
        assert!(err.is_fatal());
        allocator.free(EntityId(0));
        assert_eq!(allocator.allocate().unwrap(), EntityId(0));
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let allocator = std::sync::Arc::new(EntityIdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<EntityId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }
}
