use std::sync::Arc;
use std::time::Duration;

use crate::chunk::Chunk;
use crate::coords::{ChunkXz, ShardXz};
use crate::entity::allocator::EntityIdAllocator;
use crate::entity::{Entity, EntityId};
use crate::err::WorldError;
use crate::shard::ShardRequest;

pub(crate) type ChunkAction = Box<dyn FnOnce(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send>;
pub(crate) type EachChunkAction = Box<dyn FnMut(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send>;
pub(crate) type ShardAction = Box<dyn FnOnce(&mut ShardContext) -> Result<(), WorldError> + Send>;

/**
 * What a chunk sees of its shard while it runs: the tick counter, the entity id allocator, and an
 * outbox for work on other chunks. The outbox is routed once the current request is done, so a
 * chunk never runs code on another chunk directly.
 */
pub(crate) struct ShardContext {
    ticks: u64,
    ticks_per_second: u64,
    entity_ids: Arc<EntityIdAllocator>,
    effects: Vec<(ShardXz, ShardRequest)>,
}

impl ShardContext {
    pub(crate) fn new(entity_ids: Arc<EntityIdAllocator>, tick_period: Duration) -> Self {
        let ticks_per_second = (1000 / tick_period.as_millis().max(1)).max(1) as u64;
        Self {
            ticks: 0,
            ticks_per_second,
            entity_ids,
            effects: vec![],
        }
    }

    pub(crate) fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn advance_tick(&mut self) {
        self.ticks += 1;
    }

    /// True on the first tick of every second of game time.
    pub(crate) fn is_broadcast_tick(&self) -> bool {
        self.ticks % self.ticks_per_second == 0
    }

    pub(crate) fn allocate_entity_id(&self) -> Result<EntityId, WorldError> {
        self.entity_ids.allocate()
    }

    pub(crate) fn free_entity_id(&self, id: EntityId) {
        self.entity_ids.free(id);
    }

    /// Runs `action` on a chunk, loading it first if necessary.
    pub(crate) fn on_chunk<F>(&mut self, chunk: ChunkXz, action: F)
    where
        F: FnOnce(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.effects.push((
            chunk.shard(),
            ShardRequest::OnChunk {
                chunk,
                action: Box::new(action),
            },
        ));
    }

    /// Runs `action` on a chunk only if it is already loaded.
    pub(crate) fn on_loaded_chunk<F>(&mut self, chunk: ChunkXz, action: F)
    where
        F: FnOnce(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.effects.push((
            chunk.shard(),
            ShardRequest::OnLoadedChunk {
                chunk,
                action: Box::new(action),
            },
        ));
    }

    /**
     * Hands an entity over to the chunk it has moved into. Until the destination runs the request,
     * no chunk owns the entity. If the destination cannot be loaded the entity goes back to
     * `origin`.
     */
    pub(crate) fn transfer_entity(&mut self, origin: ChunkXz, destination: ChunkXz, entity: Entity) {
        self.effects.push((
            destination.shard(),
            ShardRequest::Transfer {
                entity,
                to: destination,
                back_to: Some(origin),
            },
        ));
    }

    /// Sends an entity that could not be delivered back to the chunk it came from.
    pub(crate) fn return_entity(&mut self, origin: ChunkXz, entity: Entity) {
        self.effects.push((
            origin.shard(),
            ShardRequest::Transfer {
                entity,
                to: origin,
                back_to: None,
            },
        ));
    }

    pub(crate) fn take_effects(&mut self) -> Vec<(ShardXz, ShardRequest)> {
        std::mem::take(&mut self.effects)
    }
}
