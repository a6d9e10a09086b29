use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;
use rand::Rng;

use crate::block::aspect::BlockInventory;
use crate::block::{BlockId, BlockInstance, BlockTypeList, AIR};
use crate::chunk::nibble::NibbleArray;
use crate::chunk::side_cache::{along, edge_position, EdgeDelta, SideCache};
use crate::coords::{
    AbsVelocity, AbsXyz, BlockIndex, BlockXyz, ChunkSide, ChunkXz, LookDegrees, SubChunkXyz,
    BLOCKS_PER_CHUNK, CHUNK_EDGE, CHUNK_HEIGHT,
};
use crate::entity::{Entity, EntityData, EntityId, EntityKind};
use crate::err::WorldError;
use crate::inventory::{Click, ItemStack, Slot, TxState, WindowId, WindowKind};
use crate::player::{PlayerSink, ShardNotice};
use crate::shard::ShardContext;
use crate::store::{ChunkData, HEIGHT_MAP_LEN, NIBBLES_PER_CHUNK};

pub(crate) mod nibble;
pub(crate) mod side_cache;

/// Squared distance within which players are offered items lying around.
const PICKUP_RANGE_SQ: f64 = 1.5 * 1.5;
const DROP_JITTER: f64 = 0.1;
/// How far inside the chunk a returned entity is put back.
const RETURN_MARGIN: f64 = 0.01;

/// A player watching a chunk.
pub(crate) struct Subscriber {
    sink: Box<dyn PlayerSink>,
    name: String,
    position: AbsXyz,
    look: LookDegrees,
}

impl Subscriber {
    pub(crate) fn new(sink: Box<dyn PlayerSink>, name: String, position: AbsXyz, look: LookDegrees) -> Self {
        Self {
            sink,
            name,
            position,
            look,
        }
    }

    fn moved(&self, id: EntityId) -> ShardNotice {
        ShardNotice::PlayerMove {
            id,
            name: self.name.clone(),
            position: self.position,
            look: self.look,
        }
    }
}

/**
 * One 16x16x128 column of the world. A chunk is only ever touched from within the turn of the
 * shard that owns it; anything it needs from other chunks goes through the [`ShardContext`].
 */
pub(crate) struct Chunk {
    xz: ChunkXz,
    block_types: Arc<BlockTypeList>,
    blocks: Vec<u8>,
    metadata: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
    height_map: Vec<u8>,
    entities: BTreeMap<EntityId, Entity>,
    inventories: HashMap<BlockIndex, BlockInventory>,
    /// Blocks ticked this tick, and blocks asking to be ticked from the next tick on.
    active: BTreeSet<BlockIndex>,
    pending_active: BTreeSet<BlockIndex>,
    subscribers: BTreeMap<EntityId, Subscriber>,
    sides: SideCache,
    snapshot: Option<Arc<Vec<u8>>>,
}

fn expect_len(what: &str, bytes: &[u8], len: usize) -> Result<(), WorldError> {
    if bytes.len() != len {
        return Err(WorldError::MalformedData(
            what.into(),
            format!("expected {} bytes, found {}", len, bytes.len()),
        ));
    }
    Ok(())
}

impl Chunk {
    /**
     * Builds a chunk from loaded or generated data. Every entity in the data is given a fresh id.
     */
    pub(crate) fn from_data(
        data: ChunkData,
        block_types: Arc<BlockTypeList>,
        ctx: &mut ShardContext,
    ) -> Result<Self, WorldError> {
        expect_len("Blocks", &data.blocks, BLOCKS_PER_CHUNK)?;
        expect_len("Data", &data.metadata, NIBBLES_PER_CHUNK)?;
        expect_len("BlockLight", &data.block_light, NIBBLES_PER_CHUNK)?;
        expect_len("SkyLight", &data.sky_light, NIBBLES_PER_CHUNK)?;
        expect_len("HeightMap", &data.height_map, HEIGHT_MAP_LEN)?;

        let mut entities = BTreeMap::new();
        for entity in data.entities {
            let id = ctx.allocate_entity_id()?;
            entities.insert(id, Entity::new(id, entity));
        }

        Ok(Self {
            xz: data.xz,
            block_types,
            blocks: data.blocks,
            metadata: NibbleArray::new(data.metadata),
            block_light: NibbleArray::new(data.block_light),
            sky_light: NibbleArray::new(data.sky_light),
            height_map: data.height_map,
            entities,
            inventories: HashMap::new(),
            active: BTreeSet::new(),
            pending_active: BTreeSet::new(),
            subscribers: BTreeMap::new(),
            sides: SideCache::new(),
            snapshot: None,
        })
    }

    pub(crate) fn xz(&self) -> ChunkXz {
        self.xz
    }

    pub(crate) fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub(crate) fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn active_block_count(&self) -> usize {
        self.active.union(&self.pending_active).count()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn block(&self, sub: SubChunkXyz) -> Option<(BlockId, u8)> {
        let index = BlockIndex::new(sub)?;
        Some(self.block_by_index(index))
    }

    fn block_by_index(&self, index: BlockIndex) -> (BlockId, u8) {
        (BlockId(self.blocks[index.get()]), self.metadata.get(index))
    }

    pub(crate) fn block_at(&self, at: BlockXyz) -> Result<(BlockId, u8), WorldError> {
        let instance = self.instance(at)?;
        Ok((instance.block, instance.metadata))
    }

    pub(crate) fn height(&self, x: u8, z: u8) -> Option<u8> {
        self.height_map.get(z as usize * CHUNK_EDGE as usize + x as usize).copied()
    }

    /**
     * Resolves a world position inside this chunk. Positions in other chunks or above and below
     * the world are a bad location.
     */
    pub(crate) fn instance(&self, at: BlockXyz) -> Result<BlockInstance, WorldError> {
        if at.chunk() != self.xz {
            return Err(WorldError::BadLocation(format!("{at} is not in {}", self.xz)));
        }
        let sub = at
            .sub_chunk()
            .ok_or_else(|| WorldError::BadLocation(format!("{at} is outside the world")))?;
        let index = BlockIndex::new(sub)
            .ok_or_else(|| WorldError::BadLocation(format!("{at} is outside the world")))?;
        let (block, metadata) = self.block_by_index(index);
        Ok(BlockInstance {
            chunk: self.xz,
            at,
            sub,
            index,
            block,
            metadata,
        })
    }

    fn instance_by_index(&self, index: BlockIndex) -> Option<BlockInstance> {
        let at = self.xz.block_xyz(index.sub_chunk())?;
        self.instance(at).ok()
    }

    /**
     * The block just across one of this chunk's faces, as last heard from the neighbour. None for
     * positions further away, and for faces that have not been linked yet.
     */
    pub(crate) fn neighbour_block(&self, at: BlockXyz) -> Option<BlockId> {
        let sub = at.sub_chunk()?;
        let chunk = at.chunk();
        let side = ChunkSide::ALL
            .into_iter()
            .find(|side| self.xz.neighbour(*side) == Some(chunk))?;
        if !sub.edges().contains(&side.opposite()) {
            return None;
        }
        self.sides.block(side, along(side.opposite(), sub), sub.y)
    }

    /**
     * Whether the block at the given world position is solid. Blocks in other chunks are answered
     * from the side cache, and count as not solid when the cache cannot tell.
     */
    pub(crate) fn is_solid_at(&self, at: BlockXyz) -> bool {
        let block = if at.chunk() == self.xz {
            at.sub_chunk().and_then(|sub| self.block(sub)).map(|(block, _)| block)
        } else {
            self.neighbour_block(at)
        };
        block.is_some_and(|block| self.block_types.is_solid(block))
    }

    /**
     * Changes a block. Subscribers are told right away, the neighbour across a face only at the
     * end of the tick.
     */
    pub(crate) fn set_block(&mut self, index: BlockIndex, block: BlockId, metadata: u8) {
        let sub = index.sub_chunk();
        self.blocks[index.get()] = block.0;
        self.metadata.set(index, metadata);
        self.snapshot = None;
        self.update_height(sub, block);

        if let Some(at) = self.xz.block_xyz(sub) {
            self.broadcast(ShardNotice::BlockChange {
                at,
                block,
                metadata,
            });
        }
        for side in sub.edges() {
            self.sides.record(
                side,
                EdgeDelta {
                    along: along(side, sub),
                    y: sub.y,
                    block,
                },
            );
        }
    }

    fn update_height(&mut self, sub: SubChunkXyz, block: BlockId) {
        let column = sub.z as usize * CHUNK_EDGE as usize + sub.x as usize;
        let Some(height) = self.height_map.get(column).copied() else {
            return;
        };
        let above = sub.y + 1;
        if block != AIR && above > height {
            self.height_map[column] = above;
        } else if block == AIR && above == height {
            let top = (0..sub.y)
                .rev()
                .find(|y| self.block(SubChunkXyz::new(sub.x, *y, sub.z)).is_some_and(|(b, _)| b != AIR))
                .map_or(0, |y| y + 1);
            self.height_map[column] = top;
        }
    }

    /// This chunk's own blocks on the face towards `side`, laid out the way the side cache wants.
    pub(crate) fn edge(&self, side: ChunkSide) -> Vec<BlockId> {
        let mut edge = Vec::with_capacity(side_cache::EDGE_LEN);
        for along in 0..CHUNK_EDGE as u8 {
            for y in 0..CHUNK_HEIGHT as u8 {
                let block = self
                    .block(edge_position(side, along, y))
                    .map_or(AIR, |(block, _)| block);
                edge.push(block);
            }
        }
        edge
    }

    pub(crate) fn link(&mut self, side: ChunkSide, edge: Vec<BlockId>) {
        debug!("Linking {} {:?}", self.xz, side);
        self.sides.set_edge(side, edge);
    }

    pub(crate) fn unlink(&mut self, side: ChunkSide) {
        debug!("Unlinking {} {:?}", self.xz, side);
        self.sides.unlink(side);
    }

    pub(crate) fn apply_edge_deltas(&mut self, side: ChunkSide, deltas: &[EdgeDelta]) {
        self.sides.apply(side, deltas);
    }

    pub(crate) fn is_linked(&self, side: ChunkSide) -> bool {
        self.sides.is_active(side)
    }

    /// Sends every face's pending changes to the chunk across it.
    fn flush_edge_deltas(&mut self, ctx: &mut ShardContext) {
        for side in ChunkSide::ALL {
            let deltas = self.sides.take_pending(side);
            if deltas.is_empty() {
                continue;
            }
            let Some(neighbour) = self.xz.neighbour(side) else {
                continue;
            };
            ctx.on_loaded_chunk(neighbour, move |chunk, _| {
                chunk.apply_edge_deltas(side.opposite(), &deltas);
                Ok(())
            });
        }
    }

    fn transmit_to(&self, player: EntityId, notice: ShardNotice) -> bool {
        match self.subscribers.get(&player) {
            Some(subscriber) => {
                subscriber.sink.transmit(notice);
                true
            }
            None => false,
        }
    }

    fn broadcast(&self, notice: ShardNotice) {
        for subscriber in self.subscribers.values() {
            subscriber.sink.transmit(notice.clone());
        }
    }

    fn broadcast_except(&self, player: EntityId, notice: ShardNotice) {
        for (id, subscriber) in self.subscribers.iter() {
            if *id != player {
                subscriber.sink.transmit(notice.clone());
            }
        }
    }

    /**
     * A player digs a block. If the block cannot be dug, the player is sent the block as it is so
     * their view stays correct.
     */
    pub(crate) fn dig_block(
        &mut self,
        player: EntityId,
        at: BlockXyz,
        ctx: &mut ShardContext,
    ) -> Result<bool, WorldError> {
        let block = self.instance(at)?;
        let block_types = self.block_types.clone();
        let dug = block_types.get(block.block).aspect.hit(self, &block, ctx)?;
        if !dug {
            self.transmit_to(
                player,
                ShardNotice::BlockChange {
                    at,
                    block: block.block,
                    metadata: block.metadata,
                },
            );
        }
        Ok(dug)
    }

    /**
     * A player places a block. Only blocks that are neither solid nor usable, such as air and
     * fluids, can be built over.
     */
    pub(crate) fn place_block(
        &mut self,
        player: EntityId,
        at: BlockXyz,
        block: BlockId,
        metadata: u8,
    ) -> Result<bool, WorldError> {
        let current = self.instance(at)?;
        let replaceable = {
            let current_type = self.block_types.get(current.block);
            !current_type.solid && current_type.aspect == crate::block::Aspect::Void
        };
        if block == AIR || !replaceable {
            self.transmit_to(
                player,
                ShardNotice::BlockChange {
                    at,
                    block: current.block,
                    metadata: current.metadata,
                },
            );
            return Ok(false);
        }
        self.set_block(current.index, block, metadata);
        Ok(true)
    }

    /// A player uses a block, opening its inventory as `window` if it has one.
    pub(crate) fn interact_block(
        &mut self,
        player: EntityId,
        at: BlockXyz,
        window: WindowId,
    ) -> Result<bool, WorldError> {
        let block = self.instance(at)?;
        let block_types = self.block_types.clone();
        block_types.get(block.block).aspect.interact(self, &block, player, window)
    }

    /**
     * Applies a click to the inventory of the block at `at`. The player is always told the outcome
     * and their new cursor, including when there is no inventory to click on.
     */
    pub(crate) fn click_inventory(
        &mut self,
        player: EntityId,
        at: BlockXyz,
        click: &Click,
        cursor: &mut Slot,
    ) -> Result<TxState, WorldError> {
        let block = self.instance(at)?;
        let block_types = self.block_types.clone();
        let result = block_types
            .get(block.block)
            .aspect
            .inventory_click(self, &block, player, click, cursor);
        match result {
            Err(e) if e.is_not_found() => {
                debug!("Rejecting click at {at}: {e}");
                self.answer_click(player, click, *cursor, false);
                Ok(TxState::Rejected)
            }
            other => other,
        }
    }

    fn answer_click(&self, player: EntityId, click: &Click, cursor: Slot, accepted: bool) {
        self.transmit_to(
            player,
            ShardNotice::TransactionResult {
                window: click.window,
                tx_id: click.tx_id,
                accepted,
            },
        );
        self.transmit_to(player, ShardNotice::CursorUpdate(cursor));
    }

    pub(crate) fn close_window(&mut self, player: EntityId, at: BlockXyz) -> Result<(), WorldError> {
        let block = self.instance(at)?;
        if let Some(inventory) = self.inventories.get_mut(&block.index) {
            inventory.viewers.remove(&player);
        }
        Ok(())
    }

    /**
     * Opens the block inventory at `index` for a player, creating it if this is the first time
     * the block is used.
     */
    pub(crate) fn open_window(
        &mut self,
        index: BlockIndex,
        kind: WindowKind,
        slots: usize,
        player: EntityId,
        window: WindowId,
    ) -> Result<(), WorldError> {
        let Some(subscriber) = self.subscribers.get(&player) else {
            return Err(WorldError::NotFound(format!("player {player} in {}", self.xz)));
        };
        let inventory = self
            .inventories
            .entry(index)
            .or_insert_with(|| BlockInventory::new(kind, slots));
        inventory.viewers.insert(player, window);
        subscriber.sink.transmit(ShardNotice::WindowOpen {
            window,
            kind: inventory.kind,
            slots: inventory.inventory.slots().to_vec(),
        });
        Ok(())
    }

    /**
     * Applies a click to an open block inventory. Players can only click windows they have open.
     */
    pub(crate) fn click_block_inventory(
        &mut self,
        index: BlockIndex,
        player: EntityId,
        click: &Click,
        cursor: &mut Slot,
    ) -> Result<TxState, WorldError> {
        let Some(inventory) = self.inventories.get_mut(&index) else {
            return Err(WorldError::NotFound(format!("inventory at {:?} in {}", index, self.xz)));
        };
        let state = if inventory.viewers.get(&player) == Some(&click.window) {
            inventory.inventory.apply_click(click, cursor)
        } else {
            TxState::Rejected
        };
        self.answer_click(player, click, *cursor, state == TxState::Accepted);
        if state == TxState::Accepted {
            self.broadcast_slot(index, click.slot);
        }
        Ok(state)
    }

    fn broadcast_slot(&self, index: BlockIndex, slot: usize) {
        let Some(inventory) = self.inventories.get(&index) else {
            return;
        };
        for (viewer, window) in inventory.viewers.iter() {
            self.transmit_to(
                *viewer,
                ShardNotice::SlotUpdate {
                    window: *window,
                    slot,
                    contents: inventory.inventory.slot(slot),
                },
            );
        }
    }

    pub(crate) fn broadcast_inventory(&self, index: BlockIndex) {
        let Some(inventory) = self.inventories.get(&index) else {
            return;
        };
        for slot in 0..inventory.inventory.len() {
            self.broadcast_slot(index, slot);
        }
    }

    pub(crate) fn block_inventory(&self, index: BlockIndex) -> Option<&BlockInventory> {
        self.inventories.get(&index)
    }

    pub(crate) fn block_inventory_mut(&mut self, index: BlockIndex) -> Option<&mut BlockInventory> {
        self.inventories.get_mut(&index)
    }

    /// Removes a block inventory, closing it for everyone who had it open.
    pub(crate) fn remove_inventory(&mut self, index: BlockIndex) -> Option<BlockInventory> {
        let inventory = self.inventories.remove(&index)?;
        for (viewer, window) in inventory.viewers.iter() {
            self.transmit_to(*viewer, ShardNotice::WindowClose(*window));
        }
        Some(inventory)
    }

    /// Asks for the block to be ticked, starting with the next tick.
    pub(crate) fn add_active_block(&mut self, index: BlockIndex) {
        self.pending_active.insert(index);
    }

    /**
     * Advances the chunk by one tick: active blocks first, then entity physics, then the
     * once-a-second position broadcasts and item offers. Changes to the chunk's faces are sent to
     * the neighbours last.
     */
    pub(crate) fn tick(&mut self, ctx: &mut ShardContext) -> Result<(), WorldError> {
        self.tick_active_blocks();
        self.tick_entities(ctx);
        if ctx.is_broadcast_tick() {
            for entity in self.entities.values() {
                self.broadcast(ShardNotice::EntityMove {
                    id: entity.id,
                    position: entity.position,
                    velocity: entity.velocity,
                });
            }
            self.offer_items();
        }
        self.flush_edge_deltas(ctx);
        Ok(())
    }

    fn tick_active_blocks(&mut self) {
        let pending = std::mem::take(&mut self.pending_active);
        self.active.extend(pending);
        let current = std::mem::take(&mut self.active);
        let block_types = self.block_types.clone();
        for index in current {
            let Some(block) = self.instance_by_index(index) else {
                continue;
            };
            if block_types.get(block.block).aspect.tick(self, &block) {
                self.active.insert(index);
            }
        }
    }

    fn tick_entities(&mut self, ctx: &mut ShardContext) {
        let entities = std::mem::take(&mut self.entities);
        for (id, mut entity) in entities {
            entity.step(|block| self.is_solid_at(block));
            match entity.position.block() {
                Some(block) if block.y >= 0 && block.chunk() == self.xz => {
                    self.entities.insert(id, entity);
                }
                Some(block) if block.y >= 0 => {
                    debug!("{id} leaves {} for {}", self.xz, block.chunk());
                    self.broadcast(ShardNotice::EntityDestroy(id));
                    ctx.transfer_entity(self.xz, block.chunk(), entity);
                }
                _ => {
                    debug!("{id} fell out of the world in {}", self.xz);
                    self.broadcast(ShardNotice::EntityDestroy(id));
                    ctx.free_entity_id(id);
                }
            }
        }
    }

    fn offer_items(&self) {
        for entity in self.entities.values() {
            let Some(stack) = entity.item() else {
                continue;
            };
            for subscriber in self.subscribers.values() {
                if subscriber.position.distance_sq(&entity.position) <= PICKUP_RANGE_SQ {
                    subscriber.sink.transmit(ShardNotice::ItemOffer {
                        id: entity.id,
                        stack,
                    });
                }
            }
        }
    }

    /**
     * Spawns a new entity in this chunk. The entity's position must lie within the chunk.
     */
    pub(crate) fn add_entity(
        &mut self,
        data: EntityData,
        ctx: &mut ShardContext,
    ) -> Result<EntityId, WorldError> {
        match data.position.block() {
            Some(block) if block.chunk() == self.xz => {}
            _ => {
                return Err(WorldError::BadLocation(format!(
                    "entity at {:?} is not in {}",
                    data.position, self.xz
                )))
            }
        }
        let id = ctx.allocate_entity_id()?;
        self.receive_entity(Entity::new(id, data));
        Ok(id)
    }

    /// Drops an item at `position`, giving it a little push in a random direction.
    pub(crate) fn spawn_item(
        &mut self,
        position: AbsXyz,
        stack: ItemStack,
        ctx: &mut ShardContext,
    ) -> Result<EntityId, WorldError> {
        let mut rng = rand::thread_rng();
        let velocity = AbsVelocity::new(
            rng.gen_range(-DROP_JITTER..DROP_JITTER),
            DROP_JITTER,
            rng.gen_range(-DROP_JITTER..DROP_JITTER),
        );
        self.add_entity(
            EntityData {
                kind: EntityKind::Item(stack),
                position,
                velocity,
            },
            ctx,
        )
    }

    /// Takes ownership of an entity, typically one handed over by a neighbouring chunk.
    pub(crate) fn receive_entity(&mut self, entity: Entity) {
        self.broadcast(ShardNotice::EntitySpawn {
            id: entity.id,
            kind: entity.kind,
            position: entity.position,
            velocity: entity.velocity,
        });
        self.entities.insert(entity.id, entity);
    }

    /**
     * Takes back an entity whose destination could not be loaded. It is put just inside this
     * chunk and stops moving sideways, so it does not leave again on the next tick.
     */
    pub(crate) fn return_entity(&mut self, mut entity: Entity) {
        let edge = f64::from(CHUNK_EDGE);
        let min_x = f64::from(self.xz.x) * edge;
        let min_z = f64::from(self.xz.z) * edge;
        entity.position.x = entity.position.x.clamp(min_x, min_x + edge - RETURN_MARGIN);
        entity.position.z = entity.position.z.clamp(min_z, min_z + edge - RETURN_MARGIN);
        entity.velocity.x = 0.0;
        entity.velocity.z = 0.0;
        self.receive_entity(entity);
    }

    /**
     * A player picks up an item entity. The entity is gone afterwards and its id is released.
     */
    pub(crate) fn take_item(
        &mut self,
        player: EntityId,
        id: EntityId,
        ctx: &mut ShardContext,
    ) -> Result<ItemStack, WorldError> {
        let stack = self
            .entities
            .get(&id)
            .and_then(|entity| entity.item())
            .ok_or_else(|| WorldError::NotFound(format!("item {id} in {}", self.xz)))?;
        self.entities.remove(&id);
        ctx.free_entity_id(id);
        self.broadcast(ShardNotice::EntityDestroy(id));
        self.transmit_to(player, ShardNotice::ItemTaken { id, stack });
        Ok(stack)
    }

    /**
     * Starts sending this chunk to a player: the chunk itself, its entities, and the other
     * players watching it.
     */
    pub(crate) fn add_subscriber(&mut self, player: EntityId, subscriber: Subscriber) -> Result<(), WorldError> {
        let data = self.snapshot()?;
        subscriber.sink.transmit(ShardNotice::ChunkData {
            chunk: self.xz,
            data,
        });
        for entity in self.entities.values() {
            subscriber.sink.transmit(ShardNotice::EntitySpawn {
                id: entity.id,
                kind: entity.kind,
                position: entity.position,
                velocity: entity.velocity,
            });
        }
        for (id, other) in self.subscribers.iter() {
            if *id != player {
                subscriber.sink.transmit(other.moved(*id));
            }
        }
        self.broadcast_except(player, subscriber.moved(player));
        self.subscribers.insert(player, subscriber);
        Ok(())
    }

    pub(crate) fn remove_subscriber(&mut self, player: EntityId) {
        let Some(subscriber) = self.subscribers.remove(&player) else {
            return;
        };
        for inventory in self.inventories.values_mut() {
            inventory.viewers.remove(&player);
        }
        subscriber.sink.transmit(ShardNotice::ChunkUnload(self.xz));
        self.broadcast(ShardNotice::EntityDestroy(player));
    }

    /// Records a subscriber's new position and relays it to everyone else watching.
    pub(crate) fn update_subscriber(
        &mut self,
        player: EntityId,
        position: AbsXyz,
        look: LookDegrees,
    ) -> Result<(), WorldError> {
        let Some(subscriber) = self.subscribers.get_mut(&player) else {
            return Err(WorldError::NotFound(format!("player {player} in {}", self.xz)));
        };
        subscriber.position = position;
        subscriber.look = look;
        let notice = subscriber.moved(player);
        self.broadcast_except(player, notice);
        Ok(())
    }

    /// Tells everyone watching that the chunk is going away and releases the ids of its entities.
    pub(crate) fn unload(&mut self, ctx: &mut ShardContext) {
        for index in self.inventories.keys().copied().collect::<Vec<_>>() {
            self.remove_inventory(index);
        }
        for id in self.entities.keys() {
            ctx.free_entity_id(*id);
        }
        self.entities.clear();
        self.broadcast(ShardNotice::ChunkUnload(self.xz));
        self.subscribers.clear();
    }

    /**
     * The chunk's blocks, metadata and light, compressed the way chunk packets carry them. The
     * result is kept until the next block change.
     */
    pub(crate) fn snapshot(&mut self) -> Result<Arc<Vec<u8>>, WorldError> {
        if let Some(snapshot) = &self.snapshot {
            return Ok(snapshot.clone());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.blocks)?;
        encoder.write_all(self.metadata.as_bytes())?;
        encoder.write_all(self.block_light.as_bytes())?;
        encoder.write_all(self.sky_light.as_bytes())?;
        let snapshot = Arc::new(encoder.finish()?);
        self.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::Read;
    use std::time::Duration;

    use flate2::read::ZlibDecoder;
    use tokio::sync::mpsc;

    use super::*;
    use crate::block::aspect::FURNACE_INPUT;
    use crate::entity::allocator::EntityIdAllocator;
    use crate::inventory::{ItemTypeId, TxId};
    use crate::shard::ShardRequest;
    use crate::store::ChunkStore;
    use crate::generator::FlatGenerator;

    pub(crate) fn context() -> ShardContext {
        ShardContext::new(Arc::new(EntityIdAllocator::new()), Duration::from_millis(50))
    }

    pub(crate) async fn flat_chunk(xz: ChunkXz, ctx: &mut ShardContext) -> Chunk {
        let data = FlatGenerator::new(64).load_chunk(xz).await.unwrap();
        Chunk::from_data(data, Arc::new(BlockTypeList::builtin().unwrap()), ctx).unwrap()
    }

    pub(crate) fn subscribe(chunk: &mut Chunk, player: i32) -> mpsc::Receiver<ShardNotice> {
        let (sender, receiver) = mpsc::channel(64);
        let subscriber = Subscriber::new(
            Box::new(sender),
            format!("player{player}"),
            AbsXyz::new(8.0, 64.0, 8.0),
            LookDegrees::default(),
        );
        chunk.add_subscriber(EntityId(player), subscriber).unwrap();
        receiver
    }

    pub(crate) fn drain(receiver: &mut mpsc::Receiver<ShardNotice>) -> Vec<ShardNotice> {
        let mut notices = vec![];
        while let Ok(notice) = receiver.try_recv() {
            notices.push(notice);
        }
        notices
    }

    fn index(x: u8, y: u8, z: u8) -> BlockIndex {
        BlockIndex::new(SubChunkXyz::new(x, y, z)).unwrap()
    }

    #[tokio::test]
    async fn set_block_invalidates_snapshot_and_notifies() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut notices = subscribe(&mut chunk, 100);
        assert!(matches!(drain(&mut notices)[0], ShardNotice::ChunkData { .. }));

        let before = chunk.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &chunk.snapshot().unwrap()));
        chunk.set_block(index(3, 64, 3), BlockId(1), 0);
        let after = chunk.snapshot().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        let mut raw = vec![];
        ZlibDecoder::new(after.as_slice()).read_to_end(&mut raw).unwrap();
        assert_eq!(raw.len(), BLOCKS_PER_CHUNK + 3 * NIBBLES_PER_CHUNK);
        assert_eq!(raw[index(3, 64, 3).get()], 1);

        assert_eq!(
            drain(&mut notices),
            vec![ShardNotice::BlockChange {
                at: BlockXyz::new(3, 64, 3),
                block: BlockId(1),
                metadata: 0
            }]
        );
        assert_eq!(chunk.height(3, 3), Some(65));
        chunk.set_block(index(3, 64, 3), AIR, 0);
        assert_eq!(chunk.height(3, 3), Some(64));
    }

    #[tokio::test]
    async fn edge_changes_wait_for_the_tick() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        chunk.set_block(index(15, 64, 0), BlockId(1), 0);
        assert!(ctx.take_effects().is_empty());

        chunk.tick(&mut ctx).unwrap();
        let effects = ctx.take_effects();
        let targets: Vec<ChunkXz> = effects
            .iter()
            .filter_map(|(_, request)| match request {
                ShardRequest::OnLoadedChunk { chunk, .. } => Some(*chunk),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![ChunkXz::new(0, -1), ChunkXz::new(1, 0)]);
    }

    #[tokio::test]
    async fn positions_and_offers_go_out_once_a_second() {
        let mut ctx = ShardContext::new(Arc::new(EntityIdAllocator::new()), Duration::from_millis(100));
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut notices = subscribe(&mut chunk, 100);
        let id = chunk
            .add_entity(
                EntityData {
                    kind: EntityKind::Item(ItemStack::new(ItemTypeId(4), 1, 0)),
                    position: AbsXyz::new(8.5, 64.0, 8.5),
                    velocity: AbsVelocity::default(),
                },
                &mut ctx,
            )
            .unwrap();
        drain(&mut notices);

        for _ in 0..25 {
            ctx.advance_tick();
            chunk.tick(&mut ctx).unwrap();
        }
        let seen = drain(&mut notices);
        let moves = seen
            .iter()
            .filter(|n| matches!(n, ShardNotice::EntityMove { id: moved, .. } if *moved == id))
            .count();
        let offers = seen
            .iter()
            .filter(|n| matches!(n, ShardNotice::ItemOffer { id: offered, .. } if *offered == id))
            .count();
        assert_eq!((moves, offers), (2, 2));
    }

    #[tokio::test]
    async fn returned_entity_stays_inside_the_chunk() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(-1, 0), &mut ctx).await;
        let entity = Entity::new(
            EntityId(7),
            EntityData {
                kind: EntityKind::Item(ItemStack::new(ItemTypeId(4), 1, 0)),
                position: AbsXyz::new(0.4, 70.0, 8.0),
                velocity: AbsVelocity::new(0.8, 0.0, 0.0),
            },
        );
        chunk.return_entity(entity);
        let back = chunk.entity(EntityId(7)).unwrap();
        assert!(back.position.x < 0.0 && back.position.x >= -1.0);
        assert_eq!(back.velocity.x, 0.0);

        chunk.tick(&mut ctx).unwrap();
        assert!(chunk.entity(EntityId(7)).is_some());
        assert!(ctx.take_effects().is_empty());
    }

    #[tokio::test]
    async fn solidity_across_faces_comes_from_side_cache() {
        let mut ctx = context();
        let mut a = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let b = flat_chunk(ChunkXz::new(1, 0), &mut ctx).await;
        let across = BlockXyz::new(16, 63, 4);
        assert!(!a.is_solid_at(across));

        a.link(ChunkSide::East, b.edge(ChunkSide::West));
        assert!(a.is_solid_at(across));
        assert!(!a.is_solid_at(BlockXyz::new(16, 64, 4)));
        assert!(!a.is_solid_at(BlockXyz::new(17, 63, 4)));

        a.unlink(ChunkSide::East);
        assert!(!a.is_solid_at(across));
    }

    #[tokio::test]
    async fn falling_items_are_destroyed_below_the_world() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let id = chunk
            .add_entity(
                EntityData {
                    kind: EntityKind::Item(ItemStack::new(ItemTypeId(3), 1, 0)),
                    position: AbsXyz::new(4.5, 0.2, 4.5),
                    velocity: AbsVelocity::new(0.0, -1.0, 0.0),
                },
                &mut ctx,
            )
            .unwrap();
        chunk.tick(&mut ctx).unwrap();
        assert!(chunk.entity(id).is_none());
        assert!(ctx.take_effects().is_empty());
    }

    #[tokio::test]
    async fn entities_outside_the_chunk_are_rejected() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let err = chunk
            .add_entity(
                EntityData {
                    kind: EntityKind::Item(ItemStack::new(ItemTypeId(3), 1, 0)),
                    position: AbsXyz::new(20.0, 70.0, 4.0),
                    velocity: AbsVelocity::default(),
                },
                &mut ctx,
            )
            .unwrap_err();
        assert!(matches!(err, WorldError::BadLocation(_)));
    }

    #[tokio::test]
    async fn digging_drops_an_item_that_can_be_taken() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut notices = subscribe(&mut chunk, 100);
        drain(&mut notices);

        let at = BlockXyz::new(8, 63, 8);
        assert!(chunk.dig_block(EntityId(100), at, &mut ctx).unwrap());
        assert_eq!(chunk.block_at(at).unwrap().0, AIR);
        let spawned = drain(&mut notices)
            .into_iter()
            .find_map(|notice| match notice {
                ShardNotice::EntitySpawn { id, kind, .. } => Some((id, kind)),
                _ => None,
            })
            .unwrap();
        assert_eq!(spawned.1, EntityKind::Item(ItemStack::new(ItemTypeId(3), 1, 0)));

        let stack = chunk.take_item(EntityId(100), spawned.0, &mut ctx).unwrap();
        assert_eq!(stack.item, ItemTypeId(3));
        assert!(chunk.take_item(EntityId(100), spawned.0, &mut ctx).unwrap_err().is_not_found());

        assert!(!chunk.dig_block(EntityId(100), BlockXyz::new(8, 0, 8), &mut ctx).unwrap());
        assert!(chunk.dig_block(EntityId(100), BlockXyz::new(40, 0, 8), &mut ctx).is_err());
    }

    #[tokio::test]
    async fn placing_needs_a_replaceable_block() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        assert!(chunk.place_block(EntityId(1), BlockXyz::new(1, 64, 1), BlockId(4), 0).unwrap());
        assert!(!chunk.place_block(EntityId(1), BlockXyz::new(1, 64, 1), BlockId(4), 0).unwrap());
        assert!(!chunk.place_block(EntityId(1), BlockXyz::new(1, 65, 1), AIR, 0).unwrap());
    }

    #[tokio::test]
    async fn furnace_stays_active_while_it_burns() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut notices = subscribe(&mut chunk, 100);
        let at = BlockXyz::new(5, 64, 5);
        chunk.place_block(EntityId(100), at, BlockId(61), 0).unwrap();
        assert!(chunk.interact_block(EntityId(100), at, WindowId(2)).unwrap());
        drain(&mut notices);

        let mut cursor = Some(ItemStack::new(ItemTypeId(4), 1, 0));
        let click = Click {
            window: WindowId(2),
            slot: FURNACE_INPUT,
            expected: None,
            right_click: false,
            tx_id: TxId(1),
        };
        assert_eq!(
            chunk.click_inventory(EntityId(100), at, &click, &mut cursor).unwrap(),
            TxState::Accepted
        );
        assert_eq!(cursor, None);
        assert_eq!(chunk.active_block_count(), 1);
        let notices = drain(&mut notices);
        assert!(notices.contains(&ShardNotice::TransactionResult {
            window: WindowId(2),
            tx_id: TxId(1),
            accepted: true
        }));

        // Nothing to burn, so the furnace drops out after one tick.
        chunk.tick(&mut ctx).unwrap();
        assert_eq!(chunk.active_block_count(), 0);
    }

    #[tokio::test]
    async fn clicks_without_an_inventory_are_rejected() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut notices = subscribe(&mut chunk, 100);
        drain(&mut notices);
        let click = Click {
            window: WindowId(2),
            slot: 0,
            expected: None,
            right_click: false,
            tx_id: TxId(9),
        };
        let mut cursor = Some(ItemStack::new(ItemTypeId(4), 1, 0));
        let state = chunk
            .click_inventory(EntityId(100), BlockXyz::new(1, 63, 1), &click, &mut cursor)
            .unwrap();
        assert_eq!(state, TxState::Rejected);
        assert_eq!(cursor, Some(ItemStack::new(ItemTypeId(4), 1, 0)));
        assert_eq!(
            drain(&mut notices),
            vec![
                ShardNotice::TransactionResult {
                    window: WindowId(2),
                    tx_id: TxId(9),
                    accepted: false
                },
                ShardNotice::CursorUpdate(cursor),
            ]
        );
    }

    #[tokio::test]
    async fn subscribers_see_each_other_move() {
        let mut ctx = context();
        let mut chunk = flat_chunk(ChunkXz::new(0, 0), &mut ctx).await;
        let mut first = subscribe(&mut chunk, 100);
        let mut second = subscribe(&mut chunk, 101);
        assert!(drain(&mut first)
            .iter()
            .any(|n| matches!(n, ShardNotice::PlayerMove { id, .. } if *id == EntityId(101))));
        assert!(drain(&mut second)
            .iter()
            .any(|n| matches!(n, ShardNotice::PlayerMove { id, .. } if *id == EntityId(100))));

        chunk
            .update_subscriber(EntityId(101), AbsXyz::new(1.0, 65.0, 1.0), LookDegrees::default())
            .unwrap();
        assert_eq!(drain(&mut first).len(), 1);
        assert!(drain(&mut second).is_empty());

        chunk.remove_subscriber(EntityId(101));
        assert_eq!(drain(&mut second), vec![ShardNotice::ChunkUnload(ChunkXz::new(0, 0))]);
        assert_eq!(drain(&mut first), vec![ShardNotice::EntityDestroy(EntityId(101))]);
        assert!(chunk
            .update_subscriber(EntityId(101), AbsXyz::default(), LookDegrees::default())
            .unwrap_err()
            .is_not_found());
    }
}
