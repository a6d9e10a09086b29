use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::MissedTickBehavior;

use shardcraft_lib::web::dto::ShardStatus;

use crate::block::BlockTypeList;
use crate::chunk::Chunk;
use crate::coords::{ChunkSide, ChunkXz, ShardXz, CHUNKS_PER_SHARD};
use crate::entity::allocator::EntityIdAllocator;
use crate::entity::Entity;
use crate::err::WorldError;
use crate::store::ChunkStore;

pub(crate) mod client;
pub(crate) mod context;
pub(crate) mod manager;

pub(crate) use client::{ShardConnecter, ShardHandle};
pub(crate) use context::{ChunkAction, EachChunkAction, ShardAction, ShardContext};

/// Everything a shard is handed when it starts, shared by all shards of a world.
#[derive(Clone)]
pub(crate) struct WorldServices {
    pub(crate) block_types: Arc<BlockTypeList>,
    pub(crate) store: Arc<dyn ChunkStore>,
    /// Consulted for chunks the store has never seen.
    pub(crate) generator: Arc<dyn ChunkStore>,
    pub(crate) entity_ids: Arc<EntityIdAllocator>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ShardConfig {
    pub(crate) mailbox_capacity: usize,
    pub(crate) tick_period: Duration,
}

pub(crate) enum ShardRequest {
    /// Runs on the chunk, loading it first if necessary.
    OnChunk { chunk: ChunkXz, action: ChunkAction },
    /// Runs on the chunk if it is loaded, and is dropped otherwise.
    OnLoadedChunk { chunk: ChunkXz, action: ChunkAction },
    OnAllChunks(EachChunkAction),
    /**
     * Moves an entity into `to`, loading it first if necessary. If `to` cannot be loaded the
     * entity is sent back to `back_to`, and with nowhere to go back to its id is freed.
     */
    Transfer {
        entity: Entity,
        to: ChunkXz,
        back_to: Option<ChunkXz>,
    },
    Arbitrary(ShardAction),
    Unload(ChunkXz),
    Status(oneshot::Sender<ShardStatus>),
}

impl Debug for ShardRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardRequest::OnChunk { chunk, .. } => write!(f, "OnChunk({chunk})"),
            ShardRequest::OnLoadedChunk { chunk, .. } => write!(f, "OnLoadedChunk({chunk})"),
            ShardRequest::OnAllChunks(_) => write!(f, "OnAllChunks"),
            ShardRequest::Transfer { entity, to, .. } => write!(f, "Transfer({} to {to})", entity.id),
            ShardRequest::Arbitrary(_) => write!(f, "Arbitrary"),
            ShardRequest::Unload(chunk) => write!(f, "Unload({chunk})"),
            ShardRequest::Status(_) => write!(f, "Status"),
        }
    }
}

/// Ticks and requests share one mailbox, so a tick never overtakes a request queued before it.
#[derive(Debug)]
pub(crate) enum ShardMessage {
    Tick,
    Request(ShardRequest),
}

/// Logs a failed operation. Only fatal errors are passed on, everything else ends with the
/// operation that caused it.
fn report(shard: ShardXz, result: Result<(), WorldError>) -> Result<(), WorldError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) if e.is_not_found() => {
            debug!("Nothing to do in {shard}: {e}");
            Ok(())
        }
        Err(e) => {
            warn!("Dropping operation in {shard}: {e}");
            Ok(())
        }
    }
}

/**
 * The actor owning a 16x16 grid of chunks. One task runs each shard, taking messages off the
 * mailbox one at a time and running each to completion before looking at the next.
 *
 * Work a chunk queues for other chunks is routed after each message: requests for this shard are
 * run before the next mailbox message, requests for other shards are sent to their mailboxes.
 */
pub(crate) struct ChunkShard {
    xz: ShardXz,
    chunks: Vec<Option<Chunk>>,
    services: WorldServices,
    connecter: Arc<dyn ShardConnecter>,
    ctx: ShardContext,
    local: VecDeque<ShardRequest>,
}

impl ChunkShard {
    pub(crate) fn new(
        xz: ShardXz,
        services: WorldServices,
        connecter: Arc<dyn ShardConnecter>,
        tick_period: Duration,
    ) -> Self {
        let ctx = ShardContext::new(services.entity_ids.clone(), tick_period);
        Self {
            xz,
            chunks: (0..CHUNKS_PER_SHARD).map(|_| None).collect(),
            services,
            connecter,
            ctx,
            local: VecDeque::new(),
        }
    }

    /**
     * Starts the shard's task and its ticker, returning the handle to its mailbox. A fatal error
     * stops the shard and trips `fatal`.
     */
    pub(crate) fn spawn(
        xz: ShardXz,
        services: WorldServices,
        connecter: Arc<dyn ShardConnecter>,
        config: ShardConfig,
        fatal: Arc<Notify>,
    ) -> ShardHandle {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let shard = Self::new(xz, services, connecter, config.tick_period);
        tokio::spawn(async move { shard.run(receiver, fatal).await });
        let ticker = sender.clone();
        tokio::spawn(async move { run_ticker(ticker, config.tick_period).await });
        ShardHandle::new(xz, sender)
    }

    async fn run(mut self, mut receiver: Receiver<ShardMessage>, fatal: Arc<Notify>) {
        info!("Shard {} started", self.xz);
        while let Some(msg) = receiver.recv().await {
            if let Err(e) = self.handle(msg).await {
                error!("Shard {} stopped: {e}", self.xz);
                fatal.notify_one();
                break;
            }
        }
    }

    /**
     * Runs one mailbox message, then everything it queued for this shard. Only fatal errors are
     * returned.
     */
    pub(crate) async fn handle(&mut self, msg: ShardMessage) -> Result<(), WorldError> {
        self.process(msg).await?;
        while let Some(request) = self.local.pop_front() {
            self.process(ShardMessage::Request(request)).await?;
        }
        Ok(())
    }

    async fn process(&mut self, msg: ShardMessage) -> Result<(), WorldError> {
        let result = match msg {
            ShardMessage::Tick => self.tick(),
            ShardMessage::Request(request) => self.request(request).await,
        };
        self.route_effects().await;
        result
    }

    async fn route_effects(&mut self) {
        for (shard, request) in self.ctx.take_effects() {
            if shard == self.xz {
                self.local.push_back(request);
                continue;
            }
            // Work for loaded chunks only never starts a shard.
            let handle = match &request {
                ShardRequest::OnLoadedChunk { .. } => self.connecter.loaded_shard(shard),
                _ => Some(self.connecter.shard(shard)),
            };
            let Some(handle) = handle else {
                debug!("{} drops {:?}, {} is not running", self.xz, request, shard);
                continue;
            };
            debug!("{} sends {:?} to {}", self.xz, request, shard);
            if let Err(e) = handle.enqueue(request).await {
                warn!("Dropping request from {}: {e}", self.xz);
            }
        }
    }

    fn tick(&mut self) -> Result<(), WorldError> {
        self.ctx.advance_tick();
        for chunk in self.chunks.iter_mut().flatten() {
            report(self.xz, chunk.tick(&mut self.ctx))?;
        }
        Ok(())
    }

    async fn request(&mut self, request: ShardRequest) -> Result<(), WorldError> {
        match request {
            ShardRequest::OnChunk { chunk, action } => {
                let Some(index) = self.index_of(chunk) else {
                    return Ok(());
                };
                if !self.load_chunk(index).await? {
                    return Ok(());
                }
                match self.chunks[index].as_mut() {
                    Some(loaded) => report(self.xz, action(loaded, &mut self.ctx)),
                    None => Ok(()),
                }
            }
            ShardRequest::OnLoadedChunk { chunk, action } => {
                let Some(index) = self.index_of(chunk) else {
                    return Ok(());
                };
                match self.chunks[index].as_mut() {
                    Some(loaded) => report(self.xz, action(loaded, &mut self.ctx)),
                    None => {
                        debug!("Skipping request for unloaded {chunk}");
                        Ok(())
                    }
                }
            }
            ShardRequest::OnAllChunks(mut action) => {
                for chunk in self.chunks.iter_mut().flatten() {
                    report(self.xz, action(chunk, &mut self.ctx))?;
                }
                Ok(())
            }
            ShardRequest::Transfer { entity, to, back_to } => self.transfer(entity, to, back_to).await,
            ShardRequest::Arbitrary(action) => report(self.xz, action(&mut self.ctx)),
            ShardRequest::Unload(chunk) => {
                if let Some(index) = self.index_of(chunk) {
                    self.unload_chunk(index);
                }
                Ok(())
            }
            ShardRequest::Status(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
        }
    }

    async fn transfer(&mut self, entity: Entity, to: ChunkXz, back_to: Option<ChunkXz>) -> Result<(), WorldError> {
        let mut loaded = None;
        if let Some(index) = self.index_of(to) {
            if self.load_chunk(index).await? {
                loaded = self.chunks[index].as_mut();
            }
        }
        match (loaded, back_to) {
            (Some(chunk), Some(_)) => chunk.receive_entity(entity),
            (Some(chunk), None) => chunk.return_entity(entity),
            (None, Some(origin)) => {
                warn!("{} could not enter {to}, sending it back to {origin}", entity.id);
                self.ctx.return_entity(origin, entity);
            }
            (None, None) => {
                warn!("{} is lost, {to} could not be loaded", entity.id);
                self.ctx.free_entity_id(entity.id);
            }
        }
        Ok(())
    }

    fn index_of(&self, chunk: ChunkXz) -> Option<usize> {
        let index = self.xz.chunk_index(chunk);
        if index.is_none() {
            warn!("{}", WorldError::BadLocation(format!("{chunk} is not in {}", self.xz)));
        }
        index
    }

    /**
     * Makes sure the chunk at `index` is loaded, asking the store and then the generator. Returns
     * false if neither could provide it.
     */
    async fn load_chunk(&mut self, index: usize) -> Result<bool, WorldError> {
        if self.chunks[index].is_some() {
            return Ok(true);
        }
        let xz = self.xz.chunk_at(index);
        let data = match self.services.store.load_chunk(xz).await {
            Err(e) if e.is_not_found() => self.services.generator.load_chunk(xz).await,
            other => other,
        };
        let data = match data {
            Ok(data) if data.xz == xz => data,
            Ok(data) => {
                error!("Asked for {xz}, got {}", data.xz);
                return Ok(false);
            }
            Err(e) => {
                error!("Failed to load {xz}: {e}");
                return Ok(false);
            }
        };
        let mut chunk = match Chunk::from_data(data, self.services.block_types.clone(), &mut self.ctx) {
            Ok(chunk) => chunk,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Failed to load {xz}: {e}");
                return Ok(false);
            }
        };
        self.link_neighbours(&mut chunk);
        info!("Loaded {xz} with {} entities", chunk.entity_count());
        self.chunks[index] = Some(chunk);
        Ok(true)
    }

    /**
     * Exchanges faces with every loaded neighbour. Neighbours in this shard are linked right away;
     * neighbours in other shards get our face through their mailbox and answer with theirs.
     */
    fn link_neighbours(&mut self, chunk: &mut Chunk) {
        for side in ChunkSide::ALL {
            let Some(neighbour) = chunk.xz().neighbour(side) else {
                continue;
            };
            match self.xz.chunk_index(neighbour) {
                Some(index) => {
                    if let Some(other) = self.chunks[index].as_mut() {
                        other.link(side.opposite(), chunk.edge(side));
                        chunk.link(side, other.edge(side.opposite()));
                    }
                }
                None => {
                    let origin = chunk.xz();
                    let edge = chunk.edge(side);
                    self.ctx.on_loaded_chunk(neighbour, move |other, ctx| {
                        other.link(side.opposite(), edge);
                        let back = other.edge(side.opposite());
                        ctx.on_loaded_chunk(origin, move |chunk, _| {
                            chunk.link(side, back);
                            Ok(())
                        });
                        Ok(())
                    });
                }
            }
        }
    }

    fn unload_chunk(&mut self, index: usize) {
        let Some(mut chunk) = self.chunks[index].take() else {
            return;
        };
        chunk.unload(&mut self.ctx);
        for side in ChunkSide::ALL {
            let Some(neighbour) = chunk.xz().neighbour(side) else {
                continue;
            };
            match self.xz.chunk_index(neighbour) {
                Some(index) => {
                    if let Some(other) = self.chunks[index].as_mut() {
                        other.unlink(side.opposite());
                    }
                }
                None => self.ctx.on_loaded_chunk(neighbour, move |other, _| {
                    other.unlink(side.opposite());
                    Ok(())
                }),
            }
        }
        info!("Unloaded {}", chunk.xz());
    }

    pub(crate) fn status(&self) -> ShardStatus {
        let loaded = || self.chunks.iter().flatten();
        ShardStatus {
            x: self.xz.x,
            z: self.xz.z,
            ticks: self.ctx.ticks(),
            loaded_chunks: loaded().count(),
            entities: loaded().map(|c| c.entity_count()).sum(),
            active_blocks: loaded().map(|c| c.active_block_count()).sum(),
            subscribers: loaded().map(|c| c.subscriber_count()).sum(),
        }
    }
}

/**
 * Pushes a tick into the shard's mailbox at a fixed rate. A busy shard delays its ticks instead of
 * catching up on the ones it missed.
 */
async fn run_ticker(sender: Sender<ShardMessage>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if sender.send(ShardMessage::Tick).await.is_err() {
            break;
        }
    }
}
