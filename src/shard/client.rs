use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;

use shardcraft_lib::web::dto::ShardStatus;

use crate::block::BlockId;
use crate::chunk::{Chunk, Subscriber};
use crate::coords::{AbsVelocity, AbsXyz, BlockXyz, ChunkXz, LookDegrees, ShardXz};
use crate::entity::{EntityData, EntityId, EntityKind};
use crate::err::WorldError;
use crate::inventory::{Click, InventoryAccess, ItemStack, Slot, TxState, WindowId};
use crate::shard::{ShardContext, ShardMessage, ShardRequest};

/// Finds the mailbox of the shard responsible for a part of the world.
pub(crate) trait ShardConnecter: Send + Sync {
    /// Starts the shard if it is not running yet.
    fn shard(&self, xz: ShardXz) -> ShardHandle;

    /// The shard if it is already running.
    fn loaded_shard(&self, xz: ShardXz) -> Option<ShardHandle>;

    fn chunk_shard(&self, chunk: ChunkXz) -> ShardHandle {
        self.shard(chunk.shard())
    }
}

/**
 * The sending end of a shard's mailbox. Every method here only queues work; sending waits while
 * the mailbox is full.
 */
#[derive(Clone, Debug)]
pub(crate) struct ShardHandle {
    xz: ShardXz,
    sender: Sender<ShardMessage>,
}

impl ShardHandle {
    pub(crate) fn new(xz: ShardXz, sender: Sender<ShardMessage>) -> Self {
        Self { xz, sender }
    }

    pub(crate) fn xz(&self) -> ShardXz {
        self.xz
    }

    pub(crate) async fn enqueue(&self, request: ShardRequest) -> Result<(), WorldError> {
        self.sender
            .send(ShardMessage::Request(request))
            .await
            .map_err(|_| WorldError::NotFound(format!("shard {} has stopped", self.xz)))
    }

    pub(crate) async fn on_chunk<F>(&self, chunk: ChunkXz, action: F) -> Result<(), WorldError>
    where
        F: FnOnce(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.enqueue(ShardRequest::OnChunk {
            chunk,
            action: Box::new(action),
        })
        .await
    }

    pub(crate) async fn on_loaded_chunk<F>(&self, chunk: ChunkXz, action: F) -> Result<(), WorldError>
    where
        F: FnOnce(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.enqueue(ShardRequest::OnLoadedChunk {
            chunk,
            action: Box::new(action),
        })
        .await
    }

    pub(crate) async fn on_all_chunks<F>(&self, action: F) -> Result<(), WorldError>
    where
        F: FnMut(&mut Chunk, &mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.enqueue(ShardRequest::OnAllChunks(Box::new(action))).await
    }

    pub(crate) async fn run<F>(&self, action: F) -> Result<(), WorldError>
    where
        F: FnOnce(&mut ShardContext) -> Result<(), WorldError> + Send + 'static,
    {
        self.enqueue(ShardRequest::Arbitrary(Box::new(action))).await
    }

    /// Resolves once the shard has worked through everything queued before this call.
    pub(crate) async fn flush(&self) -> Result<u64, WorldError> {
        let (sender, receiver) = oneshot::channel();
        self.run(move |ctx| {
            let _ = sender.send(ctx.ticks());
            Ok(())
        })
        .await?;
        receiver
            .await
            .map_err(|_| WorldError::NotFound(format!("shard {} has stopped", self.xz)))
    }

    pub(crate) async fn status(&self) -> Result<ShardStatus, WorldError> {
        let (sender, receiver) = oneshot::channel();
        self.enqueue(ShardRequest::Status(sender)).await?;
        receiver
            .await
            .map_err(|_| WorldError::NotFound(format!("shard {} has stopped", self.xz)))
    }

    pub(crate) async fn unload(&self, chunk: ChunkXz) -> Result<(), WorldError> {
        self.enqueue(ShardRequest::Unload(chunk)).await
    }

    // Player actions. These are what the connection layer calls once it has decoded a packet, and
    // nothing in this crate sends them on its own.

    pub(crate) async fn subscribe(
        &self,
        chunk: ChunkXz,
        player: EntityId,
        subscriber: Subscriber,
    ) -> Result<(), WorldError> {
        self.on_chunk(chunk, move |chunk, _| chunk.add_subscriber(player, subscriber))
            .await
    }

    pub(crate) async fn unsubscribe(&self, chunk: ChunkXz, player: EntityId) -> Result<(), WorldError> {
        self.on_loaded_chunk(chunk, move |chunk, _| {
            chunk.remove_subscriber(player);
            Ok(())
        })
        .await
    }

    pub(crate) async fn update_position(
        &self,
        chunk: ChunkXz,
        player: EntityId,
        position: AbsXyz,
        look: LookDegrees,
    ) -> Result<(), WorldError> {
        self.on_loaded_chunk(chunk, move |chunk, _| {
            chunk.update_subscriber(player, position, look)
        })
        .await
    }

    pub(crate) async fn dig(&self, player: EntityId, at: BlockXyz) -> Result<(), WorldError> {
        self.on_chunk(at.chunk(), move |chunk, ctx| {
            chunk.dig_block(player, at, ctx).map(|_| ())
        })
        .await
    }

    pub(crate) async fn place(
        &self,
        player: EntityId,
        at: BlockXyz,
        block: BlockId,
        metadata: u8,
    ) -> Result<(), WorldError> {
        self.on_chunk(at.chunk(), move |chunk, _| {
            chunk.place_block(player, at, block, metadata).map(|_| ())
        })
        .await
    }

    pub(crate) async fn interact(
        &self,
        player: EntityId,
        at: BlockXyz,
        window: WindowId,
    ) -> Result<(), WorldError> {
        self.on_chunk(at.chunk(), move |chunk, _| {
            chunk.interact_block(player, at, window).map(|_| ())
        })
        .await
    }

    pub(crate) async fn close_window(&self, player: EntityId, at: BlockXyz) -> Result<(), WorldError> {
        self.on_loaded_chunk(at.chunk(), move |chunk, _| chunk.close_window(player, at))
            .await
    }

    /// Throws an item into the world at `position`.
    pub(crate) async fn drop_item(
        &self,
        position: AbsXyz,
        velocity: AbsVelocity,
        stack: ItemStack,
    ) -> Result<(), WorldError> {
        let chunk = position
            .block()
            .ok_or(WorldError::Overflow)?
            .chunk();
        self.on_chunk(chunk, move |chunk, ctx| {
            let data = EntityData {
                kind: EntityKind::Item(stack),
                position,
                velocity,
            };
            chunk.add_entity(data, ctx).map(|_| ())
        })
        .await
    }

    pub(crate) async fn take_item(
        &self,
        player: EntityId,
        chunk: ChunkXz,
        item: EntityId,
    ) -> Result<(), WorldError> {
        self.on_loaded_chunk(chunk, move |chunk, ctx| {
            chunk.take_item(player, item, ctx).map(|_| ())
        })
        .await
    }

    /// The inventory of the block at `at`, as seen from outside the shard that owns it.
    pub(crate) fn proxy_inventory(&self, player: EntityId, at: BlockXyz) -> ProxyInventory {
        ProxyInventory::new(self.clone(), player, at)
    }
}

/**
 * Stands in for a block inventory owned by another shard. Clicks are forwarded to the owning chunk
 * and answered with [`TxState::Deferred`]; the real outcome reaches the player later as a
 * transaction result, followed by the new cursor and any slot changes.
 */
pub(crate) struct ProxyInventory {
    shard: ShardHandle,
    player: EntityId,
    at: BlockXyz,
}

impl ProxyInventory {
    pub(crate) fn new(shard: ShardHandle, player: EntityId, at: BlockXyz) -> Self {
        Self { shard, player, at }
    }
}

#[async_trait]
impl InventoryAccess for ProxyInventory {
    async fn click(&mut self, click: Click, cursor: &mut Slot) -> TxState {
        let player = self.player;
        let at = self.at;
        let mut held = *cursor;
        let forwarded = self
            .shard
            .on_chunk(at.chunk(), move |chunk, _| {
                chunk.click_inventory(player, at, &click, &mut held).map(|_| ())
            })
            .await;
        match forwarded {
            Ok(()) => TxState::Deferred,
            Err(e) => {
                warn!("Could not forward click at {at}: {e}");
                TxState::Rejected
            }
        }
    }
}
