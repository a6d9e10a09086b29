use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::block::BlockId;
use crate::coords::{AbsVelocity, AbsXyz, BlockXyz, ChunkXz, LookDegrees};
use crate::entity::{EntityId, EntityKind};
use crate::inventory::{ItemStack, Slot, TxId, WindowId, WindowKind};

/**
 * Everything a shard tells a player. Turning these into packets is the connection's business.
 */
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ShardNotice {
    ChunkData {
        chunk: ChunkXz,
        data: Arc<Vec<u8>>,
    },
    ChunkUnload(ChunkXz),
    BlockChange {
        at: BlockXyz,
        block: BlockId,
        metadata: u8,
    },
    EntitySpawn {
        id: EntityId,
        kind: EntityKind,
        position: AbsXyz,
        velocity: AbsVelocity,
    },
    EntityDestroy(EntityId),
    EntityMove {
        id: EntityId,
        position: AbsXyz,
        velocity: AbsVelocity,
    },
    /// An item lying close enough to be picked up.
    ItemOffer {
        id: EntityId,
        stack: ItemStack,
    },
    ItemTaken {
        id: EntityId,
        stack: ItemStack,
    },
    PlayerMove {
        id: EntityId,
        name: String,
        position: AbsXyz,
        look: LookDegrees,
    },
    WindowOpen {
        window: WindowId,
        kind: WindowKind,
        slots: Vec<Slot>,
    },
    WindowClose(WindowId),
    SlotUpdate {
        window: WindowId,
        slot: usize,
        contents: Slot,
    },
    CursorUpdate(Slot),
    TransactionResult {
        window: WindowId,
        tx_id: TxId,
        accepted: bool,
    },
}

/// Where a shard sends notices for one player.
pub(crate) trait PlayerSink: Send + Sync {
    fn transmit(&self, notice: ShardNotice);
}

impl PlayerSink for mpsc::Sender<ShardNotice> {
    /// Never waits: a player that cannot keep up loses notices rather than stalling the shard.
    fn transmit(&self, notice: ShardNotice) {
        match self.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => warn!("Player queue full, dropping {:?}", notice),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
