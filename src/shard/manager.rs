use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use tokio::sync::Notify;

use shardcraft_lib::web::dto::ShardStatus;

use crate::coords::{ChunkXz, ShardXz};
use crate::err::WorldError;
use crate::shard::{ChunkShard, ShardConfig, ShardConnecter, ShardHandle, ShardRequest, WorldServices};

struct Inner {
    shards: Mutex<HashMap<ShardXz, ShardHandle>>,
    services: WorldServices,
    config: ShardConfig,
    fatal: Arc<Notify>,
}

/**
 * Runs every shard of a world in this process. A shard is started the first time anything asks
 * for it and then keeps running for as long as the server does.
 */
#[derive(Clone)]
pub(crate) struct LocalShardManager {
    inner: Arc<Inner>,
}

impl LocalShardManager {
    pub(crate) fn new(services: WorldServices, config: ShardConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                shards: Mutex::new(HashMap::new()),
                services,
                config,
                fatal: Arc::new(Notify::new()),
            }),
        }
    }

    fn shards(&self) -> MutexGuard<'_, HashMap<ShardXz, ShardHandle>> {
        self.inner.shards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a request with the shard owning `chunk`.
    pub(crate) async fn enqueue(&self, chunk: ChunkXz, request: ShardRequest) -> Result<(), WorldError> {
        self.chunk_shard(chunk).enqueue(request).await
    }

    pub(crate) async fn unload_chunk(&self, chunk: ChunkXz) -> Result<(), WorldError> {
        self.chunk_shard(chunk).unload(chunk).await
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.shards().len()
    }

    /// Asks every running shard for its status. Shards that have stopped are left out.
    pub(crate) async fn status(&self) -> Vec<ShardStatus> {
        let handles: Vec<ShardHandle> = self.shards().values().cloned().collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.status().await {
                Ok(status) => statuses.push(status),
                Err(e) => warn!("No status from {}: {e}", handle.xz()),
            }
        }
        statuses.sort_by_key(|s| (s.x, s.z));
        statuses
    }

    /// Resolves when any shard has stopped on a fatal error.
    pub(crate) async fn fatal_error(&self) {
        self.inner.fatal.notified().await
    }
}

impl ShardConnecter for LocalShardManager {
    fn shard(&self, xz: ShardXz) -> ShardHandle {
        let mut shards = self.shards();
        if let Some(handle) = shards.get(&xz) {
            return handle.clone();
        }
        info!("Starting shard {xz}");
        let handle = ChunkShard::spawn(
            xz,
            self.inner.services.clone(),
            Arc::new(self.clone()),
            self.inner.config,
            self.inner.fatal.clone(),
        );
        shards.insert(xz, handle.clone());
        handle
    }

    fn loaded_shard(&self, xz: ShardXz) -> Option<ShardHandle> {
        self.shards().get(&xz).cloned()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::block::BlockId;
    use crate::chunk::test::drain;
    use crate::chunk::{Chunk, Subscriber};
    use crate::coords::{AbsVelocity, AbsXyz, BlockXyz, ChunkSide, LookDegrees};
    use crate::entity::allocator::EntityIdAllocator;
    use crate::entity::{EntityData, EntityId, EntityKind};
    use crate::inventory::{Click, InventoryAccess, ItemStack, ItemTypeId, TxId, TxState, WindowId, WindowKind};
    use crate::player::ShardNotice;
    use crate::shard::test::{services, EmptyStore};
    use crate::shard::ShardContext;

    fn manager(entity_ids: EntityIdAllocator) -> LocalShardManager {
        LocalShardManager::new(
            services(Arc::new(EmptyStore::default()), Arc::new(entity_ids)),
            ShardConfig {
                mailbox_capacity: 16,
                tick_period: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn shards_start_on_first_use() {
        let manager = manager(EntityIdAllocator::new());
        assert_eq!(manager.shard_count(), 0);

        let chunk = ChunkXz::new(-1, 20);
        manager
            .enqueue(
                chunk,
                ShardRequest::OnChunk {
                    chunk,
                    action: Box::new(|_: &mut Chunk, _: &mut ShardContext| Ok(())),
                },
            )
            .await
            .unwrap();
        let handle = manager.chunk_shard(chunk);
        assert_eq!(handle.xz(), ShardXz::new(-1, 1));
        handle.flush().await.unwrap();
        assert_eq!(manager.shard_count(), 1);

        let statuses = manager.status().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!((statuses[0].x, statuses[0].z), (-1, 1));
        assert_eq!(statuses[0].loaded_chunks, 1);

        manager.unload_chunk(chunk).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(manager.status().await[0].loaded_chunks, 0);
    }

    #[tokio::test]
    async fn linking_across_shards_does_not_start_neighbours() {
        let manager = manager(EntityIdAllocator::new());
        let chunk = ChunkXz::new(15, 0);
        let handle = manager.chunk_shard(chunk);
        handle.on_chunk(chunk, |_, _| Ok(())).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(manager.shard_count(), 1);
        assert!(manager.loaded_shard(ShardXz::new(1, 0)).is_none());

        // A running neighbour does get the link.
        let east = ChunkXz::new(16, 0);
        let east_shard = manager.chunk_shard(east);
        east_shard.on_chunk(east, |_, _| Ok(())).await.unwrap();
        east_shard.flush().await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(manager.shard_count(), 2);
        let linked = Arc::new(AtomicUsize::new(0));
        let counter = linked.clone();
        handle
            .on_chunk(chunk, move |c, _| {
                if c.is_linked(ChunkSide::East) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .await
            .unwrap();
        handle.flush().await.unwrap();
        assert_eq!(linked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_ids_stop_the_server() {
        let manager = manager(EntityIdAllocator::with_max(-1));
        let handle = manager.shard(ShardXz::new(0, 0));
        handle
            .on_chunk(ChunkXz::new(0, 0), |chunk, ctx| {
                let data = EntityData {
                    kind: EntityKind::Item(ItemStack::new(ItemTypeId(1), 1, 0)),
                    position: AbsXyz::new(1.0, 70.0, 1.0),
                    velocity: Default::default(),
                };
                chunk.add_entity(data, ctx).map(|_| ())
            })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), manager.fatal_error())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn player_session_through_handles() {
        let manager = LocalShardManager::new(
            services(Arc::new(EmptyStore::default()), Arc::new(EntityIdAllocator::new())),
            ShardConfig {
                mailbox_capacity: 16,
                tick_period: Duration::from_secs(3600),
            },
        );
        let chunk = ChunkXz::new(0, 0);
        let shard = manager.chunk_shard(chunk);
        let player = EntityId(500);
        let (sink, mut notices) = mpsc::channel(256);
        let subscriber = Subscriber::new(
            Box::new(sink),
            "alex".into(),
            AbsXyz::new(8.0, 65.0, 8.0),
            LookDegrees::default(),
        );
        shard.subscribe(chunk, player, subscriber).await.unwrap();

        let chest = BlockXyz::new(3, 64, 3);
        shard.place(player, chest, BlockId(54), 0).await.unwrap();
        shard.interact(player, chest, WindowId(2)).await.unwrap();
        shard
            .update_position(chunk, player, AbsXyz::new(8.0, 65.0, 9.0), LookDegrees::default())
            .await
            .unwrap();
        shard.flush().await.unwrap();
        let seen = drain(&mut notices);
        assert!(matches!(seen[0], ShardNotice::ChunkData { chunk: c, .. } if c == chunk));
        assert!(seen.contains(&ShardNotice::BlockChange {
            at: chest,
            block: BlockId(54),
            metadata: 0
        }));
        assert!(seen.iter().any(|n| matches!(
            n,
            ShardNotice::WindowOpen {
                window: WindowId(2),
                kind: WindowKind::Chest,
                ..
            }
        )));

        let mut proxy = shard.proxy_inventory(player, chest);
        let click = Click {
            window: WindowId(2),
            slot: 0,
            expected: None,
            right_click: false,
            tx_id: TxId(7),
        };
        let mut cursor = None;
        assert_eq!(proxy.click(click, &mut cursor).await, TxState::Deferred);
        shard.close_window(player, chest).await.unwrap();
        shard.flush().await.unwrap();
        assert!(drain(&mut notices).iter().any(|n| matches!(
            n,
            ShardNotice::TransactionResult { tx_id: TxId(7), .. }
        )));

        let cobble = ItemStack::new(ItemTypeId(4), 2, 0);
        shard
            .drop_item(AbsXyz::new(8.5, 64.0, 8.5), AbsVelocity::default(), cobble)
            .await
            .unwrap();
        shard.flush().await.unwrap();
        let item = drain(&mut notices)
            .into_iter()
            .find_map(|n| match n {
                ShardNotice::EntitySpawn {
                    id,
                    kind: EntityKind::Item(stack),
                    ..
                } if stack == cobble => Some(id),
                _ => None,
            })
            .unwrap();
        shard.take_item(player, chunk, item).await.unwrap();
        shard.flush().await.unwrap();
        assert!(drain(&mut notices).contains(&ShardNotice::ItemTaken { id: item, stack: cobble }));

        shard.dig(player, chest).await.unwrap();
        shard.flush().await.unwrap();
        let seen = drain(&mut notices);
        assert!(seen.contains(&ShardNotice::BlockChange {
            at: chest,
            block: BlockId(0),
            metadata: 0
        }));
        assert!(seen.iter().any(|n| matches!(
            n,
            ShardNotice::EntitySpawn {
                kind: EntityKind::Item(stack),
                ..
            } if stack.item == ItemTypeId(54)
        )));

        let counted = Arc::new(AtomicUsize::new(0));
        let counter = counted.clone();
        shard
            .on_all_chunks(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        shard.unsubscribe(chunk, player).await.unwrap();
        shard.flush().await.unwrap();
        assert_eq!(counted.load(Ordering::SeqCst), 1);
        assert!(drain(&mut notices).contains(&ShardNotice::ChunkUnload(chunk)));
    }
}
