use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use dotenv::dotenv;
use log::{error, info, warn};

use crate::block::BlockTypeList;
use crate::config::ServerConfig;
use crate::coords::{BlockXyz, ChunkXz};
use crate::entity::allocator::EntityIdAllocator;
use crate::err::WorldError;
use crate::generator::FlatGenerator;
use crate::shard::manager::LocalShardManager;
use crate::shard::{ShardConnecter, WorldServices};
use crate::store::level::LevelData;

mod block;
mod chunk;
mod config;
mod coords;
mod entity;
mod err;
mod generator;
mod inventory;
mod player;
mod shard;
mod store;
mod web;

async fn load_spawn(config: &ServerConfig) -> Result<BlockXyz, WorldError> {
    match LevelData::load(&config.world_dir).await {
        Ok(level) => Ok(level.spawn),
        Err(e) if e.is_not_found() => {
            warn!("No level.dat in {:?}, spawning at the origin", config.world_dir);
            Ok(BlockXyz::new(0, config.flat_height, 0))
        }
        Err(e) => Err(e),
    }
}

/// Loads the chunks around `spawn` and waits until every shard involved has them.
async fn preload(manager: &LocalShardManager, spawn: BlockXyz, radius: i32) -> Result<(), WorldError> {
    let center = spawn.chunk();
    let mut shards = BTreeMap::new();
    for dz in -radius..=radius {
        for dx in -radius..=radius {
            let (Some(x), Some(z)) = (center.x.checked_add(dx), center.z.checked_add(dz)) else {
                continue;
            };
            let chunk = ChunkXz::new(x, z);
            let handle = manager.chunk_shard(chunk);
            handle.on_chunk(chunk, |_, _| Ok(())).await?;
            shards.insert((handle.xz().x, handle.xz().z), handle);
        }
    }
    for handle in shards.values() {
        handle.flush().await?;
    }
    info!("Loaded {} chunks around spawn {spawn}", (2 * radius + 1).pow(2));
    Ok(())
}

/// Runs until interrupted. Returns false if a shard stopped on a fatal error.
async fn start_server() -> Result<bool, WorldError> {
    let config = ServerConfig::from_env()?;
    let block_types = match &config.blocks_json {
        Some(path) => BlockTypeList::load(path).await?,
        None => BlockTypeList::builtin()?,
    };
    let spawn = load_spawn(&config).await?;
    let services = WorldServices {
        block_types: Arc::new(block_types),
        store: store::open_store(&config.world_dir).await,
        generator: Arc::new(FlatGenerator::new(config.flat_height)),
        entity_ids: Arc::new(EntityIdAllocator::new()),
    };
    let manager = LocalShardManager::new(services, config.shard_config());

    preload(&manager, spawn, config.spawn_radius).await?;

    let web_manager = manager.clone();
    let port = config.status_port;
    tokio::spawn(async move {
        web::serve::init(web_manager, port).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down with {} shards running", manager.shard_count());
            Ok(true)
        }
        _ = manager.fatal_error() => Ok(false),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();
    match start_server().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("A shard stopped on a fatal error, shutting down");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
