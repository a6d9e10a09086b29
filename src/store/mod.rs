use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use quartz_nbt::io::Flavor;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::coords::{AbsVelocity, AbsXyz, ChunkXz, BLOCKS_PER_CHUNK, CHUNK_EDGE};
use crate::entity::{EntityData, EntityKind, MobType};
use crate::err::WorldError;
use crate::inventory::{ItemStack, ItemTypeId};

pub(crate) mod alpha;
pub(crate) mod level;
pub(crate) mod nbt_path;
pub(crate) mod region;

pub(crate) const NIBBLES_PER_CHUNK: usize = BLOCKS_PER_CHUNK / 2;
pub(crate) const HEIGHT_MAP_LEN: usize = (CHUNK_EDGE * CHUNK_EDGE) as usize;

/// Everything a chunk is built from, as read from disk or produced by a generator.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChunkData {
    pub(crate) xz: ChunkXz,
    pub(crate) blocks: Vec<u8>,
    pub(crate) metadata: Vec<u8>,
    pub(crate) block_light: Vec<u8>,
    pub(crate) sky_light: Vec<u8>,
    pub(crate) height_map: Vec<u8>,
    pub(crate) entities: Vec<EntityData>,
}

/**
 * Source of chunk data. `WorldError::NotFound` means the chunk has not been generated yet, any
 * other error is a failure to read it.
 */
#[async_trait]
pub(crate) trait ChunkStore: Send + Sync {
    async fn load_chunk(&self, chunk: ChunkXz) -> Result<ChunkData, WorldError>;
}

/**
 * Opens the chunk store for a world directory. Worlds converted to the region format have a
 * `region` directory, older worlds keep one file per chunk.
 */
pub(crate) async fn open_store(world_dir: &Path) -> Arc<dyn ChunkStore> {
    let region_dir = world_dir.join("region");
    if tokio::fs::metadata(&region_dir).await.is_ok_and(|m| m.is_dir()) {
        info!("Reading chunks from region files in {:?}", region_dir);
        Arc::new(region::RegionChunkStore::new(region_dir))
    } else {
        info!("Reading chunks from chunk files in {:?}", world_dir);
        Arc::new(alpha::AlphaChunkStore::new(world_dir.to_path_buf()))
    }
}

pub(crate) fn read_nbt(bytes: &[u8], flavor: Flavor, what: &str) -> Result<NbtCompound, WorldError> {
    let mut reader = bytes;
    quartz_nbt::io::read_nbt(&mut reader, flavor)
        .map(|(root, _name)| root)
        .map_err(|e| WorldError::MalformedData(what.into(), format!("NBT error: {e}")))
}

fn byte_array(root: &NbtCompound, path: &str, len: usize) -> Result<Vec<u8>, WorldError> {
    let bytes = nbt_path::get::<&[u8]>(root, path)?;
    if bytes.len() != len {
        return Err(WorldError::MalformedData(
            path.into(),
            format!("expected {} bytes, found {}", len, bytes.len()),
        ));
    }
    Ok(bytes.to_vec())
}

fn doubles(list: &NbtList, path: &str) -> Result<[f64; 3], WorldError> {
    let mut values = [0.0; 3];
    if list.len() != 3 {
        return Err(WorldError::MalformedData(path.into(), "expected 3 values".into()));
    }
    for (i, value) in values.iter_mut().enumerate() {
        *value = list
            .get::<f64>(i)
            .map_err(|e| WorldError::MalformedData(path.into(), e.to_string()))?;
    }
    Ok(values)
}

fn entity_from_nbt(entity: &NbtCompound) -> Result<Option<EntityData>, WorldError> {
    let id = nbt_path::get::<&str>(entity, "id")?;
    let kind = if id == "Item" {
        EntityKind::Item(ItemStack::new(
            ItemTypeId(nbt_path::get::<i16>(entity, "Item/id")?),
            nbt_path::get::<i8>(entity, "Item/Count")?.max(0) as u8,
            nbt_path::get_opt::<i16>(entity, "Item/Damage")?.unwrap_or(0),
        ))
    } else if let Some(mob) = MobType::from_name(id) {
        EntityKind::Mob(mob)
    } else {
        return Ok(None);
    };
    let [x, y, z] = doubles(nbt_path::get::<&NbtList>(entity, "Pos")?, "Pos")?;
    let velocity = match nbt_path::get_opt::<&NbtList>(entity, "Motion")? {
        Some(motion) => {
            let [x, y, z] = doubles(motion, "Motion")?;
            AbsVelocity::new(x, y, z)
        }
        None => AbsVelocity::default(),
    };
    Ok(Some(EntityData {
        kind,
        position: AbsXyz::new(x, y, z),
        velocity,
    }))
}

/**
 * Decodes a persisted chunk record. Entities that cannot be decoded are skipped, anything wrong
 * with the block arrays fails the whole chunk.
 */
pub(crate) fn chunk_from_nbt(root: &NbtCompound, expected: ChunkXz) -> Result<ChunkData, WorldError> {
    let xz = ChunkXz::new(
        nbt_path::get::<i32>(root, "Level/xPos")?,
        nbt_path::get::<i32>(root, "Level/zPos")?,
    );
    if xz != expected {
        return Err(WorldError::MalformedData(
            "Level/xPos".into(),
            format!("expected {expected}, file holds {xz}"),
        ));
    }

    let mut entities = vec![];
    if let Some(list) = nbt_path::get_opt::<&NbtList>(root, "Level/Entities")? {
        for tag in list.iter() {
            let NbtTag::Compound(entity) = tag else {
                warn!("Skipping non-compound entity in {xz}");
                continue;
            };
            match entity_from_nbt(entity) {
                Ok(Some(entity)) => entities.push(entity),
                Ok(None) => {}
                Err(e) => warn!("Skipping entity in {xz}: {e}"),
            }
        }
    }

    Ok(ChunkData {
        xz,
        blocks: byte_array(root, "Level/Blocks", BLOCKS_PER_CHUNK)?,
        metadata: byte_array(root, "Level/Data", NIBBLES_PER_CHUNK)?,
        block_light: byte_array(root, "Level/BlockLight", NIBBLES_PER_CHUNK)?,
        sky_light: byte_array(root, "Level/SkyLight", NIBBLES_PER_CHUNK)?,
        height_map: byte_array(root, "Level/HeightMap", HEIGHT_MAP_LEN)?,
        entities,
    })
}
