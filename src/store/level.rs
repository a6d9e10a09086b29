use std::path::Path;

use log::info;
use quartz_nbt::io::Flavor;

use crate::coords::BlockXyz;
use crate::err::WorldError;
use crate::store::{nbt_path, read_nbt};

/// World-wide settings kept in `level.dat`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct LevelData {
    pub(crate) spawn: BlockXyz,
    pub(crate) seed: i64,
    pub(crate) time: i64,
}

impl LevelData {
    pub(crate) async fn load(world_dir: &Path) -> Result<Self, WorldError> {
        let path = world_dir.join("level.dat");
        let bytes = tokio::fs::read(&path).await?;
        let root = read_nbt(&bytes, Flavor::GzCompressed, &path.to_string_lossy())?;
        let level = Self::from_nbt(&root)?;
        info!(
            "Loaded level with spawn at {}, seed {} and time {}",
            level.spawn, level.seed, level.time
        );
        Ok(level)
    }

    fn from_nbt(root: &quartz_nbt::NbtCompound) -> Result<Self, WorldError> {
        Ok(Self {
            spawn: BlockXyz::new(
                nbt_path::get::<i32>(root, "Data/SpawnX")?,
                nbt_path::get::<i32>(root, "Data/SpawnY")?,
                nbt_path::get::<i32>(root, "Data/SpawnZ")?,
            ),
            seed: nbt_path::get::<i64>(root, "Data/RandomSeed")?,
            time: nbt_path::get_opt::<i64>(root, "Data/Time")?.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod test {
    use quartz_nbt::NbtCompound;

    use super::*;
    use crate::store::test::encode;

    fn level_nbt() -> NbtCompound {
        let mut data = NbtCompound::new();
        data.insert("SpawnX", -12i32);
        data.insert("SpawnY", 65i32);
        data.insert("SpawnZ", 40i32);
        data.insert("RandomSeed", 1234567890123i64);
        data.insert("Time", 6000i64);
        let mut root = NbtCompound::new();
        root.insert("Data", data);
        root
    }

    #[tokio::test]
    async fn loads_level_dat() {
        let dir = std::env::temp_dir().join(format!("shardcraft-level-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("level.dat"), encode(&level_nbt(), Flavor::GzCompressed))
            .await
            .unwrap();

        let level = LevelData::load(&dir).await.unwrap();
        assert_eq!(level.spawn, BlockXyz::new(-12, 65, 40));
        assert_eq!(level.seed, 1234567890123);
        assert_eq!(level.time, 6000);
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn missing_spawn_is_malformed() {
        let mut root = level_nbt();
        root.inner_mut().remove("Data");
        assert!(matches!(
            LevelData::from_nbt(&root),
            Err(WorldError::MalformedData(..))
        ));
    }
}
