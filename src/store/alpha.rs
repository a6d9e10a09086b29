use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use quartz_nbt::io::Flavor;

use crate::coords::ChunkXz;
use crate::err::WorldError;
use crate::store::{chunk_from_nbt, read_nbt, ChunkData, ChunkStore};

/// Writes `value` in base 36 the way the chunk file names expect it: lowercase digits and a
/// leading minus sign for negative values.
fn base36(value: i32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rest = (value as i64).unsigned_abs();
    if rest == 0 {
        return "0".into();
    }
    let mut digits = vec![];
    while rest > 0 {
        digits.push(DIGITS[(rest % 36) as usize]);
        rest /= 36;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/**
 * Reads worlds that keep every chunk in its own gzip-compressed file, spread over two levels of
 * directories.
 */
pub(crate) struct AlphaChunkStore {
    world_dir: PathBuf,
}

impl AlphaChunkStore {
    pub(crate) fn new(world_dir: PathBuf) -> Self {
        Self { world_dir }
    }

    pub(crate) fn chunk_path(&self, chunk: ChunkXz) -> PathBuf {
        self.world_dir
            .join(base36(chunk.x.rem_euclid(64)))
            .join(base36(chunk.z.rem_euclid(64)))
            .join(format!("c.{}.{}.dat", base36(chunk.x), base36(chunk.z)))
    }
}

#[async_trait]
impl ChunkStore for AlphaChunkStore {
    async fn load_chunk(&self, chunk: ChunkXz) -> Result<ChunkData, WorldError> {
        let path = self.chunk_path(chunk);
        debug!("Loading {chunk} from {:?}", path);
        let bytes = tokio::fs::read(&path).await?;
        let root = read_nbt(&bytes, Flavor::GzCompressed, &path.to_string_lossy())?;
        chunk_from_nbt(&root, chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test::{chunk_nbt, encode};

    #[test]
    fn base36_matches_file_names() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(-13), "-d");
        assert_eq!(base36(i32::MIN), "-zik0zk");
    }

    #[test]
    fn chunk_paths_use_two_directory_levels() {
        let store = AlphaChunkStore::new(PathBuf::from("world"));
        assert_eq!(
            store.chunk_path(ChunkXz::new(-13, 44)),
            PathBuf::from("world/1f/18/c.-d.18.dat")
        );
    }

    #[tokio::test]
    async fn loads_gzip_chunk_file() {
        let dir = std::env::temp_dir().join(format!("shardcraft-alpha-{}", std::process::id()));
        let store = AlphaChunkStore::new(dir.clone());
        let xz = ChunkXz::new(2, -1);
        let path = store.chunk_path(xz);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, encode(&chunk_nbt(xz, 3), Flavor::GzCompressed))
            .await
            .unwrap();

        let data = store.load_chunk(xz).await.unwrap();
        assert_eq!(data.blocks[100], 3);
        let missing = store.load_chunk(ChunkXz::new(9, 9)).await.unwrap_err();
        assert!(missing.is_not_found());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
