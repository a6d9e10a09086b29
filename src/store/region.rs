use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use quartz_nbt::io::Flavor;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::coords::ChunkXz;
use crate::err::WorldError;
use crate::store::{chunk_from_nbt, read_nbt, ChunkData, ChunkStore};

const SECTOR_SIZE: u64 = 4096;
const REGION_EDGE: i32 = 32;
const HEADER_ENTRIES: usize = (REGION_EDGE * REGION_EDGE) as usize;

const COMPRESSION_GZIP: u8 = 1;
const COMPRESSION_ZLIB: u8 = 2;

/// Where a chunk lives inside its region file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ChunkLocation {
    sector_index: u32,
    sector_count: u8,
}

impl ChunkLocation {
    fn from_header(entry: [u8; 4]) -> Option<Self> {
        let sector_index = u32::from_be_bytes([0, entry[0], entry[1], entry[2]]);
        let sector_count = entry[3];
        if sector_index == 0 || sector_count == 0 {
            None
        } else {
            Some(Self {
                sector_index,
                sector_count,
            })
        }
    }
}

fn header_entry(chunk: ChunkXz) -> usize {
    (chunk.x.rem_euclid(REGION_EDGE) + chunk.z.rem_euclid(REGION_EDGE) * REGION_EDGE) as usize
}

/**
 * Reads worlds that pack 32x32 chunks into each region file. A region file starts with a table
 * of 1024 (sector index, sector count) entries, followed by the chunks, each one individually
 * compressed and padded to whole sectors.
 */
pub(crate) struct RegionChunkStore {
    region_dir: PathBuf,
}

impl RegionChunkStore {
    pub(crate) fn new(region_dir: PathBuf) -> Self {
        Self { region_dir }
    }

    pub(crate) fn region_path(&self, chunk: ChunkXz) -> PathBuf {
        // Arithmetic shifts floor negative coordinates.
        self.region_dir
            .join(format!("r.{}.{}.mcr", chunk.x >> 5, chunk.z >> 5))
    }
}

#[async_trait]
impl ChunkStore for RegionChunkStore {
    async fn load_chunk(&self, chunk: ChunkXz) -> Result<ChunkData, WorldError> {
        let path = self.region_path(chunk);
        let what = path.to_string_lossy().to_string();
        let mut file = tokio::fs::File::open(&path).await?;

        let mut entry = [0u8; 4];
        file.seek(SeekFrom::Start(header_entry(chunk) as u64 * 4)).await?;
        file.read_exact(&mut entry).await?;
        let location = ChunkLocation::from_header(entry)
            .ok_or_else(|| WorldError::NotFound(format!("{chunk} in {what}")))?;
        debug!("Loading {chunk} from {what} at {:?}", location);

        file.seek(SeekFrom::Start(location.sector_index as u64 * SECTOR_SIZE))
            .await?;
        let length = file.read_u32().await? as u64;
        let available = location.sector_count as u64 * SECTOR_SIZE - 4;
        if length == 0 || length > available {
            return Err(WorldError::MalformedData(
                what,
                format!("{chunk} claims {length} bytes in {} sectors", location.sector_count),
            ));
        }
        let compression = file.read_u8().await?;
        let mut payload = vec![0u8; (length - 1) as usize];
        file.read_exact(&mut payload).await?;

        let flavor = match compression {
            COMPRESSION_GZIP => Flavor::GzCompressed,
            COMPRESSION_ZLIB => Flavor::ZlibCompressed,
            other => {
                return Err(WorldError::MalformedData(
                    what,
                    format!("unknown compression {other} for {chunk}"),
                ))
            }
        };
        let root = read_nbt(&payload, flavor, &what)?;
        chunk_from_nbt(&root, chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test::{chunk_nbt, encode};

    /// Builds a region file holding the given (chunk, compression, payload) records.
    fn region_file(chunks: &[(ChunkXz, u8, Vec<u8>)]) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_ENTRIES * 4];
        let mut body = vec![0u8; SECTOR_SIZE as usize];
        let mut sector = 2u32;
        for (chunk, compression, payload) in chunks {
            let mut record = (payload.len() as u32 + 1).to_be_bytes().to_vec();
            record.push(*compression);
            record.extend_from_slice(payload);
            let sectors = (record.len() as u64).div_ceil(SECTOR_SIZE) as u32;
            record.resize((sectors as u64 * SECTOR_SIZE) as usize, 0);

            let offset = header_entry(*chunk) * 4;
            header[offset..offset + 3].copy_from_slice(&sector.to_be_bytes()[1..]);
            header[offset + 3] = sectors as u8;
            body.extend_from_slice(&record);
            sector += sectors;
        }
        header.extend_from_slice(&body);
        header
    }

    #[test]
    fn header_entries_wrap_negative_chunks() {
        assert_eq!(header_entry(ChunkXz::new(0, 0)), 0);
        assert_eq!(header_entry(ChunkXz::new(-1, 0)), 31);
        assert_eq!(header_entry(ChunkXz::new(1, -1)), 1 + 31 * 32);
        let store = RegionChunkStore::new(PathBuf::from("region"));
        assert_eq!(
            store.region_path(ChunkXz::new(-1, 33)),
            PathBuf::from("region/r.-1.1.mcr")
        );
    }

    #[test]
    fn empty_header_entry_is_absent() {
        assert_eq!(ChunkLocation::from_header([0, 0, 0, 0]), None);
        assert_eq!(
            ChunkLocation::from_header([0, 1, 2, 3]),
            Some(ChunkLocation {
                sector_index: 258,
                sector_count: 3
            })
        );
    }

    #[tokio::test]
    async fn loads_zlib_and_gzip_chunks() {
        let dir = std::env::temp_dir().join(format!("shardcraft-region-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = RegionChunkStore::new(dir.clone());
        let zlib = ChunkXz::new(-2, -3);
        let gzip = ChunkXz::new(-1, -3);
        let bad = ChunkXz::new(-5, -5);
        let file = region_file(&[
            (zlib, COMPRESSION_ZLIB, encode(&chunk_nbt(zlib, 5), Flavor::ZlibCompressed)),
            (gzip, COMPRESSION_GZIP, encode(&chunk_nbt(gzip, 6), Flavor::GzCompressed)),
            (bad, 9, vec![1, 2, 3]),
        ]);
        tokio::fs::write(store.region_path(zlib), file).await.unwrap();

        assert_eq!(store.load_chunk(zlib).await.unwrap().blocks[0], 5);
        assert_eq!(store.load_chunk(gzip).await.unwrap().blocks[0], 6);
        assert!(store.load_chunk(ChunkXz::new(-4, -4)).await.unwrap_err().is_not_found());
        assert!(store.load_chunk(ChunkXz::new(40, 0)).await.unwrap_err().is_not_found());
        assert!(matches!(
            store.load_chunk(bad).await.unwrap_err(),
            WorldError::MalformedData(..)
        ));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
