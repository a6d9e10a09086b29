use async_trait::async_trait;
use log::debug;

use crate::coords::{BlockIndex, ChunkXz, SubChunkXyz, BLOCKS_PER_CHUNK, CHUNK_EDGE, CHUNK_HEIGHT};
use crate::err::WorldError;
use crate::store::{ChunkData, ChunkStore, HEIGHT_MAP_LEN, NIBBLES_PER_CHUNK};

const BEDROCK: u8 = 7;
const STONE: u8 = 1;
const DIRT: u8 = 3;
const GRASS: u8 = 2;
const DIRT_DEPTH: i32 = 3;

/// Produces flat terrain for chunks the store has never seen.
pub(crate) struct FlatGenerator {
    height: i32,
}

impl FlatGenerator {
    /// `height` is the y of the first air block, clamped to the chunk.
    pub(crate) fn new(height: i32) -> Self {
        Self {
            height: height.clamp(1, CHUNK_HEIGHT),
        }
    }

    fn block_for(&self, y: i32) -> u8 {
        match y {
            0 => BEDROCK,
            y if y >= self.height => 0,
            y if y == self.height - 1 => GRASS,
            y if y >= self.height - 1 - DIRT_DEPTH => DIRT,
            _ => STONE,
        }
    }
}

#[async_trait]
impl ChunkStore for FlatGenerator {
    async fn load_chunk(&self, chunk: ChunkXz) -> Result<ChunkData, WorldError> {
        debug!("Generating {chunk}");
        let mut blocks = vec![0u8; BLOCKS_PER_CHUNK];
        let mut sky_light = vec![0u8; NIBBLES_PER_CHUNK];
        for x in 0..CHUNK_EDGE as u8 {
            for z in 0..CHUNK_EDGE as u8 {
                for y in 0..CHUNK_HEIGHT as u8 {
                    let Some(index) = BlockIndex::new(SubChunkXyz::new(x, y, z)) else {
                        continue;
                    };
                    let index = index.get();
                    blocks[index] = self.block_for(y as i32);
                    if y as i32 >= self.height {
                        sky_light[index / 2] |= if index % 2 == 0 { 0x0f } else { 0xf0 };
                    }
                }
            }
        }
        Ok(ChunkData {
            xz: chunk,
            blocks,
            metadata: vec![0; NIBBLES_PER_CHUNK],
            block_light: vec![0; NIBBLES_PER_CHUNK],
            sky_light,
            height_map: vec![self.height as u8; HEIGHT_MAP_LEN],
            entities: vec![],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn generates_layered_column() {
        let data = FlatGenerator::new(64).load_chunk(ChunkXz::new(-7, 3)).await.unwrap();
        let at = |y: u8| data.blocks[BlockIndex::new(SubChunkXyz::new(4, y, 9)).unwrap().get()];
        assert_eq!(data.xz, ChunkXz::new(-7, 3));
        assert_eq!(at(0), BEDROCK);
        assert_eq!(at(30), STONE);
        assert_eq!(at(62), DIRT);
        assert_eq!(at(63), GRASS);
        assert_eq!(at(64), 0);
        assert!(data.height_map.iter().all(|h| *h == 64));

        let top = BlockIndex::new(SubChunkXyz::new(4, 127, 9)).unwrap().get();
        let sky = data.sky_light[top / 2];
        assert_eq!(if top % 2 == 0 { sky & 0x0f } else { sky >> 4 }, 15);
    }

    #[test]
    fn height_is_clamped() {
        assert_eq!(FlatGenerator::new(500).height, CHUNK_HEIGHT);
        assert_eq!(FlatGenerator::new(-3).height, 1);
    }
}
