use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::err::WorldError;

pub(crate) mod aspect;

pub(crate) use aspect::{Aspect, BlockInstance};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub(crate) struct BlockId(pub(crate) u8);

pub(crate) const AIR: BlockId = BlockId(0);

fn solid_by_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct BlockType {
    pub(crate) id: BlockId,
    pub(crate) name: String,
    #[serde(default = "solid_by_default")]
    pub(crate) solid: bool,
    #[serde(default)]
    pub(crate) aspect: Aspect,
}

impl BlockType {
    fn unknown(id: u8) -> Self {
        Self {
            id: BlockId(id),
            name: format!("unknown_{id}"),
            solid: true,
            aspect: Aspect::default(),
        }
    }
}

/**
 * Every block type the server knows about, indexed by id. Ids missing from the table behave as
 * solid blocks that drop nothing.
 */
#[derive(Debug)]
pub(crate) struct BlockTypeList {
    types: Vec<BlockType>,
}

impl BlockTypeList {
    pub(crate) fn from_json(json: &str) -> Result<Self, WorldError> {
        let listed: Vec<BlockType> = serde_json::from_str(json)
            .map_err(|e| WorldError::Config(format!("block table: {e}")))?;
        let mut types: Vec<BlockType> = (0..=u8::MAX).map(BlockType::unknown).collect();
        let mut seen = [false; 256];
        for block in listed {
            let id = block.id.0 as usize;
            if seen[id] {
                return Err(WorldError::Config(format!("block id {id} is listed twice")));
            }
            seen[id] = true;
            types[id] = block;
        }
        Ok(Self { types })
    }

    pub(crate) async fn load(path: &Path) -> Result<Self, WorldError> {
        let json = tokio::fs::read_to_string(path).await?;
        let list = Self::from_json(&json)?;
        info!("Loaded block types from {:?}", path);
        Ok(list)
    }

    pub(crate) fn builtin() -> Result<Self, WorldError> {
        Self::from_json(include_str!("../../assets/blocks.json"))
    }

    pub(crate) fn get(&self, id: BlockId) -> &BlockType {
        &self.types[id.0 as usize]
    }

    pub(crate) fn is_solid(&self, id: BlockId) -> bool {
        self.get(id).solid
    }
}
