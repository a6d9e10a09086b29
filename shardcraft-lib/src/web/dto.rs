use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct ShardStatus {
    pub x: i32,
    pub z: i32,
    pub ticks: u64,
    pub loaded_chunks: usize,
    pub entities: usize,
    pub active_blocks: usize,
    pub subscribers: usize,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct WorldStatus {
    pub shards: Vec<ShardStatus>,
}
