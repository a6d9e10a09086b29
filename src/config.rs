use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::err::WorldError;
use crate::shard::ShardConfig;

/// Server settings, read from the environment (and a `.env` file, if there is one).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ServerConfig {
    pub(crate) world_dir: PathBuf,
    /// Block table to use instead of the built-in one.
    pub(crate) blocks_json: Option<PathBuf>,
    pub(crate) mailbox_capacity: usize,
    pub(crate) tick_period: Duration,
    pub(crate) status_port: u16,
    /// Chunks around the spawn point loaded before the server reports ready.
    pub(crate) spawn_radius: i32,
    pub(crate) flat_height: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            blocks_json: None,
            mailbox_capacity: 256,
            tick_period: Duration::from_millis(50),
            status_port: 25580,
            spawn_radius: 2,
            flat_height: 64,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T, WorldError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| WorldError::Config(format!("{name} has invalid value {value:?}"))),
    }
}

impl ServerConfig {
    pub(crate) fn from_env() -> Result<Self, WorldError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorldError> {
        let defaults = Self::default();
        let config = Self {
            world_dir: lookup("WORLD_DIR").map(PathBuf::from).unwrap_or(defaults.world_dir),
            blocks_json: lookup("BLOCKS_JSON").map(PathBuf::from),
            mailbox_capacity: parse("MAILBOX_CAPACITY", lookup("MAILBOX_CAPACITY"), defaults.mailbox_capacity)?,
            tick_period: Duration::from_millis(parse(
                "TICK_MILLIS",
                lookup("TICK_MILLIS"),
                defaults.tick_period.as_millis() as u64,
            )?),
            status_port: parse("STATUS_PORT", lookup("STATUS_PORT"), defaults.status_port)?,
            spawn_radius: parse("SPAWN_RADIUS", lookup("SPAWN_RADIUS"), defaults.spawn_radius)?,
            flat_height: parse("FLAT_HEIGHT", lookup("FLAT_HEIGHT"), defaults.flat_height)?,
        };
        if config.mailbox_capacity == 0 {
            return Err(WorldError::Config("MAILBOX_CAPACITY must be at least 1".into()));
        }
        if config.tick_period.is_zero() {
            return Err(WorldError::Config("TICK_MILLIS must be at least 1".into()));
        }
        if config.spawn_radius < 0 {
            return Err(WorldError::Config("SPAWN_RADIUS must not be negative".into()));
        }
        Ok(config)
    }

    pub(crate) fn shard_config(&self) -> ShardConfig {
        ShardConfig {
            mailbox_capacity: self.mailbox_capacity,
            tick_period: self.tick_period,
        }
    }
}
