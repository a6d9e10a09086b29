use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub(crate) enum WorldError {
    NotFound(String),
    BadLocation(String),
    Overflow,
    ResourceExhausted,
    MalformedData(String, String),
    Io(std::io::Error),
    Config(String),
}

impl WorldError {
    pub(crate) fn is_fatal(&self) -> bool {
        match self {
            WorldError::NotFound(_) => false,
            WorldError::BadLocation(_) => false,
            WorldError::Overflow => false,
            WorldError::ResourceExhausted => true,
            WorldError::MalformedData(_, _) => false,
            WorldError::Io(_) => false,
            WorldError::Config(_) => true,
        }
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, WorldError::NotFound(_))
    }
}

impl Display for WorldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::NotFound(v) => write!(f, "Not found: {}", v),
            WorldError::BadLocation(v) => write!(f, "Bad location: {}", v),
            WorldError::Overflow => write!(f, "Coordinate overflow"),
            WorldError::ResourceExhausted => write!(f, "Entity id space exhausted"),
            WorldError::MalformedData(path, v) => write!(f, "Malformed data at {}: {}", path, v),
            WorldError::Io(e) => write!(f, "IO error: {}", e),
            WorldError::Config(v) => write!(f, "Invalid configuration: {}", v),
        }
    }
}

impl Error for WorldError {}

impl From<std::io::Error> for WorldError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            WorldError::NotFound(e.to_string())
        } else {
            WorldError::Io(e)
        }
    }
}
