//! The block storage collaborator. The node core only depends on this
//! interface; the on-disk implementation lives in `disk`.

pub mod disk;

use crate::dht::data::{Block, Metadata};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Eq, PartialEq)]
pub enum FsError {
    /// The storage root is not writable; writes are rejected.
    ReadOnly,
    /// A stored block failed to deserialize.
    Corrupt(String),
    /// A query expression did not parse.
    BadQuery(String),
    Io(io::ErrorKind),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::ReadOnly => write!(f, "storage root is read-only"),
            FsError::Corrupt(detail) => write!(f, "corrupt block: {}", detail),
            FsError::BadQuery(detail) => write!(f, "bad query expression: {}", detail),
            FsError::Io(kind) => write!(f, "i/o failure: {:?}", kind),
        }
    }
}

impl From<io::Error> for FsError {
    #[inline]
    fn from(error: io::Error) -> FsError {
        FsError::Io(error.kind())
    }
}

/// Operations the node core consumes from the storage layer. Implementations
/// are shared across handler workers.
pub trait FileSystem: Send + Sync {
    /// Persists the block, returning the path it landed at.
    fn store_block(&self, block: &Block) -> Result<PathBuf, FsError>;

    /// Evaluates a feature predicate against the metadata index.
    fn query(&self, expression: &str) -> Result<Vec<Metadata>, FsError>;

    fn load_metadata(&self, path: &Path) -> Result<Metadata, FsError>;

    fn load_block(&self, path: &Path) -> Result<Block, FsError>;

    fn is_read_only(&self) -> bool;

    fn shutdown(&self);
}
