use crate::types::BlockHash;
use std::path::PathBuf;

/// Failures reported by a block store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("block {hash} not found")]
    NotFound { hash: BlockHash },

    #[error("payload hashes to {computed}, not {expected}")]
    HashMismatch {
        expected: BlockHash,
        computed: BlockHash,
    },

    /// Transport-level failure. Terminal for the current attempt.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The durable backend failed (I/O, corrupt table, ...).
    #[error("storage backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn backend(e: impl std::fmt::Display) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Why `modify_file` refused a proposal. The catalog is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModifyError {
    #[error("version conflict: current version is {current}")]
    VersionConflict { current: u64 },

    #[error("{} block(s) missing from their shards", hashes.len())]
    MissingBlocks { hashes: Vec<BlockHash> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why `delete_file` refused a proposal. The catalog is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeleteError {
    #[error("version conflict: current version is {current}")]
    VersionConflict { current: u64 },

    #[error("file not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Client-side failure of an upload, download or delete.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{filename}: not found")]
    NotFound { filename: String },

    #[error("{filename}: gave up after {attempts} attempt(s)")]
    RetriesExhausted { filename: String, attempts: u32 },

    /// The catalog asked for a block this client never produced.
    #[error("catalog reported block {hash} missing, but it is not part of this upload")]
    UnknownBlock { hash: BlockHash },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Modify(#[from] ModifyError),

    #[error(transparent)]
    Delete(#[from] DeleteError),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}
