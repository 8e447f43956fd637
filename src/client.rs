//! Sync client: chunk, propose, resolve, retry.
//!
//! An upload proposes `remote_version + 1` with the file's hashlist. The
//! catalog answers with one of three things: success; the blocks it could not
//! find (pushed to their shards, then the same proposal is repeated); or the
//! version it actually holds (the proposal is repeated at that version + 1,
//! last writer wins). Every attempt counts against a bounded budget.

use crate::block_store::Shards;
use crate::chunking::{self, ChunkedFile, DEFAULT_CHUNK_SIZE};
use crate::error::{DeleteError, ModifyError, StoreError, SyncError};
use crate::metadata::MetadataService;
use crate::placement::{Placement, PlacementPolicy};
use crate::types::{Block, BlockHash};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// A delete re-proposes once after a version conflict.
const DELETE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub chunk_size: usize,
    /// Commit attempts per upload before giving up.
    pub max_attempts: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub filename: String,
    pub version: u64,
    pub size: u64,
    pub blocks: usize,
    pub blocks_pushed: usize,
    pub attempts: u32,
}

pub struct SyncClient {
    metadata: Arc<dyn MetadataService>,
    shards: Shards,
    placement: Placement,
    options: ClientOptions,
}

impl SyncClient {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        shards: Shards,
        placement: Placement,
        options: ClientOptions,
    ) -> Self {
        Self {
            metadata,
            shards,
            placement,
            options,
        }
    }

    /// Start a session, resolving `policy` (probing shards for sticky placement).
    pub fn connect(
        metadata: Arc<dyn MetadataService>,
        shards: Shards,
        policy: PlacementPolicy,
        options: ClientOptions,
    ) -> Result<Self, StoreError> {
        let placement = Placement::for_session(policy, &shards)?;
        Ok(Self::new(metadata, shards, placement, options))
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Upload a local file under its base name.
    pub fn upload(&self, path: &Path) -> Result<UploadReport, SyncError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SyncError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"))
            })?;
        self.upload_as(&filename, path)
    }

    pub fn upload_as(&self, filename: &str, path: &Path) -> Result<UploadReport, SyncError> {
        let chunked = chunking::chunk_file(path, self.options.chunk_size)?;
        self.commit_chunked(filename, &chunked)
    }

    pub fn upload_bytes(&self, filename: &str, data: &[u8]) -> Result<UploadReport, SyncError> {
        let chunked = chunking::chunk_bytes(data, self.options.chunk_size);
        self.commit_chunked(filename, &chunked)
    }

    fn commit_chunked(&self, filename: &str, chunked: &ChunkedFile) -> Result<UploadReport, SyncError> {
        let remote = self.metadata.read_file(filename)?;
        let mut proposed = remote.version + 1;
        let mut pushed = 0;
        let max_attempts = self.options.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.metadata.modify_file(filename, proposed, &chunked.hashlist) {
                Ok(()) => {
                    tracing::info!(filename, version = proposed, attempt, pushed, "upload committed");
                    return Ok(UploadReport {
                        filename: filename.to_owned(),
                        version: proposed,
                        size: chunked.size,
                        blocks: chunked.hashlist.len(),
                        blocks_pushed: pushed,
                        attempts: attempt,
                    });
                }
                Err(ModifyError::MissingBlocks { hashes }) => {
                    tracing::debug!(filename, attempt, missing = hashes.len(), "pushing missing blocks");
                    pushed += self.push_blocks(&hashes, chunked)?;
                }
                Err(ModifyError::VersionConflict { current }) => {
                    tracing::warn!(filename, attempt, proposed, current, "version conflict, re-proposing");
                    proposed = current + 1;
                }
                Err(e @ ModifyError::Store(_)) => return Err(e.into()),
            }
        }

        tracing::warn!(filename, attempts = max_attempts, "upload gave up");
        Err(SyncError::RetriesExhausted {
            filename: filename.to_owned(),
            attempts: max_attempts,
        })
    }

    /// Store `hashes` on their home shards, one worker per shard.
    fn push_blocks(&self, hashes: &[BlockHash], chunked: &ChunkedFile) -> Result<usize, SyncError> {
        let mut by_shard: HashMap<usize, Vec<Block>> = HashMap::new();
        for hash in hashes {
            let payload = chunked
                .payload(hash)
                .ok_or(SyncError::UnknownBlock { hash: *hash })?;
            by_shard
                .entry(self.placement.home_shard(hash))
                .or_default()
                .push(Block {
                    hash: *hash,
                    payload: Arc::clone(payload),
                });
        }

        let results = crossbeam_utils::thread::scope(|s| {
            let workers: Vec<_> = by_shard
                .into_iter()
                .map(|(shard, blocks)| {
                    let store = self.shards.get(shard);
                    s.spawn(move |_| -> Result<usize, StoreError> {
                        for block in &blocks {
                            store.store_block(&block.hash, &block.payload)?;
                            tracing::debug!(shard, hash = %block.hash.short(), len = block.payload.len(), "block pushed");
                        }
                        Ok(blocks.len())
                    })
                })
                .collect();

            workers
                .into_iter()
                .map(|w| {
                    w.join()
                        .unwrap_or_else(|_| Err(StoreError::Unavailable("block push worker panicked".into())))
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| StoreError::Unavailable("block push worker panicked".into()))?;

        let mut total = 0;
        for r in results {
            total += r?;
        }
        Ok(total)
    }

    /// Reassemble the current content of `filename` in memory.
    pub fn fetch(&self, filename: &str) -> Result<Vec<u8>, SyncError> {
        self.assemble(filename, HashMap::new())
    }

    /// Reassemble `filename`, fetching only blocks not already in `cache`.
    fn assemble(
        &self,
        filename: &str,
        mut cache: HashMap<BlockHash, Arc<[u8]>>,
    ) -> Result<Vec<u8>, SyncError> {
        let remote = self.metadata.read_file(filename)?;
        if !remote.is_live() {
            return Err(SyncError::NotFound {
                filename: filename.to_owned(),
            });
        }

        let mut fetched = 0;
        let mut out = Vec::new();
        for hash in &remote.hashlist {
            let payload = match cache.get(hash) {
                Some(p) => Arc::clone(p),
                None => {
                    let p = self.fetch_block(hash)?;
                    cache.insert(*hash, Arc::clone(&p));
                    fetched += 1;
                    p
                }
            };
            out.extend_from_slice(&payload);
        }

        tracing::debug!(filename, version = remote.version, blocks = remote.hashlist.len(), fetched, "file assembled");
        Ok(out)
    }

    fn fetch_block(&self, hash: &BlockHash) -> Result<Arc<[u8]>, StoreError> {
        for shard in self.placement.read_order(hash) {
            match self.shards.get(shard).get_block(hash) {
                Ok(payload) => {
                    let computed = BlockHash::of(&payload);
                    if computed != *hash {
                        return Err(StoreError::HashMismatch {
                            expected: *hash,
                            computed,
                        });
                    }
                    return Ok(payload);
                }
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::NotFound { hash: *hash })
    }

    /// Blocks of an existing copy of `target`, keyed by hash. Empty when there
    /// is no readable copy.
    fn local_blocks(&self, target: &Path) -> HashMap<BlockHash, Arc<[u8]>> {
        if !target.is_file() {
            return HashMap::new();
        }
        match chunking::chunk_file(target, self.options.chunk_size) {
            Ok(local) => {
                tracing::debug!(path = %target.display(), blocks = local.unique_blocks(), "reusing local copy");
                local.blocks
            }
            Err(e) => {
                tracing::debug!(path = %target.display(), error = %e, "local copy unreadable, fetching everything");
                HashMap::new()
            }
        }
    }

    /// Download `filename` into `dest_dir`, returning the written path.
    ///
    /// The file appears atomically; nothing is written if any block is missing.
    /// Blocks already present in an existing `dest_dir/filename` are not fetched.
    pub fn download(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, SyncError> {
        let target = local_target(dest_dir, filename)?;
        let parent = target.parent().unwrap_or(dest_dir);
        if !dest_dir.is_dir() {
            return Err(SyncError::io(
                dest_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "destination directory does not exist"),
            ));
        }

        let content = self.assemble(filename, self.local_blocks(&target))?;

        std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| SyncError::io(parent, e))?;
        tmp.write_all(&content).map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.persist(&target).map_err(|e| SyncError::io(&target, e.error))?;

        tracing::info!(filename, path = %target.display(), size = content.len(), "downloaded");
        Ok(target)
    }

    /// Tombstone `filename`; returns the tombstone version.
    pub fn delete(&self, filename: &str) -> Result<u64, SyncError> {
        let remote = self.metadata.read_file(filename)?;
        let mut proposed = remote.version + 1;

        for attempt in 1..=DELETE_ATTEMPTS {
            match self.metadata.delete_file(filename, proposed) {
                Ok(()) => return Ok(proposed),
                Err(DeleteError::VersionConflict { current }) => {
                    if attempt == DELETE_ATTEMPTS {
                        break;
                    }
                    tracing::warn!(filename, proposed, current, "delete conflict, retrying once");
                    proposed = current + 1;
                }
                Err(DeleteError::NotFound) => {
                    return Err(SyncError::NotFound {
                        filename: filename.to_owned(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(filename, attempts = DELETE_ATTEMPTS, "delete gave up");
        Err(SyncError::RetriesExhausted {
            filename: filename.to_owned(),
            attempts: DELETE_ATTEMPTS,
        })
    }
}

/// `dest_dir/filename`, refusing names that would escape `dest_dir`.
fn local_target(dest_dir: &Path, filename: &str) -> Result<PathBuf, SyncError> {
    let rel = Path::new(filename);
    let ok = !filename.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(SyncError::io(
            rel,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "filename is not a plain relative path"),
        ));
    }
    Ok(dest_dir.join(rel))
}
