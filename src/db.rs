use crate::block_store::{verify_payload, BlockStore};
use crate::codec;
use crate::dbpath::{self, DataDirState, LOCK_FILE, META_FILE};
use crate::error::StoreError;
use crate::metadata::{CatalogPersistence, CatalogState};
use crate::placement::PlacementPolicy;
use crate::schema;
use crate::types::BlockHash;
use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use redb::{Database, ReadableTable};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opened, exclusively locked data directory.
pub struct DataDir {
    pub path: PathBuf,
    pub shards: usize,
    pub placement: PlacementPolicy,
    // Keep the lock file open for the lifetime of DataDir, so the lock is held.
    _lock_file: File,
}

/// Open a blocksync data directory:
/// - validates directory
/// - acquires exclusive lock
/// - initializes meta.toml if empty, else checks the recorded shard count and placement
pub fn open_data_dir(dir: &Path, shards: usize, placement: PlacementPolicy) -> Result<DataDir> {
    let state = dbpath::ensure_data_dir_is_valid_or_empty(dir)?;

    // Acquire lock first (prevents two processes initializing concurrently).
    let lock_file = open_and_lock(dir)?;

    let meta_path = dir.join(META_FILE);
    if state == DataDirState::Empty {
        write_meta(&meta_path, shards, placement)?;
    } else {
        let recorded = read_meta_value(&meta_path, "shards")?
            .parse::<usize>()
            .with_context(|| format!("Invalid shards value in {}", meta_path.display()))?;
        if recorded != shards {
            return Err(anyhow!(
                "{} was created with {} shard(s) but the configuration has {}; \
                 changing the shard count would move every block",
                dir.display(),
                recorded,
                shards
            ));
        }

        let recorded = read_meta_value(&meta_path, "placement")?
            .parse::<PlacementPolicy>()
            .with_context(|| format!("Invalid placement value in {}", meta_path.display()))?;
        if recorded != placement {
            return Err(anyhow!(
                "{} was written with {} placement but the configuration asks for {}; \
                 blocks would be looked for on the wrong shards",
                dir.display(),
                recorded,
                placement
            ));
        }
    }

    Ok(DataDir {
        path: dir.to_path_buf(),
        shards,
        placement,
        _lock_file: lock_file,
    })
}

fn open_and_lock(dir: &Path) -> Result<File> {
    let lock_path = dir.join(LOCK_FILE);
    let f = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    // Exclusive lock: one process at a time.
    f.try_lock_exclusive()
        .with_context(|| format!("Data directory is locked (in use?): {}", dir.display()))?;

    Ok(f)
}

fn write_meta(meta_path: &Path, shards: usize, placement: PlacementPolicy) -> Result<()> {
    let mut f = File::create(meta_path)
        .with_context(|| format!("Failed to create {}", meta_path.display()))?;

    let contents = format!(
        r#"# blocksync data directory
format = 1
app = "blocksync"
db_kind = "redb"
hash = "blake3"
shards = {shards}
placement = "{placement}"
"#
    );

    f.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {}", meta_path.display()))?;

    f.sync_all()
        .with_context(|| format!("Failed to sync {}", meta_path.display()))?;

    Ok(())
}

fn read_meta_value(meta_path: &Path, wanted: &str) -> Result<String> {
    let text = std::fs::read_to_string(meta_path)
        .with_context(|| format!("Failed to read {}", meta_path.display()))?;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == wanted {
            return Ok(value.trim().trim_matches('"').to_string());
        }
    }
    Err(anyhow!("{} does not record '{wanted}'", meta_path.display()))
}

/// Block counts for one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub blocks: u64,
    pub bytes: u64,
}

/// A block-store shard persisted in its own redb file.
pub struct RedbBlockStore {
    path: PathBuf,
    db: Database,
}

impl RedbBlockStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::backend)?;
        let store = Self {
            path: path.to_path_buf(),
            db,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let _ = tx.open_table(schema::BLOCKS).map_err(StoreError::backend)?;
        }
        tx.commit().map_err(StoreError::backend)
    }

    pub fn stats(&self) -> Result<ShardStats, StoreError> {
        let tx = self.db.begin_read().map_err(StoreError::backend)?;
        let blocks = tx.open_table(schema::BLOCKS).map_err(StoreError::backend)?;

        let mut out = ShardStats::default();
        for item in blocks.iter().map_err(StoreError::backend)? {
            let (_, v) = item.map_err(StoreError::backend)?;
            out.blocks += 1;
            out.bytes = out.bytes.saturating_add(v.value().len() as u64);
        }
        Ok(out)
    }
}

impl BlockStore for RedbBlockStore {
    fn store_block(&self, hash: &BlockHash, payload: &[u8]) -> Result<(), StoreError> {
        verify_payload(hash, payload)?;
        if self.has_block(hash)? {
            return Ok(());
        }

        let tx = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut blocks = tx.open_table(schema::BLOCKS).map_err(StoreError::backend)?;
            blocks
                .insert(hash.as_bytes().as_slice(), payload)
                .map_err(StoreError::backend)?;
        }
        tx.commit().map_err(StoreError::backend)?;

        tracing::trace!(hash = %hash.short(), len = payload.len(), "block persisted");
        Ok(())
    }

    fn has_block(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        let tx = self.db.begin_read().map_err(StoreError::backend)?;
        let blocks = tx.open_table(schema::BLOCKS).map_err(StoreError::backend)?;
        let found = blocks
            .get(hash.as_bytes().as_slice())
            .map_err(StoreError::backend)?
            .is_some();
        Ok(found)
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Arc<[u8]>, StoreError> {
        let tx = self.db.begin_read().map_err(StoreError::backend)?;
        let blocks = tx.open_table(schema::BLOCKS).map_err(StoreError::backend)?;
        let Some(v) = blocks
            .get(hash.as_bytes().as_slice())
            .map_err(StoreError::backend)?
        else {
            return Err(StoreError::NotFound { hash: *hash });
        };
        Ok(Arc::from(v.value()))
    }
}

/// Durable catalog entries in a redb file.
pub struct RedbCatalog {
    db: Database,
}

impl RedbCatalog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::backend)?;
        let tx = db.begin_write().map_err(StoreError::backend)?;
        {
            let _ = tx.open_table(schema::CATALOG).map_err(StoreError::backend)?;
        }
        tx.commit().map_err(StoreError::backend)?;
        Ok(Self { db })
    }
}

impl CatalogPersistence for RedbCatalog {
    fn persist(&self, filename: &str, state: &CatalogState) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut catalog = tx.open_table(schema::CATALOG).map_err(StoreError::backend)?;
            match codec::encode_entry(state) {
                Some(blob) => {
                    catalog
                        .insert(filename, blob.as_slice())
                        .map_err(StoreError::backend)?;
                }
                None => {
                    catalog.remove(filename).map_err(StoreError::backend)?;
                }
            }
        }
        tx.commit().map_err(StoreError::backend)
    }

    fn load_all(&self) -> Result<Vec<(String, CatalogState)>, StoreError> {
        let tx = self.db.begin_read().map_err(StoreError::backend)?;
        let catalog = tx.open_table(schema::CATALOG).map_err(StoreError::backend)?;

        let mut out = Vec::new();
        for item in catalog.iter().map_err(StoreError::backend)? {
            let (k, v) = item.map_err(StoreError::backend)?;
            let name = k.value().to_string();
            let state = codec::decode_entry(v.value())
                .map_err(|e| StoreError::Backend(format!("decode catalog entry {name}: {e:#}")))?;
            out.push((name, state));
        }
        Ok(out)
    }
}
