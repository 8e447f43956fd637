//! The metadata catalog: the single authority on what each filename contains.
//!
//! Mutations are admitted under optimistic concurrency control. A proposal
//! names the version it expects to create; if that is not exactly one past
//! the current version the caller gets `VersionConflict` and must re-propose.
//! A modify is also refused with `MissingBlocks` until every block of the new
//! hashlist can be found on its shard. Each filename has its own lock, so the
//! check-then-commit sequence is atomic per name while distinct names proceed
//! in parallel.

use crate::block_store::Shards;
use crate::error::{DeleteError, ModifyError, StoreError};
use crate::placement::{Placement, PlacementPolicy};
use crate::types::{BlockHash, FileVersion};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// The Metadata Store RPC surface.
pub trait MetadataService: Send + Sync {
    /// Never fails for catalog reasons; errors are transport/backend failures.
    fn read_file(&self, filename: &str) -> Result<FileVersion, StoreError>;

    fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: &[BlockHash],
    ) -> Result<(), ModifyError>;

    fn delete_file(&self, filename: &str, version: u64) -> Result<(), DeleteError>;
}

/// Durable write-through for catalog entries.
pub trait CatalogPersistence: Send + Sync {
    fn persist(&self, filename: &str, state: &CatalogState) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<Vec<(String, CatalogState)>, StoreError>;
}

/// Per-filename catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatalogState {
    #[default]
    Absent,
    Live {
        version: u64,
        hashlist: Vec<BlockHash>,
    },
    Tombstoned {
        version: u64,
    },
}

impl CatalogState {
    pub fn version(&self) -> u64 {
        match self {
            CatalogState::Absent => 0,
            CatalogState::Live { version, .. } | CatalogState::Tombstoned { version } => *version,
        }
    }

    /// The only version a mutation may propose next.
    pub fn next_version(&self) -> u64 {
        self.version() + 1
    }

    pub fn to_file_version(&self) -> FileVersion {
        match self {
            CatalogState::Absent => FileVersion::default(),
            CatalogState::Live { version, hashlist } => FileVersion {
                version: *version,
                hashlist: hashlist.clone(),
                tombstoned: false,
            },
            CatalogState::Tombstoned { version } => FileVersion {
                version: *version,
                hashlist: Vec::new(),
                tombstoned: true,
            },
        }
    }
}

type Slot = Arc<Mutex<CatalogState>>;

pub struct MetadataStore {
    catalog: DashMap<String, Slot>,
    shards: Shards,
    placement: Placement,
    persistence: Option<Arc<dyn CatalogPersistence>>,
}

impl MetadataStore {
    /// An in-memory catalog validating blocks against `shards`.
    pub fn new(shards: Shards, policy: PlacementPolicy) -> Self {
        let placement = Placement::for_catalog(policy, shards.len());
        Self {
            catalog: DashMap::new(),
            shards,
            placement,
            persistence: None,
        }
    }

    /// A catalog that writes every commit through `persistence` and starts
    /// from whatever it already holds.
    pub fn with_persistence(
        shards: Shards,
        policy: PlacementPolicy,
        persistence: Arc<dyn CatalogPersistence>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new(shards, policy);
        let entries = persistence.load_all()?;
        tracing::debug!(entries = entries.len(), "catalog loaded");
        for (name, state) in entries {
            store.catalog.insert(name, Arc::new(Mutex::new(state)));
        }
        store.persistence = Some(persistence);
        Ok(store)
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Every known filename (live or tombstoned), sorted by name.
    pub fn list_files(&self) -> Vec<(String, FileVersion)> {
        let slots: Vec<(String, Slot)> = self
            .catalog
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut out: Vec<(String, FileVersion)> = slots
            .into_iter()
            .filter_map(|(name, slot)| {
                let state = slot.lock();
                match *state {
                    CatalogState::Absent => None,
                    _ => Some((name, state.to_file_version())),
                }
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn slot(&self, filename: &str) -> Slot {
        if let Some(s) = self.catalog.get(filename) {
            return Arc::clone(s.value());
        }
        Arc::clone(self.catalog.entry(filename.to_owned()).or_default().value())
    }

    /// Remove `filename`'s slot if it never got past `Absent` and no one else
    /// holds it. The map's shard lock is held throughout, so no new holder can
    /// appear between the count check and the removal.
    fn prune_absent(&self, filename: &str) {
        self.catalog.remove_if(filename, |_, slot| {
            Arc::strong_count(slot) == 1 && matches!(*slot.lock(), CatalogState::Absent)
        });
    }

    fn existing_slot(&self, filename: &str) -> Option<Slot> {
        self.catalog.get(filename).map(|s| Arc::clone(s.value()))
    }

    /// Hashes of `hashlist` not present on any of their candidate shards,
    /// each reported once, in first-appearance order.
    fn missing_blocks(&self, hashlist: &[BlockHash]) -> Result<Vec<BlockHash>, StoreError> {
        let mut seen = HashSet::with_capacity(hashlist.len());
        let mut missing = Vec::new();

        for hash in hashlist {
            if !seen.insert(*hash) {
                continue;
            }
            let mut found = false;
            for shard in self.placement.candidates(hash) {
                if self.shards.get(shard).has_block(hash)? {
                    found = true;
                    break;
                }
            }
            if !found {
                missing.push(*hash);
            }
        }

        Ok(missing)
    }

    fn modify_slot(
        &self,
        slot: &Slot,
        filename: &str,
        version: u64,
        hashlist: &[BlockHash],
    ) -> Result<(), ModifyError> {
        let mut state = slot.lock();

        let expected = state.next_version();
        if version != expected {
            tracing::warn!(filename, proposed = version, expected, "modify rejected: version conflict");
            return Err(ModifyError::VersionConflict {
                current: expected - 1,
            });
        }

        let missing = self.missing_blocks(hashlist)?;
        if !missing.is_empty() {
            tracing::debug!(filename, version, missing = missing.len(), "modify rejected: missing blocks");
            return Err(ModifyError::MissingBlocks { hashes: missing });
        }

        self.commit(
            filename,
            &mut state,
            CatalogState::Live {
                version,
                hashlist: hashlist.to_vec(),
            },
        )?;
        tracing::info!(filename, version, blocks = hashlist.len(), "file committed");
        Ok(())
    }

    fn commit(
        &self,
        filename: &str,
        current: &mut CatalogState,
        next: CatalogState,
    ) -> Result<(), StoreError> {
        if let Some(p) = &self.persistence {
            p.persist(filename, &next)?;
        }
        *current = next;
        Ok(())
    }
}

impl MetadataService for MetadataStore {
    fn read_file(&self, filename: &str) -> Result<FileVersion, StoreError> {
        Ok(self
            .existing_slot(filename)
            .map(|slot| {
                let state = slot.lock();
                state.to_file_version()
            })
            .unwrap_or_default())
    }

    fn modify_file(
        &self,
        filename: &str,
        version: u64,
        hashlist: &[BlockHash],
    ) -> Result<(), ModifyError> {
        let slot = self.slot(filename);
        let result = self.modify_slot(&slot, filename, version, hashlist);
        if result.is_err() {
            drop(slot);
            self.prune_absent(filename);
        }
        result
    }

    fn delete_file(&self, filename: &str, version: u64) -> Result<(), DeleteError> {
        let Some(slot) = self.existing_slot(filename) else {
            return Err(DeleteError::NotFound);
        };
        let mut state = slot.lock();

        let current = match *state {
            CatalogState::Absent => return Err(DeleteError::NotFound),
            CatalogState::Live { version, .. } | CatalogState::Tombstoned { version } => version,
        };
        if version != current + 1 {
            tracing::warn!(filename, proposed = version, current, "delete rejected: version conflict");
            return Err(DeleteError::VersionConflict { current });
        }

        self.commit(filename, &mut state, CatalogState::Tombstoned { version })?;
        tracing::info!(filename, version, "file deleted");
        Ok(())
    }
}
