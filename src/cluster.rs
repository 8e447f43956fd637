use crate::block_store::{BlockStore, Shards};
use crate::client::SyncClient;
use crate::config::ClusterConfig;
use crate::db::{self, DataDir, RedbBlockStore, RedbCatalog, ShardStats};
use crate::dbpath;
use crate::error::StoreError;
use crate::metadata::MetadataStore;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Every role of a cluster hosted in one data directory: one redb file per
/// block-store shard plus the durable catalog.
pub struct LocalCluster {
    config: ClusterConfig,
    shard_stores: Vec<Arc<RedbBlockStore>>,
    shards: Shards,
    metadata: Arc<MetadataStore>,
    data_dir: DataDir,
}

impl LocalCluster {
    pub fn open(dir: &Path, config: ClusterConfig) -> Result<Self> {
        let data_dir = db::open_data_dir(dir, config.shard_count(), config.placement)
            .with_context(|| format!("Failed to open data directory {}", dir.display()))?;

        let mut shard_stores = Vec::with_capacity(config.shard_count());
        for (idx, endpoint) in config.shards.iter().enumerate() {
            let path = dir.join(dbpath::shard_file(idx));
            let store = RedbBlockStore::open(&path)
                .with_context(|| format!("Failed to open shard {idx} ({endpoint}) at {}", path.display()))?;
            shard_stores.push(Arc::new(store));
        }
        let shards = Shards::new(
            shard_stores
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn BlockStore>)
                .collect(),
        );

        let catalog_path = dir.join(dbpath::CATALOG_FILE);
        let catalog = RedbCatalog::open(&catalog_path)
            .with_context(|| format!("Failed to open catalog {}", catalog_path.display()))?;
        let metadata = MetadataStore::with_persistence(shards.clone(), config.placement, Arc::new(catalog))
            .context("Failed to load catalog")?;

        tracing::info!(
            data_dir = %dir.display(),
            shards = config.shard_count(),
            metadata = %config.metadata,
            placement = ?config.placement,
            "cluster opened"
        );

        Ok(Self {
            config,
            shard_stores,
            shards,
            metadata: Arc::new(metadata),
            data_dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.data_dir.path
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn shards(&self) -> &Shards {
        &self.shards
    }

    /// A client session using the configured placement policy.
    pub fn client(&self) -> Result<SyncClient, StoreError> {
        SyncClient::connect(
            self.metadata.clone(),
            self.shards.clone(),
            self.config.placement,
            self.config.client_options(),
        )
    }

    pub fn shard_stats(&self) -> Result<Vec<ShardStats>, StoreError> {
        self.shard_stores.iter().map(|s| s.stats()).collect()
    }
}
