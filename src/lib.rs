//! Content-addressed file synchronization.
//!
//! Files are split into fixed-size blocks named by their BLAKE3 digest and
//! spread over block-store shards. A single metadata catalog maps each
//! filename to a version and an ordered hashlist, admitting changes under
//! optimistic concurrency control. [`client::SyncClient`] drives uploads,
//! downloads and deletes against any [`metadata::MetadataService`] and set of
//! [`block_store::BlockStore`] shards; [`cluster::LocalCluster`] hosts all of
//! them durably in one directory.

pub mod block_store;
pub mod chunking;
pub mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod db;
pub mod dbpath;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod placement;
pub mod schema;
pub mod types;
pub mod util;

pub use block_store::{BlockStore, MemoryBlockStore, Shards};
pub use client::{ClientOptions, SyncClient, UploadReport};
pub use error::{DeleteError, ModifyError, StoreError, SyncError};
pub use metadata::{CatalogState, MetadataService, MetadataStore};
pub use placement::{Placement, PlacementPolicy};
pub use types::{Block, BlockHash, FileVersion};
