//! Which shard owns which block.
//!
//! Hash partitioning is stateless: every client and the metadata store compute
//! `hash mod N` and must agree. Latency-sticky placement pins a whole client
//! session to the fastest shard it can reach, trading load distribution for
//! latency; every block that session uploads lands on that one shard. Because
//! the owning shard is then no longer a function of the hash, lookups under
//! sticky placement fall back to scanning all shards. Reads of any session
//! do the same after trying the preferred shard.

use crate::block_store::Shards;
use crate::error::StoreError;
use crate::types::BlockHash;
use anyhow::anyhow;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Round-trips per shard when probing latency.
pub const PROBE_ROUNDS: usize = 5;

/// Placement as selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    #[default]
    HashPartition,
    LatencySticky,
}

impl PlacementPolicy {
    /// The name written to configuration and `meta.toml`.
    pub fn as_str(self) -> &'static str {
        match self {
            PlacementPolicy::HashPartition => "hash",
            PlacementPolicy::LatencySticky => "sticky",
        }
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" | "hash-partition" => Ok(PlacementPolicy::HashPartition),
            "sticky" | "latency-sticky" | "latency" => Ok(PlacementPolicy::LatencySticky),
            other => Err(anyhow!("unknown placement policy '{other}' (expected hash or sticky)")),
        }
    }
}

/// A resolved placement over `shards` shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `shard = hash mod shards`.
    HashPartition { shards: usize },
    /// Every write goes to `pinned`; reads try `pinned` first, then the rest.
    Sticky { pinned: usize, shards: usize },
    /// Blocks may live on any shard (metadata-side view of sticky sessions).
    AnyShard { shards: usize },
}

impl Placement {
    pub fn hash_partition(shards: usize) -> Self {
        Placement::HashPartition { shards }
    }

    /// The placement the metadata store validates against.
    pub fn for_catalog(policy: PlacementPolicy, shards: usize) -> Self {
        match policy {
            PlacementPolicy::HashPartition => Placement::HashPartition { shards },
            PlacementPolicy::LatencySticky => Placement::AnyShard { shards },
        }
    }

    /// The placement a client session uses. Sticky policy probes every shard.
    pub fn for_session(policy: PlacementPolicy, shards: &Shards) -> Result<Self, StoreError> {
        match policy {
            PlacementPolicy::HashPartition => Ok(Placement::HashPartition {
                shards: shards.len(),
            }),
            PlacementPolicy::LatencySticky => {
                let pinned = pick_lowest_latency(shards, PROBE_ROUNDS)?;
                tracing::info!(pinned, shards = shards.len(), "session pinned to lowest-latency shard");
                Ok(Placement::Sticky {
                    pinned,
                    shards: shards.len(),
                })
            }
        }
    }

    pub fn shards(&self) -> usize {
        match *self {
            Placement::HashPartition { shards }
            | Placement::Sticky { shards, .. }
            | Placement::AnyShard { shards } => shards,
        }
    }

    /// Where a new block is written.
    pub fn home_shard(&self, hash: &BlockHash) -> usize {
        match *self {
            Placement::HashPartition { shards } | Placement::AnyShard { shards } => {
                hash.modulo(shards)
            }
            Placement::Sticky { pinned, .. } => pinned,
        }
    }

    /// Shards that may satisfy an existence check for a block, in order.
    pub fn candidates(&self, hash: &BlockHash) -> Vec<usize> {
        match *self {
            Placement::HashPartition { shards } => vec![hash.modulo(shards)],
            Placement::Sticky { pinned, shards } => std::iter::once(pinned)
                .chain((0..shards).filter(|&s| s != pinned))
                .collect(),
            Placement::AnyShard { shards } => {
                let home = hash.modulo(shards);
                std::iter::once(home)
                    .chain((0..shards).filter(|&s| s != home))
                    .collect()
            }
        }
    }

    /// Shards to fetch a block from, in order: the preferred shard, then every
    /// other shard by index.
    pub fn read_order(&self, hash: &BlockHash) -> Vec<usize> {
        match *self {
            Placement::HashPartition { shards } => Placement::AnyShard { shards }.candidates(hash),
            Placement::Sticky { .. } | Placement::AnyShard { .. } => self.candidates(hash),
        }
    }
}

/// Average round-trip per shard; `None` for shards that failed any probe.
pub fn probe_latency(shards: &Shards, rounds: usize) -> Vec<Option<Duration>> {
    let rounds = rounds.max(1);
    shards
        .iter()
        .map(|(idx, store)| {
            let mut total = Duration::ZERO;
            for _ in 0..rounds {
                let start = Instant::now();
                if let Err(e) = store.ping() {
                    tracing::debug!(shard = idx, error = %e, "probe failed");
                    return None;
                }
                let rtt = start.elapsed();
                tracing::trace!(shard = idx, ?rtt, "probe");
                total += rtt;
            }
            Some(total / rounds as u32)
        })
        .collect()
}

/// Index of the reachable shard with the lowest average round-trip.
/// Ties go to the lower index.
pub fn pick_lowest_latency(shards: &Shards, rounds: usize) -> Result<usize, StoreError> {
    probe_latency(shards, rounds)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, avg)| avg.map(|d| (d, idx)))
        .min()
        .map(|(_, idx)| idx)
        .ok_or_else(|| StoreError::Unavailable("no block store shard answered the latency probe".into()))
}
