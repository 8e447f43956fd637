use crate::error::StoreError;
use crate::types::BlockHash;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One shard of content-addressed block storage.
///
/// Blocks are immutable and never removed. Calls may block (network or disk),
/// so implementations must be usable from many threads at once.
pub trait BlockStore: Send + Sync {
    /// Store `payload` under `hash`. Idempotent: storing a present hash is a no-op.
    /// Rejects payloads that do not hash to `hash`.
    fn store_block(&self, hash: &BlockHash, payload: &[u8]) -> Result<(), StoreError>;

    fn has_block(&self, hash: &BlockHash) -> Result<bool, StoreError>;

    /// Fetch a block. Absence is `StoreError::NotFound`.
    fn get_block(&self, hash: &BlockHash) -> Result<Arc<[u8]>, StoreError>;

    /// A minimal round-trip, used for latency probing.
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub(crate) fn verify_payload(hash: &BlockHash, payload: &[u8]) -> Result<(), StoreError> {
    let computed = BlockHash::of(payload);
    if computed != *hash {
        return Err(StoreError::HashMismatch {
            expected: *hash,
            computed,
        });
    }
    Ok(())
}

/// In-memory block store.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<BlockHash, Arc<[u8]>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn store_block(&self, hash: &BlockHash, payload: &[u8]) -> Result<(), StoreError> {
        verify_payload(hash, payload)?;
        let mut blocks = self.blocks.write();
        if !blocks.contains_key(hash) {
            blocks.insert(*hash, Arc::from(payload));
            tracing::trace!(hash = %hash.short(), len = payload.len(), "block stored");
        }
        Ok(())
    }

    fn has_block(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        Ok(self.blocks.read().contains_key(hash))
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Arc<[u8]>, StoreError> {
        self.blocks
            .read()
            .get(hash)
            .cloned()
            .ok_or(StoreError::NotFound { hash: *hash })
    }
}

/// The indexed set of block-store shards, `[0, N)`.
#[derive(Clone)]
pub struct Shards {
    stores: Arc<[Arc<dyn BlockStore>]>,
}

impl Shards {
    /// Panics if `stores` is empty; a cluster always has at least one shard.
    pub fn new(stores: Vec<Arc<dyn BlockStore>>) -> Self {
        assert!(!stores.is_empty(), "at least one block store shard is required");
        Self {
            stores: stores.into(),
        }
    }

    /// `n` fresh in-memory shards.
    pub fn in_memory(n: usize) -> Self {
        Self::new(
            (0..n)
                .map(|_| Arc::new(MemoryBlockStore::new()) as Arc<dyn BlockStore>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn get(&self, shard: usize) -> &Arc<dyn BlockStore> {
        &self.stores[shard]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn BlockStore>)> {
        self.stores.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_get_returns_exact_payload() {
        let s = MemoryBlockStore::new();
        let payload = b"some bytes".to_vec();
        let h = BlockHash::of(&payload);

        assert!(!s.has_block(&h).unwrap());
        s.store_block(&h, &payload).unwrap();
        assert!(s.has_block(&h).unwrap());
        assert_eq!(&*s.get_block(&h).unwrap(), payload.as_slice());
    }

    #[test]
    fn storing_twice_is_idempotent() {
        let s = MemoryBlockStore::new();
        let h = BlockHash::of(b"x");
        s.store_block(&h, b"x").unwrap();
        s.store_block(&h, b"x").unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(&*s.get_block(&h).unwrap(), b"x");
    }

    #[test]
    fn get_missing_is_not_found() {
        let s = MemoryBlockStore::new();
        let h = BlockHash::of(b"absent");
        assert_eq!(s.get_block(&h).unwrap_err(), StoreError::NotFound { hash: h });
    }

    #[test]
    fn wrong_hash_is_rejected() {
        let s = MemoryBlockStore::new();
        let h = BlockHash::of(b"one");
        let err = s.store_block(&h, b"two").unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(s.is_empty());
    }

    #[test]
    fn concurrent_same_hash_stores_are_safe() {
        let s = Arc::new(MemoryBlockStore::new());
        let h = BlockHash::of(b"shared");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.store_block(&h, b"shared").unwrap())
            })
            .collect();
        for t in handles {
            t.join().unwrap();
        }
        assert_eq!(s.len(), 1);
    }
}
