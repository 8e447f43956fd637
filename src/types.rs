use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A 32-byte BLAKE3 content digest identifying one block.
///
/// Displayed as 64 lowercase hex chars. Ordering is byte-wise, which is also the
/// ordering of the digest read as a big-endian integer.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const LEN: usize = 32;

    /// Hash a payload. No domain prefix: the content is the identity.
    pub fn of(payload: &[u8]) -> Self {
        Self(*blake3::hash(payload).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// `numeric_value(hash) mod n`, reading the digest as a big-endian integer.
    pub fn modulo(&self, n: usize) -> usize {
        assert!(n > 0, "modulo by zero shards");
        let n = n as u128;
        let mut rem: u128 = 0;
        for &b in &self.0 {
            rem = ((rem << 8) | u128::from(b)) % n;
        }
        rem as usize
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.short())
    }
}

impl FromStr for BlockHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 {
            return Err(anyhow!("block hash must be 64 hex chars, got {}", s.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| anyhow!("invalid hex in block hash: {e}"))?;
        Ok(Self(out))
    }
}

/// An immutable, content-addressed chunk of file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: BlockHash,
    pub payload: Arc<[u8]>,
}

impl Block {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            hash: BlockHash::of(payload),
            payload: Arc::from(payload),
        }
    }
}

/// What `read_file` reports for a filename.
///
/// Never-seen names read as version 0 with an empty hashlist. Tombstoned names
/// carry the tombstone's version, an empty hashlist and `tombstoned = true`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileVersion {
    pub version: u64,
    pub hashlist: Vec<BlockHash>,
    pub tombstoned: bool,
}

impl FileVersion {
    /// True when there is live content under this name (possibly zero bytes).
    pub fn is_live(&self) -> bool {
        self.version > 0 && !self.tombstoned
    }
}
