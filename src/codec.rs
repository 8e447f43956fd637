use crate::metadata::CatalogState;
use crate::types::BlockHash;
use anyhow::{anyhow, Result};

const FORMAT_V1: u8 = 1;
const HEADER_LEN: usize = 14;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Live = 0,
    Tombstoned = 1,
}

impl EntryKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EntryKind::Live),
            1 => Some(EntryKind::Tombstoned),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Encode a catalog entry to its stable on-disk format.
///
/// Format v1:
/// [0]       u8  format = 1
/// [1]       u8  kind (0 = live, 1 = tombstoned)
/// [2..10]   u64 version LE
/// [10..14]  u32 hash count LE (0 for tombstones)
/// [14..]    [u8;32] * count
///
/// `Absent` has no encoding; absent names are simply not stored.
pub fn encode_entry(state: &CatalogState) -> Option<Vec<u8>> {
    let (kind, version, hashlist): (EntryKind, u64, &[BlockHash]) = match state {
        CatalogState::Absent => return None,
        CatalogState::Live { version, hashlist } => (EntryKind::Live, *version, hashlist),
        CatalogState::Tombstoned { version } => (EntryKind::Tombstoned, *version, &[]),
    };

    let mut out = Vec::with_capacity(HEADER_LEN + hashlist.len() * BlockHash::LEN);
    out.push(FORMAT_V1);
    out.push(kind.as_u8());
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&(hashlist.len() as u32).to_le_bytes());
    for h in hashlist {
        out.extend_from_slice(h.as_bytes());
    }
    Some(out)
}

pub fn decode_entry(bytes: &[u8]) -> Result<CatalogState> {
    let Some(&format) = bytes.first() else {
        return Err(anyhow!("catalog entry is empty"));
    };
    match format {
        FORMAT_V1 => decode_v1(bytes),
        _ => Err(anyhow!("unknown catalog entry format: {format}")),
    }
}

fn decode_v1(bytes: &[u8]) -> Result<CatalogState> {
    if bytes.len() < HEADER_LEN {
        return Err(anyhow!("catalog entry v1 too short: {} bytes", bytes.len()));
    }

    let kind = EntryKind::from_u8(bytes[1])
        .ok_or_else(|| anyhow!("unknown catalog entry kind: {}", bytes[1]))?;

    let mut v = [0u8; 8];
    v.copy_from_slice(&bytes[2..10]);
    let version = u64::from_le_bytes(v);
    if version == 0 {
        return Err(anyhow!("catalog entry with version 0"));
    }

    let mut c = [0u8; 4];
    c.copy_from_slice(&bytes[10..14]);
    let count = u32::from_le_bytes(c) as usize;

    let body = &bytes[HEADER_LEN..];
    if body.len() != count * BlockHash::LEN {
        return Err(anyhow!(
            "catalog entry v1 declares {count} hashes but carries {} bytes",
            body.len()
        ));
    }

    match kind {
        EntryKind::Live => {
            let hashlist = body
                .chunks_exact(BlockHash::LEN)
                .filter_map(BlockHash::from_slice)
                .collect();
            Ok(CatalogState::Live { version, hashlist })
        }
        EntryKind::Tombstoned if count == 0 => Ok(CatalogState::Tombstoned { version }),
        EntryKind::Tombstoned => Err(anyhow!("tombstone carries {count} hashes")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_entry_survives_encoding() {
        let state = CatalogState::Live {
            version: 7,
            hashlist: vec![BlockHash::of(b"a"), BlockHash::of(b"b"), BlockHash::of(b"a")],
        };
        let bytes = encode_entry(&state).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3 * 32);
        assert_eq!(decode_entry(&bytes).unwrap(), state);
    }

    #[test]
    fn absent_is_not_encoded() {
        assert!(encode_entry(&CatalogState::Absent).is_none());
    }

    #[test]
    fn corrupt_entries_are_rejected() {
        let good = encode_entry(&CatalogState::Tombstoned { version: 3 }).unwrap();
        assert_eq!(decode_entry(&good).unwrap(), CatalogState::Tombstoned { version: 3 });

        assert!(decode_entry(&[]).is_err());
        assert!(decode_entry(&good[..5]).is_err());

        let mut bad_format = good.clone();
        bad_format[0] = 9;
        assert!(decode_entry(&bad_format).is_err());

        let mut bad_kind = good.clone();
        bad_kind[1] = 4;
        assert!(decode_entry(&bad_kind).is_err());

        let mut truncated = encode_entry(&CatalogState::Live {
            version: 1,
            hashlist: vec![BlockHash::of(b"x")],
        })
        .unwrap();
        truncated.pop();
        assert!(decode_entry(&truncated).is_err());
    }
}
