use redb::TableDefinition;

// Per-shard block file: raw 32-byte digest -> payload.
pub const BLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks");

// Catalog file: filename -> codec-encoded entry (see codec::encode_entry).
pub const CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("catalog");
