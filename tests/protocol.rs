//! End-to-end protocol scenarios against in-memory shards.

use blocksync::{
    BlockHash, BlockStore, ClientOptions, DeleteError, FileVersion,
    MetadataService, MetadataStore, ModifyError, Placement, PlacementPolicy, Shards, StoreError,
    SyncClient, SyncError,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn cluster(n: usize) -> (Arc<MetadataStore>, Shards) {
    let shards = Shards::in_memory(n);
    let md = Arc::new(MetadataStore::new(shards.clone(), PlacementPolicy::HashPartition));
    (md, shards)
}

fn client_for(md: Arc<dyn MetadataService>, shards: &Shards, options: ClientOptions) -> SyncClient {
    SyncClient::new(md, shards.clone(), Placement::hash_partition(shards.len()), options)
}

/// Runs a hook just before the first `modify_file` reaches the real catalog.
struct Interleave {
    inner: Arc<MetadataStore>,
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MetadataService for Interleave {
    fn read_file(&self, filename: &str) -> Result<FileVersion, StoreError> {
        self.inner.read_file(filename)
    }

    fn modify_file(&self, filename: &str, version: u64, hashlist: &[BlockHash]) -> Result<(), ModifyError> {
        if let Some(hook) = self.hook.lock().take() {
            hook();
        }
        self.inner.modify_file(filename, version, hashlist)
    }

    fn delete_file(&self, filename: &str, version: u64) -> Result<(), DeleteError> {
        self.inner.delete_file(filename, version)
    }
}

#[test]
fn two_clients_race_and_the_loser_retries_at_the_next_version() {
    let (md, shards) = cluster(2);
    let a = client_for(md.clone(), &shards, ClientOptions::default());
    for body in [&b"v1"[..], b"v2", b"v3"] {
        a.upload_bytes("doc", body).unwrap();
    }
    assert_eq!(md.read_file("doc").unwrap().version, 3);

    // B reads version 3; A commits version 4 before B's first proposal lands.
    let hook_md = md.clone();
    let hook_shards = shards.clone();
    let b_service = Arc::new(Interleave {
        inner: md.clone(),
        hook: Mutex::new(Some(Box::new(move || {
            let a = client_for(hook_md, &hook_shards, ClientOptions::default());
            assert_eq!(a.upload_bytes("doc", b"from A").unwrap().version, 4);
        }))),
    });
    let b = client_for(b_service, &shards, ClientOptions::default());

    let report = b.upload_bytes("doc", b"from B").unwrap();
    assert_eq!(report.version, 5);
    assert!(report.attempts >= 2);
    assert_eq!(b.fetch("doc").unwrap(), b"from B");
}

#[test]
fn racing_commit_at_same_version_reports_the_winner() {
    let (md, shards) = cluster(1);
    let a = client_for(md.clone(), &shards, ClientOptions::default());
    for body in [&b"1"[..], b"2", b"3"] {
        a.upload_bytes("f", body).unwrap();
    }

    let seen_by_a = md.read_file("f").unwrap().version;
    let seen_by_b = md.read_file("f").unwrap().version;
    assert_eq!((seen_by_a, seen_by_b), (3, 3));

    let h = BlockHash::of(b"x");
    shards.get(0).store_block(&h, b"x").unwrap();
    md.modify_file("f", seen_by_a + 1, &[h]).unwrap();
    assert_eq!(
        md.modify_file("f", seen_by_b + 1, &[h]),
        Err(ModifyError::VersionConflict { current: 4 })
    );
    md.modify_file("f", 5, &[h]).unwrap();
}

#[test]
fn missing_block_is_reported_then_accepted_once_stored() {
    let (md, shards) = cluster(3);
    let payload = b"the only block".to_vec();
    let h = BlockHash::of(&payload);

    assert_eq!(
        md.modify_file("f", 1, &[h]),
        Err(ModifyError::MissingBlocks { hashes: vec![h] })
    );
    assert_eq!(md.read_file("f").unwrap(), FileVersion::default());

    shards.get(h.modulo(3)).store_block(&h, &payload).unwrap();
    md.modify_file("f", 1, &[h]).unwrap();
    assert_eq!(md.read_file("f").unwrap().hashlist, vec![h]);
}

#[test]
fn round_trip_preserves_bytes_across_sizes() {
    let (md, shards) = cluster(4);
    let client = client_for(md, &shards, ClientOptions::default());

    for len in [0usize, 1, 4095, 4096, 4097, 4096 * 5 + 123] {
        let data: Vec<u8> = (0..len).map(|i| (i as u32).wrapping_mul(2654435761) as u8).collect();
        let name = format!("size-{len}");
        client.upload_bytes(&name, &data).unwrap();
        assert_eq!(client.fetch(&name).unwrap(), data, "len {len}");
    }
}

#[test]
fn block_order_is_part_of_the_file() {
    let (md, shards) = cluster(2);
    let client = client_for(md, &shards, ClientOptions { chunk_size: 4, max_attempts: 5 });

    client.upload_bytes("ab", b"AAAABBBB").unwrap();
    client.upload_bytes("ba", b"BBBBAAAA").unwrap();
    assert_eq!(client.fetch("ab").unwrap(), b"AAAABBBB");
    assert_eq!(client.fetch("ba").unwrap(), b"BBBBAAAA");
}

#[test]
fn versions_advance_by_exactly_one_per_success() {
    let (md, shards) = cluster(2);
    let client = client_for(md.clone(), &shards, ClientOptions::default());

    let mut expected = 0;
    for round in 0..5u8 {
        expected += 1;
        assert_eq!(client.upload_bytes("f", &[round; 10]).unwrap().version, expected);
        if round % 2 == 1 {
            expected += 1;
            assert_eq!(client.delete("f").unwrap(), expected);
        }
        assert_eq!(md.read_file("f").unwrap().version, expected);
    }
}

#[test]
fn concurrent_writers_all_land_with_distinct_versions() {
    let (md, shards) = cluster(2);
    let options = ClientOptions { chunk_size: 4096, max_attempts: 200 };

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let client = client_for(md.clone(), &shards, options);
            std::thread::spawn(move || client.upload_bytes("shared", &[i; 5000]).unwrap().version)
        })
        .collect();

    let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());
    assert_eq!(md.read_file("shared").unwrap().version, 8);
}

struct AlwaysConflict;

impl MetadataService for AlwaysConflict {
    fn read_file(&self, _: &str) -> Result<FileVersion, StoreError> {
        Ok(FileVersion::default())
    }
    fn modify_file(&self, _: &str, version: u64, _: &[BlockHash]) -> Result<(), ModifyError> {
        Err(ModifyError::VersionConflict { current: version })
    }
    fn delete_file(&self, _: &str, version: u64) -> Result<(), DeleteError> {
        Err(DeleteError::VersionConflict { current: version })
    }
}

#[test]
fn retry_budget_is_bounded() {
    let shards = Shards::in_memory(1);
    let client = client_for(Arc::new(AlwaysConflict), &shards, ClientOptions { chunk_size: 4096, max_attempts: 3 });

    match client.upload_bytes("f", b"data") {
        Err(SyncError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected: {other:?}"),
    }
    match client.delete("f") {
        Err(SyncError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected: {other:?}"),
    }
}

struct Unreachable;

impl BlockStore for Unreachable {
    fn store_block(&self, _: &BlockHash, _: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn has_block(&self, _: &BlockHash) -> Result<bool, StoreError> {
        Ok(false)
    }
    fn get_block(&self, hash: &BlockHash) -> Result<Arc<[u8]>, StoreError> {
        Err(StoreError::NotFound { hash: *hash })
    }
}

#[test]
fn unreachable_shard_aborts_upload_without_committing() {
    let shards = Shards::new(vec![Arc::new(Unreachable) as Arc<dyn BlockStore>]);
    let md = Arc::new(MetadataStore::new(shards.clone(), PlacementPolicy::HashPartition));
    let client = client_for(md.clone(), &shards, ClientOptions::default());

    let err = client.upload_bytes("f", b"payload").unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
    assert_eq!(md.read_file("f").unwrap(), FileVersion::default());
}

#[test]
fn sticky_sessions_interoperate_with_hash_sessions() {
    let shards = Shards::in_memory(3);
    let md = Arc::new(MetadataStore::new(shards.clone(), PlacementPolicy::LatencySticky));
    let sticky = SyncClient::connect(md.clone(), shards.clone(), PlacementPolicy::LatencySticky, ClientOptions::default()).unwrap();
    let Placement::Sticky { pinned, .. } = sticky.placement() else {
        panic!("expected sticky placement");
    };

    let data = vec![42u8; 4096 * 3 + 1];
    sticky.upload_bytes("f", &data).unwrap();
    for (idx, store) in shards.iter() {
        let h = BlockHash::of(&[42u8; 4096]);
        assert_eq!(store.has_block(&h).unwrap(), idx == pinned);
    }

    // Another session pinned elsewhere still finds every block.
    let other = SyncClient::new(
        md.clone(),
        shards.clone(),
        Placement::Sticky { pinned: (pinned + 1) % 3, shards: 3 },
        ClientOptions::default(),
    );
    assert_eq!(other.fetch("f").unwrap(), data);

    // A hash session reads the same file, and its own uploads are accepted.
    let hashed = client_for(md.clone(), &shards, ClientOptions::default());
    assert_eq!(hashed.fetch("f").unwrap(), data);
    let body: Vec<u8> = (0..4096 * 4).map(|i| (i % 251) as u8).collect();
    hashed.upload_bytes("g", &body).unwrap();
    assert_eq!(sticky.fetch("g").unwrap(), body);
    assert_eq!(md.read_file("g").unwrap().version, 1);
}
