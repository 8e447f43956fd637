//! Durable cluster hosted in a data directory.

use blocksync::cluster::LocalCluster;
use blocksync::config::ClusterConfig;
use blocksync::{MetadataService, PlacementPolicy, SyncError};
use tempfile::TempDir;

fn config(shards: usize, placement: &str) -> ClusterConfig {
    let mut text = format!("B: {shards}\nmetadata: localhost:6000\nplacement: {placement}\n");
    for i in 0..shards {
        text.push_str(&format!("block{i}: localhost:{}\n", 5000 + i));
    }
    ClusterConfig::parse(&text).unwrap()
}

#[test]
fn catalog_and_blocks_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let src = tmp.path().join("notes.txt");
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
    std::fs::write(&src, &body).unwrap();

    {
        let cluster = LocalCluster::open(&data, config(3, "hash")).unwrap();
        let client = cluster.client().unwrap();
        let report = client.upload(&src).unwrap();
        assert_eq!(report.filename, "notes.txt");
        assert_eq!(report.version, 1);
        client.upload_bytes("old.txt", b"bye").unwrap();
        client.delete("old.txt").unwrap();
    }

    let cluster = LocalCluster::open(&data, config(3, "hash")).unwrap();
    let files = cluster.metadata().list_files();
    let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["notes.txt", "old.txt"]);
    assert!(files[1].1.tombstoned);
    assert_eq!(files[1].1.version, 2);

    let out = tmp.path().join("out");
    std::fs::create_dir(&out).unwrap();
    let client = cluster.client().unwrap();
    let path = client.download("notes.txt", &out).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), body);

    // Recreating a deleted name continues from the tombstone.
    assert_eq!(client.upload_bytes("old.txt", b"back").unwrap().version, 3);

    let stats = cluster.shard_stats().unwrap();
    assert_eq!(stats.len(), 3);
    let total: u64 = stats.iter().map(|s| s.bytes).sum();
    assert_eq!(total, 10_000 + 3 + 4);
}

#[test]
fn second_open_of_the_same_directory_is_refused() {
    let tmp = TempDir::new().unwrap();
    let _first = LocalCluster::open(tmp.path(), config(1, "hash")).unwrap();
    assert!(LocalCluster::open(tmp.path(), config(1, "hash")).is_err());
}

#[test]
fn shard_count_cannot_change_under_existing_data() {
    let tmp = TempDir::new().unwrap();
    drop(LocalCluster::open(tmp.path(), config(2, "hash")).unwrap());
    assert!(LocalCluster::open(tmp.path(), config(3, "hash")).is_err());
}

#[test]
fn placement_policy_cannot_change_under_existing_data() {
    let tmp = TempDir::new().unwrap();
    {
        let cluster = LocalCluster::open(tmp.path(), config(3, "sticky")).unwrap();
        let client = cluster.client().unwrap();
        let body: Vec<u8> = (0..4096 * 6).map(|i| (i % 199) as u8).collect();
        client.upload_bytes("f", &body).unwrap();
    }

    assert!(LocalCluster::open(tmp.path(), config(3, "hash")).is_err());

    let cluster = LocalCluster::open(tmp.path(), config(3, "sticky")).unwrap();
    let client = cluster.client().unwrap();
    assert_eq!(client.fetch("f").unwrap().len(), 4096 * 6);
}

#[test]
fn sticky_cluster_round_trips() {
    let tmp = TempDir::new().unwrap();
    let cluster = LocalCluster::open(tmp.path(), config(2, "sticky")).unwrap();
    assert_eq!(cluster.config().placement, PlacementPolicy::LatencySticky);

    let client = cluster.client().unwrap();
    client.upload_bytes("s.bin", &[5u8; 9000]).unwrap();
    assert_eq!(client.fetch("s.bin").unwrap(), vec![5u8; 9000]);

    let used: Vec<u64> = cluster.shard_stats().unwrap().iter().map(|s| s.blocks).collect();
    assert_eq!(used.iter().filter(|&&b| b > 0).count(), 1);
}

#[test]
fn download_of_unknown_file_reports_not_found() {
    let tmp = TempDir::new().unwrap();
    let cluster = LocalCluster::open(&tmp.path().join("d"), ClusterConfig::single_node()).unwrap();
    let client = cluster.client().unwrap();
    assert!(matches!(client.download("nothing", tmp.path()), Err(SyncError::NotFound { .. })));
    assert_eq!(cluster.metadata().read_file("nothing").unwrap().version, 0);
}
