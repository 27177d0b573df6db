use std::path::Path;

use graphstats_config::{ByteSize, GraphStatsConfig};
use graphstats_db::id::with_owner;
use graphstats_db::{ResourceStatistics, StatisticsDatabase, StatsError};

fn config(dir: &Path, chunks: u32) -> GraphStatsConfig {
    let mut config = GraphStatsConfig::default();
    config.storage.dir = dir.to_path_buf();
    config.storage.chunks = chunks;
    config.storage.rows_per_file = 64;
    config
}

fn partition_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            let name = entry.as_ref().unwrap().file_name();
            name.to_string_lossy().starts_with("partition-")
        })
        .count()
}

fn count_sample(db: &mut StatisticsDatabase) {
    db.count_quad(1, 2, 3, 0).unwrap();
    db.count_quad(1, 2, 4, 1).unwrap();
    db.count_quad(3, 2, 1, 1).unwrap();
}

fn assert_sample(db: &mut StatisticsDatabase) {
    let one = db.statistics(1).unwrap().unwrap();
    assert_eq!(one.subject, vec![1, 1, 0, 0]);
    assert_eq!(one.property, vec![0, 0, 0, 0]);
    assert_eq!(one.object, vec![0, 1, 0, 0]);
    assert_eq!(one.occurrences, 3);

    let two = db.statistics(2).unwrap().unwrap();
    assert_eq!(two.property, vec![1, 2, 0, 0]);
    assert_eq!(two.occurrences, 3);

    let three = db.statistics(3).unwrap().unwrap();
    assert_eq!(three.subject, vec![0, 1, 0, 0]);
    assert_eq!(three.object, vec![1, 0, 0, 0]);
    assert_eq!(three.occurrences, 2);

    let four = db.statistics(4).unwrap().unwrap();
    assert_eq!(four.columns(), vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1]);

    assert_eq!(db.statistics(5).unwrap(), None);
    assert_eq!(db.chunk_sizes(), vec![1, 2, 0, 0]);
    assert_eq!(db.owner_load(), vec![4, 0, 0, 0]);
}

#[test]
fn counts_quads_per_position_and_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = StatisticsDatabase::open(&config(dir.path(), 4)).unwrap();
    count_sample(&mut db);
    assert_sample(&mut db);
}

#[test]
fn statistics_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 4);
    {
        let mut db = StatisticsDatabase::open(&config).unwrap();
        count_sample(&mut db);
        db.close().unwrap();
    }
    let mut db = StatisticsDatabase::open(&config).unwrap();
    assert_sample(&mut db);

    db.increment_triples_per_chunk(3).unwrap();
    drop(db);
    let db = StatisticsDatabase::open(&config).unwrap();
    assert_eq!(db.chunk_sizes(), vec![1, 2, 0, 1]);
}

#[test]
fn set_owner_moves_unassigned_resources() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = StatisticsDatabase::open(&config(dir.path(), 4)).unwrap();
    db.increment_subject_count(7, 0).unwrap();
    db.increment_resource_occurrences(7).unwrap();

    let owned = db.set_owner(7, 2).unwrap();
    assert_eq!(owned, with_owner(7, 2));
    let stats = db.statistics(owned).unwrap().unwrap();
    assert_eq!(stats.owner, 2);
    assert_eq!(stats.subject, vec![1, 0, 0, 0]);
    assert_eq!(stats.occurrences, 1);
    assert_eq!(db.statistics(7).unwrap(), None);
    assert_eq!(db.owner_load(), vec![0, 0, 1, 0]);

    // Same owner again is a no-op.
    assert_eq!(db.set_owner(owned, 2).unwrap(), owned);
    assert_eq!(db.owner_load(), vec![0, 0, 1, 0]);

    assert!(matches!(
        db.set_owner(owned, 3),
        Err(StatsError::OwnerConflict { owner: 2, .. })
    ));
    assert!(matches!(
        db.increment_object_count(7, 1),
        Err(StatsError::OwnerConflict { resource: 7, owner: 2 })
    ));
    assert!(matches!(
        db.set_owner(8, 4),
        Err(StatsError::InvalidOwner { owner: 4, chunks: 4 })
    ));

    // Nothing recorded yet: only the id changes.
    assert_eq!(db.set_owner(99, 1).unwrap(), with_owner(99, 1));
    assert_eq!(db.owner_load(), vec![0, 0, 1, 0]);

    db.increment_property_count(owned, 3).unwrap();
    assert_eq!(db.statistics(owned).unwrap().unwrap().property, vec![0, 0, 0, 1]);
}

#[test]
fn rejects_out_of_range_chunks_and_owners() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = StatisticsDatabase::open(&config(dir.path(), 4)).unwrap();

    assert!(matches!(
        db.count_quad(1, 2, 3, 4),
        Err(StatsError::InvalidChunk { chunk: 4, chunks: 4 })
    ));
    assert!(matches!(
        db.increment_triples_per_chunk(9),
        Err(StatsError::InvalidChunk { chunk: 9, .. })
    ));
    assert!(matches!(
        db.increment_resource_occurrences(with_owner(1, 5)),
        Err(StatsError::InvalidOwner { owner: 5, .. })
    ));
    assert_eq!(db.statistics(1).unwrap(), None);
    assert_eq!(db.chunk_sizes(), vec![0, 0, 0, 0]);
}

#[test]
fn evicts_partitions_beyond_max_open_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2);
    config.storage.rows_per_file = 8;
    config.storage.max_open_files = 2;
    let mut db = StatisticsDatabase::open(&config).unwrap();

    for resource in 0..40u64 {
        let chunk = (resource % 2) as u16;
        db.increment_subject_count(resource, chunk).unwrap();
        if resource % 2 == 0 {
            db.increment_subject_count(resource, chunk).unwrap();
        }
    }
    assert_eq!(db.space_report().open_partitions, 2);
    assert_eq!(partition_files(dir.path()), 5);

    for resource in 0..40u64 {
        let stats = db.statistics(resource).unwrap().unwrap();
        let expected = if resource % 2 == 0 { vec![2, 0] } else { vec![0, 1] };
        assert_eq!(stats.subject, expected, "resource {resource}");
    }

    let mut seen = Vec::new();
    db.for_each_resource(|stats: ResourceStatistics| seen.push(stats.resource))
        .unwrap();
    assert_eq!(seen, (0..40).collect::<Vec<_>>());
}

#[test]
fn shared_budget_demotes_least_recent_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2);
    // 2 chunks: 31-byte rows, 132 rows per 4092-byte block.
    let budget = 3 * 4092;
    config.space.shared = true;
    config.space.total_bytes = ByteSize(budget);
    let mut db = StatisticsDatabase::open(&config).unwrap();

    for file in 0..6u64 {
        db.increment_object_count(file * 64, 1).unwrap();
    }

    let report = db.space_report();
    assert_eq!(report.open_partitions, 6);
    assert!(report.cached_partitions >= 1);
    assert!(report.cached_partitions <= 3);
    let partitions = report.partitions.unwrap();
    assert_eq!(partitions.budget_bytes, budget);
    assert!(partitions.granted_bytes <= budget);

    for file in 0..6u64 {
        let stats = db.statistics(file * 64).unwrap().unwrap();
        assert_eq!(stats.object, vec![0, 1]);
    }

    assert!(db.make_room(budget).unwrap());
    assert_eq!(db.space_report().cached_partitions, 0);
    db.close().unwrap();

    let mut db = StatisticsDatabase::open(&config).unwrap();
    assert_eq!(db.statistics(5 * 64).unwrap().unwrap().occurrences, 0);
    assert_eq!(db.owner_load(), vec![6, 0]);
}

#[test]
fn remove_statistics_forgets_a_resource() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = StatisticsDatabase::open(&config(dir.path(), 4)).unwrap();
    count_sample(&mut db);

    assert!(db.remove_statistics(4).unwrap());
    assert!(!db.remove_statistics(4).unwrap());
    assert!(!db.remove_statistics(500).unwrap());
    assert_eq!(db.statistics(4).unwrap(), None);
    assert_eq!(db.owner_load(), vec![3, 0, 0, 0]);

    let mut seen = Vec::new();
    db.for_each_resource(|stats| seen.push(stats.resource)).unwrap();
    assert_eq!(seen, vec![1, 2, 3]);
}

#[test]
fn clear_deletes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 4);
    let mut db = StatisticsDatabase::open(&config).unwrap();
    count_sample(&mut db);
    db.increment_subject_count(200, 0).unwrap();
    db.flush().unwrap();
    assert_eq!(partition_files(dir.path()), 2);
    assert!(dir.path().join("statistics.meta").exists());

    db.clear().unwrap();
    assert_eq!(partition_files(dir.path()), 0);
    assert!(!dir.path().join("statistics.meta").exists());
    assert_eq!(db.statistics(1).unwrap(), None);
    assert_eq!(db.chunk_sizes(), vec![0, 0, 0, 0]);
    assert_eq!(db.owner_load(), vec![0, 0, 0, 0]);

    // Still usable afterwards.
    db.increment_subject_count(1, 2).unwrap();
    assert_eq!(db.statistics(1).unwrap().unwrap().subject, vec![0, 0, 1, 0]);
}

#[test]
fn closed_database_rejects_operations() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = StatisticsDatabase::open(&config(dir.path(), 4)).unwrap();
    db.increment_subject_count(1, 0).unwrap();
    db.close().unwrap();
    db.close().unwrap();

    assert!(matches!(
        db.increment_subject_count(1, 0),
        Err(StatsError::Closed)
    ));
    assert!(matches!(db.statistics(1), Err(StatsError::Closed)));
    assert!(matches!(db.flush(), Err(StatsError::Closed)));
}

#[test]
fn reopening_with_a_different_layout_fails() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = StatisticsDatabase::open(&config(dir.path(), 2)).unwrap();
        db.increment_subject_count(1, 0).unwrap();
    }

    let err = StatisticsDatabase::open(&config(dir.path(), 3)).unwrap_err();
    assert!(matches!(
        err,
        StatsError::MetadataMismatch {
            field: "chunks",
            stored: 2,
            configured: 3
        }
    ));

    let mut other = config(dir.path(), 2);
    other.storage.rows_per_file = 128;
    assert!(matches!(
        StatisticsDatabase::open(&other),
        Err(StatsError::MetadataMismatch {
            field: "rows_per_file",
            ..
        })
    ));
}

#[test]
fn space_report_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2);
    config.space.shared = true;
    let mut db = StatisticsDatabase::open(&config).unwrap();
    db.increment_subject_count(1, 1).unwrap();

    let json = serde_json::to_value(db.space_report()).unwrap();
    assert_eq!(json["open_partitions"], 1);
    assert_eq!(json["cached_partitions"], 1);
    assert_eq!(json["partitions"]["granted_bytes"], 4092);
    assert!(json["overflow"]["budget_bytes"].is_u64());

    let unshared_dir = tempfile::tempdir().unwrap();
    config.space.shared = false;
    config.storage.dir = unshared_dir.path().to_path_buf();
    let db = StatisticsDatabase::open(&config).unwrap();
    let json = serde_json::to_value(db.space_report()).unwrap();
    assert!(json["partitions"].is_null());
}
