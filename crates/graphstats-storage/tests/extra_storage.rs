use graphstats_storage::{
    AccessorOptions, CachePolicy, ExtraStorageAccessor, RowStorage, StorageError,
};

fn options() -> AccessorOptions {
    AccessorOptions {
        block_size: 64,
        file_cache_blocks: 2,
    }
}

fn record(tag: u8) -> Vec<u8> {
    vec![tag; 16]
}

fn open(dir: &std::path::Path, policy: CachePolicy, data: &[u64]) -> ExtraStorageAccessor {
    ExtraStorageAccessor::new(dir.join("extra-0.dat"), 0, 16, policy, options(), data).unwrap()
}

#[test]
fn deleted_ids_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 1 << 16 }, &[]);
    assert!(extra.is_empty());

    let ids: Vec<u64> = (1..=3).map(|tag| extra.write_row(&record(tag)).unwrap()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(extra.read_row(1).unwrap(), Some(record(2)));

    extra.delete_row(1).unwrap();
    assert_eq!(extra.read_row(1).unwrap(), None);
    assert_eq!(extra.write_row(&record(9)).unwrap(), 1);
    assert_eq!(extra.read_row(1).unwrap(), Some(record(9)));
    assert_eq!(extra.read_row(7).unwrap(), None);
}

#[test]
fn double_release_is_reported_as_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 1 << 16 }, &[]);
    let id = extra.write_row(&record(1)).unwrap();
    extra.delete_row(id).unwrap();

    assert!(matches!(
        extra.delete_row(id),
        Err(StorageError::Corruption { file_id: 0, .. })
    ));
    assert!(matches!(
        extra.update_row(id, &record(2)),
        Err(StorageError::RowNotAllocated { row_id: 0, .. })
    ));
}

#[test]
fn allocations_survive_reopen_through_free_space_data() {
    let dir = tempfile::tempdir().unwrap();
    let data = {
        let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 1 << 16 }, &[]);
        for tag in 1..=4 {
            extra.write_row(&record(tag)).unwrap();
        }
        extra.delete_row(2).unwrap();
        extra.update_row(3, &record(40)).unwrap();
        let data = extra.free_space_data();
        extra.close().unwrap();
        data
    };

    let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 1 << 16 }, &data);
    assert_eq!(extra.read_row(0).unwrap(), Some(record(1)));
    assert_eq!(extra.read_row(2).unwrap(), None);
    assert_eq!(extra.read_row(3).unwrap(), Some(record(40)));
    assert_eq!(extra.write_row(&record(5)).unwrap(), 2);
}

#[test]
fn defrag_zeroes_released_rows_so_the_file_can_shrink() {
    let dir = tempfile::tempdir().unwrap();
    let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 0 }, &[]);
    assert!(!extra.is_cached());

    for tag in 1..=12 {
        extra.write_row(&record(tag)).unwrap();
    }
    for id in 8..12 {
        extra.delete_row(id).unwrap();
    }
    assert_eq!(extra.free_space().fragments(), 4);

    assert!(extra.defrag().unwrap());
    assert_eq!(extra.free_space_data(), vec![8]);
    assert!(extra.make_room().unwrap());
    assert_eq!(extra.storage().len_bytes().unwrap(), 128);
    assert_eq!(extra.read_row(7).unwrap(), Some(record(8)));
}

#[test]
fn empty_once_every_row_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let mut extra = open(dir.path(), CachePolicy::Fixed { max_cache_bytes: 1 << 16 }, &[]);
    let a = extra.write_row(&record(1)).unwrap();
    let b = extra.write_row(&record(2)).unwrap();
    extra.delete_row(a).unwrap();
    assert!(!extra.is_empty());
    extra.delete_row(b).unwrap();
    assert!(extra.is_empty());
}

#[test]
fn invalid_free_space_data_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = ExtraStorageAccessor::new(
        dir.path().join("extra-0.dat"),
        0,
        16,
        CachePolicy::Fixed { max_cache_bytes: 0 },
        options(),
        &[3, 1],
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::FreeSpace(_)));
}
