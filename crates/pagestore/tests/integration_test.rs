//! Integration tests for the paging engine.

use pagestore::{
    ConflictPolicy, Data, IndexKey, PageStore, PageStoreConfig, PageStoreError, SeriesInput,
    SeriesSelector, SyncMode,
};
use tempfile::TempDir;

/// Cubic values over an inclusive integer span, as float index and values.
fn cubic(start: i64, stop: i64) -> (Vec<f64>, Vec<f64>) {
    let idx: Vec<f64> = (start..=stop).map(|x| x as f64).collect();
    let rec = idx.iter().map(|x| x * x * x).collect();
    (idx, rec)
}

fn config(max_page_size: usize) -> PageStoreConfig {
    PageStoreConfig::default()
        .with_max_page_size(max_page_size)
        .with_sync_mode(SyncMode::None)
        .with_verify_writes(true)
}

#[test]
fn test_overlapping_batches_keep_stored_values() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = PageStore::open(temp_dir.path(), config(10_000)).unwrap();

    store.store("a", vec![1i64, 2, 3], vec![0.1f64, 0.2, 0.3]).unwrap();
    let report = store
        .store("a", vec![3i64, 4, 5], vec![0.35f64, 0.45, 0.55])
        .unwrap();
    assert_eq!(report.values_displaced, 1);

    let data = store.get_series::<i64, f64>("a", 2..=4).unwrap();
    assert_eq!(data.index(), &[2, 3, 4]);
    assert_eq!(data.values(), &[0.2, 0.3, 0.45]);
}

#[test]
fn test_overlapping_batches_overwrite_policy() {
    let mut store = PageStore::in_memory(
        config(10_000).with_conflict_policy(ConflictPolicy::Overwrite),
    );

    store.store("a", vec![1i64, 2, 3], vec![0.1f64, 0.2, 0.3]).unwrap();
    store
        .store("a", vec![3i64, 4, 5], vec![0.35f64, 0.45, 0.55])
        .unwrap();

    let data = store.get_series::<i64, f64>("a", 2..=4).unwrap();
    assert_eq!(data.values(), &[0.2, 0.35, 0.45]);
}

#[test]
fn test_overlapping_batches_single_page() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = PageStore::open(temp_dir.path(), config(10_000)).unwrap();

    let (idx, rec) = cubic(0, 10);
    store.store("cubic", idx, rec).unwrap();
    let (idx, rec) = cubic(5, 15);
    store.store("cubic", idx, rec).unwrap();

    assert_eq!(store.count_pages("cubic"), 1);
    let page = store.catalog().first_page("cubic").unwrap();
    assert_eq!(page.begin, IndexKey::Float(0.0));
    assert_eq!(page.end, IndexKey::Float(15.0));
    assert_eq!(page.count, 16);
    assert_eq!(store.count_records("cubic"), 16);
    store.verify().unwrap();
}

#[test]
fn test_overlapping_batches_small_pages() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = PageStore::open(temp_dir.path(), config(100)).unwrap();

    let (idx, rec) = cubic(0, 10);
    store.store("cubic", idx, rec).unwrap();
    let (idx, rec) = cubic(5, 15);
    store.store("cubic", idx, rec).unwrap();

    assert_eq!(store.count_pages("cubic"), 2);
    for page in store.catalog().pages_for("cubic") {
        assert!(page.size <= 100);
    }
    store.verify().unwrap();

    let data = store.get_series::<f64, f64>("cubic", ..).unwrap();
    let (expected_idx, expected_rec) = cubic(0, 15);
    assert_eq!(data.index(), expected_idx.as_slice());
    assert_eq!(data.values(), expected_rec.as_slice());
}

#[test]
fn test_reopen_preserves_pages() {
    let temp_dir = TempDir::new().unwrap();
    let expected_pages;
    {
        let mut store = PageStore::open(temp_dir.path(), config(64)).unwrap();
        let idx: Vec<u64> = (0..40).collect();
        let rec: Vec<i32> = (0..40).map(|x| x * 2).collect();
        store.store("counter", idx, rec).unwrap();
        expected_pages = store.count_pages("counter");
        assert!(expected_pages > 1);
    }

    let store = PageStore::open(temp_dir.path(), config(64)).unwrap();
    assert_eq!(store.count_pages("counter"), expected_pages);
    assert_eq!(store.count_records("counter"), 40);
    store.verify().unwrap();

    let data = store.get_series::<u64, i32>("counter", 10..20).unwrap();
    assert_eq!(data.len(), 10);
    assert_eq!(data.values()[0], 20);
}

#[test]
fn test_store_batch_and_selectors() {
    let mut store = PageStore::in_memory(config(10_000));

    let report = store
        .store_batch([
            ("cpu.load", SeriesInput::from((vec![1i64, 2, 3], vec![0.5f64, 0.6, 0.7]))),
            ("cpu.temp", SeriesInput::from((vec![2i64, 3], vec![55.0f64, 56.0]))),
            (
                "mem.used",
                SeriesInput::from(Data::new("ignored", vec![1i64, 9], vec![0.1f64, 0.9]).unwrap()),
            ),
        ])
        .unwrap();
    assert_eq!(report.points_received, 7);
    assert_eq!(report.pages_created, 3);

    assert_eq!(store.search("cpu.%"), vec!["cpu.load", "cpu.temp"]);
    assert_eq!(store.search("___.used"), vec!["mem.used"]);
    assert_eq!(store.search("CPU%"), Vec::<String>::new());
    assert_eq!(store.count_pages_all(), 3);
    assert_eq!(store.count_records_all(), 7);

    let by_pattern = store.get::<i64, f64>("cpu.%", 1..=2).unwrap();
    assert_eq!(by_pattern.len(), 2);
    assert_eq!(by_pattern["cpu.load"].values(), &[0.5, 0.6]);
    assert_eq!(by_pattern["cpu.temp"].values(), &[55.0]);

    // Series with nothing in range are left out.
    let by_names = store
        .get::<i64, f64>(
            SeriesSelector::Names(vec![
                "mem.used".to_string(),
                "cpu.temp".to_string(),
                "missing".to_string(),
            ]),
            5..,
        )
        .unwrap();
    assert_eq!(by_names.keys().collect::<Vec<_>>(), vec!["mem.used"]);
    assert_eq!(by_names["mem.used"].name(), "mem.used");
    assert_eq!(by_names["mem.used"].index(), &[9]);
}

#[test]
fn test_string_values_split_by_size() {
    let mut store = PageStore::in_memory(config(32));
    let idx: Vec<i64> = (0..20).collect();
    let rec: Vec<String> = idx.iter().map(|i| format!("event-{i:03}")).collect();
    store.store("log", idx, rec.clone()).unwrap();

    assert!(store.count_pages("log") > 1);
    store.verify().unwrap();
    let data = store.get_series::<i64, String>("log", ..).unwrap();
    assert_eq!(data.values(), rec.as_slice());
}

#[test]
fn test_length_mismatch_rejected() {
    let mut store = PageStore::in_memory(config(10_000));
    let err = store.store("a", vec![1i64, 2], vec![1.0f64]).unwrap_err();
    assert!(matches!(err, PageStoreError::LengthMismatch { index: 2, values: 1 }));
    assert_eq!(store.count_pages_all(), 0);
}

#[test]
fn test_verify_detects_missing_segment() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = PageStore::open(temp_dir.path(), config(10_000)).unwrap();
    store.store("a", vec![1i64, 2, 3], vec![1.0f64, 2.0, 3.0]).unwrap();
    store.verify().unwrap();

    let values = store.storage().segment_path(0, "rec");
    std::fs::remove_file(values).unwrap();
    assert!(store.verify().is_err());
}

#[test]
fn test_oversized_name_rejected_and_store_reopens() {
    let temp_dir = TempDir::new().unwrap();
    let longest = "n".repeat(65_535);
    {
        let mut store = PageStore::open(temp_dir.path(), config(10_000)).unwrap();
        let err = store
            .store(&"n".repeat(70_000), vec![1i64, 2], vec![1.0f64, 2.0])
            .unwrap_err();
        assert!(matches!(err, PageStoreError::NameTooLong { len: 70_000, .. }));
        assert_eq!(store.count_pages_all(), 0);

        store.store(&longest, vec![1i64, 2], vec![1.0f64, 2.0]).unwrap();
        store.store("short", vec![1i64], vec![3.0f64]).unwrap();
        store.verify().unwrap();
    }

    let store = PageStore::open(temp_dir.path(), config(10_000)).unwrap();
    store.verify().unwrap();
    assert_eq!(store.count_pages_all(), 2);
    assert_eq!(
        store.get_series::<i64, f64>(&longest, ..).unwrap().values(),
        &[1.0, 2.0]
    );
}

#[test]
fn test_delete_store_removes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("pages");
    let mut store = PageStore::open(&root, config(16)).unwrap();
    let idx: Vec<i64> = (0..10).collect();
    store.store("a", idx, vec![1.0f64; 10]).unwrap();
    assert!(root.join(&store.config().catalog_file).exists());

    store.delete_store().unwrap();
    assert!(!root.exists());
}
