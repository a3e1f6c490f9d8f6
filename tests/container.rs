//! Container behaviour through the public API: round trips, reopen, bounds.

use chrono::NaiveDate;
use histocube::{Codec, CubeConfig, CubeError, HistoCube, LayerSpec, OpenMode};
use rstest::rstest;
use tempfile::TempDir;

fn spec(name: &str, bins: Vec<i32>) -> LayerSpec {
    LayerSpec::builder()
        .name(name)
        .bins(bins)
        .build()
        .expect("valid spec")
}

fn config(codec: Codec, level: u32, shuffle: bool) -> CubeConfig {
    CubeConfig::builder()
        .codec(codec)
        .compression_level(level)
        .shuffle(shuffle)
        .chunk_rows(16)
        .cache_chunks(2)
        .build()
        .expect("valid config")
}

#[rstest]
#[case::deflate(Codec::Deflate, 1, true)]
#[case::deflate_max(Codec::Deflate, 9, false)]
#[case::stored(Codec::None, 0, true)]
fn rows_survive_reopen(#[case] codec: Codec, #[case] level: u32, #[case] shuffle: bool) {
    assert_roundtrip(codec, level, shuffle);
}

#[cfg(feature = "zstd")]
#[test]
fn rows_survive_reopen_zstd() {
    assert_roundtrip(Codec::Zstd, 3, true);
}

fn assert_roundtrip(codec: Codec, level: u32, shuffle: bool) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.hcube");

    {
        let mut cube =
            HistoCube::create_with_config(&path, 100, config(codec, level, shuffle)).unwrap();
        cube.create_layer(spec("slope", vec![0, 5, 10, 15])).unwrap();
        cube.set_row("slope", 0, &[1, 2, 3, 4]).unwrap();
        cube.set_row("slope", 99, &[u32::MAX, 0, 7, 1]).unwrap();
        // Spans several chunks and more than the cache holds.
        let block: Vec<u32> = (0..40 * 4).collect();
        cube.set_rows(30, 70, "slope", &block).unwrap();
        cube.close().unwrap();
    }

    let mut cube = HistoCube::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(cube.feature_count(), 100);
    assert_eq!(cube.get_row("slope", 0).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(cube.get_row("slope", 99).unwrap(), vec![u32::MAX, 0, 7, 1]);
    assert_eq!(cube.get_row("slope", 50).unwrap(), vec![80, 81, 82, 83]);
    assert_eq!(cube.get_row("slope", 12).unwrap(), vec![0, 0, 0, 0]);
    assert_eq!(
        cube.get_rows(30, 70, "slope").unwrap(),
        (0..40 * 4).collect::<Vec<u32>>()
    );
}

#[test]
fn layer_metadata_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.hcube");
    let ts = NaiveDate::from_ymd_opt(2018, 3, 14)
        .unwrap()
        .and_hms_milli_opt(9, 26, 53, 589)
        .unwrap();

    {
        let mut cube = HistoCube::create(&path, 10).unwrap();
        cube.create_layer(spec("a", vec![1, 2])).unwrap();
        cube.create_layer(
            LayerSpec::builder()
                .name("b")
                .bins(vec![-5, 0, 5])
                .scale(0.5)
                .offset(-2.0)
                .has_timestamp(true)
                .timestamp(ts)
                .build()
                .unwrap(),
        )
        .unwrap();
        // Timestamp is dropped when the flag is off.
        cube.create_layer(
            LayerSpec::builder()
                .name("c")
                .bins(vec![9])
                .timestamp(ts)
                .build()
                .unwrap(),
        )
        .unwrap();
    }

    let cube = HistoCube::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(cube.layer_names(), vec!["a", "b", "c"]);

    let b = cube.layer("b").unwrap();
    assert_eq!(b.order, 2);
    assert_eq!(b.bins, vec![-5, 0, 5]);
    assert_eq!(b.scale, 0.5);
    assert_eq!(b.offset, -2.0);
    assert_eq!(b.timestamp, Some(ts));
    assert_eq!(cube.layer("c").unwrap().timestamp, None);
}

#[test]
fn layers_can_be_added_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.hcube");
    {
        let mut cube = HistoCube::create(&path, 5).unwrap();
        cube.create_layer(spec("first", vec![0, 1])).unwrap();
        cube.set_row("first", 4, &[3, 3]).unwrap();
    }
    {
        let mut cube = HistoCube::open(&path, OpenMode::ReadWrite).unwrap();
        let meta = cube.create_layer(spec("second", vec![7])).unwrap();
        assert_eq!(meta.order, 2);
        cube.set_row("second", 0, &[11]).unwrap();
        cube.close().unwrap();
    }

    let mut cube = HistoCube::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(cube.get_row("first", 4).unwrap(), vec![3, 3]);
    assert_eq!(cube.get_row("second", 0).unwrap(), vec![11]);
}

#[test]
fn duplicate_layer_keeps_original_data() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 4).unwrap();
    cube.create_layer(spec("x", vec![0, 1, 2])).unwrap();
    cube.set_row("x", 1, &[4, 5, 6]).unwrap();

    let err = cube.create_layer(spec("x", vec![0])).unwrap_err();
    assert!(matches!(err, CubeError::DuplicateLayer(ref n) if n == "x"));
    assert_eq!(cube.layers().len(), 1);
    assert_eq!(cube.layer("x").unwrap().num_bins(), 3);
    assert_eq!(cube.get_row("x", 1).unwrap(), vec![4, 5, 6]);
}

#[test]
fn row_bounds_leave_data_untouched() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 4).unwrap();
    cube.create_layer(spec("x", vec![0, 1])).unwrap();
    cube.set_row("x", 3, &[1, 1]).unwrap();

    for row in [4, 5, u64::MAX] {
        assert!(matches!(
            cube.set_row("x", row, &[9, 9]),
            Err(CubeError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            cube.get_row("x", row),
            Err(CubeError::RowOutOfRange { .. })
        ));
    }
    assert!(matches!(
        cube.set_row("x", 3, &[9, 9, 9]),
        Err(CubeError::BufferLength { expected: 2, actual: 3 })
    ));
    assert!(matches!(
        cube.get_row("nope", 0),
        Err(CubeError::UnknownLayer(_))
    ));
    assert_eq!(cube.get_row("x", 3).unwrap(), vec![1, 1]);
}

#[rstest]
#[case::empty(2, 2)]
#[case::reversed(3, 1)]
#[case::past_end(2, 5)]
fn invalid_ranges_rejected(#[case] start: u64, #[case] end: u64) {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 4).unwrap();
    cube.create_layer(spec("x", vec![0, 1])).unwrap();

    let len = end.saturating_sub(start) as usize * 2;
    assert!(matches!(
        cube.set_rows(start, end, "x", &vec![1; len]),
        Err(CubeError::InvalidRowRange { .. })
    ));
    assert!(matches!(
        cube.get_rows(start, end, "x"),
        Err(CubeError::InvalidRowRange { .. })
    ));
    assert_eq!(cube.get_rows(0, 4, "x").unwrap(), vec![0; 8]);
}

#[test]
fn range_may_end_at_feature_count() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 4).unwrap();
    cube.create_layer(spec("x", vec![0, 1])).unwrap();

    cube.set_rows(2, 4, "x", &[1, 2, 3, 4]).unwrap();
    assert_eq!(cube.get_rows(0, 4, "x").unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
}

#[test]
fn set_rows_checks_buffer_before_writing() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 4).unwrap();
    cube.create_layer(spec("x", vec![0, 1, 2])).unwrap();

    assert!(matches!(
        cube.set_rows(0, 2, "x", &[1, 2, 3, 4]),
        Err(CubeError::BufferNotMultiple { len: 4, num_bins: 3 })
    ));
    assert!(matches!(
        cube.set_rows(0, 2, "x", &[1, 2, 3]),
        Err(CubeError::BufferLength { expected: 6, actual: 3 })
    ));
    assert_eq!(cube.get_rows(0, 4, "x").unwrap(), vec![0; 12]);
}

#[test]
fn create_truncates_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.hcube");
    {
        let mut cube = HistoCube::create(&path, 4).unwrap();
        cube.create_layer(spec("old", vec![0])).unwrap();
    }
    drop(HistoCube::create(&path, 8).unwrap());

    let cube = HistoCube::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(cube.feature_count(), 8);
    assert!(cube.layers().is_empty());
}

#[test]
fn repack_copies_live_data() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src.hcube");
    let dst = dir.path().join("dst.hcube");

    let mut cube = HistoCube::create(&src, 50).unwrap();
    cube.create_layer(spec("x", vec![0, 1])).unwrap();
    for round in 0..5u32 {
        cube.set_row("x", 10, &[round, round]).unwrap();
        cube.flush().unwrap();
    }
    assert!(matches!(cube.repack_into(&src), Err(CubeError::Create { .. })));

    let mut copy = cube.repack_into(&dst).unwrap();
    assert_eq!(copy.get_row("x", 10).unwrap(), vec![4, 4]);
    copy.close().unwrap();
    cube.close().unwrap();

    let src_len = std::fs::metadata(&src).unwrap().len();
    let dst_len = std::fs::metadata(&dst).unwrap().len();
    assert!(dst_len < src_len, "{dst_len} >= {src_len}");
}

#[test]
fn cache_stats_count_hits() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("cube.hcube"), 10).unwrap();
    cube.create_layer(spec("x", vec![0])).unwrap();

    cube.get_row("x", 0).unwrap();
    cube.get_row("x", 1).unwrap();
    let stats = cube.cache_stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}
