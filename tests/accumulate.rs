//! Populating layers and reading them back: accumulation, materialization,
//! statistics and raster blocks.

use approx::assert_relative_eq;
use histocube::bins::Quantizer;
use histocube::{
    export_block, export_stats_block, populate_block, tally_block_parallel, Accumulator,
    CubeConfig, CubeError, HistoCube, LayerSpec, Materializer, OpenMode, StatKind,
};
use ndarray::{array, Array2};
use rstest::rstest;
use tempfile::TempDir;

fn cube_with(dir: &TempDir, num_features: u64, bins: Vec<i32>) -> HistoCube {
    let mut cube = HistoCube::create(dir.path().join("acc.hcube"), num_features).unwrap();
    cube.create_layer(LayerSpec::builder().name("h").bins(bins).build().unwrap())
        .unwrap();
    cube
}

#[test]
fn five_observations_of_one_feature() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 10, vec![0, 1, 2]);

    let mut acc = Accumulator::new(&mut cube, "h").unwrap();
    for _ in 0..5 {
        acc.observe(3, 0.2).unwrap();
    }
    let stats = acc.finish().unwrap();
    assert_eq!(stats.counted, 5);

    for row in 0..10 {
        let expected = if row == 3 { vec![0, 5, 0] } else { vec![0, 0, 0] };
        assert_eq!(cube.get_row("h", row).unwrap(), expected, "row {row}");
    }
}

#[rstest]
#[case(0.0, 1)]
#[case(0.5, 1)]
#[case(0.51, 2)]
#[case(-0.5, 0)]
#[case(-0.51, 0)]
#[case(1.49, 2)]
fn quantization_picks_bin(#[case] raw: f64, #[case] label: usize) {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 1, vec![0, 1, 2]);

    let mut acc = Accumulator::new(&mut cube, "h").unwrap();
    acc.observe(0, raw).unwrap();
    acc.finish().unwrap();

    let mut expected = vec![0; 3];
    expected[label] = 1;
    assert_eq!(cube.get_row("h", 0).unwrap(), expected);
}

#[test]
fn scale_and_offset_applied() {
    let dir = TempDir::new().unwrap();
    let mut cube = HistoCube::create(dir.path().join("s.hcube"), 2).unwrap();
    cube.create_layer(
        LayerSpec::builder()
            .name("ndvi")
            .bins((-10..=10).collect())
            .scale(10.0)
            .offset(-1.0)
            .build()
            .unwrap(),
    )
    .unwrap();

    let mut acc = Accumulator::new(&mut cube, "ndvi").unwrap();
    // ceil(0.34 * 10 - 1 + 0.5) = ceil(2.9) = 3
    acc.observe_label(1, 0.34).unwrap();
    // ceil(5.0 * 10 - 1 + 0.5) = 50: no such bin
    acc.observe_label(2, 5.0).unwrap();
    let stats = acc.finish().unwrap();
    assert_eq!(stats.unmatched, 1);

    let row = cube.get_row("ndvi", 0).unwrap();
    let pos = cube.layer("ndvi").unwrap().bin_position(3).unwrap();
    assert_eq!(row[pos], 1);
    assert_eq!(row.iter().sum::<u32>(), 1);
    assert_eq!(cube.get_row("ndvi", 1).unwrap().iter().sum::<u32>(), 0);
}

#[test]
fn accumulation_adds_to_stored_counts() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 4, vec![0, 1]);
    cube.set_row("h", 2, &[10, u32::MAX - 1]).unwrap();

    let mut acc = Accumulator::new(&mut cube, "h").unwrap().with_flush_rows(1);
    acc.observe(2, 0.0).unwrap();
    acc.observe(2, 0.0).unwrap();
    acc.observe(2, -1.0).unwrap();
    acc.finish().unwrap();

    // Saturates instead of wrapping.
    assert_eq!(cube.get_row("h", 2).unwrap(), vec![11, u32::MAX]);
}

#[test]
fn dropped_accumulator_flushes() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 4, vec![0, 1]);
    {
        let mut acc = Accumulator::new(&mut cube, "h").unwrap();
        acc.observe(1, 0.0).unwrap();
    }
    assert_eq!(cube.get_row("h", 1).unwrap(), vec![0, 1]);
}

#[test]
fn read_only_cube_refuses_accumulation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("acc.hcube");
    drop(cube_with(&dir, 4, vec![0, 1]));

    let mut cube = HistoCube::open(&path, OpenMode::ReadOnly).unwrap();
    assert!(matches!(
        Accumulator::new(&mut cube, "h"),
        Err(CubeError::ReadOnly)
    ));
    assert!(matches!(
        Materializer::all_bins(&mut cube, "nope"),
        Err(CubeError::UnknownLayer(_))
    ));
}

#[test]
fn parallel_tally_matches_sequential_accumulation() {
    let labels = Array2::from_shape_fn((97, 41), |(r, c)| ((r * 31 + c * 17) % 23) as i64);
    let values = Array2::from_shape_fn((97, 41), |(r, c)| ((r * c) % 7) as f64 * 0.5 - 0.6);
    let bins: Vec<i32> = (0..4).collect();

    let dir = TempDir::new().unwrap();
    let seq_path = dir.path().join("seq.hcube");
    let par_path = dir.path().join("par.hcube");

    let mut seq = HistoCube::create(&seq_path, 20).unwrap();
    seq.create_layer(LayerSpec::builder().name("h").bins(bins.clone()).build().unwrap())
        .unwrap();
    let mut acc = Accumulator::new(&mut seq, "h").unwrap().with_flush_rows(3);
    populate_block(&mut acc, labels.view(), values.view()).unwrap();
    let seq_stats = acc.finish().unwrap();

    let mut par = HistoCube::create(&par_path, 20).unwrap();
    par.create_layer(LayerSpec::builder().name("h").bins(bins.clone()).build().unwrap())
        .unwrap();
    let tally =
        tally_block_parallel(labels.view(), values.view(), &bins, Quantizer::IDENTITY, 20)
            .unwrap();
    let mut acc = Accumulator::new(&mut par, "h").unwrap();
    acc.absorb(tally).unwrap();
    let par_stats = acc.finish().unwrap();

    assert_eq!(seq_stats, par_stats);
    assert_eq!(
        seq.get_rows(0, 20, "h").unwrap(),
        par.get_rows(0, 20, "h").unwrap()
    );
}

#[test]
fn absorb_rejects_foreign_tally() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 4, vec![0, 1]);
    let labels = array![[1i64]];
    let values = array![[0.0f64]];
    let tally =
        tally_block_parallel(labels.view(), values.view(), &[0, 1, 2], Quantizer::IDENTITY, 4)
            .unwrap();

    let mut acc = Accumulator::new(&mut cube, "h").unwrap();
    assert!(matches!(
        acc.absorb(tally),
        Err(CubeError::InvalidLayer { .. })
    ));
}

#[test]
fn materialize_block_of_labels() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 3, vec![10, 20, 30]);
    cube.set_row("h", 0, &[1, 2, 3]).unwrap();
    cube.set_row("h", 2, &[7, 8, 9]).unwrap();

    let labels = array![[1i64, 0, 3], [4, 1, 2]];
    let mut m = Materializer::for_labels(&mut cube, "h", &[30, 10]).unwrap();
    let block = export_block(&mut m, labels.view(), -1.0).unwrap();

    assert_eq!(block.dim(), (2, 2, 3));
    assert_eq!(
        block.index_axis(ndarray::Axis(0), 0),
        array![[3.0f32, -1.0, 9.0], [-1.0, 3.0, 0.0]]
    );
    assert_eq!(
        block.index_axis(ndarray::Axis(0), 1),
        array![[1.0f32, -1.0, 7.0], [-1.0, 1.0, 0.0]]
    );
}

#[test]
fn stats_block_of_labels() {
    let dir = TempDir::new().unwrap();
    let mut cube = cube_with(&dir, 2, vec![0, 10, 20]);
    cube.set_row("h", 0, &[1, 2, 1]).unwrap();

    let labels = array![[1i64, 2]];
    let kinds = [StatKind::Mean, StatKind::StdDev, StatKind::Total, StatKind::Median];
    let block = export_stats_block(&mut cube, "h", &kinds, labels.view(), f32::NAN).unwrap();

    assert_relative_eq!(block[[0, 0, 0]], 10.0);
    assert_relative_eq!(block[[1, 0, 0]], 50.0f32.sqrt());
    assert_relative_eq!(block[[2, 0, 0]], 4.0);
    assert_relative_eq!(block[[3, 0, 0]], 10.0);
    // Feature 2 has an empty histogram.
    assert!(block[[0, 0, 1]].is_nan());
}

#[test]
fn flush_threshold_from_config() {
    let dir = TempDir::new().unwrap();
    let config = CubeConfig::builder().flush_rows(2).build().unwrap();
    let mut cube =
        HistoCube::create_with_config(dir.path().join("f.hcube"), 8, config).unwrap();
    cube.create_layer(LayerSpec::builder().name("h").bins(vec![0]).build().unwrap())
        .unwrap();

    let mut acc = Accumulator::new(&mut cube, "h").unwrap();
    acc.observe(0, -1.0).unwrap();
    // Second buffered row triggers a flush.
    acc.observe(1, -1.0).unwrap();
    acc.observe(1, -1.0).unwrap();
    acc.finish().unwrap();

    assert_eq!(cube.get_rows(0, 2, "h").unwrap(), vec![1, 2]);
}
