#![allow(clippy::unwrap_used)]

mod common;

use std::time::{Duration, Instant};

use histoquant_pipeline::diagnostics::{Clock, StageMetrics, process_with_diagnostics};
use histoquant_pipeline::{PipelineConfig, StainPalette, process};

struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

fn near(actual: u32, expected: u32, slack: u32) -> bool {
    actual.abs_diff(expected) <= slack
}

#[test]
fn synthetic_sample_runs_end_to_end() {
    let result = process(
        common::layers(),
        &PipelineConfig::default(),
        &StainPalette::he(),
        Some("synthetic"),
    )
    .unwrap();

    // Mask covers the outlined box exactly.
    let side = u64::from(common::ROI_MAX - common::ROI_MIN + 1);
    assert_eq!(result.area.pixel_count, side * side);
    assert_eq!(result.masked.get_pixel(10, 10).0, [255, 255, 255]);
    assert_eq!(*result.masked.get_pixel(150, 150), common::NUCLEI);

    // One clustered line per drawn grid line.
    for lines in [&result.horizontal, &result.vertical] {
        assert_eq!(lines.len(), common::GRID_LINES.len(), "{lines:?}");
        for (&found, &drawn) in lines.positions().iter().zip(&common::GRID_LINES) {
            assert!(near(found, drawn, 3), "line {found} vs {drawn}");
        }
    }

    // 100 px per 500 um.
    assert!((result.area.microns_per_pixel - 5.0).abs() < 0.1);
    #[allow(clippy::cast_precision_loss)]
    let expected_area = (side * side) as f64 * 25.0;
    assert!((result.area.area_sq_microns / expected_area - 1.0).abs() < 0.05);

    // Three ROI rows by three ROI columns.
    assert_eq!(result.tiles.len(), 9);
    let indices: Vec<usize> = result.tiles.iter().map(|t| t.index).collect();
    assert_eq!(indices, (1..=9).collect::<Vec<_>>());
    for pair in result.tiles.windows(2) {
        let (a, b) = (&pair[0].tile.bbox, &pair[1].tile.bbox);
        assert!((a.y1, a.x1) < (b.y1, b.x1), "tiles are row-major");
    }

    for tile in &result.tiles {
        let seg = tile.segmentation.as_ref().unwrap();
        let sum: f64 = seg.percentages.iter().map(|p| p.percentage).sum();
        assert!((sum - 100.0).abs() < 0.01);
        assert_eq!(seg.percentage_of("Other"), Some(0.0));
    }

    // Left column is all nuclei, right column all cytoplasm.
    let first = result.tiles[0].segmentation.as_ref().unwrap();
    assert!((first.percentage_of("Nuclei").unwrap() - 100.0).abs() < 1e-9);
    let last = result.tiles[2].segmentation.as_ref().unwrap();
    assert!((last.percentage_of("Cytoplasm/Fibrosis/Muscle").unwrap() - 100.0).abs() < 1e-9);
    let middle = result.tiles[1].segmentation.as_ref().unwrap();
    let nuclei = middle.percentage_of("Nuclei").unwrap();
    assert!((40.0..60.0).contains(&nuclei), "middle column nuclei {nuclei}");

    assert_eq!(result.percentage_rows().len(), 9);
}

#[test]
fn audit_artifacts_have_expected_shapes() {
    let result = process(
        common::layers(),
        &PipelineConfig::default(),
        &StainPalette::he(),
        None,
    )
    .unwrap();

    assert_eq!(result.grid_overlay.dimensions(), (common::SIZE, common::SIZE));
    assert_eq!(result.area_overlay.dimensions(), (common::SIZE, common::SIZE));
    // Area overlay draws the ROI outline in red.
    assert_eq!(result.area_overlay.get_pixel(200, common::ROI_MIN).0, [255, 0, 0]);

    // Original, ROI layer and masked image at full height.
    assert_eq!(result.roi_figure.height(), common::SIZE);
    assert!(result.roi_figure.width() > 3 * common::SIZE);

    let comparison = result.comparison();
    assert_eq!(comparison.height(), 400);
    assert!(comparison.width() > 2 * 400);

    let figure = result.tiles[0].figure().unwrap();
    let tile = &result.tiles[0].tile.image;
    assert_eq!(figure.height(), tile.height());
    assert!(figure.width() > 4 * tile.width());
}

#[test]
fn dropping_rasters_keeps_measurements() {
    let mut result = process(
        common::layers(),
        &PipelineConfig::default(),
        &StainPalette::he(),
        None,
    )
    .unwrap();
    let area = result.area;
    let rows = result.percentage_rows();
    let bounds: Vec<_> = result.tiles.iter().map(|t| t.tile.bbox).collect();

    result.drop_images();
    for tile in &mut result.tiles {
        tile.drop_rasters();
    }

    assert_eq!(result.masked.dimensions(), (0, 0));
    assert_eq!(result.roi_figure.dimensions(), (0, 0));
    assert_eq!(result.grid_overlay.dimensions(), (0, 0));
    assert!(result.tiles.iter().all(|t| t.tile.image.is_empty()));
    assert!(
        result
            .tiles
            .iter()
            .filter_map(|t| t.segmentation.as_ref())
            .all(|s| s.labels.is_empty())
    );
    assert_eq!(result.area, area);
    assert_eq!(result.percentage_rows(), rows);
    let kept: Vec<_> = result.tiles.iter().map(|t| t.tile.bbox).collect();
    assert_eq!(kept, bounds);
}

#[test]
fn runs_are_bit_identical() {
    let config = PipelineConfig::default();
    let palette = StainPalette::he();
    let a = process(common::layers(), &config, &palette, None).unwrap();
    let b = process(common::layers(), &config, &palette, None).unwrap();
    assert_eq!(a.mask, b.mask);
    assert_eq!(a.horizontal, b.horizontal);
    assert_eq!(a.vertical, b.vertical);
    assert_eq!(a.area, b.area);
    let bounds = |r: &histoquant_pipeline::SampleResult| {
        r.tiles.iter().map(|t| t.tile.bbox).collect::<Vec<_>>()
    };
    assert_eq!(bounds(&a), bounds(&b));
    assert_eq!(a.percentage_rows(), b.percentage_rows());
    assert_eq!(a, b);
}

#[test]
fn diagnostics_match_plain_run() {
    let config = PipelineConfig::default();
    let palette = StainPalette::he();
    let plain = process(common::layers(), &config, &palette, None).unwrap();
    let (timed, diagnostics) =
        process_with_diagnostics(common::layers(), &config, &palette, None, &StdClock).unwrap();
    assert_eq!(plain, timed);

    assert_eq!(diagnostics.summary.tile_count, 9);
    assert_eq!(diagnostics.summary.roi_pixels, plain.area.pixel_count);
    assert!(matches!(
        diagnostics.tiling.metrics,
        StageMetrics::Tiling { tiles: 9, candidate_cells: 25 }
    ));
    let stage_total: Duration = diagnostics.stages().iter().map(|(_, s)| s.duration).sum();
    assert!(stage_total <= diagnostics.total_duration);
    assert!(diagnostics.report().contains("Segmentation"));
}
