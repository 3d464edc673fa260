//! Run a synthetic sample through the pipeline and export its tables.

#![allow(clippy::unwrap_used)]

use histoquant_export::{
    ArtifactNames, ArtifactPaths, ImageRow, SampleMetadata, SampleRecord, TileRow, encode_png, image_table,
    read_dpi, tile_table,
};
use histoquant_pipeline::{PipelineConfig, SampleLayers, StainPalette, process};
use image::{Rgb, RgbImage};

const SIZE: u32 = 300;

fn layers() -> SampleLayers {
    let white = Rgb([255, 255, 255]);
    let roi = RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let in_box = (60..=239).contains(&x) && (60..=239).contains(&y);
        let edge = x < 62 || x > 237 || y < 62 || y > 237;
        if in_box && edge { Rgb([0, 0, 0]) } else { white }
    });
    let grid = RgbImage::from_fn(SIZE, SIZE, |x, y| {
        if (x + 50) % 100 < 2 || (y + 50) % 100 < 2 {
            Rgb([20, 20, 20])
        } else {
            white
        }
    });
    let original = RgbImage::from_fn(SIZE, SIZE, |x, _| {
        if x < 150 {
            Rgb([20, 15, 17])
        } else {
            Rgb([72, 36, 16])
        }
    });
    SampleLayers {
        original,
        roi,
        grid,
    }
}

fn record() -> SampleRecord {
    let id = "Control - Week 2 - CD31 - Apex - Animal 5";
    SampleRecord {
        sample_id: id.to_string(),
        metadata: SampleMetadata::parse_filename(id).unwrap(),
        original: format!("Original-Images/{id}.png"),
        roi: format!("ROI-Images/{id}.png"),
        grid: format!("Grid-Images/CD31/{id}.png"),
    }
}

#[test]
fn sample_exports_consistent_tables() {
    let record = record();
    let palette = StainPalette::for_stain(&record.metadata.staining);
    let result = process(layers(), &PipelineConfig::default(), &palette, Some(&record.sample_id)).unwrap();
    assert!(!result.tiles.is_empty());

    let names = ArtifactNames::new(&record.metadata);
    let tile_paths: Vec<String> = result
        .tiles
        .iter()
        .map(|t| format!("Staining-Analysis/CD31/{}", names.tile(t.index)))
        .collect();

    let tiles = TileRow::from_result(&record.metadata, &result, &tile_paths);
    assert_eq!(tiles.len(), result.tiles.len());
    let tile_csv = tile_table(&tiles);
    let mut lines = tile_csv.lines();
    let header = lines.next().unwrap();
    assert!(header.ends_with("CD31_Nuclei_Percentage,CD31_Target_Percentage,CD31_Other_Percentage"));
    assert_eq!(lines.count(), tiles.len());

    let artifacts = ArtifactPaths {
        masked: format!("Staining-Analysis/CD31/{}", names.masked()),
        roi_visualization: format!("Staining-Analysis/CD31/{}", names.roi_visualization()),
        tiles: tile_paths,
    };
    let image = ImageRow::from_result(record, &result, artifacts).unwrap();
    let nuclei = &image.stats[0];
    assert_eq!(nuclei.class, "Nuclei");
    assert!(nuclei.mean > 0.0 && nuclei.mean < 100.0);
    let total: f64 = image.stats.iter().map(|s| s.mean).sum();
    assert!((total - 100.0).abs() < 0.01);

    let image_csv = image_table(&[image]);
    assert!(image_csv.contains("CD31_Target_SD"));
    assert!(image_csv.contains(",ok,"));
    assert!(image_csv.contains("Control_Week2_CD31_Apex_Animal5_masked_visualization.png"));
    assert_eq!(image_csv.lines().count(), 2);
}

#[test]
fn artifacts_encode_with_dpi() {
    let config = PipelineConfig::default();
    let result = process(layers(), &config, &StainPalette::ihc(), None).unwrap();
    for artifact in [
        &result.masked,
        &result.roi_figure,
        &result.grid_overlay,
        &result.area_overlay,
    ] {
        let bytes = encode_png(artifact, config.export_dpi).unwrap();
        assert_eq!(read_dpi(&bytes), Some(250));
    }
    let figure = result.tiles[0].figure().unwrap();
    assert!(read_dpi(&encode_png(&figure, 300).unwrap()) == Some(300));
}
