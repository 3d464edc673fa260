//! Batch processing of a manifest on the rayon pool.
//!
//! Every sample runs in isolation: read layers, run the pipeline, write
//! artifacts. A failure or panic in one sample is recorded in its report
//! and never affects the others.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use histoquant_export::{
    ArtifactNames, ArtifactPaths, ExportError, ImageRow, SampleRecord, TileRow, encode_png, image_table,
    sanitize, tile_table,
};
use histoquant_pipeline::diagnostics::{Clock, PipelineDiagnostics, process_with_diagnostics};
use histoquant_pipeline::overlay::palette_swatch;
use histoquant_pipeline::{
    ErrorKind, PipelineConfig, PipelineError, SampleLayers, SampleResult, StainPalette,
};
use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;

use crate::manifest::Manifest;

/// Image-level table, one row per record.
pub const IMAGE_TABLE: &str = "metadata.csv";
/// Tile-level table across every stain.
pub const ALL_TILES_TABLE: &str = "all_tile_data.csv";
/// Re-runnable manifest of the failed records.
pub const FAILED_MANIFEST: &str = "failed.json";

const SWATCH_CLASS_WIDTH: u32 = 120;
const SWATCH_HEIGHT: u32 = 60;

/// Settings shared by every sample of a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub config: PipelineConfig,
    /// Overrides the per-stain palette lookup.
    pub palette: Option<StainPalette>,
    /// Suppress per-sample progress lines.
    pub quiet: bool,
}

/// Why one sample was skipped.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SampleError {
    const fn kind(&self) -> ErrorKind {
        match self {
            Self::Pipeline(e) => e.kind(),
            Self::Export(_) | Self::Write { .. } => ErrorKind::ComputationError,
        }
    }
}

/// Rows and timings of a processed sample.
#[derive(Debug)]
struct Processed {
    row: ImageRow,
    tiles: Vec<TileRow>,
    diagnostics: PipelineDiagnostics,
}

#[derive(Debug)]
struct SampleReport {
    record: SampleRecord,
    outcome: Result<Processed, SampleError>,
}

/// One failed sample in the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub sample_id: String,
    pub file: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Outcome of every sample of one staining protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StainSummary {
    pub staining: String,
    pub palette: String,
    pub succeeded: usize,
    pub failures: Vec<Failure>,
    /// Mean seconds per pipeline stage over the successful samples.
    pub mean_stage_seconds: Vec<(String, f64)>,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub output_dir: PathBuf,
    pub stains: Vec<StainSummary>,
}

impl BatchSummary {
    /// Number of failed samples across every stain.
    pub fn failed(&self) -> usize {
        self.stains.iter().map(|s| s.failures.len()).sum()
    }

    /// Number of successful samples across every stain.
    pub fn succeeded(&self) -> usize {
        self.stains.iter().map(|s| s.succeeded).sum()
    }

    /// Human-readable summary.
    pub fn report(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Batch summary\n{}", "=".repeat(60));
        for stain in &self.stains {
            let _ = writeln!(
                out,
                "{:<16} {:>4} ok {:>4} failed  (palette {})",
                stain.staining,
                stain.succeeded,
                stain.failures.len(),
                stain.palette
            );
            for (name, seconds) in &stain.mean_stage_seconds {
                let _ = writeln!(out, "    {name:<20} {:>10.3}ms", seconds * 1000.0);
            }
            for failure in &stain.failures {
                let _ = writeln!(
                    out,
                    "    {}: {}: {}",
                    failure.file, failure.kind, failure.reason
                );
            }
        }
        let _ = writeln!(out, "{}", "-".repeat(60));
        let _ = writeln!(
            out,
            "Total: {} ok, {} failed. Results in {}",
            self.succeeded(),
            self.failed(),
            self.output_dir.display()
        );
        out
    }
}

/// Process every record of `manifest` and write tables and artifacts
/// below `options.output_dir`.
///
/// Only batch-level I/O failures (creating the output directory,
/// writing tables) are returned as errors.
pub fn run<C: Clock + Sync>(
    manifest: &Manifest,
    options: &BatchOptions,
    clock: &C,
) -> Result<BatchSummary, String> {
    fs::create_dir_all(&options.output_dir).map_err(|e| {
        format!(
            "Failed to create output directory {}: {e}",
            options.output_dir.display()
        )
    })?;

    let palettes = palettes_by_stain(&manifest.records, options.palette.as_ref());
    let processed_count = AtomicUsize::new(0);
    let total = manifest.records.len();

    let reports: Vec<SampleReport> = manifest
        .records
        .par_iter()
        .map(|record| {
            let palette = &palettes[&record.metadata.staining];
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                process_record(manifest, record, palette, options, clock)
            }))
            .unwrap_or_else(|payload| {
                Err(PipelineError::Computation(format!("panic: {}", panic_message(&*payload))).into())
            });

            let count = processed_count.fetch_add(1, Ordering::SeqCst) + 1;
            match &outcome {
                Ok(processed) => {
                    if !options.quiet {
                        eprintln!(
                            "[{count}/{total}] {} ({:.2}s)",
                            record.sample_id,
                            processed.diagnostics.total_duration.as_secs_f64()
                        );
                    }
                }
                Err(e) => {
                    log::warn!("{}: {e}", record.sample_id);
                    if !options.quiet {
                        eprintln!("[{count}/{total}] {} FAILED", record.sample_id);
                    }
                }
            }
            SampleReport {
                record: record.clone(),
                outcome,
            }
        })
        .collect();

    write_tables(manifest, &reports, &palettes, options)?;
    Ok(summarize(&reports, &palettes, &options.output_dir))
}

fn palettes_by_stain(
    records: &[SampleRecord],
    custom: Option<&StainPalette>,
) -> BTreeMap<String, StainPalette> {
    let mut palettes = BTreeMap::new();
    for record in records {
        let stain = &record.metadata.staining;
        if !palettes.contains_key(stain) {
            let palette = custom
                .cloned()
                .unwrap_or_else(|| StainPalette::for_stain(stain));
            palettes.insert(stain.clone(), palette);
        }
    }
    palettes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn read_layer(manifest: &Manifest, path: &str) -> Result<Vec<u8>, PipelineError> {
    let resolved = manifest.resolve(path);
    fs::read(&resolved)
        .map_err(|e| PipelineError::MissingInput(format!("{}: {e}", resolved.display())))
}

fn process_record<C: Clock>(
    manifest: &Manifest,
    record: &SampleRecord,
    palette: &StainPalette,
    options: &BatchOptions,
    clock: &C,
) -> Result<Processed, SampleError> {
    let layers = SampleLayers::decode(
        &read_layer(manifest, &record.original)?,
        &read_layer(manifest, &record.roi)?,
        &read_layer(manifest, &record.grid)?,
    )?;
    let (mut result, diagnostics) = process_with_diagnostics(
        layers,
        &options.config,
        palette,
        Some(&record.sample_id),
        clock,
    )?;
    log::debug!("{}\n{}", record.sample_id, diagnostics.report());

    let artifacts = write_artifacts(record, &mut result, options)?;
    let tiles = TileRow::from_result(&record.metadata, &result, &artifacts.tiles);
    let row = ImageRow::from_result(record.clone(), &result, artifacts)?;
    Ok(Processed {
        row,
        tiles,
        diagnostics,
    })
}

fn stain_dir_name(staining: &str) -> String {
    sanitize(staining)
}

fn write_png(dir: &Path, name: &str, image: &RgbImage, dpi: u32) -> Result<(), SampleError> {
    let bytes = encode_png(image, dpi)?;
    let path = dir.join(name);
    fs::write(&path, bytes).map_err(|source| SampleError::Write { path, source })
}

/// Write every raster artifact of a sample and release each raster once
/// it is on disk. Returned paths are relative to the output directory.
fn write_artifacts(
    record: &SampleRecord,
    result: &mut SampleResult,
    options: &BatchOptions,
) -> Result<ArtifactPaths, SampleError> {
    let subdir = stain_dir_name(&record.metadata.staining);
    let dir = options.output_dir.join(&subdir);
    fs::create_dir_all(&dir).map_err(|source| SampleError::Write {
        path: dir.clone(),
        source,
    })?;
    let dpi = options.config.export_dpi;
    let names = ArtifactNames::new(&record.metadata);

    write_png(&dir, &names.masked(), &result.masked, dpi)?;
    write_png(&dir, &names.roi_visualization(), &result.roi_figure, dpi)?;
    write_png(&dir, &names.grid_detection(), &result.grid_overlay, dpi)?;
    write_png(&dir, &names.area_measurement(), &result.area_overlay, dpi)?;
    write_png(&dir, &names.comparison(), &result.comparison(), dpi)?;
    result.drop_images();

    let mut tiles = Vec::with_capacity(result.tiles.len());
    for tile in &mut result.tiles {
        let name = names.tile(tile.index);
        write_png(&dir, &name, &tile.tile.image, dpi)?;
        if let Some(figure) = tile.figure() {
            write_png(&dir, &names.tile_analysis(tile.index), &figure, dpi)?;
        }
        tile.drop_rasters();
        tiles.push(format!("{subdir}/{name}"));
    }
    Ok(ArtifactPaths {
        masked: format!("{subdir}/{}", names.masked()),
        roi_visualization: format!("{subdir}/{}", names.roi_visualization()),
        tiles,
    })
}

fn write_text(path: &Path, contents: &str) -> Result<(), String> {
    fs::write(path, contents).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

fn write_tables(
    manifest: &Manifest,
    reports: &[SampleReport],
    palettes: &BTreeMap<String, StainPalette>,
    options: &BatchOptions,
) -> Result<(), String> {
    let output_dir = options.output_dir.as_path();
    let rows: Vec<ImageRow> = reports
        .iter()
        .map(|report| match &report.outcome {
            Ok(processed) => processed.row.clone(),
            Err(e) => ImageRow::failed(report.record.clone(), e.kind(), e.to_string()),
        })
        .collect();
    write_text(&output_dir.join(IMAGE_TABLE), &image_table(&rows))?;

    let mut all_tiles = Vec::new();
    for (stain, palette) in palettes {
        let tiles: Vec<TileRow> = reports
            .iter()
            .filter(|r| &r.record.metadata.staining == stain)
            .filter_map(|r| r.outcome.as_ref().ok())
            .flat_map(|p| p.tiles.iter().cloned())
            .collect();
        let name = format!("{}_tile_data.csv", stain_dir_name(stain));
        write_text(&output_dir.join(name), &tile_table(&tiles))?;
        all_tiles.extend(tiles);

        let dir = output_dir.join(stain_dir_name(stain));
        if dir.is_dir() {
            let swatch = palette_swatch(palette, SWATCH_CLASS_WIDTH, SWATCH_HEIGHT);
            let path = dir.join(format!("{}_palette.png", sanitize(&palette.name)));
            let bytes = encode_png(&swatch, options.config.export_dpi)
                .map_err(|e| format!("Failed to encode {}: {e}", path.display()))?;
            fs::write(&path, bytes)
                .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
        }
    }
    write_text(&output_dir.join(ALL_TILES_TABLE), &tile_table(&all_tiles))?;

    let failed: Vec<SampleRecord> = reports
        .iter()
        .filter(|r| r.outcome.is_err())
        .map(|r| manifest.resolved(&r.record))
        .collect();
    let failed_path = output_dir.join(FAILED_MANIFEST);
    if failed.is_empty() {
        if failed_path.exists() {
            fs::remove_file(&failed_path)
                .map_err(|e| format!("Failed to remove {}: {e}", failed_path.display()))?;
        }
    } else {
        let json = serde_json::to_string_pretty(&failed)
            .map_err(|e| format!("Failed to serialize failed records: {e}"))?;
        write_text(&failed_path, &json)?;
    }
    Ok(())
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

#[allow(clippy::cast_precision_loss)]
fn mean_stage_seconds(diagnostics: &[&PipelineDiagnostics]) -> Vec<(String, f64)> {
    let Some(first) = diagnostics.first() else {
        return Vec::new();
    };
    let n = diagnostics.len() as f64;
    first
        .stages()
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            let sum: Duration = diagnostics.iter().map(|d| d.stages()[i].1.duration).sum();
            ((*name).to_string(), sum.as_secs_f64() / n)
        })
        .collect()
}

fn summarize(
    reports: &[SampleReport],
    palettes: &BTreeMap<String, StainPalette>,
    output_dir: &Path,
) -> BatchSummary {
    let stains = palettes
        .iter()
        .map(|(stain, palette)| {
            let mut diagnostics = Vec::new();
            let mut failures = Vec::new();
            for report in reports.iter().filter(|r| &r.record.metadata.staining == stain) {
                match &report.outcome {
                    Ok(processed) => diagnostics.push(&processed.diagnostics),
                    Err(e) => failures.push(Failure {
                        sample_id: report.record.sample_id.clone(),
                        file: file_label(&report.record.original),
                        kind: e.kind(),
                        reason: e.to_string(),
                    }),
                }
            }
            StainSummary {
                staining: stain.clone(),
                palette: palette.name.clone(),
                succeeded: diagnostics.len(),
                failures,
                mean_stage_seconds: mean_stage_seconds(&diagnostics),
            }
        })
        .collect();
    BatchSummary {
        output_dir: output_dir.to_path_buf(),
        stains,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use histoquant_export::{SampleMetadata, read_dpi};
    use image::Rgb;
    use std::time::Instant;
    use tempfile::tempdir;

    struct TestClock;

    impl Clock for TestClock {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn elapsed(&self, since: &Instant) -> Duration {
            since.elapsed()
        }
    }

    const SIZE: u32 = 300;
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    fn roi() -> RgbImage {
        RgbImage::from_fn(SIZE, SIZE, |x, y| {
            let in_box = (60..=239).contains(&x) && (60..=239).contains(&y);
            let edge = x < 62 || x > 237 || y < 62 || y > 237;
            if in_box && edge { Rgb([0, 0, 0]) } else { WHITE }
        })
    }

    fn grid() -> RgbImage {
        RgbImage::from_fn(SIZE, SIZE, |x, y| {
            if (x + 50) % 100 < 2 || (y + 50) % 100 < 2 {
                Rgb([20, 20, 20])
            } else {
                WHITE
            }
        })
    }

    fn original() -> RgbImage {
        RgbImage::from_fn(SIZE, SIZE, |x, _| {
            if x < 150 {
                Rgb([81, 44, 109])
            } else {
                Rgb([136, 41, 73])
            }
        })
    }

    fn record(id: &str) -> SampleRecord {
        SampleRecord {
            sample_id: id.to_string(),
            metadata: SampleMetadata::parse_filename(id).unwrap(),
            original: format!("{id}.png"),
            roi: format!("{id} (ROI).png"),
            grid: format!("{id} (Grid).png"),
        }
    }

    fn save(dir: &Path, name: &str, image: &RgbImage) {
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn batch_isolates_failures() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let good = record("Control - Week 1 - HE - Apex - Animal 1");
        let missing = record("Control - Week 1 - HE - Apex - Animal 2");
        let blank = record("MI - Week 1 - CD31 - Apex - Animal 3");

        save(input.path(), &good.original, &original());
        save(input.path(), &good.roi, &roi());
        save(input.path(), &good.grid, &grid());
        save(input.path(), &missing.original, &original());
        save(input.path(), &missing.roi, &roi());
        save(input.path(), &blank.original, &original());
        save(input.path(), &blank.roi, &RgbImage::from_pixel(SIZE, SIZE, WHITE));
        save(input.path(), &blank.grid, &grid());

        let manifest = Manifest {
            base: input.path().to_path_buf(),
            records: vec![good.clone(), missing.clone(), blank.clone()],
        };
        let options = BatchOptions {
            output_dir: output.path().to_path_buf(),
            config: PipelineConfig::default(),
            palette: None,
            quiet: true,
        };
        let summary = run(&manifest, &options, &TestClock).unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        let stains: Vec<&str> = summary.stains.iter().map(|s| s.staining.as_str()).collect();
        assert_eq!(stains, ["CD31", "HE"]);

        let cd31 = &summary.stains[0];
        assert_eq!(cd31.palette, "IHC");
        assert_eq!(cd31.failures[0].kind, ErrorKind::DegenerateGeometry);
        assert!(cd31.mean_stage_seconds.is_empty());

        let he = &summary.stains[1];
        assert_eq!(he.succeeded, 1);
        assert_eq!(he.failures.len(), 1);
        assert_eq!(he.failures[0].kind, ErrorKind::MissingInput);
        assert_eq!(he.failures[0].file, missing.original);
        assert_eq!(he.mean_stage_seconds.len(), 5);

        let names = ArtifactNames::new(&good.metadata);
        let he_dir = output.path().join("HE");
        let masked = fs::read(he_dir.join(names.masked())).unwrap();
        assert_eq!(read_dpi(&masked), Some(250));
        assert!(he_dir.join(names.comparison()).is_file());
        let figure = image::load_from_memory(
            &fs::read(he_dir.join(names.roi_visualization())).unwrap(),
        )
        .unwrap();
        // Original, ROI layer and masked image at full height.
        assert_eq!(figure.height(), SIZE);
        assert_eq!(figure.width(), 3 * SIZE + 2 * (SIZE / 20));
        assert!(he_dir.join(names.tile(1)).is_file());
        assert!(he_dir.join(names.tile_analysis(1)).is_file());
        assert!(he_dir.join("HE_palette.png").is_file());

        let table = fs::read_to_string(output.path().join(IMAGE_TABLE)).unwrap();
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("HE_Nuclei_Percentage"));
        assert!(table.contains(&format!("HE/{}", names.roi_visualization())));
        assert!(table.contains(&format!("HE/{}", names.masked())));
        let tiles = fs::read_to_string(output.path().join("HE_tile_data.csv")).unwrap();
        assert_eq!(tiles.lines().count(), 1 + 4);
        let all = fs::read_to_string(output.path().join(ALL_TILES_TABLE)).unwrap();
        assert_eq!(all.lines().count(), 1 + 4);

        let failed: Vec<SampleRecord> = serde_json::from_str(
            &fs::read_to_string(output.path().join(FAILED_MANIFEST)).unwrap(),
        )
        .unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].sample_id, missing.sample_id);
        assert_eq!(PathBuf::from(&failed[0].grid), input.path().join(&missing.grid));

        let report = summary.report();
        assert!(report.contains("missing input"));
        assert!(report.contains("Total: 1 ok, 2 failed"));
    }

    #[test]
    fn custom_palette_applies_to_every_stain() {
        let records = [
            record("Control - Week 1 - HE - Apex - Animal 1"),
            record("Control - Week 1 - Movats - Apex - Animal 1"),
        ];
        let custom = StainPalette::trichrome();
        let palettes = palettes_by_stain(&records, Some(&custom));
        assert_eq!(palettes.len(), 2);
        assert!(palettes.values().all(|p| p == &custom));

        let lookup = palettes_by_stain(&records, None);
        assert_eq!(lookup["HE"].name, "HE");
        assert_eq!(lookup["Movats"].name, "Movats");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = catch_unwind(|| -> u8 { std::panic::panic_any("boom") }).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom");
        let caught = catch_unwind(|| -> u8 { std::panic::panic_any(String::from("bang")) }).unwrap_err();
        assert_eq!(panic_message(&*caught), "bang");
        let caught = catch_unwind(|| -> u8 { std::panic::panic_any(7_u8) }).unwrap_err();
        assert_eq!(panic_message(&*caught), "unknown panic");
    }
}
