//! Image-level and tile-level result tables as CSV text.
//!
//! Per-class columns are named `<Stain>_<Class>_Percentage` and
//! `<Stain>_<Class>_SD`, with the class name passed through
//! [`sanitize`]. Image rows of different stains carry different class
//! columns; the image table holds the union, in first-seen order, and
//! leaves cells of other stains empty.

use std::borrow::Cow;
use std::fmt::Write;

use histoquant_pipeline::{AreaMeasurement, BoundingBox, ErrorKind, SampleResult};

use crate::ExportError;
use crate::metadata::{SampleMetadata, SampleRecord, sanitize};

/// Column name of a class percentage.
#[must_use]
pub fn percentage_column(stain: &str, class: &str) -> String {
    format!("{}_{}_Percentage", sanitize(stain), sanitize(class))
}

/// Column name of a class standard deviation.
#[must_use]
pub fn sd_column(stain: &str, class: &str) -> String {
    format!("{}_{}_SD", sanitize(stain), sanitize(class))
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn write_row<'a>(out: &mut String, fields: impl IntoIterator<Item = Cow<'a, str>>) {
    let row: Vec<Cow<'a, str>> = fields.into_iter().collect();
    let _ = writeln!(
        out,
        "{}",
        row.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
    );
}

fn number(value: f64) -> Cow<'static, str> {
    Cow::Owned(value.to_string())
}

/// Mean and sample standard deviation of one class over a sample's
/// tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassStats {
    /// Class name from the palette.
    pub class: String,
    /// Mean tile percentage.
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator); 0 for one tile.
    pub sd: f64,
}

#[allow(clippy::cast_precision_loss)]
fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Per-class statistics over tile percentage rows.
///
/// `rows` holds one row per segmented tile with one value per class,
/// in `classes` order. Returns an empty list when there are no rows.
///
/// # Errors
///
/// Returns [`ExportError::InvalidRow`] if a row length differs from the
/// class count.
pub fn class_statistics(classes: &[String], rows: &[Vec<f64>]) -> Result<Vec<ClassStats>, ExportError> {
    if let Some(bad) = rows.iter().find(|r| r.len() != classes.len()) {
        return Err(ExportError::InvalidRow(format!(
            "{} percentages for {} classes",
            bad.len(),
            classes.len()
        )));
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    Ok(classes
        .iter()
        .enumerate()
        .map(|(i, class)| {
            let values: Vec<f64> = rows.iter().map(|r| r[i]).collect();
            let (mean, sd) = mean_and_sd(&values);
            ClassStats {
                class: class.clone(),
                mean,
                sd,
            }
        })
        .collect())
}

/// Outcome of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleStatus {
    /// All stages succeeded.
    Ok,
    /// The sample was skipped.
    Failed {
        /// Error category.
        kind: ErrorKind,
        /// Human-readable reason.
        reason: String,
    },
}

impl SampleStatus {
    fn label(&self) -> String {
        match self {
            Self::Ok => "ok".to_string(),
            Self::Failed { kind, reason } => format!("{kind}: {reason}"),
        }
    }
}

/// Written artifact paths of one sample, relative to the output
/// directory. Empty for skipped samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Masked image.
    pub masked: String,
    /// ROI-process figure.
    pub roi_visualization: String,
    /// Tile crops in row-major order.
    pub tiles: Vec<String>,
}

/// One row of the image table.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRow {
    /// The manifest record.
    pub record: SampleRecord,
    /// Outcome.
    pub status: SampleStatus,
    /// Area measurement, for successful samples.
    pub area: Option<AreaMeasurement>,
    /// Written artifacts.
    pub artifacts: ArtifactPaths,
    /// Per-class statistics.
    pub stats: Vec<ClassStats>,
}

impl ImageRow {
    /// Row of a successful sample.
    ///
    /// # Errors
    ///
    /// Propagates [`class_statistics`] errors.
    pub fn from_result(
        record: SampleRecord,
        result: &SampleResult,
        artifacts: ArtifactPaths,
    ) -> Result<Self, ExportError> {
        let classes: Vec<String> = result.palette.class_names().map(str::to_string).collect();
        let stats = class_statistics(&classes, &result.percentage_rows())?;
        Ok(Self {
            record,
            status: SampleStatus::Ok,
            area: Some(result.area),
            artifacts,
            stats,
        })
    }

    /// Row of a skipped sample.
    #[must_use]
    pub const fn failed(record: SampleRecord, kind: ErrorKind, reason: String) -> Self {
        Self {
            record,
            status: SampleStatus::Failed { kind, reason },
            area: None,
            artifacts: ArtifactPaths {
                masked: String::new(),
                roi_visualization: String::new(),
                tiles: Vec::new(),
            },
            stats: Vec::new(),
        }
    }

    fn class_cells(&self) -> Vec<(String, f64)> {
        let stain = &self.record.metadata.staining;
        self.stats
            .iter()
            .flat_map(|s| {
                [
                    (percentage_column(stain, &s.class), s.mean),
                    (sd_column(stain, &s.class), s.sd),
                ]
            })
            .collect()
    }
}

const IMAGE_COLUMNS: [&str; 16] = [
    "SampleID",
    "Condition",
    "Week",
    "Staining",
    "Location",
    "Animal",
    "OriginalPath",
    "RoiPath",
    "GridPath",
    "MaskedPath",
    "RoiVisualizationPath",
    "ROIArea_sq_microns",
    "MicronsPerPixel",
    "TileCount",
    "TilePaths",
    "Status",
];

fn union_columns<'a>(cells: impl Iterator<Item = &'a [(String, f64)]>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in cells {
        for (name, _) in row {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn metadata_cells(m: &SampleMetadata) -> [Cow<'_, str>; 5] {
    [
        Cow::Borrowed(m.condition.as_str()),
        Cow::Owned(m.week.to_string()),
        Cow::Borrowed(m.staining.as_str()),
        Cow::Borrowed(m.location.as_str()),
        Cow::Owned(m.animal.to_string()),
    ]
}

/// Render the image table.
#[must_use]
pub fn image_table(rows: &[ImageRow]) -> String {
    let cells: Vec<Vec<(String, f64)>> = rows.iter().map(ImageRow::class_cells).collect();
    let class_columns = union_columns(cells.iter().map(Vec::as_slice));

    let mut out = String::new();
    write_row(
        &mut out,
        IMAGE_COLUMNS
            .iter()
            .map(|c| Cow::Borrowed(*c))
            .chain(class_columns.iter().map(|c| Cow::Borrowed(c.as_str()))),
    );

    for (row, row_cells) in rows.iter().zip(&cells) {
        let r = &row.record;
        let mut fields: Vec<Cow<'_, str>> = vec![Cow::Borrowed(r.sample_id.as_str())];
        fields.extend(metadata_cells(&r.metadata));
        fields.extend([
            Cow::Borrowed(r.original.as_str()),
            Cow::Borrowed(r.roi.as_str()),
            Cow::Borrowed(r.grid.as_str()),
            Cow::Borrowed(row.artifacts.masked.as_str()),
            Cow::Borrowed(row.artifacts.roi_visualization.as_str()),
        ]);
        match &row.area {
            Some(area) => {
                fields.push(number(area.area_sq_microns));
                fields.push(number(area.microns_per_pixel));
            }
            None => fields.extend([Cow::Borrowed(""), Cow::Borrowed("")]),
        }
        fields.push(Cow::Owned(row.artifacts.tiles.len().to_string()));
        fields.push(Cow::Owned(row.artifacts.tiles.join(";")));
        fields.push(Cow::Owned(row.status.label()));
        for column in &class_columns {
            let value = row_cells.iter().find(|(name, _)| name == column);
            fields.push(value.map_or(Cow::Borrowed(""), |(_, v)| number(*v)));
        }
        write_row(&mut out, fields);
    }
    out
}

/// One row of the tile table.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRow {
    /// Sample metadata.
    pub metadata: SampleMetadata,
    /// 1-based tile index.
    pub index: usize,
    /// Tile bounds in the masked image.
    pub bbox: BoundingBox,
    /// Written tile path.
    pub path: String,
    /// `(column name, percentage)` per class.
    pub percentages: Vec<(String, f64)>,
}

impl TileRow {
    /// Rows for every segmented tile of a sample. `tile_paths` is
    /// indexed like `result.tiles`.
    #[must_use]
    pub fn from_result(
        metadata: &SampleMetadata,
        result: &SampleResult,
        tile_paths: &[String],
    ) -> Vec<Self> {
        result
            .tiles
            .iter()
            .zip(tile_paths)
            .filter_map(|(tile, path)| {
                let seg = tile.segmentation.as_ref()?;
                Some(Self {
                    metadata: metadata.clone(),
                    index: tile.index,
                    bbox: tile.tile.bbox,
                    path: path.clone(),
                    percentages: seg
                        .percentages
                        .iter()
                        .map(|p| (percentage_column(&metadata.staining, &p.name), p.percentage))
                        .collect(),
                })
            })
            .collect()
    }
}

const TILE_COLUMNS: [&str; 11] = [
    "Animal",
    "Condition",
    "Week",
    "Location",
    "Staining",
    "TileIndex",
    "Y1",
    "Y2",
    "X1",
    "X2",
    "TilePath",
];

/// Render the tile table.
#[must_use]
pub fn tile_table(rows: &[TileRow]) -> String {
    let class_columns = union_columns(rows.iter().map(|r| r.percentages.as_slice()));

    let mut out = String::new();
    write_row(
        &mut out,
        TILE_COLUMNS
            .iter()
            .map(|c| Cow::Borrowed(*c))
            .chain(class_columns.iter().map(|c| Cow::Borrowed(c.as_str()))),
    );

    for row in rows {
        let m = &row.metadata;
        let b = &row.bbox;
        let mut fields: Vec<Cow<'_, str>> = vec![
            Cow::Owned(m.animal.to_string()),
            Cow::Borrowed(m.condition.as_str()),
            Cow::Owned(m.week.to_string()),
            Cow::Borrowed(m.location.as_str()),
            Cow::Borrowed(m.staining.as_str()),
            Cow::Owned(row.index.to_string()),
        ];
        fields.extend([b.y1, b.y2, b.x1, b.x2].map(|v| Cow::Owned(v.to_string())));
        fields.push(Cow::Borrowed(row.path.as_str()));
        for column in &class_columns {
            let value = row.percentages.iter().find(|(name, _)| name == column);
            fields.push(value.map_or(Cow::Borrowed(""), |(_, v)| number(*v)));
        }
        write_row(&mut out, fields);
    }
    out
}
