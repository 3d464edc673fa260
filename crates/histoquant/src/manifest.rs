//! Sample manifests: a JSON list of [`SampleRecord`]s, or a directory
//! tree of rendered layers.
//!
//! Layer paths in a record are relative to the manifest's base
//! directory. A layer tree looks like
//!
//! ```text
//! <base>/Original-Images/<Stain>/<name>.png
//! <base>/ROI-Images/<Stain>/<name> (ROI).png
//! <base>/Grid-Images/<Stain>/<name> (Grid).png
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use histoquant_export::{SampleMetadata, SampleRecord};

pub const ORIGINAL_DIR: &str = "Original-Images";
pub const ROI_DIR: &str = "ROI-Images";
pub const GRID_DIR: &str = "Grid-Images";

/// Records and the directory their paths are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub base: PathBuf,
    pub records: Vec<SampleRecord>,
}

impl Manifest {
    /// Load from a JSON manifest file or discover from a layer tree.
    pub fn load(input: &Path) -> Result<Self, String> {
        if input.is_dir() {
            Self::discover(input)
        } else {
            Self::read_json(input)
        }
    }

    fn read_json(path: &Path) -> Result<Self, String> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read manifest {}: {e}", path.display()))?;
        let records: Vec<SampleRecord> = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse manifest {}: {e}", path.display()))?;
        let base = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        Ok(Self { base, records })
    }

    /// Build one record per original layer under `Original-Images/`.
    ///
    /// ROI and grid layers are not required to exist here; a record
    /// whose companion layer is missing fails later as missing input.
    pub fn discover(base: &Path) -> Result<Self, String> {
        let originals = base.join(ORIGINAL_DIR);
        let mut records = Vec::new();
        for stain_dir in sorted_entries(&originals)? {
            if !stain_dir.is_dir() {
                continue;
            }
            let Some(stain) = file_name(&stain_dir) else {
                continue;
            };
            for file in sorted_entries(&stain_dir)? {
                if !is_png(&file) {
                    continue;
                }
                let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some(metadata) = SampleMetadata::parse_filename(stem) else {
                    log::warn!("skipping {}: unrecognised sample name", file.display());
                    continue;
                };
                if metadata.staining != stain {
                    log::warn!(
                        "{}: staining {:?} differs from directory {stain:?}",
                        file.display(),
                        metadata.staining
                    );
                }
                records.push(record_for(&stain, stem, metadata));
            }
        }
        if records.is_empty() {
            return Err(format!(
                "No sample layers found under {}",
                originals.display()
            ));
        }
        Ok(Self {
            base: base.to_path_buf(),
            records,
        })
    }

    /// Resolve a record path against the base directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.base.join(path)
    }

    /// Copy of `record` with every layer path resolved, so it can be
    /// used as a manifest from any directory.
    pub fn resolved(&self, record: &SampleRecord) -> SampleRecord {
        let absolute = |p: &str| self.resolve(p).display().to_string();
        SampleRecord {
            original: absolute(&record.original),
            roi: absolute(&record.roi),
            grid: absolute(&record.grid),
            ..record.clone()
        }
    }
}

fn record_for(stain: &str, stem: &str, metadata: SampleMetadata) -> SampleRecord {
    let layer = |dir: &str, suffix: &str| format!("{dir}/{stain}/{stem}{suffix}.png");
    SampleRecord {
        sample_id: stem.to_string(),
        metadata,
        original: layer(ORIGINAL_DIR, ""),
        roi: layer(ROI_DIR, " (ROI)"),
        grid: layer(GRID_DIR, " (Grid)"),
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        fs::read_dir(dir).map_err(|e| format!("Failed to read {}: {e}", dir.display()))?;
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()?.to_str().map(str::to_string)
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}
