//! Sample metadata: parsing layer names, manifest records and artifact
//! file names.
//!
//! Layer base names follow
//! `"<Condition> - Week <N> - <Staining> - <Location> - Animal <N>"`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Experimental metadata of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Experimental condition, e.g. `"Control"`.
    pub condition: String,
    /// Timepoint in weeks.
    pub week: u32,
    /// Staining protocol, e.g. `"HE"` or `"CD31"`.
    pub staining: String,
    /// Anatomical location.
    pub location: String,
    /// Subject number.
    pub animal: u32,
}

impl SampleMetadata {
    /// Parse a layer base name (no extension).
    ///
    /// Returns `None`, with a debug log, for names that do not follow
    /// the naming scheme.
    #[must_use]
    pub fn parse_filename(name: &str) -> Option<Self> {
        let parsed = parse_parts(name.trim());
        if parsed.is_none() {
            log::debug!("{name:?} does not match the sample naming scheme");
        }
        parsed
    }

    /// Base name of the masked image, without extension.
    #[must_use]
    pub fn stem(&self) -> String {
        sanitize(&format!(
            "{}_Week{}_{}_{}_Animal{}",
            self.condition, self.week, self.staining, self.location, self.animal
        ))
    }

    /// File name of the masked image.
    #[must_use]
    pub fn masked_name(&self) -> String {
        format!("{}_masked.png", self.stem())
    }
}

impl fmt::Display for SampleMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Week {} - {} - {} - Animal {}",
            self.condition, self.week, self.staining, self.location, self.animal
        )
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_parts(name: &str) -> Option<SampleMetadata> {
    let (condition, rest) = name.split_once(" - Week ")?;
    let (rest, animal) = rest.rsplit_once(" - Animal ")?;
    let (week, rest) = rest.split_once(" - ")?;
    let (staining, location) = rest.split_once(" - ")?;
    Some(SampleMetadata {
        condition: non_empty(condition)?,
        week: parse_number(week.trim())?,
        staining: non_empty(staining)?,
        location: non_empty(location)?,
        animal: parse_number(animal.trim())?,
    })
}

/// Replace every character other than letters, digits, `_` and `-`
/// with `_`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One manifest entry: a sample, its metadata and its layer files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Unique sample identifier; the layer base name.
    pub sample_id: String,
    /// Parsed metadata.
    #[serde(flatten)]
    pub metadata: SampleMetadata,
    /// Path of the original micrograph layer.
    pub original: String,
    /// Path of the ROI outline layer.
    pub roi: String,
    /// Path of the grid overlay layer.
    pub grid: String,
}

/// File names of every artifact written for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    stem: String,
}

impl ArtifactNames {
    /// Names derived from the sample metadata.
    #[must_use]
    pub fn new(metadata: &SampleMetadata) -> Self {
        Self {
            stem: metadata.stem(),
        }
    }

    /// Masked image.
    #[must_use]
    pub fn masked(&self) -> String {
        format!("{}_masked.png", self.stem)
    }

    /// Original, ROI layer and masked image side by side.
    #[must_use]
    pub fn roi_visualization(&self) -> String {
        format!("{}_masked_visualization.png", self.stem)
    }

    /// Grid-detection overlay.
    #[must_use]
    pub fn grid_detection(&self) -> String {
        format!("{}_grid_detection.png", self.stem)
    }

    /// Area-measurement overlay.
    #[must_use]
    pub fn area_measurement(&self) -> String {
        format!("{}_area_measurement.png", self.stem)
    }

    /// Masked image, grid overlay and tiles side by side.
    #[must_use]
    pub fn comparison(&self) -> String {
        format!("{}_comparison.png", self.stem)
    }

    /// Tile crop; `index` is 1-based.
    #[must_use]
    pub fn tile(&self, index: usize) -> String {
        format!("{} - {index}.png", self.stem)
    }

    /// Segmentation figure of a tile; `index` is 1-based.
    #[must_use]
    pub fn tile_analysis(&self, index: usize) -> String {
        format!("{} - {index}_analysis.png", self.stem)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> SampleMetadata {
        SampleMetadata {
            condition: "Control".to_string(),
            week: 4,
            staining: "HE".to_string(),
            location: "Apex".to_string(),
            animal: 12,
        }
    }

    #[test]
    fn parses_canonical_name() {
        let parsed = SampleMetadata::parse_filename("Control - Week 4 - HE - Apex - Animal 12");
        assert_eq!(parsed, Some(sample()));
    }

    #[test]
    fn location_may_contain_separator() {
        let parsed =
            SampleMetadata::parse_filename("MI + Drug - Week 12 - CD31 - Border - Remote - Animal 3")
                .unwrap();
        assert_eq!(parsed.condition, "MI + Drug");
        assert_eq!(parsed.staining, "CD31");
        assert_eq!(parsed.location, "Border - Remote");
        assert_eq!(parsed.animal, 3);
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "Control - HE - Apex - Animal 1",
            "Control - Week four - HE - Apex - Animal 1",
            "Control - Week 4 - HE - Apex - Animal",
            "Control - Week 4 - HE - Animal 1",
            " - Week 4 - HE - Apex - Animal 1",
            "Control - Week -4 - HE - Apex - Animal 1",
        ] {
            assert_eq!(SampleMetadata::parse_filename(name), None, "{name:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        let text = sample().to_string();
        assert_eq!(SampleMetadata::parse_filename(&text), Some(sample()));
    }

    #[test]
    fn sanitize_replaces_non_word_characters() {
        assert_eq!(sanitize("Cytoplasm/Fibrosis/Muscle"), "Cytoplasm_Fibrosis_Muscle");
        assert_eq!(sanitize("MI + Drug"), "MI___Drug");
        assert_eq!(sanitize("a-b_c9"), "a-b_c9");
    }

    #[test]
    fn artifact_names() {
        let names = ArtifactNames::new(&sample());
        assert_eq!(names.masked(), "Control_Week4_HE_Apex_Animal12_masked.png");
        assert_eq!(sample().masked_name(), names.masked());
        assert_eq!(
            names.roi_visualization(),
            "Control_Week4_HE_Apex_Animal12_masked_visualization.png"
        );
        assert_eq!(names.tile(3), "Control_Week4_HE_Apex_Animal12 - 3.png");
        assert_eq!(
            names.tile_analysis(3),
            "Control_Week4_HE_Apex_Animal12 - 3_analysis.png"
        );
        assert_eq!(
            names.grid_detection(),
            "Control_Week4_HE_Apex_Animal12_grid_detection.png"
        );
    }

    #[test]
    fn record_json_is_flat() {
        let record = SampleRecord {
            sample_id: "Control - Week 4 - HE - Apex - Animal 12".to_string(),
            metadata: sample(),
            original: "Original-Images/a.png".to_string(),
            roi: "ROI-Images/a.png".to_string(),
            grid: "Grid-Images/HE/a.png".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["staining"], "HE");
        assert_eq!(json["week"], 4);
        let back: SampleRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
