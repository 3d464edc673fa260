//! Tissue-class colour palettes per staining protocol.
//!
//! Each class is represented by a few RGB anchors sampled from stained
//! sections (dark, medium and light variants of the same tissue). Pixels
//! are later assigned to the class whose nearest anchor is closest.

use serde::{Deserialize, Serialize};

/// One tissue class and its representative colours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TissueClass {
    /// Display name, e.g. `"Nuclei"`.
    pub name: String,
    /// RGB anchors, at least one.
    pub anchors: Vec<[u8; 3]>,
}

impl TissueClass {
    fn new(name: &str, anchors: &[[u8; 3]]) -> Self {
        Self {
            name: name.to_string(),
            anchors: anchors.to_vec(),
        }
    }
}

/// Ordered tissue classes for one staining protocol.
///
/// Class order is significant: it defines label indices and breaks
/// distance ties in favour of the earlier class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StainPalette {
    /// Palette name (`"HE"`, `"Trichrome"`, `"Movats"`, `"IHC"`, or a
    /// custom name).
    pub name: String,
    /// Classes in label order.
    pub classes: Vec<TissueClass>,
}

/// Immunohistochemistry markers analysed with the generic IHC palette.
pub const IHC_MARKERS: [&str; 6] = ["CD31", "CD68", "FSP1", "Desmin", "Laminin", "Collagen"];

impl StainPalette {
    /// Hematoxylin and eosin.
    #[must_use]
    pub fn he() -> Self {
        Self {
            name: "HE".to_string(),
            classes: vec![
                TissueClass::new("Nuclei", &[[81, 44, 109], [130, 82, 132], [165, 127, 175]]),
                TissueClass::new(
                    "Cytoplasm/Fibrosis/Muscle",
                    &[[136, 41, 73], [209, 83, 145], [239, 170, 216]],
                ),
                TissueClass::new("Other", &[[210, 149, 191], [235, 140, 198], [245, 235, 243]]),
            ],
        }
    }

    /// Masson's trichrome.
    #[must_use]
    pub fn trichrome() -> Self {
        Self {
            name: "Trichrome".to_string(),
            classes: vec![
                TissueClass::new(
                    "Nuclei/Cytoplasm",
                    &[[106, 44, 60], [142, 59, 75], [209, 160, 172]],
                ),
                TissueClass::new("Fibrosis", &[[102, 98, 114], [151, 131, 145], [190, 200, 211]]),
                TissueClass::new("Muscle", &[[115, 14, 15], [147, 49, 63], [180, 97, 111]]),
                TissueClass::new("Other", &[[214, 193, 205], [236, 234, 239], [242, 233, 239]]),
            ],
        }
    }

    /// Movat's pentachrome.
    #[must_use]
    pub fn movats() -> Self {
        Self {
            name: "Movats".to_string(),
            classes: vec![
                TissueClass::new("Nuclei/Elastin", &[[20, 3, 10], [44, 20, 39], [89, 44, 59]]),
                TissueClass::new("Fibrosis", &[[70, 30, 39], [144, 95, 82], [189, 168, 177]]),
                TissueClass::new(
                    "Muscle/Cytoplasm",
                    &[[57, 10, 19], [108, 27, 31], [147, 82, 99]],
                ),
                TissueClass::new("Other", &[[161, 130, 140], [213, 185, 191], [243, 237, 237]]),
            ],
        }
    }

    /// Generic DAB immunohistochemistry.
    #[must_use]
    pub fn ihc() -> Self {
        Self {
            name: "IHC".to_string(),
            classes: vec![
                TissueClass::new("Nuclei", &[[20, 15, 17], [129, 123, 142], [214, 205, 212]]),
                TissueClass::new("Target", &[[72, 36, 16], [166, 139, 125], [234, 196, 170]]),
                TissueClass::new("Other", &[[191, 188, 190], [229, 221, 220], [241, 235, 234]]),
            ],
        }
    }

    /// Every built-in palette.
    #[must_use]
    pub fn builtin() -> Vec<Self> {
        vec![Self::he(), Self::trichrome(), Self::movats(), Self::ihc()]
    }

    /// Palette for a staining protocol name.
    ///
    /// `HE`, `Trichrome`, `Movats` and `IHC` map to their own palettes;
    /// the markers in [`IHC_MARKERS`] use the IHC palette. Any other
    /// stain also falls back to IHC, with a warning.
    #[must_use]
    pub fn for_stain(stain: &str) -> Self {
        match stain {
            "HE" => Self::he(),
            "Trichrome" => Self::trichrome(),
            "Movats" => Self::movats(),
            "IHC" => Self::ihc(),
            s if IHC_MARKERS.contains(&s) => Self::ihc(),
            other => {
                log::warn!("no palette for stain {other:?}; using IHC colors");
                Self::ihc()
            }
        }
    }

    /// Class names in label order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.name.as_str())
    }

    /// Check that the palette can classify pixels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`](crate::PipelineError::InvalidConfig)
    /// if there are no classes, a class has no anchors, there are more
    /// classes than labels can address, or two classes share a name.
    pub fn validate(&self) -> Result<(), crate::PipelineError> {
        let invalid = |msg: String| Err(crate::PipelineError::InvalidConfig(msg));
        if self.classes.is_empty() {
            return invalid(format!("palette {} has no classes", self.name));
        }
        if i16::try_from(self.classes.len()).is_err() {
            return invalid(format!("palette {} has too many classes", self.name));
        }
        if let Some(class) = self.classes.iter().find(|c| c.anchors.is_empty()) {
            return invalid(format!(
                "class {} of palette {} has no anchors",
                class.name, self.name
            ));
        }
        for (i, class) in self.classes.iter().enumerate() {
            if self.classes[..i].iter().any(|c| c.name == class.name) {
                return invalid(format!(
                    "class {} appears twice in palette {}",
                    class.name, self.name
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_palettes_are_valid() {
        for palette in StainPalette::builtin() {
            palette.validate().unwrap();
            assert!(palette.classes.iter().all(|c| c.anchors.len() == 3));
        }
    }

    #[test]
    fn stain_lookup() {
        assert_eq!(StainPalette::for_stain("HE").name, "HE");
        assert_eq!(StainPalette::for_stain("Trichrome").classes.len(), 4);
        assert_eq!(StainPalette::for_stain("Movats").classes[0].name, "Nuclei/Elastin");
        for marker in IHC_MARKERS {
            assert_eq!(StainPalette::for_stain(marker), StainPalette::ihc());
        }
    }

    #[test]
    fn unknown_stain_falls_back_to_ihc() {
        assert_eq!(StainPalette::for_stain("Tubulin"), StainPalette::ihc());
    }

    #[test]
    fn he_anchor_values() {
        let he = StainPalette::he();
        assert_eq!(he.classes[0].anchors[0], [81, 44, 109]);
        assert_eq!(he.classes[2].anchors[2], [245, 235, 243]);
        assert_eq!(
            he.class_names().collect::<Vec<_>>(),
            vec!["Nuclei", "Cytoplasm/Fibrosis/Muscle", "Other"]
        );
    }

    #[test]
    fn invalid_palettes_are_rejected() {
        let mut palette = StainPalette::ihc();
        palette.classes[1].anchors.clear();
        assert!(palette.validate().is_err());

        let mut palette = StainPalette::ihc();
        palette.classes[2].name = "Nuclei".to_string();
        assert!(palette.validate().is_err());

        let empty = StainPalette {
            name: "Empty".to_string(),
            classes: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn palette_json_round_trip() {
        let json = serde_json::to_string(&StainPalette::movats()).unwrap();
        let back: StainPalette = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StainPalette::movats());
    }
}
