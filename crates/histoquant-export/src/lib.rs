//! histoquant-export: sample metadata, result tables and PNG artifacts
//! (sans-IO).
//!
//! Everything here turns pipeline results into bytes or strings; the
//! caller decides where they go.

pub mod metadata;
pub mod png;
pub mod table;

pub use metadata::{ArtifactNames, SampleMetadata, SampleRecord, sanitize};
pub use png::{encode_png, read_dpi};
pub use table::{
    ArtifactPaths, ClassStats, ImageRow, SampleStatus, TileRow, class_statistics, image_table,
    tile_table,
};

/// Errors raised while producing export artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    Png(#[from] ::png::EncodingError),

    /// A table row is internally inconsistent.
    #[error("invalid table row: {0}")]
    InvalidRow(String),
}
