/// Reader for the sparse model exported by COLMAP.
pub mod colmap;

/// Discovery of the on-disk sequence layout.
pub mod dataset;

/// Plain-text matrix, intrinsics, pose and box readers.
pub mod text;

use std::path::PathBuf;

/// Error types for the io module.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The file or directory does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(PathBuf),

    /// Error reading or writing a file.
    #[error("Error reading {path}: {source}")]
    Read {
        /// Path of the file being read.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// Error walking a directory tree.
    #[error("Error walking directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Error decoding or encoding an image.
    #[error("Image error for {path}: {source}")]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying image error.
        source: image::ImageError,
    },

    /// The content of a file could not be parsed.
    #[error("Parse error in {path}: {message}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A matrix in a file does not have the expected shape.
    #[error("Invalid shape in {path}: expected {expected}, got {rows}x{cols}")]
    InvalidShape {
        /// Path of the offending file.
        path: PathBuf,
        /// Human readable expected shape.
        expected: &'static str,
        /// Number of rows found.
        rows: usize,
        /// Number of columns found in the first row.
        cols: usize,
    },
}

impl IoError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
