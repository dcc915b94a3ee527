//! Error types for PDF to JPEG conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the pdf2jpg library.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The input's content does not declare a PDF.
    #[error("Input file is not a PDF: '{path}'")]
    NotAPdf { path: PathBuf },

    /// pdfium could not decode the document, or faulted while releasing it.
    #[error("PDF '{path}' appears corrupted: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Filesystem failure on a specific path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image decoding or encoding failed.
    #[error("Image error on '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Compositing was asked to stack zero pages.
    #[error("No pages to combine")]
    EmptyPageSet,

    /// The stacked image exceeds what a JPEG can hold.
    #[error("Combined image of {width}x{height} pixels exceeds the JPEG limit of {limit} per side")]
    ImageTooLarge { width: u64, height: u64, limit: u32 },

    /// The pdfium shared library could not be bound.
    #[error("Pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A conversion is already running on this controller.
    #[error("A conversion is already in progress")]
    Busy,

    /// The conversion worker panicked.
    #[error("Conversion worker panicked: {0}")]
    WorkerPanicked(String),

    /// The conversion was dropped before it ran, e.g. on runtime shutdown.
    #[error("Conversion was cancelled before it ran")]
    Cancelled,
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ConversionError>;

/// User-facing failure classes reported by a finished conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    NotAPdf,
    CorruptPdf,
    IoError,
}

impl FailureReason {
    /// Message embedded in the failure dialog.
    pub fn message(&self) -> &'static str {
        match self {
            FailureReason::NotAPdf => "Input file is not a PDF.",
            FailureReason::CorruptPdf => "PDF file appears corrupted.",
            FailureReason::IoError => "The image files could not be read or written.",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl ConversionError {
    /// Fold this error into the three-way taxonomy shown to the user.
    pub fn reason(&self) -> FailureReason {
        match self {
            ConversionError::NotAPdf { .. } => FailureReason::NotAPdf,
            ConversionError::CorruptPdf { .. } => FailureReason::CorruptPdf,
            _ => FailureReason::IoError,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConversionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        ConversionError::Image {
            path: path.into(),
            source,
        }
    }
}
