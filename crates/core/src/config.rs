//! Configuration and request types for PDF to JPEG conversion.

use crate::error::{ConversionError, FailureReason};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rendering resolution in dots per inch.
pub const IMAGE_RESOLUTION: u32 = 200;

/// JPEG compression quality (1-100).
pub const COMPRESSION_QUALITY: u8 = 99;

/// Extension of every image this library writes.
pub const IMAGE_EXTENSION: &str = "jpg";

/// Prefix a GUI file picker puts in front of local paths.
const FILE_URI_PREFIX: &str = "file://";

/// Environment variable consulted for the pdfium library directory.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Environment configuration for the converter.
///
/// Resolution and quality are not part of it: they are the
/// [`IMAGE_RESOLUTION`] and [`COMPRESSION_QUALITY`] constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Directory containing the pdfium shared library.
    /// If None, `PDFIUM_DYNAMIC_LIB_PATH`, `./`, `/usr/lib`, `/usr/local/lib`
    /// and finally the system search path are tried.
    pub pdfium_library_path: Option<PathBuf>,

    /// Number of threads for parallel JPEG encoding of pages.
    /// Default: number of CPU cores.
    pub render_threads: usize,

    /// Color transparent page areas are flattened onto.
    /// Default: white (255, 255, 255).
    pub background_color: (u8, u8, u8),
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            pdfium_library_path: None,
            render_threads: num_cpus::get(),
            background_color: (255, 255, 255),
        }
    }
}

impl ConverterConfig {
    /// Set the directory the pdfium library is loaded from.
    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pdfium_library_path = Some(path.into());
        self
    }

    /// Set the number of encoding threads.
    pub fn render_threads(mut self, threads: usize) -> Self {
        self.render_threads = threads;
        self
    }

    /// Set the background color.
    pub fn background_color(mut self, color: (u8, u8, u8)) -> Self {
        self.background_color = color;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.render_threads == 0 {
            return Err(crate::error::ConversionError::InvalidConfig(
                "render_threads must be at least 1".to_string(),
            ));
        }
        if let Some(path) = &self.pdfium_library_path {
            if !path.exists() {
                return Err(crate::error::ConversionError::InvalidConfig(format!(
                    "pdfium library path does not exist: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// How the pages of one PDF are written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// One JPEG per page, named with a zero-padded page ordinal.
    SinglePage,
    /// All pages stacked top to bottom in one JPEG.
    Combined,
}

/// A single conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Path to the input PDF.
    pub input_path: PathBuf,

    /// Output layout.
    pub mode: OutputMode,
}

impl ConversionRequest {
    /// Create a request, normalizing a `file://` URI to a plain path.
    pub fn new(input: impl AsRef<str>, mode: OutputMode) -> Self {
        let input = input.as_ref();
        let path = input.strip_prefix(FILE_URI_PREFIX).unwrap_or(input);

        Self {
            input_path: PathBuf::from(path),
            mode,
        }
    }

    /// Create a request from a path that needs no normalization.
    pub fn from_path(input_path: impl Into<PathBuf>, mode: OutputMode) -> Self {
        Self {
            input_path: input_path.into(),
            mode,
        }
    }

    /// Directory the outputs are written to: the input's own directory.
    pub fn output_dir(&self) -> &Path {
        match self.input_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// The input path with its extension replaced by `jpg`.
    pub fn output_path(&self) -> PathBuf {
        self.input_path.with_extension(IMAGE_EXTENSION)
    }
}

/// A rasterized page and its position in the source document.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Page number (1-indexed).
    pub page_number: usize,

    /// Opaque RGB pixels.
    pub image: RgbImage,
}

impl PageImage {
    pub fn new(page_number: usize, image: RgbImage) -> Self {
        Self { page_number, image }
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Result of one conversion, as reported to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Every output was written.
    Success {
        /// Files written, in page order.
        outputs: Vec<PathBuf>,
    },
    /// The conversion stopped; no temporary files remain.
    Failure {
        reason: FailureReason,
        /// Detailed error text for logs.
        message: String,
    },
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success { .. })
    }

    /// The failure class, if this outcome is a failure.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ConversionOutcome::Success { .. } => None,
            ConversionOutcome::Failure { reason, .. } => Some(*reason),
        }
    }
}

impl From<ConversionError> for ConversionOutcome {
    fn from(err: ConversionError) -> Self {
        ConversionOutcome::Failure {
            reason: err.reason(),
            message: err.to_string(),
        }
    }
}
