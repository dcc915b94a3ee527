//! # pdf2jpg-core
//!
//! PDF to JPEG conversion library.
//!
//! This library turns a PDF into JPEG images using:
//!
//! - **pdfium** (Google's PDF engine) for rasterization at a fixed 200 DPI
//! - **image** for JPEG encoding at quality 99 and page stitching
//! - **rayon** for parallel page encoding
//! - **tokio** for running conversions off the caller's thread
//!
//! Each PDF is written either as one JPEG per page
//! ([`OutputMode::SinglePage`]) or as one tall JPEG with the pages stacked
//! top to bottom ([`OutputMode::Combined`]), next to the input file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2jpg_core::{ConversionRequest, Converter, ConverterConfig, OutputMode};
//!
//! fn main() -> pdf2jpg_core::Result<()> {
//!     let converter = Converter::new(ConverterConfig::default())?;
//!
//!     let request = ConversionRequest::new("report.pdf", OutputMode::Combined);
//!     let outcome = converter.convert(&request);
//!
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Driving a GUI
//!
//! ```rust,no_run
//! use pdf2jpg_core::{Controller, Converter, ConverterConfig, OutputMode};
//!
//! #[tokio::main]
//! async fn main() -> pdf2jpg_core::Result<()> {
//!     let converter = Converter::new(ConverterConfig::default())?;
//!     let controller = Controller::new(converter, tokio::runtime::Handle::current());
//!
//!     let mut busy = controller.subscribe_in_progress();
//!     controller.start("file:///home/me/report.pdf", OutputMode::SinglePage)?;
//!
//!     busy.wait_for(|in_progress| !*in_progress).await.ok();
//!     println!("{}: {}", controller.dialog_title(), controller.dialog_text());
//!     Ok(())
//! }
//! ```

pub mod compositor;
pub mod config;
pub mod controller;
pub mod converter;
pub mod error;
pub mod pdf_renderer;

// Re-export main types for convenience
pub use config::{
    ConversionOutcome, ConversionRequest, ConverterConfig, OutputMode, PageImage,
    COMPRESSION_QUALITY, IMAGE_EXTENSION, IMAGE_RESOLUTION,
};
pub use controller::{ConversionBackend, Controller, ControllerSnapshot};
pub use converter::Converter;
pub use error::{ConversionError, FailureReason, Result};
pub use pdf_renderer::PdfRenderer;

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
