//! PDF rasterization using pdfium (Google's PDF engine).
//!
//! This module wraps pdfium behind a small surface:
//! - Format sniffing so non-PDF input is rejected before anything is written
//! - Fixed-resolution rendering to opaque RGB page buffers
//! - Per-page JPEG output with zero-padded, lexically sortable ordinals
//! - Parallel JPEG encoding via rayon
//!
//! pdfium faults are contained: the document handle is loaded, used and
//! dropped inside one `catch_unwind` region, so a panic while releasing a
//! broken document surfaces as [`ConversionError::CorruptPdf`] instead of
//! escaping the adapter.

use crate::config::{
    ConverterConfig, PageImage, COMPRESSION_QUALITY, IMAGE_EXTENSION, IMAGE_RESOLUTION,
};
use crate::error::{ConversionError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use pdfium_render::prelude::*;
use rayon::prelude::*;
use std::any::Any;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// `%PDF-` header marker.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Readers accept the header anywhere in the first 1024 bytes.
const PDF_HEADER_WINDOW: u64 = 1024;

/// Minimum digits in a page ordinal suffix.
const MIN_ORDINAL_WIDTH: usize = 4;

/// PDF user space is 72 points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// PDF to JPEG rasterizer using pdfium.
pub struct PdfRenderer {
    /// Converter configuration.
    config: ConverterConfig,
    /// Pdfium library instance.
    pdfium: Arc<Pdfium>,
    /// Rayon thread pool for parallel JPEG encoding.
    thread_pool: rayon::ThreadPool,
}

impl PdfRenderer {
    /// Create a new renderer, binding the pdfium shared library.
    pub fn new(config: ConverterConfig) -> Result<Self> {
        config.validate()?;

        let pdfium = Pdfium::new(bind_pdfium(config.pdfium_library_path.as_deref())?);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.render_threads)
            .build()
            .map_err(|e| {
                ConversionError::InvalidConfig(format!("Failed to create thread pool: {}", e))
            })?;

        info!(
            "PDF renderer initialized with {} threads, {} DPI, quality {}",
            config.render_threads, IMAGE_RESOLUTION, COMPRESSION_QUALITY
        );

        Ok(Self {
            config,
            pdfium: Arc::new(pdfium),
            thread_pool,
        })
    }

    /// Rasterize every page of a PDF into memory, in page order.
    pub fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>> {
        let start = Instant::now();
        ensure_pdf(pdf_path)?;

        let pdfium = &self.pdfium;
        let background = self.config.background_color;
        let pages = panic::catch_unwind(AssertUnwindSafe(|| {
            render_document(pdfium, pdf_path, background)
        }))
        .unwrap_or_else(|payload| {
            Err(ConversionError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("pdfium faulted: {}", panic_message(payload.as_ref())),
            })
        })?;

        debug!(
            "Rasterized {} pages from {:?} in {:?}",
            pages.len(),
            pdf_path,
            start.elapsed()
        );

        Ok(pages)
    }

    /// Rasterize a PDF and write one JPEG per page next to `destination`.
    ///
    /// `dir/name.jpg` yields `dir/name-0001.jpg`, `dir/name-0002.jpg`, ...
    /// Returns the written paths in page order.
    pub fn rasterize_to_files(&self, pdf_path: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
        let pages = self.rasterize(pdf_path)?;

        let stem = destination.file_stem().unwrap_or_default();
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let page_count = pages.len();
        let targets: Vec<(PathBuf, PageImage)> = pages
            .into_iter()
            .map(|page| {
                let path = dir.join(page_file_name(stem, page.page_number, page_count));
                (path, page)
            })
            .collect();

        // Names are fixed above, so encoding order does not matter
        let written: Vec<Result<PathBuf>> = self.thread_pool.install(|| {
            targets
                .into_par_iter()
                .map(|(path, page)| {
                    save_jpeg(&page.image, &path)?;
                    Ok(path)
                })
                .collect()
        });

        written.into_iter().collect()
    }
}

/// Bind pdfium, trying the configured directory first.
fn bind_pdfium(configured: Option<&Path>) -> Result<Box<dyn PdfiumLibraryBindings>> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = configured {
        candidates.push(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var(crate::config::PDFIUM_LIB_PATH_ENV) {
        candidates.push(PathBuf::from(dir));
    }
    candidates.extend(["./", "/usr/lib", "/usr/local/lib"].map(PathBuf::from));

    for dir in &candidates {
        match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)) {
            Ok(bindings) => {
                debug!("Bound pdfium from {:?}", dir);
                return Ok(bindings);
            }
            Err(e) => debug!("pdfium not loadable from {:?}: {}", dir, e),
        }
    }

    Pdfium::bind_to_system_library().map_err(|e| {
        ConversionError::PdfiumUnavailable(format!("Failed to load pdfium library: {}", e))
    })
}

/// Load, render and release one document. Runs inside the unwind guard.
fn render_document(
    pdfium: &Pdfium,
    pdf_path: &Path,
    background: (u8, u8, u8),
) -> Result<Vec<PageImage>> {
    let corrupt = |detail: String| ConversionError::CorruptPdf {
        path: pdf_path.to_path_buf(),
        detail,
    };

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| corrupt(format!("Failed to load PDF: {}", e)))?;

    let page_count = document.pages().len() as usize;
    if page_count == 0 {
        return Err(corrupt("document has no pages".to_string()));
    }

    let mut pages = Vec::with_capacity(page_count);
    for (page_idx, page) in document.pages().iter().enumerate() {
        let width = points_to_pixels(page.width().value, IMAGE_RESOLUTION);
        let height = points_to_pixels(page.height().value, IMAGE_RESOLUTION);

        let render_config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| corrupt(format!("Failed to render page {}: {}", page_idx + 1, e)))?;

        let rgba_image: RgbaImage = bitmap.as_image().into_rgba8();
        pages.push(PageImage::new(
            page_idx + 1,
            flatten_alpha(&rgba_image, background),
        ));
    }

    // Released here so a teardown fault is still inside the guard
    drop(document);

    Ok(pages)
}

/// Check that `path` declares a PDF before any rendering or output happens.
///
/// Non-empty content must carry the `%PDF-` marker within its first 1024
/// bytes. An empty file is judged by its extension: an empty `.pdf` is a
/// corrupt PDF, anything else is not a PDF.
pub fn ensure_pdf(path: &Path) -> Result<()> {
    let mut header = Vec::new();
    File::open(path)
        .and_then(|file| file.take(PDF_HEADER_WINDOW).read_to_end(&mut header))
        .map_err(|e| ConversionError::io(path, e))?;

    if header.is_empty() {
        return if has_pdf_extension(path) {
            Err(ConversionError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "file is empty".to_string(),
            })
        } else {
            Err(ConversionError::NotAPdf {
                path: path.to_path_buf(),
            })
        };
    }

    if has_pdf_header(&header) {
        Ok(())
    } else {
        Err(ConversionError::NotAPdf {
            path: path.to_path_buf(),
        })
    }
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    bytes
        .windows(PDF_MAGIC.len())
        .any(|window| window == PDF_MAGIC)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Convert a PDF length in points to pixels at `dpi`.
pub fn points_to_pixels(points: f32, dpi: u32) -> u32 {
    ((points * dpi as f32) / POINTS_PER_INCH).round() as u32
}

/// File name for one page: `<stem>-<ordinal>.jpg`.
///
/// The ordinal is zero-padded to the digit count of `page_count` (at least
/// four), so lexical order matches page order for any page count. The stem
/// is kept byte for byte, including names that are not valid UTF-8.
pub fn page_file_name(
    stem: impl AsRef<OsStr>,
    page_number: usize,
    page_count: usize,
) -> OsString {
    let width = page_count.to_string().len().max(MIN_ORDINAL_WIDTH);
    let mut name = stem.as_ref().to_os_string();
    name.push(format!("-{page_number:0width$}.{IMAGE_EXTENSION}"));
    name
}

/// Blend transparent pixels onto `background` and drop the alpha channel.
pub fn flatten_alpha(image: &RgbaImage, background: (u8, u8, u8)) -> RgbImage {
    let (r, g, b) = background;

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let alpha = pixel[3] as f32 / 255.0;
        if alpha >= 1.0 {
            return image::Rgb([pixel[0], pixel[1], pixel[2]]);
        }
        let inv_alpha = 1.0 - alpha;
        image::Rgb([
            ((pixel[0] as f32 * alpha) + (r as f32 * inv_alpha)) as u8,
            ((pixel[1] as f32 * alpha) + (g as f32 * inv_alpha)) as u8,
            ((pixel[2] as f32 * alpha) + (b as f32 * inv_alpha)) as u8,
        ])
    })
}

/// Encode an RGB image as a JPEG at the fixed quality.
pub fn save_jpeg(image: &RgbImage, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| ConversionError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    JpegEncoder::new_with_quality(&mut writer, COMPRESSION_QUALITY)
        .encode_image(image)
        .map_err(|e| ConversionError::image(path, e))?;

    writer.flush().map_err(|e| ConversionError::io(path, e))?;
    Ok(())
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
