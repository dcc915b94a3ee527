//! Vertical stacking of rendered pages into a single image.

use crate::config::PageImage;
use crate::error::{ConversionError, Result};
use image::{imageops, RgbImage};
use tracing::debug;

/// Largest width or height a baseline JPEG can record.
pub const MAX_JPEG_DIMENSION: u32 = u16::MAX as u32;

/// Stack pages top to bottom in the order given.
///
/// The canvas is as wide as the widest page and as tall as all pages
/// together. Every page is pasted at x = 0, so narrower pages stay
/// left-aligned over the (black) canvas; nothing is scaled.
///
/// A canvas that could not be written as a JPEG is rejected before any
/// pixels are allocated.
pub fn composite(pages: &[PageImage]) -> Result<PageImage> {
    if pages.is_empty() {
        return Err(ConversionError::EmptyPageSet);
    }

    let (width, height) = match combined_dimensions(pages) {
        (w, h) if w <= u64::from(MAX_JPEG_DIMENSION) && h <= u64::from(MAX_JPEG_DIMENSION) => {
            (w as u32, h as u32)
        }
        (w, h) => {
            return Err(ConversionError::ImageTooLarge {
                width: w,
                height: h,
                limit: MAX_JPEG_DIMENSION,
            })
        }
    };
    debug!(
        "Compositing {} pages onto a {}x{} canvas",
        pages.len(),
        width,
        height
    );

    let mut canvas = RgbImage::new(width, height);
    let mut offset: i64 = 0;
    for page in pages {
        imageops::replace(&mut canvas, &page.image, 0, offset);
        offset += i64::from(page.height());
    }

    Ok(PageImage::new(1, canvas))
}

/// Width is the maximum page width, height the sum of page heights.
pub fn combined_dimensions(pages: &[PageImage]) -> (u64, u64) {
    let width = pages.iter().map(PageImage::width).max().unwrap_or(0);
    let height = pages.iter().map(|page| u64::from(page.height())).sum();
    (u64::from(width), height)
}
