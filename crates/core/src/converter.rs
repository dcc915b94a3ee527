//! Conversion orchestrator tying the PDF renderer and compositor together.
//!
//! One call to [`Converter::convert`] turns one PDF into either one JPEG per
//! page or a single tall JPEG. Every failure is folded into a
//! [`ConversionOutcome`]; nothing escapes as a panic or a process exit.

use crate::compositor;
use crate::config::{
    ConversionOutcome, ConversionRequest, ConverterConfig, OutputMode, PageImage,
};
use crate::controller::ConversionBackend;
use crate::error::{ConversionError, Result};
use crate::pdf_renderer::{panic_message, save_jpeg, PdfRenderer};
use std::ffi::{OsStr, OsString};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Converts PDFs to JPEG images.
pub struct Converter {
    /// pdfium-backed rasterizer.
    renderer: PdfRenderer,
}

impl Converter {
    /// Create a new converter with the given configuration.
    pub fn new(config: ConverterConfig) -> Result<Self> {
        let renderer = PdfRenderer::new(config)?;
        Ok(Self { renderer })
    }

    /// Convert one PDF, never panicking.
    pub fn convert(&self, request: &ConversionRequest) -> ConversionOutcome {
        let start = Instant::now();
        info!("Converting {:?} ({:?})", request.input_path, request.mode);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.try_convert(request)))
            .unwrap_or_else(|payload| {
                Err(ConversionError::WorkerPanicked(panic_message(
                    payload.as_ref(),
                )))
            });

        match result {
            Ok(outputs) => {
                info!(
                    "Converted {:?} to {} file(s) in {:?}",
                    request.input_path,
                    outputs.len(),
                    start.elapsed()
                );
                ConversionOutcome::Success { outputs }
            }
            Err(e) => {
                error!("Failed to convert {:?}: {}", request.input_path, e);
                e.into()
            }
        }
    }

    /// Convert one PDF, returning the written files in page order.
    pub fn try_convert(&self, request: &ConversionRequest) -> Result<Vec<PathBuf>> {
        let output_path = request.output_path();

        match request.mode {
            OutputMode::SinglePage => self
                .renderer
                .rasterize_to_files(&request.input_path, &output_path),
            OutputMode::Combined => {
                self.convert_combined(&request.input_path, request.output_dir(), &output_path)?;
                Ok(vec![output_path])
            }
        }
    }

    /// Render pages to prefixed scratch files, stack them, write one JPEG.
    fn convert_combined(&self, input: &Path, dir: &Path, output_path: &Path) -> Result<()> {
        // Guard exists before the first scratch file does
        let scratch = ScratchFiles::new(dir, format!("{}-", Uuid::new_v4()));
        let staging = scratch.path_for(output_path.file_name().unwrap_or_default());

        debug!("Stage 1: Rasterizing to scratch files {:?}", staging);
        self.renderer.rasterize_to_files(input, &staging)?;

        stitch_scratch_pages(&scratch, output_path)
    }
}

/// Stack every page file under `scratch`, in name order, into `output_path`.
///
/// The combined JPEG is encoded into another scratch file and renamed over
/// `output_path` only once complete, so on failure an existing output keeps
/// its old content. Scratch files are left for the guard to remove.
pub fn stitch_scratch_pages(scratch: &ScratchFiles, output_path: &Path) -> Result<()> {
    debug!("Stage 2: Loading scratch pages");
    let pages = scratch
        .list()?
        .iter()
        .enumerate()
        .map(|(idx, path)| load_page(idx + 1, path))
        .collect::<Result<Vec<_>>>()?;

    debug!("Stage 3: Compositing {} pages", pages.len());
    let combined = compositor::composite(&pages)?;
    drop(pages);

    let staged = scratch.path_for(output_path.file_name().unwrap_or_default());
    debug!("Stage 4: Encoding {:?}", staged);
    save_jpeg(&combined.image, &staged)?;

    std::fs::rename(&staged, output_path).map_err(|e| ConversionError::io(output_path, e))
}

impl ConversionBackend for Converter {
    fn convert(&self, request: &ConversionRequest) -> ConversionOutcome {
        Converter::convert(self, request)
    }
}

/// Decode one scratch JPEG as an RGB page.
fn load_page(page_number: usize, path: &Path) -> Result<PageImage> {
    let image = image::open(path)
        .map_err(|e| ConversionError::image(path, e))?
        .into_rgb8();
    Ok(PageImage::new(page_number, image))
}

/// Files in one directory sharing a per-run prefix, removed on drop.
///
/// Removal lists the directory again at drop time, so files written before
/// a mid-run failure are caught too.
pub struct ScratchFiles {
    dir: PathBuf,
    prefix: String,
}

impl ScratchFiles {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Path of `name` under the prefix, e.g. `dir/<prefix>report.jpg`.
    pub fn path_for(&self, name: impl AsRef<OsStr>) -> PathBuf {
        let mut file_name = OsString::from(&self.prefix);
        file_name.push(name);
        self.dir.join(file_name)
    }

    /// Paths in the directory starting with the prefix, sorted by name.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| ConversionError::io(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConversionError::io(&self.dir, e))?;
            if entry
                .file_name()
                .as_encoded_bytes()
                .starts_with(self.prefix.as_bytes())
            {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        let files = match self.list() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list scratch files for cleanup: {}", e);
                return;
            }
        };

        for file in files {
            if let Err(e) = std::fs::remove_file(&file) {
                warn!("Failed to remove scratch file {:?}: {}", file, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // ========== ScratchFiles tests ==========

    #[test]
    fn test_scratch_list_selects_prefix_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["abc-doc-0002.jpg", "abc-doc-0001.jpg", "other.jpg", "xabc-doc.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let scratch = ScratchFiles::new(dir.path(), "abc-");
        let listed: Vec<String> = scratch
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(listed, vec!["abc-doc-0001.jpg", "abc-doc-0002.jpg"]);
        drop(scratch);
        assert_eq!(names_in(dir.path()), vec!["other.jpg", "xabc-doc.jpg"]);
    }

    #[test]
    fn test_scratch_drop_removes_files_created_after_guard() {
        let dir = TempDir::new().unwrap();
        {
            let scratch = ScratchFiles::new(dir.path(), "run1-");
            std::fs::write(dir.path().join("run1-a.jpg"), b"x").unwrap();
            std::fs::write(dir.path().join("run1-b.jpg"), b"x").unwrap();
            assert_eq!(scratch.list().unwrap().len(), 2);
        }
        assert!(names_in(dir.path()).is_empty());
    }

    #[test]
    fn test_scratch_drop_on_error_path() {
        let dir = TempDir::new().unwrap();

        fn failing_stage(dir: &Path) -> Result<()> {
            let _scratch = ScratchFiles::new(dir, "fail-");
            std::fs::write(dir.join("fail-0001.jpg"), b"partial").unwrap();
            Err(ConversionError::EmptyPageSet)
        }

        assert!(failing_stage(dir.path()).is_err());
        assert!(names_in(dir.path()).is_empty());
    }

    #[test]
    fn test_scratch_list_missing_dir_is_io() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchFiles::new(dir.path().join("gone"), "p-");
        assert!(matches!(scratch.list(), Err(ConversionError::Io { .. })));
    }

    #[test]
    fn test_concurrent_prefixes_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let a = ScratchFiles::new(dir.path(), format!("{}-", Uuid::new_v4()));
        let b = ScratchFiles::new(dir.path(), format!("{}-", Uuid::new_v4()));
        std::fs::write(a.path_for("doc-0001.jpg"), b"a").unwrap();
        std::fs::write(b.path_for("doc-0001.jpg"), b"b").unwrap();

        assert_eq!(a.list().unwrap().len(), 1);
        drop(a);
        assert_eq!(b.list().unwrap().len(), 1);
    }

    // ========== load_page tests ==========

    #[test]
    fn test_load_page_reads_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p-0001.jpg");
        save_jpeg(&RgbImage::from_pixel(20, 10, Rgb([255, 255, 255])), &path).unwrap();

        let page = load_page(4, &path).unwrap();
        assert_eq!(page.page_number, 4);
        assert_eq!((page.width(), page.height()), (20, 10));
    }

    #[test]
    fn test_load_page_garbage_is_image_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p-0001.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();

        let err = load_page(1, &path).unwrap_err();
        assert!(matches!(err, ConversionError::Image { .. }));
        assert_eq!(err.reason(), crate::error::FailureReason::IoError);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scratch_drop_removes_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        {
            let scratch = ScratchFiles::new(dir.path(), "run2-");
            std::fs::write(scratch.path_for(OsStr::from_bytes(b"r\xe9sum\xe9-0001.jpg")), b"x")
                .unwrap();
            assert_eq!(scratch.list().unwrap().len(), 1);
        }
        assert!(names_in(dir.path()).is_empty());
    }

    // ========== stitch_scratch_pages tests ==========

    fn luma(path: &Path, x: u32, y: u32) -> u8 {
        image::open(path).unwrap().into_rgb8().get_pixel(x, y)[0]
    }

    #[test]
    fn test_stitch_stacks_scratch_pages_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("report.jpg");
        std::fs::write(&output, b"previous output").unwrap();

        {
            let scratch = ScratchFiles::new(dir.path(), "run-");
            // Written out of order; name order decides stacking order
            save_jpeg(
                &RgbImage::from_pixel(30, 20, Rgb([255, 255, 255])),
                &scratch.path_for("report-0002.jpg"),
            )
            .unwrap();
            save_jpeg(
                &RgbImage::from_pixel(40, 10, Rgb([0, 0, 0])),
                &scratch.path_for("report-0001.jpg"),
            )
            .unwrap();

            stitch_scratch_pages(&scratch, &output).unwrap();
        }

        let combined = image::open(&output).unwrap();
        assert_eq!((combined.width(), combined.height()), (40, 30));
        assert!(luma(&output, 5, 5) < 30);
        assert!(luma(&output, 5, 25) > 225);
        assert_eq!(names_in(dir.path()), vec!["report.jpg"]);
    }

    #[test]
    fn test_stitch_load_failure_keeps_existing_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("report.jpg");
        std::fs::write(&output, b"previous output").unwrap();

        let result = {
            let scratch = ScratchFiles::new(dir.path(), "run-");
            save_jpeg(&RgbImage::new(8, 8), &scratch.path_for("report-0001.jpg")).unwrap();
            std::fs::write(scratch.path_for("report-0002.jpg"), b"not a jpeg").unwrap();
            stitch_scratch_pages(&scratch, &output)
        };

        let err = result.unwrap_err();
        assert!(matches!(err, ConversionError::Image { .. }));
        assert_eq!(err.reason(), crate::error::FailureReason::IoError);
        assert_eq!(std::fs::read(&output).unwrap(), b"previous output");
        assert_eq!(names_in(dir.path()), vec!["report.jpg"]);
    }

    #[test]
    fn test_stitch_oversized_result_keeps_existing_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("report.jpg");
        std::fs::write(&output, b"previous output").unwrap();

        let result = {
            let scratch = ScratchFiles::new(dir.path(), "run-");
            for n in 1..=3 {
                save_jpeg(
                    &RgbImage::new(4, 30_000),
                    &scratch.path_for(format!("report-{:04}.jpg", n)),
                )
                .unwrap();
            }
            stitch_scratch_pages(&scratch, &output)
        };

        let err = result.unwrap_err();
        assert!(matches!(err, ConversionError::ImageTooLarge { .. }));
        assert_eq!(err.reason(), crate::error::FailureReason::IoError);
        assert_eq!(std::fs::read(&output).unwrap(), b"previous output");
        assert_eq!(names_in(dir.path()), vec!["report.jpg"]);
    }

    #[test]
    fn test_stitch_without_pages_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("report.jpg");

        let scratch = ScratchFiles::new(dir.path(), "run-");
        let result = stitch_scratch_pages(&scratch, &output);

        assert!(matches!(result, Err(ConversionError::EmptyPageSet)));
        assert!(!output.exists());
    }

    // ========== Converter tests ==========

    #[test]
    fn test_converter_can_back_a_controller() {
        fn assert_backend<T: ConversionBackend>() {}
        assert_backend::<Converter>();
    }
}
