//! Batch restoration engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{imageops, DynamicImage, GrayImage, ImageFormat, RgbImage};
use walkdir::WalkDir;

use crate::detection::{Detector, Provenance};
use crate::error::{Error, Result};
use crate::inpaint::{check_mask_size, InpaintConfig, Inpainter};
use crate::segmentation::Segmenter;
use crate::selector::{MaskPools, Orientation};

/// Where the mask used for an image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOrigin {
    /// A pre-made mask from the pool serving this orientation.
    Pool(Orientation),
    /// The segmentation backend.
    Segmentation,
    /// The HSV/contour heuristic.
    Heuristic,
}

impl fmt::Display for MaskOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool(orientation) => write!(f, "{orientation} pool"),
            Self::Segmentation => f.write_str("segmentation"),
            Self::Heuristic => f.write_str("heuristic"),
        }
    }
}

/// Options controlling batch processing behavior.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Descend into subdirectories of the input directory.
    pub recursive: bool,
    /// Process images on the rayon thread pool (requires the `cli` feature).
    ///
    /// Backends stay serialized; only decoding, detection and encoding run
    /// concurrently.
    pub parallel: bool,
}

/// Destination directories for a batch.
///
/// Every destination mirrors the input's relative subdirectory structure.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    /// Restored images.
    pub output_dir: PathBuf,
    /// Masks used for each image, written as PNG.
    pub mask_dir: Option<PathBuf>,
    /// Side-by-side original and restored images.
    pub compare_dir: Option<PathBuf>,
}

impl OutputLayout {
    /// Write restored images under `output_dir` and nothing else.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            mask_dir: None,
            compare_dir: None,
        }
    }

    /// Also persist masks under `dir`.
    #[must_use]
    pub fn with_mask_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mask_dir = Some(dir.into());
        self
    }

    /// Also write comparison images under `dir`.
    #[must_use]
    pub fn with_compare_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.compare_dir = Some(dir.into());
        self
    }

    /// Destinations for the input found at `relative` below the input root.
    #[must_use]
    pub fn targets(&self, relative: &Path) -> OutputTargets {
        OutputTargets {
            output: self.output_dir.join(relative),
            mask: self
                .mask_dir
                .as_ref()
                .map(|d| d.join(relative).with_extension("png")),
            compare: self.compare_dir.as_ref().map(|d| d.join(relative)),
        }
    }
}

/// Destinations for a single image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTargets {
    /// Restored image.
    pub output: PathBuf,
    /// Mask used, if it should be kept.
    pub mask: Option<PathBuf>,
    /// Comparison image, if wanted.
    pub compare: Option<PathBuf>,
}

impl OutputTargets {
    /// Write only the restored image to `output`.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            mask: None,
            compare: None,
        }
    }
}

/// How processing an image ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Restored and saved.
    Restored,
    /// No watermark detected; nothing written.
    Skipped,
    /// Decode, configuration, backend or save failure.
    Failed,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// How processing ended.
    pub outcome: Outcome,
    /// Source of the mask, when one was obtained.
    pub origin: Option<MaskOrigin>,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn failed(path: &Path, message: String) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: Outcome::Failed,
            origin: None,
            message,
        }
    }
}

/// Per-outcome counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Images restored.
    pub processed: usize,
    /// Images without a detectable watermark.
    pub skipped: usize,
    /// Images that failed.
    pub failed: usize,
}

impl BatchSummary {
    /// Count the outcomes of `results`.
    #[must_use]
    pub fn from_results(results: &[ProcessResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            summary.record(r.outcome);
        }
        summary
    }

    /// Count one more image that ended with `outcome`.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Restored => self.processed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    /// Number of images seen.
    #[must_use]
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Skipped: {}, Failed: {} (Total: {})",
            self.processed,
            self.skipped,
            self.failed,
            self.total()
        )
    }
}

/// A restored image together with the mask that produced it.
#[derive(Debug, Clone)]
pub struct Restoration {
    /// Restored image.
    pub image: RgbImage,
    /// Mask handed to the inpainter.
    pub mask: GrayImage,
    /// Source of the mask.
    pub origin: MaskOrigin,
}

/// The restoration engine holding mask pools and backends.
///
/// Build once per batch and reuse for every image. Backends are loaded by the
/// caller, handed over at construction and released when the engine is
/// dropped. With mask pools configured every image takes a pool mask;
/// otherwise masks are detected.
pub struct Engine {
    pools: Option<MaskPools>,
    detector: Detector,
    inpainter: Mutex<Box<dyn Inpainter>>,
    config: InpaintConfig,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("pools", &self.pools)
            .field("detector", &self.detector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine in detection mode around `inpainter`.
    pub fn new(inpainter: impl Inpainter + 'static) -> Self {
        Self::from_boxed(Box::new(inpainter))
    }

    /// Create an engine in detection mode around an already boxed inpainter.
    #[must_use]
    pub fn from_boxed(inpainter: Box<dyn Inpainter>) -> Self {
        Self {
            pools: None,
            detector: Detector::new(),
            inpainter: Mutex::new(inpainter),
            config: InpaintConfig::default(),
        }
    }

    /// Try `segmenter` before the heuristic when detecting masks.
    #[must_use]
    pub fn with_segmenter(mut self, segmenter: impl Segmenter + 'static) -> Self {
        self.detector = Detector::with_segmenter(segmenter);
        self
    }

    /// Take masks from `pools` instead of detecting them.
    #[must_use]
    pub fn with_mask_pools(mut self, pools: MaskPools) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Settings forwarded to the inpainter.
    #[must_use]
    pub fn with_config(mut self, config: InpaintConfig) -> Self {
        self.config = config;
        self
    }

    /// Settings forwarded to the inpainter.
    #[must_use]
    pub fn config(&self) -> &InpaintConfig {
        &self.config
    }

    /// Whether masks come from pools rather than detection.
    #[must_use]
    pub fn uses_mask_pools(&self) -> bool {
        self.pools.is_some()
    }

    /// Obtain the mask for `image`.
    ///
    /// Returns `Ok(None)` when detection finds no watermark.
    ///
    /// # Errors
    ///
    /// Pool errors ([`Error::MissingPool`], [`Error::EmptyPool`], or a mask
    /// that cannot be decoded) in pool mode. Detection itself never fails.
    pub fn acquire_mask(&self, image: &RgbImage) -> Result<Option<(GrayImage, MaskOrigin)>> {
        if let Some(pools) = &self.pools {
            let selected = pools.select_mask(image.width(), image.height())?;
            tracing::debug!(
                source = %selected.source.display(),
                orientation = %selected.orientation,
                "selected pool mask"
            );
            return Ok(Some((selected.mask, MaskOrigin::Pool(selected.orientation))));
        }

        let detection = self.detector.detect(image);
        let origin = match detection.provenance {
            Provenance::Segmentation => MaskOrigin::Segmentation,
            Provenance::Heuristic => MaskOrigin::Heuristic,
            Provenance::None => return Ok(None),
        };
        Ok(detection.mask.map(|mask| (mask, origin)))
    }

    /// Run the inpainter on `image` with `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaskSizeMismatch`] for a mask of the wrong size and
    /// [`Error::Inpaint`] when the backend fails or returns an image of the
    /// wrong size.
    pub fn inpaint(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
        check_mask_size(image, mask)?;

        let restored = {
            let mut backend = self
                .inpainter
                .lock()
                .map_err(|_| Error::Inpaint("backend lock poisoned".to_string()))?;
            backend.inpaint(image, mask, &self.config)?
        };

        if restored.dimensions() != image.dimensions() {
            return Err(Error::Inpaint(format!(
                "backend returned {}x{} for a {}x{} image",
                restored.width(),
                restored.height(),
                image.width(),
                image.height()
            )));
        }
        Ok(restored)
    }

    /// Acquire a mask for `image` and inpaint it.
    ///
    /// Returns `Ok(None)` when no watermark was detected.
    ///
    /// # Errors
    ///
    /// Errors from [`Engine::acquire_mask`] and [`Engine::inpaint`].
    pub fn restore(&self, image: &RgbImage) -> Result<Option<Restoration>> {
        let Some((mask, origin)) = self.acquire_mask(image)? else {
            return Ok(None);
        };
        let restored = self.inpaint(image, &mask)?;
        Ok(Some(Restoration {
            image: restored,
            mask,
            origin,
        }))
    }

    /// Process a single image file: load, acquire mask, inpaint, save.
    ///
    /// Never fails; failures are reported in the returned [`ProcessResult`].
    #[must_use]
    pub fn process_file(&self, input: &Path, targets: &OutputTargets) -> ProcessResult {
        let _span = tracing::info_span!("image", path = %input.display()).entered();
        let mut result = ProcessResult::failed(input, String::new());

        match self.try_process_file(input, targets) {
            Ok(Some(origin)) => {
                tracing::info!(%origin, "restored");
                result.outcome = Outcome::Restored;
                result.origin = Some(origin);
                result.message = format!("Restored using {origin} mask");
            }
            Ok(None) => {
                tracing::info!("skipped: no watermark detected");
                result.outcome = Outcome::Skipped;
                result.message = "No watermark detected".to_string();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed");
                result.message = e.to_string();
            }
        }

        result
    }

    fn try_process_file(
        &self,
        input: &Path,
        targets: &OutputTargets,
    ) -> Result<Option<MaskOrigin>> {
        let image = image::open(input)
            .map_err(|e| Error::Decode {
                path: input.to_path_buf(),
                source: e,
            })?
            .to_rgb8();

        let Some((mask, origin)) = self.acquire_mask(&image)? else {
            return Ok(None);
        };

        if let Some(mask_path) = &targets.mask {
            create_parent_dir(mask_path)?;
            mask.save(mask_path)?;
        }

        let restored = self.inpaint(&image, &mask)?;

        create_parent_dir(&targets.output)?;
        save_image(&restored, &targets.output)?;

        if let Some(compare_path) = &targets.compare {
            create_parent_dir(compare_path)?;
            save_image(&side_by_side(&image, &restored), compare_path)?;
        }

        Ok(Some(origin))
    }

    /// Process all supported images in a directory.
    ///
    /// Files are visited in path order. A failing image never stops the
    /// batch. Returns a [`ProcessResult`] for each image found.
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        layout: &OutputLayout,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let images = match collect_images(input_dir, opts.recursive) {
            Ok(images) => images,
            Err(e) => {
                return vec![ProcessResult::failed(
                    input_dir,
                    format!("Failed to read directory: {e}"),
                )];
            }
        };
        self.process_images(input_dir, &images, layout, opts, |_| {})
    }

    /// Process `images` found below `input_root`, calling `on_result` as each
    /// one finishes.
    ///
    /// In parallel mode `on_result` runs on worker threads in completion
    /// order; the returned results are always in the order of `images`.
    pub fn process_images<F>(
        &self,
        input_root: &Path,
        images: &[PathBuf],
        layout: &OutputLayout,
        opts: &ProcessOptions,
        on_result: F,
    ) -> Vec<ProcessResult>
    where
        F: Fn(&ProcessResult) + Sync,
    {
        if let Err(e) = std::fs::create_dir_all(&layout.output_dir) {
            return vec![ProcessResult::failed(
                &layout.output_dir,
                format!("Failed to create output directory: {e}"),
            )];
        }

        let process = |input_path: &PathBuf| {
            let relative = input_path.strip_prefix(input_root).map_or_else(
                |_| PathBuf::from(input_path.file_name().unwrap_or_default()),
                Path::to_path_buf,
            );
            let result = self.process_file(input_path, &layout.targets(&relative));
            on_result(&result);
            result
        };

        #[cfg(feature = "cli")]
        {
            if opts.parallel {
                use rayon::prelude::*;
                return images.par_iter().map(process).collect();
            }
        }
        #[cfg(not(feature = "cli"))]
        let _ = opts;

        images.iter().map(process).collect()
    }
}

/// Supported image files under `dir`, sorted by path.
///
/// Entries below `dir` that cannot be read are logged and left out.
///
/// # Errors
///
/// Returns an I/O error if `dir` itself cannot be read.
pub fn collect_images(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Check if a file has a supported image extension (PNG or JPEG).
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png"),
        None => false,
    }
}

/// Place `left` and `right` next to each other on one canvas.
#[must_use]
pub fn side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let mut canvas = RgbImage::new(
        left.width() + right.width(),
        left.height().max(right.height()),
    );
    imageops::replace(&mut canvas, left, 0, 0);
    imageops::replace(&mut canvas, right, i64::from(left.width()), 0);
    canvas
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Save an RGB image with format-specific quality settings.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            DynamicImage::ImageRgb8(img.clone()).save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.{ext}"))
}
