//! Inpainting backends and their configuration.
//!
//! The crate hands `(image, mask, config)` to an [`Inpainter`] and expects the
//! restored image back. The configuration is opaque to the pipeline and is
//! forwarded to the backend as is.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a backend handles images larger than its working resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum HdStrategy {
    /// Process the full image at its original size.
    Original,
    /// Downscale to the resize limit, inpaint, then upscale.
    Resize,
    /// Inpaint a crop around the masked area.
    #[default]
    Crop,
}

/// Settings forwarded to the inpainting backend.
///
/// Serializes with the field names of iopaint's `InpaintRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InpaintConfig {
    /// Whether to crop around the mask or process the whole image.
    #[serde(rename = "hd_strategy")]
    pub strategy: HdStrategy,
    /// Pixels of context kept around a crop.
    #[serde(rename = "hd_strategy_crop_margin")]
    pub crop_margin: u32,
    /// Image size above which cropping activates.
    #[serde(rename = "hd_strategy_crop_trigger_size")]
    pub crop_trigger_size: u32,
    /// Maximum working resolution before downscaling.
    #[serde(rename = "hd_strategy_resize_limit")]
    pub resize_limit: u32,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            strategy: HdStrategy::Crop,
            crop_margin: 128,
            crop_trigger_size: 800,
            resize_limit: 1280,
        }
    }
}

/// A rectangular region of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl InpaintConfig {
    /// The region a cropping backend should inpaint for `mask`.
    ///
    /// `None` unless the strategy is [`HdStrategy::Crop`], the mask's longer
    /// side exceeds the trigger size and the mask has a set pixel. The box is
    /// the mask's bounding box grown by the crop margin and clamped to the
    /// image.
    #[must_use]
    pub fn crop_box(&self, mask: &GrayImage) -> Option<CropBox> {
        let (width, height) = mask.dimensions();
        if self.strategy != HdStrategy::Crop || width.max(height) <= self.crop_trigger_size {
            return None;
        }

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in mask.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        let (x0, y0, x1, y1) = bounds?;

        let left = x0.saturating_sub(self.crop_margin);
        let top = y0.saturating_sub(self.crop_margin);
        let right = x1.saturating_add(self.crop_margin).min(width - 1);
        let bottom = y1.saturating_add(self.crop_margin).min(height - 1);
        Some(CropBox {
            x: left,
            y: top,
            width: right - left + 1,
            height: bottom - top + 1,
        })
    }
}

/// An inpainting model.
///
/// Implementations report every failure through `Err` and must not panic: a
/// panic unwinds through the batch and poisons the engine's lock on the
/// backend, so no later image can be inpainted.
pub trait Inpainter: Send {
    /// Reconstruct the pixels of `image` marked in `mask`.
    ///
    /// # Errors
    ///
    /// Any backend failure, including a backend that produced no image.
    fn inpaint(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        config: &InpaintConfig,
    ) -> Result<RgbImage>;
}

impl<F> Inpainter for F
where
    F: FnMut(&RgbImage, &GrayImage, &InpaintConfig) -> Result<RgbImage> + Send,
{
    fn inpaint(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        config: &InpaintConfig,
    ) -> Result<RgbImage> {
        self(image, mask, config)
    }
}

/// Fail unless `mask` has the dimensions of `image`.
///
/// # Errors
///
/// Returns [`Error::MaskSizeMismatch`] on mismatch.
pub fn check_mask_size(image: &RgbImage, mask: &GrayImage) -> Result<()> {
    if image.dimensions() == mask.dimensions() {
        return Ok(());
    }
    Err(Error::MaskSizeMismatch {
        width: image.width(),
        height: image.height(),
        mask_width: mask.width(),
        mask_height: mask.height(),
    })
}

/// Copy `restored` over `original` wherever `mask` is set.
///
/// `restored` is placed with its top-left corner at `(x, y)` of `original`.
#[must_use]
pub fn composite(original: &RgbImage, restored: &RgbImage, mask: &GrayImage, x: u32, y: u32) -> RgbImage {
    let mut out = original.clone();
    for (dx, dy, px) in restored.enumerate_pixels() {
        let (ox, oy) = (x + dx, y + dy);
        if ox < out.width() && oy < out.height() && mask.get_pixel(ox, oy)[0] != 0 {
            out.put_pixel(ox, oy, *px);
        }
    }
    out
}

/// Inpainting through the `iopaint run` command line.
///
/// Each request is materialized in a fresh temporary directory holding the
/// image, mask, JSON config and output. The directory is removed when the
/// request returns, whether it succeeded or not.
///
/// The program is invoked as
/// `<program> [args..] run --model=<m> --device=<d> --image <png> --mask <png>
/// --output <dir> --config <json>` and must write `image.png` into the output
/// directory.
#[derive(Debug, Clone)]
pub struct CommandInpainter {
    program: PathBuf,
    args: Vec<String>,
    model: String,
    device: String,
    work_root: Option<PathBuf>,
}

impl Default for CommandInpainter {
    fn default() -> Self {
        Self::new("iopaint")
    }
}

impl CommandInpainter {
    /// Wrap an iopaint-compatible `program`, using the `lama` model on `cpu`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model: "lama".to_string(),
            device: "cpu".to_string(),
            work_root: None,
        }
    }

    /// Extra arguments placed before `run`.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Create per-request directories under `root` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn work_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Model name passed as `--model`.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Device passed as `--device`.
    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Program being run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Inpainter for CommandInpainter {
    fn inpaint(
        &mut self,
        image: &RgbImage,
        mask: &GrayImage,
        config: &InpaintConfig,
    ) -> Result<RgbImage> {
        check_mask_size(image, mask)?;

        let work = match &self.work_root {
            Some(root) => tempfile::tempdir_in(root)?,
            None => tempfile::tempdir()?,
        };
        let image_path = work.path().join("image.png");
        let mask_path = work.path().join("mask.png");
        let config_path = work.path().join("config.json");
        let output_dir = work.path().join("output");
        image.save(&image_path)?;
        mask.save(&mask_path)?;
        std::fs::write(&config_path, serde_json::to_vec(config)?)?;
        std::fs::create_dir(&output_dir)?;

        tracing::debug!(program = %self.program.display(), model = %self.model, "running inpainter");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("run")
            .arg(format!("--model={}", self.model))
            .arg(format!("--device={}", self.device))
            .arg("--image")
            .arg(&image_path)
            .arg("--mask")
            .arg(&mask_path)
            .arg("--output")
            .arg(&output_dir)
            .arg("--config")
            .arg(&config_path)
            .output()?;

        if !output.status.success() {
            return Err(Error::Inpaint(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let result_path = output_dir.join("image.png");
        if !result_path.exists() {
            return Err(Error::Inpaint(format!(
                "{} produced no output image",
                self.program.display()
            )));
        }
        Ok(image::open(&result_path)?.to_rgb8())
    }
}
