//! Automatic watermark-region detection.
//!
//! Overlay watermarks are typically near-white and unsaturated. Detection
//! runs in two stages:
//! 1. **Segmentation** (when a backend is attached): one positive click at the
//!    centroid of the largest near-white blob, answered by the backend with a
//!    precise object mask.
//! 2. **Heuristic** (always available): near-white blobs larger than
//!    [`MIN_CONTOUR_AREA`] are filled and dilated.
//!
//! A backend failure never escapes the detector; it only moves detection on
//! to the heuristic stage. When neither stage marks a pixel the image has no
//! detectable watermark.

use std::sync::Mutex;

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;

use crate::contour::{contour_area, external_contours, fill_contour, moments};
use crate::error::{Error, Result};
use crate::segmentation::{content_key, Click, Segmenter};

/// Highest 8-bit HSV saturation counted as near-white.
pub const SATURATION_MAX: u8 = 50;
/// Lowest 8-bit HSV value counted as near-white.
pub const VALUE_MIN: u8 = 180;
/// Contours must enclose strictly more than this area to enter the heuristic mask.
pub const MIN_CONTOUR_AREA: f64 = 100.0;
/// Chebyshev radius of the dilation element (a 5x5 square).
const DILATION_RADIUS: u8 = 2;
/// Number of dilation passes.
const DILATION_ITERATIONS: usize = 2;

/// Fixed-point shift used for the saturation division.
const HSV_SHIFT: u32 = 12;

/// Which detection stage produced a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The segmentation backend.
    Segmentation,
    /// The HSV/contour heuristic.
    Heuristic,
    /// Nothing was detected; the image should be skipped.
    None,
}

/// Outcome of [`Detector::detect`].
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Binary mask (0 or 255), present unless provenance is [`Provenance::None`].
    pub mask: Option<GrayImage>,
    /// Stage that produced the mask.
    pub provenance: Provenance,
}

impl DetectionResult {
    fn none() -> Self {
        Self {
            mask: None,
            provenance: Provenance::None,
        }
    }

    /// Whether nothing was detected.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.provenance == Provenance::None
    }
}

/// 8-bit HSV saturation and value of an RGB pixel.
///
/// Saturation is `255 * (max - min) / max`, computed with the same rounded
/// fixed-point reciprocal table arithmetic used by common vision libraries so
/// that threshold decisions agree bit for bit.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn saturation_value([r, g, b]: [u8; 3]) -> (u8, u8) {
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    if v == 0 {
        return (0, 0);
    }
    let reciprocal = ((f64::from(255_u32 << HSV_SHIFT)) / f64::from(v)).round() as u32;
    let diff = u32::from(v - min);
    let s = (diff * reciprocal + (1 << (HSV_SHIFT - 1))) >> HSV_SHIFT;
    (s.min(255) as u8, v)
}

/// Mask of near-white pixels (any hue, saturation <= 50, value >= 180).
#[must_use]
pub fn near_white_mask(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let (s, v) = saturation_value(image.get_pixel(x, y).0);
        if s <= SATURATION_MAX && v >= VALUE_MIN {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Whether any pixel of `mask` is set.
#[must_use]
pub fn has_foreground(mask: &GrayImage) -> bool {
    mask.pixels().any(|p| p[0] != 0)
}

/// The click at the centroid of the largest blob in `seed`.
///
/// Ties keep the first contour found. Returns `None` when `seed` has no blob
/// or the largest one encloses no area.
#[must_use]
pub fn seed_click(seed: &GrayImage) -> Option<Click> {
    let contours = external_contours(seed);
    let mut largest: Option<(usize, f64)> = None;
    for (i, contour) in contours.iter().enumerate() {
        let area = contour_area(contour);
        if largest.is_none_or(|(_, best)| area > best) {
            largest = Some((i, area));
        }
    }
    let (index, _) = largest?;
    let (x, y) = moments(&contours[index]).centroid()?;
    Some(Click::positive(x, y))
}

/// Fill the large blobs of `seed` and dilate them.
///
/// Returns `None` when no blob encloses more than [`MIN_CONTOUR_AREA`].
#[must_use]
pub fn heuristic_mask(seed: &GrayImage) -> Option<GrayImage> {
    let mut mask = GrayImage::new(seed.width(), seed.height());
    for contour in external_contours(seed) {
        if contour_area(&contour) > MIN_CONTOUR_AREA {
            fill_contour(&mut mask, &contour, 255);
        }
    }
    if !has_foreground(&mask) {
        return None;
    }

    for _ in 0..DILATION_ITERATIONS {
        mask = morphology::dilate(&mask, Norm::LInf, DILATION_RADIUS);
    }
    Some(mask)
}

/// Two-stage watermark detector.
///
/// Holds the optional segmentation backend for the lifetime of a batch. The
/// backend sits behind a lock, so a detector shared across threads still
/// issues one segmentation call at a time.
#[derive(Default)]
pub struct Detector {
    segmenter: Option<Mutex<Box<dyn Segmenter>>>,
}

impl Detector {
    /// A detector using only the heuristic stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector trying `segmenter` before the heuristic stage.
    #[must_use]
    pub fn with_segmenter(segmenter: impl Segmenter + 'static) -> Self {
        Self {
            segmenter: Some(Mutex::new(Box::new(segmenter))),
        }
    }

    /// Whether a segmentation backend is attached.
    #[must_use]
    pub fn has_segmenter(&self) -> bool {
        self.segmenter.is_some()
    }

    /// Detect watermark regions in `image`.
    #[must_use]
    pub fn detect(&self, image: &RgbImage) -> DetectionResult {
        let seed = near_white_mask(image);

        if let Some(segmenter) = &self.segmenter {
            match segment(segmenter, image, &seed) {
                Ok(Some(mask)) => {
                    tracing::debug!("segmentation backend produced mask");
                    return DetectionResult {
                        mask: Some(mask),
                        provenance: Provenance::Segmentation,
                    };
                }
                Ok(None) => tracing::debug!("segmentation produced no mask, using heuristic"),
                Err(e) => tracing::warn!(error = %e, "segmentation failed, using heuristic"),
            }
        }

        match heuristic_mask(&seed) {
            Some(mask) => DetectionResult {
                mask: Some(mask),
                provenance: Provenance::Heuristic,
            },
            None => DetectionResult::none(),
        }
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("segmenter", &self.has_segmenter())
            .finish()
    }
}

fn segment(
    segmenter: &Mutex<Box<dyn Segmenter>>,
    image: &RgbImage,
    seed: &GrayImage,
) -> Result<Option<GrayImage>> {
    let Some(click) = seed_click(seed) else {
        return Ok(None);
    };
    let key = content_key(image);

    let mask = {
        let mut backend = segmenter
            .lock()
            .map_err(|_| Error::Segmentation("backend lock poisoned".to_string()))?;
        backend.segment(image, &[click], &key)?
    };

    let Some(mut mask) = mask else {
        return Ok(None);
    };
    if mask.dimensions() != image.dimensions() {
        return Err(Error::MaskSizeMismatch {
            width: image.width(),
            height: image.height(),
            mask_width: mask.width(),
            mask_height: mask.height(),
        });
    }
    if !has_foreground(&mask) {
        return Ok(None);
    }

    for p in mask.pixels_mut() {
        if p[0] != 0 {
            p[0] = 255;
        }
    }
    Ok(Some(mask))
}
