//! Batch watermark removal by mask selection, watermark detection and
//! external inpainting.
//!
//! Every image is paired with a mask marking the watermark, and the pair is
//! handed to an inpainting backend that reconstructs the covered pixels.
//! Masks come from one of two places:
//!
//! - **Mask pools**: directories of pre-made masks tagged by orientation. An
//!   image takes the first mask of the pool matching its aspect, resized with
//!   nearest-neighbor sampling to its exact dimensions.
//! - **Detection**: near-white, unsaturated regions are located in the image,
//!   refined by an optional point-prompted segmentation backend, with a
//!   classical contour heuristic as the always-available fallback.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_inpaint::{CommandInpainter, Engine};
//!
//! let engine = Engine::new(CommandInpainter::new("iopaint"));
//! let img = image::open("photo.jpg").unwrap().to_rgb8();
//! match engine.restore(&img).unwrap() {
//!     Some(restored) => restored.image.save("cleaned.jpg").unwrap(),
//!     None => println!("no watermark detected"),
//! }
//! ```
//!
//! # Mask pools
//!
//! ```no_run
//! use watermark_inpaint::{CommandInpainter, Engine, MaskPool, MaskPools, PoolTag};
//!
//! let pools = MaskPools::new()
//!     .with(MaskPool::open(PoolTag::Portrait, "masks/portrait").unwrap())
//!     .with(MaskPool::open(PoolTag::Landscape, "masks/landscape").unwrap())
//!     .with(MaskPool::open(PoolTag::Generic, "masks/generic").unwrap());
//! let engine = Engine::new(CommandInpainter::new("iopaint")).with_mask_pools(pools);
//! ```

#![deny(missing_docs)]

pub mod contour;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
#[cfg(feature = "lama")]
pub mod lama;
pub mod segmentation;
pub mod selector;

pub use detection::{DetectionResult, Detector, Provenance};
pub use engine::{
    collect_images, default_output_path, is_supported_image, save_image, side_by_side,
    BatchSummary, Engine, MaskOrigin, Outcome, OutputLayout, OutputTargets, ProcessOptions,
    ProcessResult, Restoration,
};
pub use error::{Error, Result};
pub use inpaint::{CommandInpainter, HdStrategy, InpaintConfig, Inpainter};
#[cfg(feature = "lama")]
pub use lama::LamaInpainter;
pub use segmentation::{Click, CommandSegmenter, Segmenter};
pub use selector::{MaskPool, MaskPools, Orientation, PoolTag};
