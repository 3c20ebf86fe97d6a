//! Error types for the watermark-inpaint crate.

use std::path::PathBuf;

use crate::selector::Orientation;

/// Errors that can occur while acquiring masks and restoring images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No mask pool is configured for the image's orientation.
    #[error("no mask pool configured for {orientation} images")]
    MissingPool {
        /// Orientation of the image that needed a mask.
        orientation: Orientation,
    },

    /// The selected mask pool holds no mask images.
    #[error("mask pool {} contains no mask images", path.display())]
    EmptyPool {
        /// Directory backing the pool.
        path: PathBuf,
    },

    /// An input image could not be read or decoded.
    #[error("failed to load {}: {source}", path.display())]
    Decode {
        /// Offending file.
        path: PathBuf,
        /// Underlying codec error.
        source: image::ImageError,
    },

    /// The segmentation backend failed.
    #[error("segmentation backend failed: {0}")]
    Segmentation(String),

    /// The inpainting backend failed or produced no image.
    #[error("inpainting backend failed: {0}")]
    Inpaint(String),

    /// A mask does not cover the image it belongs to.
    #[error("mask is {mask_width}x{mask_height} but image is {width}x{height}")]
    MaskSizeMismatch {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Mask width in pixels.
        mask_width: u32,
        /// Mask height in pixels.
        mask_height: u32,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image encoding or decoding.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The inpainting configuration could not be serialized.
    #[error("invalid inpainting config: {0}")]
    Config(#[from] serde_json::Error),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
