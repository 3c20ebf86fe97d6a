//! Orientation-based mask selection from pre-made mask pools.
//!
//! Each pool is a directory of mask images tagged with the orientation it
//! serves. An image draws its mask from the pool matching its own aspect:
//! portrait (`height > width`), landscape (`height < width`) or square.
//! Square images use the square pool, or the generic pool when no square
//! pool is configured. Portrait and landscape images never borrow another
//! pool's masks.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::engine::is_supported_image;
use crate::error::{Error, Result};

/// Aspect orientation of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Taller than wide.
    Portrait,
    /// Wider than tall.
    Landscape,
    /// Equal width and height.
    Square,
}

impl Orientation {
    /// Classify an image by its pixel dimensions.
    #[must_use]
    pub fn of(width: u32, height: u32) -> Self {
        match height.cmp(&width) {
            Ordering::Greater => Self::Portrait,
            Ordering::Less => Self::Landscape,
            Ordering::Equal => Self::Square,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
            Self::Square => "square",
        })
    }
}

/// Orientation tag attached to a [`MaskPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTag {
    /// Masks for portrait images.
    Portrait,
    /// Masks for landscape images.
    Landscape,
    /// Masks for square images.
    Square,
    /// Masks for square images when no square pool exists.
    Generic,
}

impl fmt::Display for PoolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
            Self::Square => "square",
            Self::Generic => "generic",
        })
    }
}

/// A directory of candidate masks for one orientation.
///
/// Candidates are ordered by file name so that selection is reproducible
/// across runs and platforms.
#[derive(Debug, Clone)]
pub struct MaskPool {
    tag: PoolTag,
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl MaskPool {
    /// Scan `dir` for mask images (`png`, `jpg`, `jpeg`).
    ///
    /// An existing directory without masks yields an empty pool; selecting
    /// from it fails with [`Error::EmptyPool`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be read.
    pub fn open(tag: PoolTag, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .filter(|p| is_supported_image(p))
            .collect();
        files.sort();
        Ok(Self { tag, dir, files })
    }

    /// A pool with no candidates, standing in for a directory that could not
    /// be read so that every image routed to it reports the offending path.
    #[must_use]
    pub fn empty(tag: PoolTag, dir: impl Into<PathBuf>) -> Self {
        Self {
            tag,
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    /// Orientation tag of this pool.
    #[must_use]
    pub fn tag(&self) -> PoolTag {
        self.tag
    }

    /// Directory backing this pool.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of candidate masks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the pool has no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The candidate every image drawing from this pool receives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPool`] if the pool has no candidates.
    pub fn pick(&self) -> Result<&Path> {
        self.files
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::EmptyPool {
                path: self.dir.clone(),
            })
    }
}

/// The set of pools available to the selector, at most one per tag.
#[derive(Debug, Clone, Default)]
pub struct MaskPools {
    portrait: Option<MaskPool>,
    landscape: Option<MaskPool>,
    square: Option<MaskPool>,
    generic: Option<MaskPool>,
}

/// A mask chosen for one image and resized to its dimensions.
#[derive(Debug, Clone)]
pub struct SelectedMask {
    /// Orientation of the target image.
    pub orientation: Orientation,
    /// File the mask was read from.
    pub source: PathBuf,
    /// Mask resized to the target image's dimensions.
    pub mask: GrayImage,
}

impl MaskPools {
    /// An empty pool set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `pool` under its own tag, replacing any pool with the same tag.
    #[must_use]
    pub fn with(mut self, pool: MaskPool) -> Self {
        self.insert(pool);
        self
    }

    /// Add `pool` under its own tag, replacing any pool with the same tag.
    pub fn insert(&mut self, pool: MaskPool) {
        let slot = match pool.tag {
            PoolTag::Portrait => &mut self.portrait,
            PoolTag::Landscape => &mut self.landscape,
            PoolTag::Square => &mut self.square,
            PoolTag::Generic => &mut self.generic,
        };
        *slot = Some(pool);
    }

    /// Whether no pool has been configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools().next().is_none()
    }

    /// Iterate over the configured pools.
    pub fn pools(&self) -> impl Iterator<Item = &MaskPool> {
        [&self.portrait, &self.landscape, &self.square, &self.generic]
            .into_iter()
            .flatten()
    }

    /// The pool an image of the given dimensions draws from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPool`] if no pool serves the orientation.
    pub fn pool_for(&self, width: u32, height: u32) -> Result<&MaskPool> {
        let orientation = Orientation::of(width, height);
        let pool = match orientation {
            Orientation::Portrait => self.portrait.as_ref(),
            Orientation::Landscape => self.landscape.as_ref(),
            Orientation::Square => self.square.as_ref().or(self.generic.as_ref()),
        };
        pool.ok_or(Error::MissingPool { orientation })
    }

    /// Pick the mask file for an image of the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPool`] or [`Error::EmptyPool`] when no
    /// candidate is available for the image's orientation.
    pub fn select(&self, width: u32, height: u32) -> Result<&Path> {
        self.pool_for(width, height)?.pick()
    }

    /// Pick, decode and resize the mask for an image of the given dimensions.
    ///
    /// The pool is left untouched; every call yields an independent buffer.
    ///
    /// # Errors
    ///
    /// Returns a pool error from [`MaskPools::select`], or [`Error::Decode`]
    /// if the chosen mask cannot be read.
    pub fn select_mask(&self, width: u32, height: u32) -> Result<SelectedMask> {
        let source = self.select(width, height)?;
        let decoded = image::open(source).map_err(|e| Error::Decode {
            path: source.to_path_buf(),
            source: e,
        })?;

        Ok(SelectedMask {
            orientation: Orientation::of(width, height),
            source: source.to_path_buf(),
            mask: resize_mask(&decoded.to_luma8(), width, height),
        })
    }
}

/// Resize a mask to exactly `width` x `height` with nearest-neighbor sampling.
///
/// Nearest-neighbor keeps the output's value set a subset of the input's, so
/// hard mask edges stay hard.
#[must_use]
pub fn resize_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, FilterType::Nearest)
}
