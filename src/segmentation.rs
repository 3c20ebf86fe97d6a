//! Point-prompted segmentation backends.
//!
//! A segmentation backend turns one or more clicks on an image into an
//! object mask. The detector uses it with a single positive click placed on
//! the most prominent near-white blob.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{GrayImage, RgbImage};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A click prompt at pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// `true` marks the object, `false` marks background.
    pub positive: bool,
}

impl Click {
    /// A click marking the object to segment.
    #[must_use]
    pub fn positive(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            positive: true,
        }
    }

    /// Numeric label as understood by point-prompted models (1 or 0).
    #[must_use]
    pub fn label(&self) -> u8 {
        u8::from(self.positive)
    }
}

/// A point-prompted segmentation model.
///
/// Implementations need not be safe for concurrent use; callers serialize
/// access. Failures are reported through `Err` and never by panicking, since
/// a panic unwinds through the batch instead of falling back to the
/// heuristic.
pub trait Segmenter: Send {
    /// Segment the object under `clicks`.
    ///
    /// `key` identifies the image content and may be used for caching
    /// embeddings between calls. `Ok(None)` means the backend found nothing.
    ///
    /// # Errors
    ///
    /// Any backend failure. Callers treat it as "no mask".
    fn segment(&mut self, image: &RgbImage, clicks: &[Click], key: &str)
        -> Result<Option<GrayImage>>;
}

impl<F> Segmenter for F
where
    F: FnMut(&RgbImage, &[Click], &str) -> Result<Option<GrayImage>> + Send,
{
    fn segment(
        &mut self,
        image: &RgbImage,
        clicks: &[Click],
        key: &str,
    ) -> Result<Option<GrayImage>> {
        self(image, clicks, key)
    }
}

/// Content key of an image: lowercase hex SHA-256 of its raw RGB bytes.
#[must_use]
pub fn content_key(image: &RgbImage) -> String {
    format!("{:x}", Sha256::digest(image.as_raw()))
}

/// Segmentation backend running an external program per request.
///
/// The program is invoked as
/// `<program> [args..] --image <png> --point x,y,label.. --key <hex> --output <png>`
/// and is expected to write a single-channel mask to the output path. Exiting
/// successfully without writing it means no object was found.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    program: PathBuf,
    args: Vec<String>,
    work_root: Option<PathBuf>,
}

impl CommandSegmenter {
    /// Wrap `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_root: None,
        }
    }

    /// Extra arguments placed before the request arguments.
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

    /// Program being run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Segmenter for CommandSegmenter {
    fn segment(
        &mut self,
        image: &RgbImage,
        clicks: &[Click],
        key: &str,
    ) -> Result<Option<GrayImage>> {
        let work = match &self.work_root {
            Some(root) => tempfile::tempdir_in(root)?,
            None => tempfile::tempdir()?,
        };
        let image_path = work.path().join("image.png");
        let mask_path = work.path().join("mask.png");
        image.save(&image_path)?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("--image").arg(&image_path);
        for click in clicks {
            command
                .arg("--point")
                .arg(format!("{},{},{}", click.x, click.y, click.label()));
        }
        command.arg("--key").arg(key).arg("--output").arg(&mask_path);

        tracing::debug!(program = %self.program.display(), clicks = clicks.len(), "running segmenter");
        let output = command.output()?;
        if !output.status.success() {
            return Err(Error::Segmentation(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if !mask_path.exists() {
            return Ok(None);
        }
        Ok(Some(image::open(&mask_path)?.to_luma8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_labels() {
        assert_eq!(Click::positive(3, 4).label(), 1);
        let negative = Click {
            positive: false,
            ..Click::positive(3, 4)
        };
        assert_eq!(negative.label(), 0);
    }

    #[test]
    fn content_key_is_stable_hex_sha256() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let key = content_key(&img);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key, content_key(&img.clone()));
    }

    #[test]
    fn content_key_changes_with_pixels() {
        let a = RgbImage::new(4, 4);
        let mut b = a.clone();
        b.put_pixel(0, 0, image::Rgb([1, 0, 0]));
        assert_ne!(content_key(&a), content_key(&b));
    }

    #[test]
    fn closures_are_segmenters() {
        let mut calls = 0;
        let mut seg = |img: &RgbImage, _: &[Click], _: &str| -> Result<Option<GrayImage>> {
            calls += 1;
            Ok(Some(GrayImage::new(img.width(), img.height())))
        };
        let img = RgbImage::new(2, 2);
        let mask = Segmenter::segment(&mut seg, &img, &[Click::positive(0, 0)], "k").unwrap();
        assert_eq!(mask.unwrap().dimensions(), (2, 2));
        assert_eq!(calls, 1);
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut seg = CommandSegmenter::new("/nonexistent/segmenter-binary");
        let img = RgbImage::new(2, 2);
        assert!(seg.segment(&img, &[Click::positive(0, 0)], "k").is_err());
    }

    #[cfg(unix)]
    fn shell_backend(bin: &Path, work: &Path, body: &str) -> CommandSegmenter {
        let script = bin.join("segment.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        CommandSegmenter::new("/bin/sh")
            .args([script.display().to_string()])
            .work_dir(work)
    }

    #[cfg(unix)]
    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[cfg(unix)]
    #[test]
    fn command_segmenter_passes_clicks_and_key() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let body = r#"
dir=$(dirname "$0")
printf '%s\n' "$@" > "$dir/args.txt"
while [ $# -gt 0 ]; do
  case "$1" in
    --image) img="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cp "$img" "$out"
"#;
        let mut seg = shell_backend(bin.path(), work.path(), body);
        let img = RgbImage::from_pixel(5, 3, image::Rgb([200, 200, 200]));
        let key = content_key(&img);

        let mask = seg.segment(&img, &[Click::positive(3, 1)], &key).unwrap();
        assert_eq!(mask.unwrap().dimensions(), (5, 3));

        let args = std::fs::read_to_string(bin.path().join("args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(args.len(), 8);
        assert_eq!(args[0], "--image");
        assert!(args[1].ends_with("image.png"));
        assert_eq!(&args[2..6], &["--point", "3,1,1", "--key", key.as_str()]);
        assert_eq!(args[6], "--output");
        assert!(args[7].ends_with("mask.png"));

        assert!(is_empty_dir(work.path()));
    }

    #[cfg(unix)]
    #[test]
    fn command_segmenter_without_mask_finds_nothing() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let mut seg = shell_backend(bin.path(), work.path(), "exit 0");

        let mask = seg
            .segment(&RgbImage::new(4, 4), &[Click::positive(1, 1)], "k")
            .unwrap();
        assert!(mask.is_none());
        assert!(is_empty_dir(work.path()));
    }

    #[cfg(unix)]
    #[test]
    fn command_segmenter_failure_is_reported() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let mut seg = shell_backend(bin.path(), work.path(), "echo 'no model' >&2\nexit 2");

        let result = seg.segment(&RgbImage::new(4, 4), &[Click::positive(1, 1)], "k");
        match result {
            Err(Error::Segmentation(message)) => assert!(message.contains("no model")),
            other => panic!("expected segmentation error, got {other:?}"),
        }
        assert!(is_empty_dir(work.path()));
    }
}
