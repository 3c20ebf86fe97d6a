use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{GrayImage, Luma, Rgb, RgbImage};
use watermark_inpaint::segmentation::Click;
use watermark_inpaint::{
    BatchSummary, Engine, Error, InpaintConfig, MaskOrigin, MaskPool, MaskPools, Orientation,
    Outcome, OutputLayout, OutputTargets, PoolTag, ProcessOptions, Result,
};

/// Paints every masked pixel black.
fn blackout(image: &RgbImage, mask: &GrayImage, _: &InpaintConfig) -> Result<RgbImage> {
    let mut out = image.clone();
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] != 0 {
            out.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    Ok(out)
}

fn watermarked(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (20..44).contains(&x) && (10..30).contains(&y) {
            Rgb([245, 245, 245])
        } else {
            Rgb([30, 90, 160])
        }
    })
}

fn clean(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([30, 90, 160]))
}

fn centered_square_mask() -> GrayImage {
    GrayImage::from_fn(100, 100, |x, y| {
        if (25..75).contains(&x) && (25..75).contains(&y) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

#[test]
fn landscape_image_takes_resized_landscape_mask() {
    let masks = tempfile::tempdir().unwrap();
    centered_square_mask()
        .save(masks.path().join("mask.png"))
        .unwrap();
    let pools = MaskPools::new().with(MaskPool::open(PoolTag::Landscape, masks.path()).unwrap());
    let engine = Engine::new(blackout).with_mask_pools(pools);

    let image = clean(800, 600);
    let (mask, origin) = engine.acquire_mask(&image).unwrap().unwrap();

    assert_eq!(origin, MaskOrigin::Pool(Orientation::Landscape));
    assert_eq!(mask.dimensions(), (800, 600));
    assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 400 * 300);
    assert_eq!(mask.get_pixel(400, 300)[0], 255);
    assert_eq!(mask.get_pixel(100, 300)[0], 0);
    assert_eq!(mask.get_pixel(400, 50)[0], 0);
}

#[test]
fn clean_image_is_skipped_without_outputs() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let path = input.path().join("clean.png");
    clean(64, 48).save(&path).unwrap();

    let engine = Engine::new(blackout);
    let targets = OutputTargets {
        output: output.path().join("out/clean.png"),
        mask: Some(output.path().join("masks/clean.png")),
        compare: Some(output.path().join("compare/clean.png")),
    };
    let result = engine.process_file(&path, &targets);

    assert_eq!(result.outcome, Outcome::Skipped);
    assert!(result.origin.is_none());
    assert!(!targets.output.exists());
    assert!(!targets.compare.unwrap().exists());
    assert!(!targets.mask.unwrap().exists());
}

#[test]
fn failing_segmenter_still_yields_heuristic_mask() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let engine = Engine::new(blackout).with_segmenter(
        move |_: &RgbImage, clicks: &[Click], _: &str| -> Result<Option<GrayImage>> {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(clicks.len(), 1);
            Err(Error::Segmentation("out of memory".to_string()))
        },
    );

    let restoration = engine.restore(&watermarked(64, 48)).unwrap().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(restoration.origin, MaskOrigin::Heuristic);
    assert_eq!(*restoration.image.get_pixel(30, 20), Rgb([0, 0, 0]));
}

fn mixed_batch(input: &std::path::Path) {
    watermarked(64, 48).save(input.join("a.png")).unwrap();
    std::fs::write(input.join("b.png"), b"not an image").unwrap();
    clean(64, 48).save(input.join("c.png")).unwrap();
    watermarked(80, 60).save(input.join("d.jpg")).unwrap();
    watermarked(48, 48).save(input.join("e.png")).unwrap();
}

const MIXED_OUTCOMES: [Outcome; 5] = [
    Outcome::Restored,
    Outcome::Failed,
    Outcome::Skipped,
    Outcome::Restored,
    Outcome::Failed,
];

#[test]
fn batch_continues_past_bad_images() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    mixed_batch(input.path());

    let engine = Engine::new(
        |image: &RgbImage, mask: &GrayImage, config: &InpaintConfig| -> Result<RgbImage> {
            if image.width() == 48 {
                return Err(Error::Inpaint("model returned nothing".to_string()));
            }
            blackout(image, mask, config)
        },
    );
    let layout = OutputLayout::new(output.path().join("out"));
    let results = engine.process_directory(input.path(), &layout, &ProcessOptions::default());

    let outcomes: Vec<Outcome> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, MIXED_OUTCOMES);
    assert!(results[1].message.contains("b.png"));

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.processed, results.len() - 3);
    assert!(output.path().join("out/a.png").exists());
    assert!(output.path().join("out/d.jpg").exists());
    assert!(!output.path().join("out/c.png").exists());
    assert!(!output.path().join("out/e.png").exists());
}

#[test]
fn outputs_mirror_input_tree() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(input.path().join("set/one")).unwrap();
    watermarked(64, 48)
        .save(input.path().join("set/one/photo.png"))
        .unwrap();
    watermarked(64, 48).save(input.path().join("top.png")).unwrap();

    let engine = Engine::new(blackout);
    let layout = OutputLayout::new(output.path().join("out"))
        .with_mask_dir(output.path().join("masks"))
        .with_compare_dir(output.path().join("compare"));
    let opts = ProcessOptions {
        recursive: true,
        ..ProcessOptions::default()
    };
    let results = engine.process_directory(input.path(), &layout, &opts);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome == Outcome::Restored));

    let restored = image::open(output.path().join("out/set/one/photo.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(restored.dimensions(), (64, 48));
    assert_eq!(*restored.get_pixel(30, 20), Rgb([0, 0, 0]));

    let mask = image::open(output.path().join("masks/set/one/photo.png"))
        .unwrap()
        .to_luma8();
    assert_eq!(mask.get_pixel(30, 20)[0], 255);

    let compare = image::open(output.path().join("compare/top.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(compare.dimensions(), (128, 48));
    assert_eq!(*compare.get_pixel(30, 20), Rgb([245, 245, 245]));
    assert_eq!(*compare.get_pixel(64 + 30, 20), Rgb([0, 0, 0]));
}

#[test]
fn non_recursive_batch_ignores_subdirectories() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir(input.path().join("nested")).unwrap();
    watermarked(64, 48)
        .save(input.path().join("nested/inner.png"))
        .unwrap();

    let engine = Engine::new(blackout);
    let layout = OutputLayout::new(output.path());
    let results = engine.process_directory(input.path(), &layout, &ProcessOptions::default());
    assert!(results.is_empty());
}

#[test]
fn missing_input_directory_is_reported() {
    let engine = Engine::new(blackout);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent");
    let results = engine.process_directory(
        &missing,
        &OutputLayout::new(dir.path().join("out")),
        &ProcessOptions::default(),
    );
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::Failed);
    assert_eq!(results[0].path, missing);
}

#[test]
fn images_without_a_pool_fail_individually() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let masks = tempfile::tempdir().unwrap();
    centered_square_mask()
        .save(masks.path().join("mask.png"))
        .unwrap();
    clean(80, 60).save(input.path().join("landscape.png")).unwrap();
    clean(60, 80).save(input.path().join("portrait.png")).unwrap();

    let pools = MaskPools::new().with(MaskPool::open(PoolTag::Landscape, masks.path()).unwrap());
    let engine = Engine::new(blackout).with_mask_pools(pools);
    let results = engine.process_directory(
        input.path(),
        &OutputLayout::new(output.path()),
        &ProcessOptions::default(),
    );

    assert_eq!(results[0].outcome, Outcome::Restored);
    assert_eq!(
        results[0].origin,
        Some(MaskOrigin::Pool(Orientation::Landscape))
    );
    assert_eq!(results[1].outcome, Outcome::Failed);
    assert!(results[1].message.contains("portrait"));
    assert!(output.path().join("landscape.png").exists());
    assert!(!output.path().join("portrait.png").exists());
}

#[test]
fn mask_pool_is_unchanged_after_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let masks = tempfile::tempdir().unwrap();
    centered_square_mask()
        .save(masks.path().join("only.png"))
        .unwrap();
    for name in ["one.png", "two.png", "three.png"] {
        clean(90, 60).save(input.path().join(name)).unwrap();
    }

    let pools = MaskPools::new().with(MaskPool::open(PoolTag::Landscape, masks.path()).unwrap());
    let engine = Engine::new(blackout).with_mask_pools(pools);
    let results = engine.process_directory(
        input.path(),
        &OutputLayout::new(output.path()),
        &ProcessOptions::default(),
    );

    assert!(results.iter().all(|r| r.outcome == Outcome::Restored));
    let remaining: Vec<_> = std::fs::read_dir(masks.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(remaining, vec![std::ffi::OsString::from("only.png")]);
}

#[cfg(feature = "cli")]
#[test]
fn parallel_batch_matches_sequential_and_serializes_backend() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    mixed_batch(input.path());
    for i in 0..8 {
        watermarked(64, 48)
            .save(input.path().join(format!("z{i}.png")))
            .unwrap();
    }

    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));
    let (b, o, c) = (Arc::clone(&busy), Arc::clone(&overlapped), Arc::clone(&calls));
    let engine = Engine::new(
        move |image: &RgbImage, mask: &GrayImage, config: &InpaintConfig| -> Result<RgbImage> {
            if b.swap(true, Ordering::SeqCst) {
                o.store(true, Ordering::SeqCst);
            }
            c.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            let result = if image.width() == 48 {
                Err(Error::Inpaint("model returned nothing".to_string()))
            } else {
                blackout(image, mask, config)
            };
            b.store(false, Ordering::SeqCst);
            result
        },
    );

    let layout = OutputLayout::new(output.path().join("out"));
    let opts = ProcessOptions {
        parallel: true,
        ..ProcessOptions::default()
    };
    let results = engine.process_directory(input.path(), &layout, &opts);

    assert_eq!(results.len(), 13);
    let outcomes: Vec<Outcome> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes[..5], MIXED_OUTCOMES);
    assert!(outcomes[5..].iter().all(|o| *o == Outcome::Restored));
    assert!(results.windows(2).all(|w| w[0].path < w[1].path));

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.processed, results.len() - 3);
    assert_eq!(calls.load(Ordering::SeqCst), 11);
    assert!(!overlapped.load(Ordering::SeqCst));
    assert!(output.path().join("out/z7.png").exists());
}

#[cfg(feature = "cli")]
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

#[cfg(feature = "cli")]
impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "cli")]
#[test]
fn segmentation_fallback_warning_names_the_image() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let path = input.path().join("marked.png");
    watermarked(64, 48).save(&path).unwrap();

    let engine = Engine::new(blackout).with_segmenter(
        |_: &RgbImage, _: &[Click], _: &str| -> Result<Option<GrayImage>> {
            Err(Error::Segmentation("backend offline".to_string()))
        },
    );

    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        engine.process_file(&path, &OutputTargets::new(output.path().join("marked.png")))
    });
    assert_eq!(result.outcome, Outcome::Restored);

    let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    let warning = text
        .lines()
        .find(|line| line.contains("segmentation failed"))
        .unwrap();
    assert!(warning.contains("marked.png"));
    assert!(warning.contains("backend offline"));
}
