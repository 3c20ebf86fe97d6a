use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use watermark_inpaint::{
    collect_images, default_output_path, BatchSummary, CommandInpainter, CommandSegmenter, Engine,
    HdStrategy, InpaintConfig, Inpainter, MaskPool, MaskPools, Outcome, OutputLayout, PoolTag,
    ProcessOptions, ProcessResult,
};

#[derive(Parser)]
#[command(
    name = "watermark-inpaint",
    about = "Remove watermarks in batch by pairing each image with a mask and inpainting it",
    version,
    after_help = "Without mask pools, watermark masks are detected automatically \
                  (segmentation backend if given, near-white contour heuristic otherwise).\n\
                  Images without a detectable watermark are skipped."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: PathBuf,

    /// Output file or directory (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mask pool for portrait images
    #[arg(long, value_name = "DIR")]
    portrait_masks: Option<PathBuf>,

    /// Mask pool for landscape images
    #[arg(long, value_name = "DIR")]
    landscape_masks: Option<PathBuf>,

    /// Mask pool for square images
    #[arg(long, value_name = "DIR")]
    square_masks: Option<PathBuf>,

    /// Mask pool used for every orientation without its own pool
    #[arg(long, value_name = "DIR")]
    masks: Option<PathBuf>,

    /// Save the mask used for each image under this directory
    #[arg(long, value_name = "DIR")]
    mask_dir: Option<PathBuf>,

    /// Save side-by-side original|restored images under this directory
    #[arg(long, value_name = "DIR")]
    compare_dir: Option<PathBuf>,

    /// Descend into subdirectories of the input directory
    #[arg(short, long)]
    recursive: bool,

    /// Decode, detect and encode images in parallel
    #[arg(long)]
    parallel: bool,

    /// iopaint executable used for inpainting
    #[arg(long, default_value = "iopaint")]
    iopaint: PathBuf,

    /// Inpainting model name
    #[arg(long, default_value = "lama")]
    model: String,

    /// Inpainting device
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Run LaMa in-process from this ONNX model instead of iopaint
    #[cfg(feature = "lama")]
    #[arg(long, value_name = "FILE")]
    lama_model: Option<PathBuf>,

    /// Point-prompted segmentation program used to refine detected masks
    #[arg(long, value_name = "PROGRAM")]
    segmenter: Option<PathBuf>,

    /// High-resolution strategy forwarded to the inpainter
    #[arg(long, value_enum, default_value = "crop")]
    hd_strategy: HdStrategy,

    /// Pixels of context kept around a crop
    #[arg(long, default_value = "128")]
    crop_margin: u32,

    /// Image size above which cropping activates
    #[arg(long, default_value = "800")]
    crop_trigger_size: u32,

    /// Maximum working resolution before downscaling
    #[arg(long, default_value = "1280")]
    resize_limit: u32,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if !cli.input.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input.display());
        process::exit(1);
    }

    let engine = match build_engine(&cli) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Fatal: Failed to initialize engine: {e}");
            process::exit(1);
        }
    };

    let summary = if cli.input.is_dir() {
        let output_dir = if let Some(o) = &cli.output {
            o.clone()
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: watermark-inpaint <input_dir> -o <output_dir>");
            process::exit(1);
        };
        let summary = run_batch(&cli, &engine, output_dir);
        if !cli.quiet {
            eprintln!();
            eprintln!("[Summary] {summary}");
        }
        summary
    } else {
        let output_path = match &cli.output {
            Some(o) => o.clone(),
            None => default_output_path(&cli.input),
        };
        let relative = PathBuf::from(cli.input.file_name().unwrap_or_default());
        let mut targets = output_layout(&cli, PathBuf::new()).targets(&relative);
        targets.output = output_path;
        let result = engine.process_file(&cli.input, &targets);
        if let Some(line) = result_line(&result, &cli) {
            eprintln!("{line}");
        }
        BatchSummary::from_results(&[result])
    };

    if summary.failed > 0 {
        process::exit(1);
    }
}

/// Process the input directory, reporting each image as it finishes.
fn run_batch(cli: &Cli, engine: &Engine, output_dir: PathBuf) -> BatchSummary {
    let images = match collect_images(&cli.input, cli.recursive) {
        Ok(images) => images,
        Err(e) => {
            eprintln!("Error: Failed to read directory {}: {e}", cli.input.display());
            process::exit(1);
        }
    };

    let progress = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(images.len() as u64)
    };
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let counts = Mutex::new(BatchSummary::default());
    let layout = output_layout(cli, output_dir);
    let opts = ProcessOptions {
        recursive: cli.recursive,
        parallel: cli.parallel,
    };
    let results = engine.process_images(&cli.input, &images, &layout, &opts, |result| {
        if let Some(line) = result_line(result, cli) {
            progress.suspend(|| eprintln!("{line}"));
        }
        if let Ok(mut counts) = counts.lock() {
            counts.record(result.outcome);
            progress.set_message(format!(
                "ok {} / skip {} / fail {}",
                counts.processed, counts.skipped, counts.failed
            ));
        }
        progress.inc(1);
    });
    progress.finish_and_clear();

    BatchSummary::from_results(&results)
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn output_layout(cli: &Cli, output_dir: PathBuf) -> OutputLayout {
    let mut layout = OutputLayout::new(output_dir);
    if let Some(dir) = &cli.mask_dir {
        layout = layout.with_mask_dir(dir);
    }
    if let Some(dir) = &cli.compare_dir {
        layout = layout.with_compare_dir(dir);
    }
    layout
}

fn build_engine(cli: &Cli) -> watermark_inpaint::Result<Engine> {
    let config = InpaintConfig {
        strategy: cli.hd_strategy,
        crop_margin: cli.crop_margin,
        crop_trigger_size: cli.crop_trigger_size,
        resize_limit: cli.resize_limit,
    };

    let mut engine = Engine::from_boxed(build_inpainter(cli)?).with_config(config);

    if let Some(pools) = mask_pools(cli) {
        if cli.segmenter.is_some() {
            tracing::warn!("--segmenter is ignored when mask pools are given");
        }
        engine = engine.with_mask_pools(pools);
    } else if let Some(program) = &cli.segmenter {
        engine = engine.with_segmenter(CommandSegmenter::new(program));
    }

    Ok(engine)
}

#[cfg_attr(not(feature = "lama"), allow(clippy::unnecessary_wraps))]
fn build_inpainter(cli: &Cli) -> watermark_inpaint::Result<Box<dyn Inpainter>> {
    #[cfg(feature = "lama")]
    if let Some(model_path) = &cli.lama_model {
        tracing::info!(model = %model_path.display(), "loading LaMa model");
        return Ok(Box::new(watermark_inpaint::LamaInpainter::new(model_path)?));
    }

    Ok(Box::new(
        CommandInpainter::new(&cli.iopaint)
            .model(&cli.model)
            .device(&cli.device),
    ))
}

/// Pools from the command line, or `None` to detect masks instead.
///
/// `--masks` is assigned explicitly to every orientation lacking its own pool.
fn mask_pools(cli: &Cli) -> Option<MaskPools> {
    let tagged = [
        (PoolTag::Portrait, &cli.portrait_masks),
        (PoolTag::Landscape, &cli.landscape_masks),
        (PoolTag::Square, &cli.square_masks),
    ];
    if cli.masks.is_none() && tagged.iter().all(|(_, dir)| dir.is_none()) {
        return None;
    }

    let mut pools = MaskPools::new();
    for (tag, dir) in tagged {
        if let Some(dir) = dir.as_ref().or(cli.masks.as_ref()) {
            pools.insert(open_pool(tag, dir));
        }
    }
    Some(pools)
}

fn open_pool(tag: PoolTag, dir: &Path) -> MaskPool {
    match MaskPool::open(tag, dir) {
        Ok(pool) => {
            if pool.is_empty() {
                tracing::warn!(pool = %tag, path = %dir.display(), "mask pool is empty");
            } else {
                tracing::debug!(pool = %tag, path = %dir.display(), masks = pool.len(), "mask pool ready");
            }
            pool
        }
        Err(e) => {
            tracing::error!(pool = %tag, path = %dir.display(), error = %e, "cannot read mask pool");
            MaskPool::empty(tag, dir)
        }
    }
}

/// Status line for `result`, or `None` when `--quiet` hides it.
fn result_line(result: &ProcessResult, cli: &Cli) -> Option<String> {
    if cli.quiet && result.outcome != Outcome::Failed {
        return None;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    let mut line = match result.outcome {
        Outcome::Skipped => format!("[SKIP] {filename}: {}", result.message),
        Outcome::Restored => match result.origin {
            Some(origin) => format!("[OK] {filename} ({origin} mask)"),
            None => format!("[OK] {filename}"),
        },
        Outcome::Failed => format!("[FAIL] {filename}: {}", result.message),
    };

    if cli.verbose && result.outcome == Outcome::Restored && !result.message.is_empty() {
        line.push_str(&format!("\n  -> {}", result.message));
    }
    Some(line)
}
