use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use canvasconfig::CanvasConfig;
use filtercanvas::{
    Canvas, CanvasOptions, CompletionCallback, CpuBackend, FilterVariant, FrameBudget,
    FrameOutcome, PixelFormat, RenderBackend, Rotation, SurfaceTarget, TextureUpload,
};
use image::RgbaImage;
use tracing_subscriber::EnvFilter;

use crate::cli::{BackendKind, RenderArgs};

const SOURCE_KEY: &str = "source";
const DEFAULT_PARAM: f32 = 0.5;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn list_filters() {
    println!("Filters:");
    for variant in FilterVariant::ALL {
        let range = variant.param_range();
        let unit = if range.scales_with_display {
            "px"
        } else {
            ""
        };
        println!(
            "  {:<2} {:<15} {}..{}{unit:<3} {}",
            variant.code(),
            variant.name(),
            range.min,
            range.max,
            variant.describe()
        );
    }
}

/// Everything `render` resolved from flags and the optional config file.
struct RenderJob {
    variant: FilterVariant,
    background: u32,
    param: f32,
    rotation: Rotation,
    frames: u32,
    source: RgbaImage,
}

#[derive(Debug, Default)]
struct RenderReport {
    presented: u32,
    throttled: u32,
    completed: u64,
}

pub fn render(args: RenderArgs) -> Result<()> {
    let config = args
        .config
        .as_deref()
        .map(load_config)
        .transpose()?;
    let options = resolve_options(&args, config.as_ref());
    let job = resolve_job(&args, config.as_ref())?;

    let (source_width, source_height) = job.source.dimensions();
    let (width, height) = match args.size {
        Some(size) => (size.width, size.height),
        None => job.rotation.apply_to_size(source_width, source_height),
    };
    tracing::info!(
        input = %args.input.display(),
        filter = %job.variant,
        param = job.param,
        width,
        height,
        backend = ?args.backend,
        "rendering"
    );

    let completed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&completed);
    let on_frame: CompletionCallback = Arc::new(move |index| {
        counter.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(frame = index, "frame completed");
    });

    let (mut report, snapshot) = match args.backend {
        BackendKind::Cpu => {
            let backend = CpuBackend::new(width, height);
            let canvas = Canvas::with_backend(backend, options, Some(on_frame));
            drive(canvas, &job)?
        }
        BackendKind::Gpu => {
            let canvas = Canvas::create(
                SurfaceTarget::Offscreen { width, height },
                options,
                Some(on_frame),
            )?;
            drive(canvas, &job)?
        }
    };
    report.completed = completed.load(Ordering::SeqCst);

    println!(
        "Rendered {} frame(s) with {}; throttled {}; callbacks {}",
        report.presented, job.variant, report.throttled, report.completed
    );

    if let Some(path) = &args.output {
        let Some(frame) = snapshot else {
            anyhow::bail!("no frame was presented; nothing to write to {}", path.display());
        };
        let image = RgbaImage::from_raw(frame.width, frame.height, frame.pixels)
            .context("snapshot buffer does not match its dimensions")?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<CanvasConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    CanvasConfig::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn resolve_options(args: &RenderArgs, config: Option<&CanvasConfig>) -> CanvasOptions {
    let mut options = config.map(CanvasOptions::from_config).unwrap_or_default();
    if let Some(budget) = args.budget {
        options = options.with_budget(FrameBudget::from_max_frames(budget));
    }
    if let Some(scale) = args.scale_factor {
        options = options.with_scale_factor(scale);
    }
    options
}

fn resolve_job(args: &RenderArgs, config: Option<&CanvasConfig>) -> Result<RenderJob> {
    let section = config.and_then(|config| config.filter.as_ref());
    let variant = args
        .filter
        .or_else(|| section.map(|filter| filter.variant.into()))
        .context("no filter selected; pass --filter or add a [filter] section to the config")?;
    let param = args
        .param
        .or_else(|| section.map(|filter| filter.param))
        .unwrap_or(DEFAULT_PARAM);
    let background = args
        .background
        .or_else(|| section.and_then(|filter| filter.background))
        .unwrap_or(0);

    let source = image::open(&args.input)
        .with_context(|| format!("failed to open image {}", args.input.display()))?
        .to_rgba8();

    Ok(RenderJob {
        variant,
        background,
        param,
        rotation: Rotation::from_degrees(args.rotation)?,
        frames: args.frames,
        source,
    })
}

fn drive<B: RenderBackend>(
    mut canvas: Canvas<B>,
    job: &RenderJob,
) -> Result<(RenderReport, Option<filtercanvas::FrameImage>)> {
    let (width, height) = job.source.dimensions();
    let upload =
        TextureUpload::new(job.source.as_raw(), width, height).with_format(PixelFormat::Rgba8);
    canvas.upsert_texture(SOURCE_KEY, &upload)?;
    canvas.set_rotation(job.rotation)?;
    canvas.configure_filter(job.variant, job.background, job.param)?;

    let mut report = RenderReport::default();
    for _ in 0..job.frames {
        match canvas.render_frame(SOURCE_KEY)? {
            FrameOutcome::Presented { .. } => report.presented += 1,
            FrameOutcome::Throttled(reason) => {
                tracing::debug!(%reason, "frame throttled");
                report.throttled += 1;
            }
        }
    }
    let snapshot = canvas.snapshot()?;
    Ok((report, snapshot))
}
