use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use filtercanvas::FilterVariant;

#[derive(Parser, Debug)]
#[command(
    name = "canvasdemo",
    author,
    version,
    about = "Runs still images through the filter canvas"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Filter an image and optionally export the last frame as PNG.
    Render(RenderArgs),
    /// List the filter catalogue.
    Filters,
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Source image (PNG, JPEG, BMP or GIF).
    #[arg(long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Filter to apply (`ascii_art`, `cross_hatch`, `edge_detection`); falls back to the config file.
    #[arg(long, value_name = "NAME", value_parser = parse_filter)]
    pub filter: Option<FilterVariant>,

    /// Normalized filter strength in [0, 1].
    #[arg(long, value_name = "P")]
    pub param: Option<f32>,

    /// Background colour as `#RRGGBB` or `#RRGGBBAA`.
    #[arg(long, value_name = "COLOR", value_parser = canvasconfig::parse_color)]
    pub background: Option<u32>,

    /// Number of frames to attempt.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub frames: u32,

    /// Lifetime frame budget (0 = unbounded); overrides the config file.
    #[arg(long, value_name = "N")]
    pub budget: Option<i64>,

    /// Output surface size (e.g. `1280x720`); defaults to the rotated image size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<SurfaceSize>,

    /// Clockwise source rotation in degrees (multiple of 90).
    #[arg(long, value_name = "DEG", default_value_t = 0, allow_negative_numbers = true)]
    pub rotation: i32,

    /// Display scale applied to pixel-sized filter parameters.
    #[arg(long, value_name = "SCALE")]
    pub scale_factor: Option<f32>,

    #[arg(long, value_enum, default_value_t = BackendKind::Cpu)]
    pub backend: BackendKind,

    /// Canvas configuration TOML.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the last presented frame to this PNG path.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Software reference renderer.
    Cpu,
    /// wgpu, rendering offscreen.
    Gpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_filter(value: &str) -> Result<FilterVariant, String> {
    value.parse().map_err(|err: filtercanvas::CanvasError| err.to_string())
}

fn parse_surface_size(spec: &str) -> Result<SurfaceSize, String> {
    let (width, height) = spec
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;
    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".into());
    }
    Ok(SurfaceSize { width, height })
}
