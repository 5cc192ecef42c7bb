use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use canvasconfig::{CanvasConfig, FilterName, PowerSetting};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use scheduler::FrameBudget;

use crate::error::CanvasError;

/// Filters the canvas knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterVariant {
    AsciiArt,
    CrossHatch,
    EdgeDetection,
}

impl FilterVariant {
    pub const ALL: [FilterVariant; 3] = [
        FilterVariant::AsciiArt,
        FilterVariant::CrossHatch,
        FilterVariant::EdgeDetection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterVariant::AsciiArt => "ascii_art",
            FilterVariant::CrossHatch => "cross_hatch",
            FilterVariant::EdgeDetection => "edge_detection",
        }
    }

    /// Numeric code used across the C ABI.
    pub fn code(self) -> u32 {
        match self {
            FilterVariant::AsciiArt => 0,
            FilterVariant::CrossHatch => 1,
            FilterVariant::EdgeDetection => 2,
        }
    }

    /// Physical range the normalized parameter maps onto.
    pub fn param_range(self) -> ParamRange {
        match self {
            FilterVariant::AsciiArt => ParamRange::pixels(8.0, 64.0),
            FilterVariant::CrossHatch => ParamRange::pixels(10.0, 64.0),
            FilterVariant::EdgeDetection => ParamRange::absolute(0.05, 0.33),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            FilterVariant::AsciiArt => "glyph mosaic; param sets the cell size",
            FilterVariant::CrossHatch => "pen hatching by luminance; param sets line spacing",
            FilterVariant::EdgeDetection => "Sobel edges; param sets the suppression threshold",
        }
    }
}

impl fmt::Display for FilterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u32> for FilterVariant {
    type Error = CanvasError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        FilterVariant::ALL
            .into_iter()
            .find(|variant| variant.code() == code)
            .ok_or_else(|| CanvasError::UnknownVariant(code.to_string()))
    }
}

impl FromStr for FilterVariant {
    type Err = CanvasError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "asciiart" | "ascii" => Ok(FilterVariant::AsciiArt),
            "crosshatch" | "hatch" => Ok(FilterVariant::CrossHatch),
            "edgedetection" | "edge" | "edges" => Ok(FilterVariant::EdgeDetection),
            _ => Err(CanvasError::UnknownVariant(raw.to_string())),
        }
    }
}

impl From<FilterName> for FilterVariant {
    fn from(name: FilterName) -> Self {
        match name {
            FilterName::AsciiArt => FilterVariant::AsciiArt,
            FilterName::CrossHatch => FilterVariant::CrossHatch,
            FilterName::EdgeDetection => FilterVariant::EdgeDetection,
        }
    }
}

/// Linear mapping from the normalized `[0, 1]` parameter to a filter unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    /// Whether the range is expressed in pixels and scales with the display.
    pub scales_with_display: bool,
}

impl ParamRange {
    const fn pixels(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            scales_with_display: true,
        }
    }

    const fn absolute(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            scales_with_display: false,
        }
    }

    pub fn resolve(&self, normalized: f32, scale_factor: f32) -> f32 {
        let t = clamp_unit(normalized);
        let value = self.min + t * (self.max - self.min);
        if self.scales_with_display {
            value * scale_factor
        } else {
            value
        }
    }
}

/// Clamps into `[0, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Pixel layouts accepted for uploaded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// Camera frames arrive as BGRA.
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: u32 = 4;

    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Bgra8 => 0,
            PixelFormat::Rgba8 => 1,
        }
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = CanvasError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PixelFormat::Bgra8),
            1 => Ok(PixelFormat::Rgba8),
            other => Err(CanvasError::UnsupportedFormat(format!(
                "pixel format code {other}"
            ))),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgra8 => f.write_str("bgra8"),
            PixelFormat::Rgba8 => f.write_str("rgba8"),
        }
    }
}

/// Straight-alpha colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Decodes a packed `0xAARRGGBB` background; zero alpha means none.
    pub fn background_from_argb(packed: u32) -> Option<Color> {
        let a = (packed >> 24) & 0xFF;
        if a == 0 {
            return None;
        }
        let channel = |shift: u32| ((packed >> shift) & 0xFF) as f32 / 255.0;
        Some(Color::new(channel(16), channel(8), channel(0), a as f32 / 255.0))
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [
            quantize(self.r),
            quantize(self.g),
            quantize(self.b),
            quantize(self.a),
        ]
    }
}

/// Quarter-turn rotation applied to the source before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative angles.
    pub fn from_degrees(degrees: i32) -> Result<Self, CanvasError> {
        if degrees % 90 != 0 {
            return Err(CanvasError::InvalidArgument(format!(
                "rotation must be a multiple of 90 degrees, got {degrees}"
            )));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            _ => Rotation::Deg270,
        })
    }

    pub fn quarter_turns(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    /// Size of a `width x height` source once rotated.
    pub fn apply_to_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.quarter_turns() % 2 == 1 {
            (height, width)
        } else {
            (width, height)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

impl From<PowerSetting> for GpuPowerPreference {
    fn from(setting: PowerSetting) -> Self {
        match setting {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        }
    }
}

/// Creation-time knobs for a canvas.
#[derive(Debug, Clone)]
pub struct CanvasOptions {
    pub budget: FrameBudget,
    /// Display scale (points to pixels); multiplies pixel-based filter params.
    pub scale_factor: f32,
    pub power_preference: GpuPowerPreference,
    pub frame_latency: u32,
    pub vsync: bool,
}

impl Default for CanvasOptions {
    fn default() -> Self {
        Self {
            budget: FrameBudget::Unbounded,
            scale_factor: 1.0,
            power_preference: GpuPowerPreference::default(),
            frame_latency: 2,
            vsync: true,
        }
    }
}

impl CanvasOptions {
    pub fn from_config(config: &CanvasConfig) -> Self {
        Self {
            budget: FrameBudget::from_config(&config.budget),
            scale_factor: config.scale_factor(),
            power_preference: config.gpu.power.into(),
            frame_latency: config.gpu.latency,
            vsync: config.gpu.vsync,
        }
    }

    pub fn with_budget(mut self, budget: FrameBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub(crate) fn effective_scale(&self) -> f32 {
        if self.scale_factor.is_finite() && self.scale_factor > 0.0 {
            self.scale_factor
        } else {
            1.0
        }
    }
}

/// Where a GPU canvas presents its frames.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// Render into a private texture that can be read back with `snapshot`.
    Offscreen { width: u32, height: u32 },
    /// Native window handles, e.g. an Android `ANativeWindow`.
    Window {
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    },
    /// A `CAMetalLayer` owned by the host view.
    MetalLayer {
        layer: NonNull<c_void>,
        width: u32,
        height: u32,
    },
}

impl SurfaceTarget {
    pub fn size(&self) -> (u32, u32) {
        match *self {
            SurfaceTarget::Offscreen { width, height }
            | SurfaceTarget::Window { width, height, .. }
            | SurfaceTarget::MetalLayer { width, height, .. } => (width, height),
        }
    }

    pub fn is_offscreen(&self) -> bool {
        matches!(self, SurfaceTarget::Offscreen { .. })
    }
}

/// What happened to a render request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame_index: u64 },
    Throttled(scheduler::Throttle),
}

impl FrameOutcome {
    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented { .. })
    }
}
