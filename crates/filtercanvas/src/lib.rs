//! GPU image-filter canvas.
//!
//! A [`Canvas`] takes raw camera frames registered under string keys, runs one
//! of a small catalogue of stylising filters over them (ASCII art, cross
//! hatching, Sobel edges) and presents the result into a host-provided
//! surface, while enforcing a frame budget and notifying the host after each
//! completed frame.
//!
//! Rendering goes through a [`RenderBackend`]: [`GpuBackend`] uses wgpu, and
//! [`CpuBackend`] is a deterministic software reference of the same filters.

pub mod backend;
mod canvas;
pub mod compile;
pub mod cpu;
mod error;
pub mod filters;
pub mod gpu;
pub mod textures;
mod types;
pub mod uniforms;

pub use backend::{FrameImage, RenderBackend};
pub use canvas::Canvas;
pub use cpu::CpuBackend;
pub use error::CanvasError;
pub use filters::{FilterConfig, FilterPipelineSet};
pub use gpu::GpuBackend;
pub use scheduler::{CompletionCallback, FrameBudget, Throttle};
pub use textures::{TextureInfo, TextureRegistry, TextureUpload};
pub use types::{
    clamp_unit, CanvasOptions, Color, FilterVariant, FrameOutcome, GpuPowerPreference,
    ParamRange, PixelFormat, Rotation, SurfaceTarget,
};
