//! The seam between canvas bookkeeping and the device that draws.
//!
//! [`crate::gpu::GpuBackend`] drives wgpu; [`crate::cpu::CpuBackend`] runs the
//! same filters in software so that canvas behaviour can be exercised on
//! machines without an adapter.

use crate::error::CanvasError;
use crate::textures::TextureUpload;
use crate::types::{Color, FilterVariant, PixelFormat};
use crate::uniforms::{FilterUniforms, Viewport};

pub trait RenderBackend {
    /// Device-side copy of an uploaded frame.
    type Texture;
    /// Compiled state for one filter variant.
    type Pipeline;
    /// Recorded but not yet submitted work for one frame.
    type Frame;

    fn max_texture_dimension(&self) -> u32;

    fn supports_format(&self, format: PixelFormat) -> bool;

    /// Current presentation target size in pixels.
    fn target_size(&self) -> (u32, u32);

    fn create_texture(
        &mut self,
        label: &str,
        upload: &TextureUpload<'_>,
    ) -> Result<Self::Texture, CanvasError>;

    fn create_pipeline(&mut self, variant: FilterVariant) -> Result<Self::Pipeline, CanvasError>;

    /// Records one filtered draw of `source` into `viewport`; everything
    /// outside it is cleared to `clear`.
    fn encode_frame(
        &mut self,
        pipeline: &Self::Pipeline,
        source: &Self::Texture,
        uniforms: &FilterUniforms,
        viewport: Viewport,
        clear: Color,
    ) -> Result<Self::Frame, CanvasError>;

    /// Submits and presents a recorded frame.
    fn submit_frame(&mut self, frame: Self::Frame) -> Result<(), CanvasError>;

    fn resize(&mut self, width: u32, height: u32);

    /// Reads back the last presented frame when the target allows it.
    fn snapshot(&mut self) -> Result<Option<FrameImage>, CanvasError>;

    /// Blocks until all submitted work has finished.
    fn wait_idle(&mut self);
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FrameImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = self.offset(x, y);
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let offset = self.offset(x, y);
        self.pixels[offset..offset + 4].copy_from_slice(&rgba);
    }
}
