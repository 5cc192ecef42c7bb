//! Software backend: runs the filters on the CPU into an in-memory target.

use crate::backend::{FrameImage, RenderBackend};
use crate::error::CanvasError;
use crate::filters::kernels;
use crate::textures::TextureUpload;
use crate::types::{Color, FilterVariant, PixelFormat};
use crate::uniforms::{FilterUniforms, Viewport};

/// Largest texture edge accepted, matching common mobile GPU limits.
pub const CPU_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Source pixels converted to RGBA8.
#[derive(Debug, Clone)]
pub struct CpuTexture {
    image: FrameImage,
}

impl CpuTexture {
    pub fn image(&self) -> &FrameImage {
        &self.image
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CpuPipeline {
    variant: FilterVariant,
}

#[derive(Debug)]
pub struct CpuBackend {
    width: u32,
    height: u32,
    presented: Option<FrameImage>,
    pipelines_built: usize,
    frames_submitted: u64,
    fail_next_submit: Option<String>,
    unsupported: Vec<PixelFormat>,
}

impl CpuBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            presented: None,
            pipelines_built: 0,
            frames_submitted: 0,
            fail_next_submit: None,
            unsupported: Vec::new(),
        }
    }

    /// Reports `format` as unsupported, like an adapter that cannot sample it.
    pub fn without_format(mut self, format: PixelFormat) -> Self {
        self.unsupported.push(format);
        self
    }

    pub fn pipelines_built(&self) -> usize {
        self.pipelines_built
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn presented(&self) -> Option<&FrameImage> {
        self.presented.as_ref()
    }

    /// Makes the next submission fail as if the device had been lost.
    pub fn fail_next_submit(&mut self, reason: impl Into<String>) {
        self.fail_next_submit = Some(reason.into());
    }
}

impl RenderBackend for CpuBackend {
    type Texture = CpuTexture;
    type Pipeline = CpuPipeline;
    type Frame = FrameImage;

    fn max_texture_dimension(&self) -> u32 {
        CPU_MAX_TEXTURE_DIMENSION
    }

    fn supports_format(&self, format: PixelFormat) -> bool {
        !self.unsupported.contains(&format)
    }

    fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn create_texture(
        &mut self,
        _label: &str,
        upload: &TextureUpload<'_>,
    ) -> Result<Self::Texture, CanvasError> {
        let mut pixels = upload.tight_pixels().into_owned();
        if upload.format == PixelFormat::Bgra8 {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        Ok(CpuTexture {
            image: FrameImage {
                width: upload.width,
                height: upload.height,
                pixels,
            },
        })
    }

    fn create_pipeline(&mut self, variant: FilterVariant) -> Result<Self::Pipeline, CanvasError> {
        self.pipelines_built += 1;
        Ok(CpuPipeline { variant })
    }

    fn encode_frame(
        &mut self,
        pipeline: &Self::Pipeline,
        source: &Self::Texture,
        uniforms: &FilterUniforms,
        viewport: Viewport,
        clear: Color,
    ) -> Result<Self::Frame, CanvasError> {
        let filtered = kernels::run(pipeline.variant, &source.image, uniforms);
        Ok(kernels::composite(
            &filtered,
            (self.width, self.height),
            viewport,
            clear,
        ))
    }

    fn submit_frame(&mut self, frame: Self::Frame) -> Result<(), CanvasError> {
        if let Some(reason) = self.fail_next_submit.take() {
            return Err(CanvasError::GpuSubmissionFailed(reason));
        }
        self.frames_submitted += 1;
        self.presented = Some(frame);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn snapshot(&mut self) -> Result<Option<FrameImage>, CanvasError> {
        Ok(self.presented.clone())
    }

    fn wait_idle(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_uploads_are_swizzled() {
        let mut backend = CpuBackend::new(4, 4);
        let pixels = [10u8, 20, 30, 255];
        let texture = backend
            .create_texture("a", &TextureUpload::new(&pixels, 1, 1))
            .unwrap();
        assert_eq!(texture.image().pixel(0, 0), [30, 20, 10, 255]);

        let texture = backend
            .create_texture(
                "b",
                &TextureUpload::new(&pixels, 1, 1).with_format(PixelFormat::Rgba8),
            )
            .unwrap();
        assert_eq!(texture.image().pixel(0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn injected_failure_applies_once() {
        let mut backend = CpuBackend::new(2, 2);
        backend.fail_next_submit("device lost");
        assert!(matches!(
            backend.submit_frame(FrameImage::new(2, 2)),
            Err(CanvasError::GpuSubmissionFailed(_))
        ));
        backend.submit_frame(FrameImage::new(2, 2)).unwrap();
        assert_eq!(backend.frames_submitted(), 1);
        assert!(backend.snapshot().unwrap().is_some());
    }
}
