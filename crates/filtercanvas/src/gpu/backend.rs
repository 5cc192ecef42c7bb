use anyhow::Result;

use crate::backend::{FrameImage, RenderBackend};
use crate::error::CanvasError;
use crate::textures::TextureUpload;
use crate::types::{CanvasOptions, Color, FilterVariant, PixelFormat, SurfaceTarget};
use crate::uniforms::{FilterUniforms, Viewport};

use super::context::{texture_format, AcquiredTarget, GpuContext};
use super::pipeline::{FilterLayouts, GpuPipeline};
use super::readback;

/// A source frame resident on the GPU, ready to bind.
pub struct GpuTexture {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// Recorded commands plus the surface texture they draw into.
pub struct GpuFrame {
    commands: wgpu::CommandBuffer,
    target: AcquiredTarget,
}

pub struct GpuBackend {
    layouts: FilterLayouts,
    presented_offscreen: bool,
    context: GpuContext,
}

impl GpuBackend {
    pub fn new(target: SurfaceTarget, options: &CanvasOptions) -> Result<Self> {
        let context = GpuContext::new(target, options)?;
        let layouts = FilterLayouts::new(&context.device);
        Ok(Self {
            layouts,
            presented_offscreen: false,
            context,
        })
    }

    fn check_device(&self) -> Result<(), CanvasError> {
        match self.context.lost_reason() {
            Some(reason) => Err(CanvasError::GpuSubmissionFailed(reason)),
            None => Ok(()),
        }
    }

    /// Opens a validation scope inside an out-of-memory scope. Close with
    /// [`GpuBackend::pop_scopes`].
    fn push_scopes(&self) {
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Pops both scopes opened by [`GpuBackend::push_scopes`], blocking until
    /// the device reports. Both are popped even when the first one failed.
    fn pop_scopes(&self, what: &str) -> Result<(), CanvasError> {
        let validation = self.pop_scope(what, "validation");
        let allocation = self.pop_scope(what, "allocation");
        validation.and(allocation)
    }

    fn pop_scope(&self, what: &str, kind: &str) -> Result<(), CanvasError> {
        match pollster::block_on(self.context.device.pop_error_scope()) {
            Some(err) => Err(CanvasError::GpuSubmissionFailed(format!(
                "{what} {kind}: {err}"
            ))),
            None => Ok(()),
        }
    }
}

impl RenderBackend for GpuBackend {
    type Texture = GpuTexture;
    type Pipeline = GpuPipeline;
    type Frame = GpuFrame;

    fn max_texture_dimension(&self) -> u32 {
        self.context.max_texture_dimension
    }

    fn supports_format(&self, format: PixelFormat) -> bool {
        self.context.supports_format(format)
    }

    fn target_size(&self) -> (u32, u32) {
        self.context.size
    }

    fn create_texture(
        &mut self,
        label: &str,
        upload: &TextureUpload<'_>,
    ) -> Result<Self::Texture, CanvasError> {
        self.check_device()?;
        let device = &self.context.device;
        let size = wgpu::Extent3d {
            width: upload.width,
            height: upload.height,
            depth_or_array_layers: 1,
        };

        self.push_scopes();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(upload.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &upload.pixels[..upload.required_len()],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(upload.row_stride() as u32),
                rows_per_image: Some(upload.height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.layouts.bind_source(device, label, &view);
        self.pop_scopes("texture upload")?;

        Ok(GpuTexture {
            _texture: texture,
            bind_group,
        })
    }

    fn create_pipeline(&mut self, variant: FilterVariant) -> Result<Self::Pipeline, CanvasError> {
        self.check_device()?;
        let device = &self.context.device;
        self.push_scopes();
        let pipeline = GpuPipeline::new(
            device,
            &self.layouts,
            self.context.target_format,
            variant,
        );
        self.pop_scopes(&format!("building {variant} pipeline"))?;
        Ok(pipeline)
    }

    fn encode_frame(
        &mut self,
        pipeline: &Self::Pipeline,
        source: &Self::Texture,
        uniforms: &FilterUniforms,
        viewport: Viewport,
        clear: Color,
    ) -> Result<Self::Frame, CanvasError> {
        self.check_device()?;
        let target = self.context.acquire()?;

        self.push_scopes();
        self.context
            .queue
            .write_buffer(&self.layouts.params, 0, bytemuck::bytes_of(uniforms));

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("filter encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(clear.r),
                            g: f64::from(clear.g),
                            b: f64::from(clear.b),
                            a: f64::from(clear.a),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                0.0,
                1.0,
            );
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &source.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        let commands = encoder.finish();
        self.pop_scopes("frame encoding")?;

        Ok(GpuFrame { commands, target })
    }

    fn submit_frame(&mut self, frame: Self::Frame) -> Result<(), CanvasError> {
        self.push_scopes();
        self.context.queue.submit(Some(frame.commands));
        self.pop_scopes("frame submission")?;
        self.check_device()?;

        match frame.target {
            AcquiredTarget::Surface { frame, .. } => frame.present(),
            AcquiredTarget::Offscreen { .. } => self.presented_offscreen = true,
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
        self.presented_offscreen = false;
    }

    fn snapshot(&mut self) -> Result<Option<FrameImage>, CanvasError> {
        let Some(texture) = self.context.offscreen_texture() else {
            return Ok(None);
        };
        if !self.presented_offscreen {
            return Ok(None);
        }
        self.check_device()?;
        readback::read_rgba8(&self.context.device, &self.context.queue, texture).map(Some)
    }

    fn wait_idle(&mut self) {
        if let Err(err) = self.context.device.poll(wgpu::PollType::Wait) {
            tracing::warn!(error = %err, "failed waiting for GPU work to finish");
        }
    }
}
