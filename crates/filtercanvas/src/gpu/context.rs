use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};

use crate::error::CanvasError;
use crate::types::{CanvasOptions, GpuPowerPreference, PixelFormat, SurfaceTarget};

/// Format of the private texture used by offscreen canvases.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) enum RenderTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

/// The texture a frame is drawn into.
pub(crate) enum AcquiredTarget {
    Surface {
        frame: wgpu::SurfaceTexture,
        view: wgpu::TextureView,
    },
    Offscreen {
        view: wgpu::TextureView,
    },
}

impl AcquiredTarget {
    pub(crate) fn view(&self) -> &wgpu::TextureView {
        match self {
            AcquiredTarget::Surface { view, .. } | AcquiredTarget::Offscreen { view } => view,
        }
    }
}

pub(crate) struct GpuContext {
    _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub target: RenderTarget,
    pub target_format: wgpu::TextureFormat,
    pub size: (u32, u32),
    pub max_texture_dimension: u32,
    sampleable: Vec<PixelFormat>,
    lost: Arc<Mutex<Option<String>>>,
}

impl GpuContext {
    pub(crate) fn new(target: SurfaceTarget, options: &CanvasOptions) -> Result<Self> {
        let (width, height) = target.size();
        if width == 0 || height == 0 {
            bail!("surface size must be non-zero, got {width}x{height}");
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let surface = create_surface(&instance, &target)?;

        let power_preference = match options.power_preference {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            max_texture_dimension = limits.max_texture_dimension_2d,
            "selected GPU adapter"
        );

        let max_dimension = limits.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
            );
        }

        let sampleable = [PixelFormat::Bgra8, PixelFormat::Rgba8]
            .into_iter()
            .filter(|format| {
                adapter
                    .get_texture_format_features(texture_format(*format))
                    .allowed_usages
                    .contains(wgpu::TextureUsages::TEXTURE_BINDING)
            })
            .collect();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("filtercanvas device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let lost = Arc::new(Mutex::new(None));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            tracing::error!(?reason, %message, "GPU device lost");
            if let Ok(mut slot) = lost_flag.lock() {
                *slot = Some(format!("device lost ({reason:?}): {message}"));
            }
        });

        let (target, target_format) = match surface {
            Some(surface) => {
                let config = surface_config(&surface, &adapter, width, height, options)?;
                surface.configure(&device, &config);
                let format = config.format;
                (RenderTarget::Surface { surface, config }, format)
            }
            None => {
                let (texture, view) = create_offscreen(&device, width, height);
                (RenderTarget::Offscreen { texture, view }, OFFSCREEN_FORMAT)
            }
        };

        Ok(Self {
            _instance: instance,
            device,
            queue,
            target,
            target_format,
            size: (width, height),
            max_texture_dimension: max_dimension,
            sampleable,
            lost,
        })
    }

    pub(crate) fn supports_format(&self, format: PixelFormat) -> bool {
        self.sampleable.contains(&format)
    }

    pub(crate) fn lost_reason(&self) -> Option<String> {
        self.lost.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let width = width.min(self.max_texture_dimension);
        let height = height.min(self.max_texture_dimension);
        self.size = (width, height);
        match &mut self.target {
            RenderTarget::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            RenderTarget::Offscreen { texture, view } => {
                let (new_texture, new_view) = create_offscreen(&self.device, width, height);
                *texture = new_texture;
                *view = new_view;
            }
        }
        tracing::debug!(width, height, "render target resized");
    }

    /// Acquires the next texture to draw into. Lost or outdated surfaces are
    /// reconfigured once before giving up.
    pub(crate) fn acquire(&self) -> Result<AcquiredTarget, CanvasError> {
        let (surface, config) = match &self.target {
            RenderTarget::Offscreen { view, .. } => {
                return Ok(AcquiredTarget::Offscreen { view: view.clone() });
            }
            RenderTarget::Surface { surface, config } => (surface, config),
        };

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::warn!("surface lost or outdated; reconfiguring");
                surface.configure(&self.device, config);
                surface
                    .get_current_texture()
                    .map_err(|err| CanvasError::GpuSubmissionFailed(err.to_string()))?
            }
            Err(err) => return Err(CanvasError::GpuSubmissionFailed(err.to_string())),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(AcquiredTarget::Surface { frame, view })
    }

    pub(crate) fn offscreen_texture(&self) -> Option<&wgpu::Texture> {
        match &self.target {
            RenderTarget::Offscreen { texture, .. } => Some(texture),
            RenderTarget::Surface { .. } => None,
        }
    }
}

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn create_surface(
    instance: &wgpu::Instance,
    target: &SurfaceTarget,
) -> Result<Option<wgpu::Surface<'static>>> {
    let surface = match *target {
        SurfaceTarget::Offscreen { .. } => return Ok(None),
        SurfaceTarget::Window {
            display, window, ..
        } => unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display,
                raw_window_handle: window,
            })
        },
        #[cfg(any(target_os = "ios", target_os = "macos"))]
        SurfaceTarget::MetalLayer { layer, .. } => unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::CoreAnimationLayer(
                layer.as_ptr(),
            ))
        },
        #[cfg(not(any(target_os = "ios", target_os = "macos")))]
        SurfaceTarget::MetalLayer { .. } => {
            return Err(anyhow!("CAMetalLayer targets are only available on Apple platforms"));
        }
    };
    surface
        .map(Some)
        .context("failed to create rendering surface")
}

fn surface_config(
    surface: &wgpu::Surface<'static>,
    adapter: &wgpu::Adapter,
    width: u32,
    height: u32,
    options: &CanvasOptions,
) -> Result<wgpu::SurfaceConfiguration> {
    let caps = surface.get_capabilities(adapter);
    let fallback = *caps
        .formats
        .first()
        .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
    // Filters write display-referred values; keep the swapchain non-sRGB.
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .unwrap_or_else(|| {
            tracing::warn!(
                ?fallback,
                "no linear (non-sRGB) surface format available; falling back"
            );
            fallback
        });

    let fifo = caps
        .present_modes
        .iter()
        .copied()
        .find(|mode| *mode == wgpu::PresentMode::Fifo)
        .unwrap_or(wgpu::PresentMode::Fifo);
    let present_mode = if options.vsync {
        fifo
    } else {
        caps.present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Immediate)
            .or_else(|| {
                caps.present_modes
                    .iter()
                    .copied()
                    .find(|mode| *mode == wgpu::PresentMode::Mailbox)
            })
            .unwrap_or(fifo)
    };

    let desired_maximum_frame_latency = options.frame_latency.clamp(1, 3);
    if desired_maximum_frame_latency != options.frame_latency {
        tracing::warn!(
            requested = options.frame_latency,
            clamped = desired_maximum_frame_latency,
            "GPU frame latency clamped to valid range (1-3)"
        );
    }
    tracing::debug!(?format, ?present_mode, "configuring surface");

    Ok(wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width,
        height,
        present_mode,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency,
    })
}

fn create_offscreen(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}
