use scheduler::{Admission, CompletionCallback, FramePermit, FrameScheduler, SchedulerError};

use crate::backend::{FrameImage, RenderBackend};
use crate::error::CanvasError;
use crate::filters::{FilterConfig, FilterPipelineSet};
use crate::gpu::GpuBackend;
use crate::textures::{TextureInfo, TextureRegistry, TextureUpload};
use crate::types::{
    CanvasOptions, Color, FilterVariant, FrameOutcome, Rotation, SurfaceTarget,
};

/// One host view's filtered output: source textures, the active filter and
/// the frame budget, drawn through backend `B`.
///
/// Every operation takes `&mut self`, so uploads, removals and renders are
/// strictly ordered. After a GPU submission failure the canvas is disabled
/// and every operation reports [`CanvasError::CanvasDisabled`].
pub struct Canvas<B: RenderBackend = GpuBackend> {
    filters: FilterPipelineSet<B::Pipeline>,
    textures: TextureRegistry<B::Texture>,
    scheduler: FrameScheduler,
    rotation: Rotation,
    scale_factor: f32,
    disabled: Option<String>,
    // Declared last so textures and pipelines go first.
    backend: B,
}

impl Canvas<GpuBackend> {
    /// Binds a GPU surface for `target`.
    pub fn create(
        target: SurfaceTarget,
        options: CanvasOptions,
        on_frame: Option<CompletionCallback>,
    ) -> Result<Self, CanvasError> {
        let (width, height) = target.size();
        if width == 0 || height == 0 {
            return Err(CanvasError::SurfaceInitFailed(format!(
                "surface size must be non-zero, got {width}x{height}"
            )));
        }
        let backend = GpuBackend::new(target, &options)
            .map_err(|err| CanvasError::SurfaceInitFailed(format!("{err:#}")))?;
        Ok(Self::with_backend(backend, options, on_frame))
    }
}

impl<B: RenderBackend> Canvas<B> {
    pub fn with_backend(
        backend: B,
        options: CanvasOptions,
        on_frame: Option<CompletionCallback>,
    ) -> Self {
        let (width, height) = backend.target_size();
        tracing::info!(
            width,
            height,
            budget = ?options.budget,
            scale_factor = options.effective_scale(),
            "canvas created"
        );
        Self {
            filters: FilterPipelineSet::new(),
            textures: TextureRegistry::new(),
            scheduler: FrameScheduler::new(options.budget, on_frame),
            rotation: Rotation::default(),
            scale_factor: options.effective_scale(),
            disabled: None,
            backend,
        }
    }

    /// Selects the filter to apply on subsequent frames. `background` is
    /// packed `0xAARRGGBB`; zero alpha means none.
    pub fn configure_filter(
        &mut self,
        variant: FilterVariant,
        background: u32,
        param: f32,
    ) -> Result<FilterConfig, CanvasError> {
        self.ensure_enabled()?;
        let background = Color::background_from_argb(background);
        let config = self
            .filters
            .select(&mut self.backend, variant, param, background)
            .map_err(|err| self.fail(err))?;
        tracing::debug!(
            %variant,
            param = config.param(),
            has_background = background.is_some(),
            "filter configured"
        );
        Ok(config)
    }

    /// Adjusts the active filter's parameter without touching anything else.
    pub fn update_filter_param(&mut self, param: f32) -> Result<FilterConfig, CanvasError> {
        self.ensure_enabled()?;
        self.filters.set_param(param)
    }

    pub fn upsert_texture(
        &mut self,
        key: &str,
        upload: &TextureUpload<'_>,
    ) -> Result<TextureInfo, CanvasError> {
        self.ensure_enabled()?;
        self.textures
            .upsert(&mut self.backend, key, upload)
            .map_err(|err| self.fail(err))
    }

    /// Returns whether a texture was registered under `key`.
    pub fn remove_texture(&mut self, key: &str) -> Result<bool, CanvasError> {
        self.ensure_enabled()?;
        Ok(self.textures.remove(key))
    }

    /// Draws the active filter over the texture at `key` and presents it.
    ///
    /// A missing filter or texture fails before any budget is used. A spent
    /// budget yields [`FrameOutcome::Throttled`] with no side effects. Budget
    /// consumed by a frame that then fails is not returned.
    pub fn render_frame(&mut self, key: &str) -> Result<FrameOutcome, CanvasError> {
        self.ensure_enabled()?;
        if self.filters.active().is_none() {
            return Err(CanvasError::NoActiveFilter);
        }
        let source = self.textures.resolve(key)?;

        let permit = match self.scheduler.try_consume_budget() {
            Admission::Granted(permit) => permit,
            Admission::Denied(throttle) => {
                tracing::debug!(key, %throttle, "frame throttled");
                return Ok(FrameOutcome::Throttled(throttle));
            }
        };

        let in_flight = InFlightFrame {
            scheduler: &mut self.scheduler,
            permit: Some(permit),
        };
        let drawn = self
            .filters
            .apply(&mut self.backend, source, self.rotation, self.scale_factor)
            .and_then(|frame| self.backend.submit_frame(frame));
        if let Err(err) = drawn {
            drop(in_flight);
            return Err(self.fail(err));
        }

        let frame_index = in_flight.complete()?;
        tracing::trace!(key, frame_index, "frame presented");
        Ok(FrameOutcome::Presented { frame_index })
    }

    /// Resizes the presentation target; zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), CanvasError> {
        self.ensure_enabled()?;
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "ignoring zero-sized resize");
            return Ok(());
        }
        self.backend.resize(width, height);
        Ok(())
    }

    /// Rotation applied to every source before filtering (sensor orientation).
    pub fn set_rotation(&mut self, rotation: Rotation) -> Result<(), CanvasError> {
        self.ensure_enabled()?;
        self.rotation = rotation;
        Ok(())
    }

    /// The last presented frame, when the target can be read back.
    pub fn snapshot(&mut self) -> Result<Option<FrameImage>, CanvasError> {
        self.ensure_enabled()?;
        self.backend.snapshot().map_err(|err| self.fail(err))
    }

    pub fn frames_produced(&self) -> u64 {
        self.scheduler.frames_produced()
    }

    /// Frames still allowed by a lifetime budget.
    pub fn remaining_frames(&self) -> Option<u64> {
        self.scheduler.remaining()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    pub fn active_filter(&self) -> Option<FilterConfig> {
        self.filters.active().copied()
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn texture_info(&self, key: &str) -> Option<TextureInfo> {
        self.textures.info(key)
    }

    pub fn texture_keys(&self) -> Vec<&str> {
        self.textures.keys()
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.backend.target_size()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Disables the canvas as if the GPU had failed; later calls report
    /// [`CanvasError::CanvasDisabled`] with `reason`.
    pub fn disable(&mut self, reason: impl Into<String>) {
        if self.disabled.is_none() {
            let reason = reason.into();
            tracing::error!(%reason, "canvas disabled");
            self.disabled = Some(reason);
        }
    }

    fn ensure_enabled(&self) -> Result<(), CanvasError> {
        match &self.disabled {
            Some(reason) => Err(CanvasError::CanvasDisabled(reason.clone())),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: CanvasError) -> CanvasError {
        if err.is_fatal() && self.disabled.is_none() {
            tracing::error!(error = %err, "disabling canvas after GPU failure");
            self.disabled = Some(err.to_string());
        }
        err
    }
}

/// An admitted frame. Dropping it without [`InFlightFrame::complete`],
/// including while unwinding, returns the scheduler to idle.
struct InFlightFrame<'a> {
    scheduler: &'a mut FrameScheduler,
    permit: Option<FramePermit>,
}

impl InFlightFrame<'_> {
    fn complete(mut self) -> Result<u64, SchedulerError> {
        let permit = self.permit.take().ok_or(SchedulerError::StalePermit(0))?;
        self.scheduler.mark_presented(&permit)?;
        self.scheduler.record_completion(permit)
    }
}

impl Drop for InFlightFrame<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.scheduler.abort(permit);
        }
    }
}

impl<B: RenderBackend> Drop for Canvas<B> {
    fn drop(&mut self) {
        self.backend.wait_idle();
        tracing::debug!(
            frames = self.scheduler.frames_produced(),
            textures = self.textures.len(),
            "canvas released"
        );
    }
}
