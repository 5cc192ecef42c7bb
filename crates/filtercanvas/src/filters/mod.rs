//! Filter catalogue, active configuration and per-variant pipeline cache.

pub mod kernels;

use std::collections::HashMap;

use crate::backend::RenderBackend;
use crate::error::CanvasError;
use crate::textures::TextureEntry;
use crate::types::{clamp_unit, Color, FilterVariant, Rotation};
use crate::uniforms::{FilterUniforms, Viewport};

/// The currently selected filter and its settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    variant: FilterVariant,
    param: f32,
    background: Option<Color>,
}

impl FilterConfig {
    /// `param` is normalized and clamped into `[0, 1]`.
    pub fn new(variant: FilterVariant, param: f32, background: Option<Color>) -> Self {
        Self {
            variant,
            param: clamp_unit(param),
            background,
        }
    }

    pub fn variant(&self) -> FilterVariant {
        self.variant
    }

    pub fn param(&self) -> f32 {
        self.param
    }

    pub fn background(&self) -> Option<Color> {
        self.background
    }

    /// Parameter in the variant's own unit, scaled for the display.
    pub fn physical_param(&self, scale_factor: f32) -> f32 {
        self.variant.param_range().resolve(self.param, scale_factor)
    }

    /// Colour for target pixels the filtered image does not cover.
    pub fn clear_color(&self) -> Color {
        self.background.unwrap_or(Color::BLACK)
    }
}

/// Pipelines are built the first time a variant is selected and kept for the
/// lifetime of the set.
pub struct FilterPipelineSet<P> {
    pipelines: HashMap<FilterVariant, P>,
    active: Option<FilterConfig>,
}

impl<P> Default for FilterPipelineSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> FilterPipelineSet<P> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            active: None,
        }
    }

    /// Replaces the active configuration, building the variant's pipeline if
    /// it has never been used. The previous configuration survives a failed
    /// build.
    pub fn select<B>(
        &mut self,
        backend: &mut B,
        variant: FilterVariant,
        param: f32,
        background: Option<Color>,
    ) -> Result<FilterConfig, CanvasError>
    where
        B: RenderBackend<Pipeline = P>,
    {
        if !self.pipelines.contains_key(&variant) {
            let pipeline = backend.create_pipeline(variant)?;
            tracing::debug!(%variant, "filter pipeline built");
            self.pipelines.insert(variant, pipeline);
        }
        let config = FilterConfig::new(variant, param, background);
        self.active = Some(config);
        Ok(config)
    }

    /// Adjusts the active parameter in place; no pipeline or GPU work.
    pub fn set_param(&mut self, value: f32) -> Result<FilterConfig, CanvasError> {
        let active = self.active.as_mut().ok_or(CanvasError::NoActiveFilter)?;
        active.param = clamp_unit(value);
        Ok(*active)
    }

    pub fn active(&self) -> Option<&FilterConfig> {
        self.active.as_ref()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn has_pipeline(&self, variant: FilterVariant) -> bool {
        self.pipelines.contains_key(&variant)
    }

    /// Records the active filter over `source`, fitted into the backend's
    /// target.
    pub fn apply<B>(
        &self,
        backend: &mut B,
        source: &TextureEntry<B::Texture>,
        rotation: Rotation,
        scale_factor: f32,
    ) -> Result<B::Frame, CanvasError>
    where
        B: RenderBackend<Pipeline = P>,
    {
        let config = self.active.as_ref().ok_or(CanvasError::NoActiveFilter)?;
        let pipeline = self
            .pipelines
            .get(&config.variant)
            .ok_or(CanvasError::NoActiveFilter)?;
        let uniforms = FilterUniforms::new(config, source.size(), rotation, scale_factor);
        let viewport = Viewport::fit(uniforms.display_size(), backend.target_size());
        backend.encode_frame(
            pipeline,
            source.texture(),
            &uniforms,
            viewport,
            config.clear_color(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::textures::{TextureRegistry, TextureUpload};

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((x + y) * 255 / (width + height - 2).max(1)) as u8;
                pixels.extend_from_slice(&[v, v / 2, 255 - v, 255]);
            }
        }
        pixels
    }

    #[test]
    fn select_builds_each_pipeline_once() {
        let mut backend = CpuBackend::new(32, 32);
        let mut set = FilterPipelineSet::new();
        set.select(&mut backend, FilterVariant::AsciiArt, 0.5, None)
            .unwrap();
        set.select(&mut backend, FilterVariant::EdgeDetection, 0.5, None)
            .unwrap();
        set.select(&mut backend, FilterVariant::AsciiArt, 0.1, None)
            .unwrap();
        assert_eq!(set.pipeline_count(), 2);
        assert_eq!(backend.pipelines_built(), 2);
        assert_eq!(set.active().unwrap().variant(), FilterVariant::AsciiArt);
    }

    #[test]
    fn set_param_requires_selection_and_keeps_variant() {
        let mut backend = CpuBackend::new(32, 32);
        let mut set = FilterPipelineSet::new();
        assert!(matches!(set.set_param(0.3), Err(CanvasError::NoActiveFilter)));

        set.select(&mut backend, FilterVariant::CrossHatch, 0.2, None)
            .unwrap();
        let updated = set.set_param(7.0).unwrap();
        assert_eq!(updated.variant(), FilterVariant::CrossHatch);
        assert_eq!(updated.param(), 1.0);
        let updated = set.set_param(f32::NAN).unwrap();
        assert_eq!(updated.param(), 0.0);
        assert_eq!(backend.pipelines_built(), 1);
    }

    #[test]
    fn apply_is_deterministic_for_unchanged_config() {
        let mut backend = CpuBackend::new(48, 48);
        let mut registry = TextureRegistry::new();
        let pixels = gradient(48, 48);
        registry
            .upsert(&mut backend, "a", &TextureUpload::new(&pixels, 48, 48))
            .unwrap();
        let mut set = FilterPipelineSet::new();
        for variant in FilterVariant::ALL {
            set.select(
                &mut backend,
                variant,
                0.3,
                Color::background_from_argb(0xFF20_2020),
            )
            .unwrap();
            let source = registry.resolve("a").unwrap();
            let first = set
                .apply(&mut backend, source, Rotation::Deg0, 1.0)
                .unwrap();
            let second = set
                .apply(&mut backend, source, Rotation::Deg0, 1.0)
                .unwrap();
            assert_eq!(first, second, "{variant} differs between calls");
        }
    }

    #[test]
    fn apply_without_selection_fails() {
        let mut backend = CpuBackend::new(8, 8);
        let mut registry = TextureRegistry::new();
        let pixels = gradient(8, 8);
        registry
            .upsert(&mut backend, "a", &TextureUpload::new(&pixels, 8, 8))
            .unwrap();
        let set: FilterPipelineSet<_> = FilterPipelineSet::new();
        let source = registry.resolve("a").unwrap();
        assert!(matches!(
            set.apply(&mut backend, source, Rotation::Deg0, 1.0),
            Err(CanvasError::NoActiveFilter)
        ));
    }

    #[test]
    fn clear_color_defaults_to_black() {
        let config = FilterConfig::new(FilterVariant::EdgeDetection, 0.5, None);
        assert_eq!(config.clear_color(), Color::BLACK);
    }
}
