use std::borrow::Cow;

use crate::types::FilterVariant;

/// Uniform block, bindings, full-screen vertex stage and sampling helpers
/// shared by every filter.
const PRELUDE: &str = include_str!("shaders/prelude.wgsl");

const ASCII_ART: &str = include_str!("shaders/ascii_art.wgsl");
const CROSS_HATCH: &str = include_str!("shaders/cross_hatch.wgsl");
const EDGE_DETECTION: &str = include_str!("shaders/edge_detection.wgsl");

pub(crate) const VERTEX_ENTRY: &str = "vs_main";
pub(crate) const FRAGMENT_ENTRY: &str = "fs_main";

/// Produces a self-contained WGSL module for `variant`.
///
/// The prelude declares `FilterParams` (mirroring
/// [`crate::uniforms::FilterUniforms`]), the source texture and sampler,
/// and `vs_main`; the variant body supplies `fs_main`.
pub fn filter_source(variant: FilterVariant) -> String {
    let body = match variant {
        FilterVariant::AsciiArt => ASCII_ART,
        FilterVariant::CrossHatch => CROSS_HATCH,
        FilterVariant::EdgeDetection => EDGE_DETECTION,
    };
    format!("{PRELUDE}\n// {variant}\n{body}")
}

pub(crate) fn compile_filter_shader(
    device: &wgpu::Device,
    variant: FilterVariant,
) -> wgpu::ShaderModule {
    let label = format!("{variant} filter");
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&label),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(filter_source(variant))),
    })
}
