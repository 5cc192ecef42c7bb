use bytemuck::{Pod, Zeroable};

use crate::filters::FilterConfig;
use crate::types::{Color, Rotation};

/// Uniform block shared by every filter shader (`FilterParams` in WGSL).
///
/// Layout follows WGSL uniform rules: two `vec2`, one `vec4`, four scalars.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterUniforms {
    /// Display-space size of the source after rotation, in pixels.
    pub image_size: [f32; 2],
    pub texel_size: [f32; 2],
    pub background: [f32; 4],
    /// Physical parameter (pixels or threshold) already scaled.
    pub param: f32,
    pub has_background: f32,
    pub quarter_turns: f32,
    pub _padding: f32,
}

unsafe impl Zeroable for FilterUniforms {}
unsafe impl Pod for FilterUniforms {}

impl FilterUniforms {
    pub fn new(
        config: &FilterConfig,
        source_size: (u32, u32),
        rotation: Rotation,
        scale: f32,
    ) -> Self {
        let (width, height) = rotation.apply_to_size(source_size.0.max(1), source_size.1.max(1));
        let background = config.background();
        Self {
            image_size: [width as f32, height as f32],
            texel_size: [1.0 / width as f32, 1.0 / height as f32],
            background: background.unwrap_or(Color::TRANSPARENT).to_array(),
            param: config.physical_param(scale),
            has_background: if background.is_some() { 1.0 } else { 0.0 },
            quarter_turns: rotation.quarter_turns() as f32,
            _padding: 0.0,
        }
    }

    pub fn background(&self) -> Option<Color> {
        if self.has_background > 0.5 {
            let [r, g, b, a] = self.background;
            Some(Color::new(r, g, b, a))
        } else {
            None
        }
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.image_size[0] as u32, self.image_size[1] as u32)
    }
}

/// Target rectangle the filtered image is drawn into, in target pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Largest rectangle with the image's aspect ratio centred in the target.
    pub fn fit(image: (u32, u32), target: (u32, u32)) -> Self {
        let (iw, ih) = (image.0.max(1) as f32, image.1.max(1) as f32);
        let (tw, th) = (target.0.max(1) as f32, target.1.max(1) as f32);
        let scale = (tw / iw).min(th / ih);
        let width = (iw * scale).round().clamp(1.0, tw);
        let height = (ih * scale).round().clamp(1.0, th);
        Self {
            x: ((tw - width) * 0.5).floor(),
            y: ((th - height) * 0.5).floor(),
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterVariant;

    #[test]
    fn uniform_block_is_48_bytes() {
        assert_eq!(std::mem::size_of::<FilterUniforms>(), 48);
    }

    #[test]
    fn uniforms_reflect_rotation_and_background() {
        let config = FilterConfig::new(
            FilterVariant::AsciiArt,
            0.0,
            Color::background_from_argb(0xFF00_00FF),
        );
        let uniforms = FilterUniforms::new(&config, (640, 480), Rotation::Deg90, 2.0);
        assert_eq!(uniforms.image_size, [480.0, 640.0]);
        assert_eq!(uniforms.param, 16.0);
        assert_eq!(uniforms.quarter_turns, 1.0);
        assert_eq!(uniforms.background(), Some(Color::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn uploaded_bytes_start_with_the_image_size() {
        let config = FilterConfig::new(FilterVariant::EdgeDetection, 0.5, None);
        let uniforms = FilterUniforms::new(&config, (640, 480), Rotation::Deg0, 1.0);
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 48);
        assert_eq!(bytes[..4], 640.0f32.to_ne_bytes());
        assert_eq!(bytes[4..8], 480.0f32.to_ne_bytes());
    }

    #[test]
    fn viewport_letterboxes_wide_image() {
        let viewport = Viewport::fit((200, 100), (100, 100));
        assert_eq!(viewport.width, 100.0);
        assert_eq!(viewport.height, 50.0);
        assert_eq!(viewport.y, 25.0);
        assert!(viewport.contains(50, 30));
        assert!(!viewport.contains(50, 10));
    }

    #[test]
    fn viewport_matches_equal_sizes() {
        let viewport = Viewport::fit((64, 64), (64, 64));
        assert_eq!(
            viewport,
            Viewport {
                x: 0.0,
                y: 0.0,
                width: 64.0,
                height: 64.0
            }
        );
    }
}
