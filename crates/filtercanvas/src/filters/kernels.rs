//! Software versions of the filter shaders.
//!
//! These follow the WGSL in `src/shaders/` pixel for pixel in structure
//! (cell grid, hatch families, Sobel taps) but sample with nearest-neighbour
//! lookups, so outputs are exact and reproducible across machines.

use crate::backend::FrameImage;
use crate::types::{Color, FilterVariant};
use crate::uniforms::{FilterUniforms, Viewport};

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// 5x5 glyph bitmaps, darkest first. Bit `(4 - x) + 5 * (4 - y)` is row `y`
/// column `x` of the glyph.
pub const GLYPHS: [u32; 8] = [
    4096,     // .
    65600,    // :
    332772,   // *
    15255086, // o
    23385164, // &
    15252014, // 8
    13199452, // @
    11512810, // #
];

const HATCH_THRESHOLDS: [f32; 4] = [0.8, 0.6, 0.3, 0.15];

/// Runs `variant` over `source` and returns a display-oriented image.
pub fn run(variant: FilterVariant, source: &FrameImage, uniforms: &FilterUniforms) -> FrameImage {
    let oriented = rotate(source, uniforms.quarter_turns as u32);
    let background = uniforms.background();
    match variant {
        FilterVariant::AsciiArt => ascii_art(&oriented, uniforms.param, background),
        FilterVariant::CrossHatch => cross_hatch(&oriented, uniforms.param, background),
        FilterVariant::EdgeDetection => edge_detection(&oriented, uniforms.param, background),
    }
}

/// Rotates clockwise by `quarter_turns`.
pub fn rotate(image: &FrameImage, quarter_turns: u32) -> FrameImage {
    let (sw, sh) = (image.width, image.height);
    let turns = quarter_turns % 4;
    if turns == 0 {
        return image.clone();
    }
    let (dw, dh) = if turns % 2 == 1 { (sh, sw) } else { (sw, sh) };
    let mut out = FrameImage::new(dw, dh);
    for y in 0..dh {
        for x in 0..dw {
            let (sx, sy) = match turns {
                1 => (y, sh - 1 - x),
                2 => (sw - 1 - x, sh - 1 - y),
                _ => (sw - 1 - y, x),
            };
            out.put_pixel(x, y, image.pixel(sx, sy));
        }
    }
    out
}

pub fn luminance(rgba: [u8; 4]) -> f32 {
    (LUMA[0] * rgba[0] as f32 + LUMA[1] * rgba[1] as f32 + LUMA[2] * rgba[2] as f32) / 255.0
}

pub fn glyph_for(gray: f32) -> u32 {
    let steps = [0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
    let index = steps.iter().filter(|step| gray > **step).count();
    GLYPHS[index]
}

fn glyph_bit(glyph: u32, cx: u32, cy: u32) -> bool {
    let index = (4 - cx.min(4)) + 5 * (4 - cy.min(4));
    (glyph >> index) & 1 == 1
}

fn ascii_art(image: &FrameImage, cell_size: f32, background: Option<Color>) -> FrameImage {
    let cell = cell_size.max(1.0);
    let unlit = background.unwrap_or(Color::BLACK).to_rgba8();
    let mut out = FrameImage::new(image.width, image.height);
    for y in 0..image.height {
        for x in 0..image.width {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let origin_x = (px / cell).floor() * cell;
            let origin_y = (py / cell).floor() * cell;
            let sample_x = ((origin_x + cell * 0.5) as u32).min(image.width - 1);
            let sample_y = ((origin_y + cell * 0.5) as u32).min(image.height - 1);
            let color = image.pixel(sample_x, sample_y);
            let glyph = glyph_for(luminance(color));
            let cx = ((px - origin_x) / cell * 5.0) as u32;
            let cy = ((py - origin_y) / cell * 5.0) as u32;
            let rgba = if glyph_bit(glyph, cx, cy) {
                [color[0], color[1], color[2], 255]
            } else {
                unlit
            };
            out.put_pixel(x, y, rgba);
        }
    }
    out
}

fn cross_hatch(image: &FrameImage, spacing: f32, background: Option<Color>) -> FrameImage {
    let spacing = spacing.max(1.0);
    let half = spacing * 0.5;
    let width = (spacing * 0.08).max(1.0);
    let paper = background.unwrap_or(Color::WHITE).to_rgba8();
    let ink = Color::BLACK.to_rgba8();
    let mut out = FrameImage::new(image.width, image.height);
    for y in 0..image.height {
        for x in 0..image.width {
            let lum = luminance(image.pixel(x, y));
            let (fx, fy) = (x as f32, y as f32);
            let families = [fx + fy, fx - fy, fx + fy - half, fx - fy - half];
            let inked = families
                .iter()
                .zip(HATCH_THRESHOLDS)
                .any(|(offset, threshold)| lum < threshold && offset.rem_euclid(spacing) < width);
            out.put_pixel(x, y, if inked { ink } else { paper });
        }
    }
    out
}

fn edge_detection(image: &FrameImage, threshold: f32, background: Option<Color>) -> FrameImage {
    let (w, h) = (image.width as i64, image.height as i64);
    let lum = |x: i64, y: i64| {
        let cx = x.clamp(0, w - 1) as u32;
        let cy = y.clamp(0, h - 1) as u32;
        luminance(image.pixel(cx, cy))
    };
    let mut out = FrameImage::new(image.width, image.height);
    for y in 0..h {
        for x in 0..w {
            let tl = lum(x - 1, y - 1);
            let t = lum(x, y - 1);
            let tr = lum(x + 1, y - 1);
            let l = lum(x - 1, y);
            let r = lum(x + 1, y);
            let bl = lum(x - 1, y + 1);
            let b = lum(x, y + 1);
            let br = lum(x + 1, y + 1);
            let gx = -tl - 2.0 * l - bl + tr + 2.0 * r + br;
            let gy = -tl - 2.0 * t - tr + bl + 2.0 * b + br;
            let mut edge = gx.hypot(gy);
            if edge < threshold {
                edge = 0.0;
            }
            let edge = edge.clamp(0.0, 1.0);
            let color = match background {
                Some(bg) => mix(bg, Color::WHITE, edge),
                None => Color::new(edge, edge, edge, edge),
            };
            out.put_pixel(x as u32, y as u32, color.to_rgba8());
        }
    }
    out
}

fn mix(a: Color, b: Color, t: f32) -> Color {
    Color::new(
        a.r + (b.r - a.r) * t,
        a.g + (b.g - a.g) * t,
        a.b + (b.b - a.b) * t,
        a.a + (b.a - a.a) * t,
    )
}

/// Scales `filtered` into `viewport` over a `target`-sized canvas cleared to
/// `clear`.
pub fn composite(
    filtered: &FrameImage,
    target: (u32, u32),
    viewport: Viewport,
    clear: Color,
) -> FrameImage {
    let mut out = FrameImage::filled(target.0, target.1, clear.to_rgba8());
    if filtered.width == 0 || filtered.height == 0 {
        return out;
    }
    for y in 0..target.1 {
        for x in 0..target.0 {
            if !viewport.contains(x, y) {
                continue;
            }
            let u = (x as f32 + 0.5 - viewport.x) / viewport.width;
            let v = (y as f32 + 0.5 - viewport.y) / viewport.height;
            let sx = ((u * filtered.width as f32) as u32).min(filtered.width - 1);
            let sy = ((v * filtered.height as f32) as u32).min(filtered.height - 1);
            out.put_pixel(x, y, filtered.pixel(sx, sy));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterConfig;
    use crate::types::Rotation;

    fn uniforms(
        variant: FilterVariant,
        param: f32,
        image: &FrameImage,
        bg: Option<u32>,
    ) -> FilterUniforms {
        let background = bg.and_then(Color::background_from_argb);
        let config = FilterConfig::new(variant, param, background);
        FilterUniforms::new(&config, (image.width, image.height), Rotation::Deg0, 1.0)
    }

    #[test]
    fn glyphs_get_denser_with_brightness() {
        assert_eq!(glyph_for(0.0), GLYPHS[0]);
        assert_eq!(glyph_for(0.25), GLYPHS[1]);
        assert_eq!(glyph_for(1.0), GLYPHS[7]);
        let bits = |glyph: u32| glyph.count_ones();
        assert!(bits(GLYPHS[0]) < bits(GLYPHS[7]));
    }

    #[test]
    fn luminance_weights() {
        assert!((luminance([255, 255, 255, 255]) - 1.0).abs() < 1e-5);
        assert_eq!(luminance([0, 0, 0, 255]), 0.0);
        assert!((luminance([255, 0, 0, 255]) - 0.299).abs() < 1e-5);
    }

    #[test]
    fn rotate_quarter_turn_moves_corners() {
        let mut image = FrameImage::new(2, 1);
        image.put_pixel(0, 0, [1, 0, 0, 255]);
        image.put_pixel(1, 0, [2, 0, 0, 255]);
        let rotated = rotate(&image, 1);
        assert_eq!((rotated.width, rotated.height), (1, 2));
        assert_eq!(rotated.pixel(0, 0)[0], 1);
        assert_eq!(rotated.pixel(0, 1)[0], 2);
        assert_eq!(rotate(&rotate(&image, 2), 2), image);
    }

    #[test]
    fn ascii_art_mixes_ink_and_background() {
        let image = FrameImage::filled(16, 16, [255, 255, 255, 255]);
        let u = uniforms(FilterVariant::AsciiArt, 0.0, &image, Some(0xFF00_00FF));
        let out = run(FilterVariant::AsciiArt, &image, &u);
        let lit = out
            .pixels
            .chunks_exact(4)
            .filter(|px| *px == [255, 255, 255, 255])
            .count();
        let unlit = out
            .pixels
            .chunks_exact(4)
            .filter(|px| *px == [0, 0, 255, 255])
            .count();
        assert!(lit > 0);
        assert!(unlit > 0);
        assert_eq!(lit + unlit, 256);
    }

    #[test]
    fn cross_hatch_leaves_bright_areas_blank() {
        let white = FrameImage::filled(20, 20, [255, 255, 255, 255]);
        let u = uniforms(FilterVariant::CrossHatch, 0.0, &white, None);
        let out = run(FilterVariant::CrossHatch, &white, &u);
        assert!(out.pixels.chunks_exact(4).all(|px| px == [255, 255, 255, 255]));

        let black = FrameImage::filled(20, 20, [0, 0, 0, 255]);
        let out = run(FilterVariant::CrossHatch, &black, &u);
        assert!(out.pixels.chunks_exact(4).any(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn edge_detection_finds_step_and_ignores_flat_regions() {
        let mut image = FrameImage::filled(8, 8, [0, 0, 0, 255]);
        for y in 0..8 {
            for x in 4..8 {
                image.put_pixel(x, y, [255, 255, 255, 255]);
            }
        }
        let u = uniforms(FilterVariant::EdgeDetection, 0.5, &image, None);
        let out = run(FilterVariant::EdgeDetection, &image, &u);
        // Without a background, alpha carries the edge strength.
        assert_eq!(out.pixel(0, 4), [0, 0, 0, 0]);
        assert_eq!(out.pixel(7, 4), [0, 0, 0, 0]);
        assert_eq!(out.pixel(4, 4), [255, 255, 255, 255]);
    }

    #[test]
    fn edge_alpha_tracks_strength_only_without_background() {
        let mut image = FrameImage::filled(8, 8, [0, 0, 0, 255]);
        for y in 0..8 {
            for x in 4..8 {
                image.put_pixel(x, y, [32, 32, 32, 255]);
            }
        }
        // Low-contrast step: Sobel magnitude about 0.5.
        let u = uniforms(FilterVariant::EdgeDetection, 0.0, &image, None);
        let out = run(FilterVariant::EdgeDetection, &image, &u);
        let [r, _, _, a] = out.pixel(4, 4);
        assert_eq!(out.pixel(1, 4)[3], 0);
        assert!(a > 0 && a < 255, "partial edge alpha was {a}");
        assert_eq!(r, a);

        let u = uniforms(FilterVariant::EdgeDetection, 0.0, &image, Some(0xFF20_4060));
        let out = run(FilterVariant::EdgeDetection, &image, &u);
        assert_eq!(out.pixel(1, 4), [0x20, 0x40, 0x60, 0xFF]);
        assert_eq!(out.pixel(4, 4)[3], 0xFF);
    }

    #[test]
    fn composite_letterboxes_with_clear_color() {
        let filtered = FrameImage::filled(4, 2, [9, 9, 9, 255]);
        let viewport = Viewport::fit((4, 2), (4, 4));
        let out = composite(&filtered, (4, 4), viewport, Color::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(out.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(out.pixel(0, 1), [9, 9, 9, 255]);
        assert_eq!(out.pixel(3, 3), [255, 0, 0, 255]);
    }
}
