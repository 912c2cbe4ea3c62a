//! Watermark compositing for the media pipeline.
//!
//! Text marks are drawn with a built-in 3x5 bitmap font on a translucent
//! banner, so no font files are needed at runtime. Asset marks are scaled to
//! at most a quarter of the base width and alpha-blended.

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::models::WatermarkPosition;

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const BANNER_OPACITY: f32 = 0.45;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BANNER_COLOR: [u8; 3] = [0, 0, 0];

/// Rows of a glyph, `1` marks a lit cell. Unknown characters render as `?`.
fn glyph(c: char) -> [&'static str; 5] {
    match c.to_ascii_uppercase() {
        'A' => ["010", "101", "111", "101", "101"],
        'B' => ["110", "101", "110", "101", "110"],
        'C' => ["011", "100", "100", "100", "011"],
        'D' => ["110", "101", "101", "101", "110"],
        'E' => ["111", "100", "110", "100", "111"],
        'F' => ["111", "100", "110", "100", "100"],
        'G' => ["011", "100", "101", "101", "011"],
        'H' => ["101", "101", "111", "101", "101"],
        'I' => ["111", "010", "010", "010", "111"],
        'J' => ["001", "001", "001", "101", "010"],
        'K' => ["101", "101", "110", "101", "101"],
        'L' => ["100", "100", "100", "100", "111"],
        'M' => ["101", "111", "111", "101", "101"],
        'N' => ["110", "101", "101", "101", "101"],
        'O' => ["010", "101", "101", "101", "010"],
        'P' => ["110", "101", "110", "100", "100"],
        'Q' => ["010", "101", "101", "110", "011"],
        'R' => ["110", "101", "110", "101", "101"],
        'S' => ["011", "100", "010", "001", "110"],
        'T' => ["111", "010", "010", "010", "010"],
        'U' => ["101", "101", "101", "101", "111"],
        'V' => ["101", "101", "101", "101", "010"],
        'W' => ["101", "101", "111", "111", "101"],
        'X' => ["101", "101", "010", "101", "101"],
        'Y' => ["101", "101", "010", "010", "010"],
        'Z' => ["111", "001", "010", "100", "111"],
        '0' => ["111", "101", "101", "101", "111"],
        '1' => ["010", "110", "010", "010", "111"],
        '2' => ["110", "001", "010", "100", "111"],
        '3' => ["110", "001", "010", "001", "110"],
        '4' => ["101", "101", "111", "001", "001"],
        '5' => ["111", "100", "110", "001", "110"],
        '6' => ["011", "100", "111", "101", "111"],
        '7' => ["111", "001", "010", "010", "010"],
        '8' => ["111", "101", "111", "101", "111"],
        '9' => ["111", "101", "111", "001", "110"],
        ' ' => ["000", "000", "000", "000", "000"],
        '.' => ["000", "000", "000", "000", "010"],
        ',' => ["000", "000", "000", "010", "100"],
        '-' => ["000", "000", "111", "000", "000"],
        ':' => ["000", "010", "000", "010", "000"],
        '/' => ["001", "001", "010", "100", "100"],
        '!' => ["010", "010", "010", "000", "010"],
        '&' => ["010", "101", "010", "101", "011"],
        '@' => ["111", "101", "111", "100", "011"],
        '(' => ["001", "010", "010", "010", "001"],
        ')' => ["100", "010", "010", "010", "100"],
        '\'' => ["010", "010", "000", "000", "000"],
        '©' => ["111", "101", "100", "101", "111"],
        _ => ["110", "001", "010", "000", "010"],
    }
}

/// Top-left corner for a `width`x`height` mark on a `base_width`x`base_height` image
pub fn anchor(
    base_width: u32,
    base_height: u32,
    width: u32,
    height: u32,
    position: WatermarkPosition,
    margin: u32,
) -> (u32, u32) {
    let right = base_width.saturating_sub(width + margin);
    let bottom = base_height.saturating_sub(height + margin);
    match position {
        WatermarkPosition::TopLeft => (margin, margin),
        WatermarkPosition::TopRight => (right, margin),
        WatermarkPosition::BottomLeft => (margin, bottom),
        WatermarkPosition::BottomRight => (right, bottom),
        WatermarkPosition::Center => (
            base_width.saturating_sub(width) / 2,
            base_height.saturating_sub(height) / 2,
        ),
    }
}

fn blend(canvas: &mut RgbaImage, x: u32, y: u32, color: [u8; 3], alpha: f32) {
    if x >= canvas.width() || y >= canvas.height() || alpha <= 0.0 {
        return;
    }
    let alpha = alpha.min(1.0);
    let pixel = canvas.get_pixel_mut(x, y);
    for (channel, source) in pixel.0.iter_mut().take(3).zip(color) {
        *channel = (f32::from(source) * alpha + f32::from(*channel) * (1.0 - alpha)).round() as u8;
    }
    pixel.0[3] = (255.0 * alpha + f32::from(pixel.0[3]) * (1.0 - alpha)).round() as u8;
}

/// Draw `text` on a banner at `position`, blended at `opacity`
pub fn apply_text(
    image: &DynamicImage,
    text: &str,
    position: WatermarkPosition,
    opacity: f32,
) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    let scale = (canvas.width() / 160).clamp(1, 8);
    let chars: Vec<char> = text.chars().collect();
    let count = chars.len() as u32;

    let text_width = (count * (GLYPH_WIDTH + 1)).saturating_sub(1) * scale;
    let text_height = GLYPH_HEIGHT * scale;
    let padding = 2 * scale;
    let banner_width = text_width + 2 * padding;
    let banner_height = text_height + 2 * padding;
    let (left, top) = anchor(
        canvas.width(),
        canvas.height(),
        banner_width,
        banner_height,
        position,
        2 * scale,
    );

    for y in top..top + banner_height {
        for x in left..left + banner_width {
            blend(&mut canvas, x, y, BANNER_COLOR, BANNER_OPACITY * opacity);
        }
    }

    for (index, c) in chars.iter().enumerate() {
        let origin_x = left + padding + index as u32 * (GLYPH_WIDTH + 1) * scale;
        let origin_y = top + padding;
        for (row, bits) in glyph(*c).iter().enumerate() {
            for (column, bit) in bits.chars().enumerate() {
                if bit != '1' {
                    continue;
                }
                let cell_x = origin_x + column as u32 * scale;
                let cell_y = origin_y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        blend(&mut canvas, cell_x + dx, cell_y + dy, TEXT_COLOR, opacity);
                    }
                }
            }
        }
    }

    DynamicImage::ImageRgba8(canvas)
}

/// Blend `mark` over `image` at `position`
pub fn apply_asset(
    image: &DynamicImage,
    mark: &DynamicImage,
    position: WatermarkPosition,
    opacity: f32,
) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    let max_width = (canvas.width() / 4).max(1);
    let mark = if mark.width() > max_width || mark.height() > canvas.height() {
        mark.resize(max_width, canvas.height(), FilterType::Triangle)
    } else {
        mark.clone()
    }
    .to_rgba8();

    let margin = (canvas.width().min(canvas.height()) / 50).max(1);
    let (left, top) = anchor(
        canvas.width(),
        canvas.height(),
        mark.width(),
        mark.height(),
        position,
        margin,
    );

    for (x, y, pixel) in mark.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        blend(
            &mut canvas,
            left + x,
            top + y,
            [r, g, b],
            f32::from(a) / 255.0 * opacity,
        );
    }

    DynamicImage::ImageRgba8(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba};

    fn gray(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([128, 128, 128])))
    }

    #[test]
    fn test_glyph_rows_are_three_wide() {
        for c in "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 .,-:/!&@()'©~".chars() {
            assert!(glyph(c).iter().all(|row| row.len() == 3), "glyph {c}");
        }
    }

    #[test]
    fn test_anchor_positions() {
        assert_eq!(anchor(100, 80, 20, 10, WatermarkPosition::TopLeft, 4), (4, 4));
        assert_eq!(anchor(100, 80, 20, 10, WatermarkPosition::BottomRight, 4), (76, 66));
        assert_eq!(anchor(100, 80, 20, 10, WatermarkPosition::Center, 4), (40, 35));
        assert_eq!(anchor(10, 10, 20, 20, WatermarkPosition::BottomRight, 4), (0, 0));
    }

    #[test]
    fn test_text_marks_only_its_corner() {
        let marked = apply_text(&gray(320, 200), "PROOF", WatermarkPosition::BottomRight, 0.8)
            .to_rgba8();

        assert_eq!(marked.get_pixel(0, 0), &Rgba([128, 128, 128, 255]));
        let touched = marked
            .enumerate_pixels()
            .filter(|(x, y, p)| *x > 200 && *y > 150 && p.0[..3] != [128, 128, 128])
            .count();
        assert!(touched > 0);
    }

    #[test]
    fn test_zero_opacity_is_invisible() {
        let original = gray(64, 64);
        let marked = apply_text(&original, "X", WatermarkPosition::Center, 0.0);
        assert_eq!(marked.to_rgba8(), original.to_rgba8());
    }

    #[test]
    fn test_asset_is_scaled_to_quarter_width() {
        let mark = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 100, Rgba([255, 0, 0, 255])));
        let marked = apply_asset(&gray(400, 300), &mark, WatermarkPosition::TopLeft, 1.0).to_rgba8();

        let red: Vec<(u32, u32)> = marked
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] > 200 && p.0[1] < 50)
            .map(|(x, y, _)| (x, y))
            .collect();
        let max_x = red.iter().map(|(x, _)| *x).max().unwrap();
        let min_x = red.iter().map(|(x, _)| *x).min().unwrap();
        assert!(max_x - min_x < 100);
        assert_eq!(marked.get_pixel(399, 299), &Rgba([128, 128, 128, 255]));
    }
}
