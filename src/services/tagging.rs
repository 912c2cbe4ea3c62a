use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};

use super::{ImageTag, ImageTagger, ServiceResult};

/// Labels derived from simple pixel statistics: orientation, brightness,
/// saturation and colour temperature
///
/// Stands in for a model-backed tagger when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicImageTagger;

impl HeuristicImageTagger {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Default)]
struct PixelStats {
    luma: f32,
    saturation: f32,
    red: f32,
    blue: f32,
}

fn pixel_stats(image: &DynamicImage) -> PixelStats {
    let sample = image.resize(64, 64, FilterType::Nearest).to_rgb8();
    let count = (sample.width() * sample.height()).max(1) as f32;
    let mut stats = PixelStats::default();

    for pixel in sample.pixels() {
        let [r, g, b] = pixel.0.map(|c| f32::from(c) / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        stats.luma += 0.299 * r + 0.587 * g + 0.114 * b;
        stats.saturation += if max > 0.0 { (max - min) / max } else { 0.0 };
        stats.red += r;
        stats.blue += b;
    }

    stats.luma /= count;
    stats.saturation /= count;
    stats.red /= count;
    stats.blue /= count;
    stats
}

#[async_trait]
impl ImageTagger for HeuristicImageTagger {
    async fn tag(&self, image: &DynamicImage) -> ServiceResult<Vec<ImageTag>> {
        let (width, height) = image.dimensions();
        let ratio = width.max(1) as f32 / height.max(1) as f32;
        let stats = pixel_stats(image);
        let mut tags = Vec::new();
        let mut push = |label: &str, confidence: f32| {
            tags.push(ImageTag {
                label: label.to_string(),
                confidence: confidence.clamp(0.0, 1.0),
            })
        };

        if (ratio - 1.0).abs() < 0.05 {
            push("square", 0.95);
        } else if ratio > 1.0 {
            push("landscape", 0.5 + (ratio - 1.0).min(0.49));
        } else {
            push("portrait", 0.5 + (1.0 / ratio - 1.0).min(0.49));
        }

        if stats.luma >= 0.6 {
            push("bright", stats.luma);
        } else if stats.luma <= 0.4 {
            push("dark", 1.0 - stats.luma);
        }

        if stats.saturation < 0.1 {
            push("monochrome", 1.0 - stats.saturation);
        } else {
            push("colorful", 0.5 + stats.saturation / 2.0);
            let warmth = stats.red - stats.blue;
            if warmth.abs() > 0.1 {
                let label = if warmth > 0.0 { "warm tones" } else { "cool tones" };
                push(label, 0.5 + warmth.abs() / 2.0);
            }
        }

        tags.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[tokio::test]
    async fn test_white_landscape() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([255, 255, 255])));
        let tags = HeuristicImageTagger::new().tag(&image).await.unwrap();
        let labels: Vec<&str> = tags.iter().map(|t| t.label.as_str()).collect();

        assert!(labels.contains(&"landscape"));
        assert!(labels.contains(&"bright"));
        assert!(labels.contains(&"monochrome"));
        assert!(tags.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[tokio::test]
    async fn test_red_square_is_warm() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([220, 20, 20])));
        let tags = HeuristicImageTagger::new().tag(&image).await.unwrap();
        let labels: Vec<&str> = tags.iter().map(|t| t.label.as_str()).collect();

        assert!(labels.contains(&"square"));
        assert!(labels.contains(&"colorful"));
        assert!(labels.contains(&"warm tones"));
    }
}
