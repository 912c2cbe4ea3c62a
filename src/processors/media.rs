//! # Media Transformation Pipeline
//!
//! The source asset is downloaded and decoded once; each operation then
//! receives the previous operation's image. `tag` only collects labels and
//! leaves the image untouched. The final image is encoded to the requested
//! format and uploaded. The first failing operation aborts the pipeline and
//! its error names the operation's index and kind.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

use super::{payload_mismatch, watermark, JobProcessor};
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{
    Job, JobKind, JobPayload, MediaJob, MediaOperation, OutputFormat, OutputSpec, ResizeFit,
};
use crate::services::{ImageTag, ImageTagger, StorageClient};

#[derive(Debug, Clone)]
pub struct MediaProcessor {
    storage: Arc<dyn StorageClient>,
    tagger: Arc<dyn ImageTagger>,
}

impl MediaProcessor {
    pub fn new(storage: Arc<dyn StorageClient>, tagger: Arc<dyn ImageTagger>) -> Self {
        Self { storage, tagger }
    }

    pub async fn transform(
        &self,
        job: &MediaJob,
        progress: Option<&ProgressReporter>,
    ) -> Result<Value, ExecutionError> {
        let mut image = self.load(&job.source_key).await?;
        report(progress, 10).await;

        let mut tags: Vec<ImageTag> = Vec::new();
        let total = job.operations.len();
        for (index, operation) in job.operations.iter().enumerate() {
            debug!(asset_id = %job.asset_id, index, operation = operation.name(), "applying media operation");
            image = self
                .apply(image, operation, &mut tags)
                .await
                .map_err(|e| e.context(&format!("operation {index} ({})", operation.name())))?;
            report(progress, (10 + (index + 1) * 80 / total) as u8).await;
        }

        let bytes = encode(&image, &job.output)?;
        let url = self
            .storage
            .upload(bytes, &job.output.destination_key, job.output.format.content_type())
            .await
            .map_err(|e| ExecutionError::from(e).context("media upload"))?;
        report(progress, 100).await;

        info!(
            asset_id = %job.asset_id,
            width = image.width(),
            height = image.height(),
            operations = total,
            "🖼️ Media transformed"
        );
        Ok(json!({
            "assetId": job.asset_id,
            "url": url,
            "width": image.width(),
            "height": image.height(),
            "format": job.output.format,
            "tags": tags,
            "operations": job.operations.iter().map(MediaOperation::name).collect::<Vec<_>>(),
        }))
    }

    async fn load(&self, key: &str) -> Result<DynamicImage, ExecutionError> {
        let bytes = self
            .storage
            .download(key)
            .await
            .map_err(|e| ExecutionError::from(e).context(&format!("download {key}")))?;
        image::load_from_memory(&bytes)
            .map_err(|e| ExecutionError::permanent(format!("{key} is not a decodable image: {e}")))
    }

    async fn apply(
        &self,
        image: DynamicImage,
        operation: &MediaOperation,
        tags: &mut Vec<ImageTag>,
    ) -> Result<DynamicImage, ExecutionError> {
        match operation {
            MediaOperation::Resize { width, height, fit } => resize(image, *width, *height, *fit),
            MediaOperation::Watermark {
                text,
                asset_ref,
                position,
                opacity,
            } => match (text, asset_ref) {
                (Some(text), _) => Ok(watermark::apply_text(&image, text, *position, *opacity)),
                (None, Some(asset_ref)) => {
                    let mark = self.load(asset_ref).await?;
                    Ok(watermark::apply_asset(&image, &mark, *position, *opacity))
                }
                (None, None) => Err(ExecutionError::validation(
                    "watermark needs exactly one of text or asset_ref",
                )),
            },
            MediaOperation::Tag {
                confidence,
                max_tags,
            } => {
                let labels = self.tagger.tag(&image).await?;
                tags.extend(
                    labels
                        .into_iter()
                        .filter(|tag| tag.confidence >= *confidence)
                        .take(*max_tags),
                );
                Ok(image)
            }
        }
    }
}

async fn report(progress: Option<&ProgressReporter>, value: u8) {
    if let Some(progress) = progress {
        progress.update(value).await;
    }
}

/// Resize per `fit`; with one dimension given the aspect ratio is kept
pub fn resize(
    image: DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    fit: ResizeFit,
) -> Result<DynamicImage, ExecutionError> {
    let (source_width, source_height) = (image.width().max(1), image.height().max(1));
    let scaled = |target: u32, from: u32, to: u32| {
        ((u64::from(target) * u64::from(to) + u64::from(from) / 2) / u64::from(from)).max(1) as u32
    };

    match (width, height) {
        (Some(0), _) | (_, Some(0)) => {
            Err(ExecutionError::validation("resize dimensions must be positive"))
        }
        (Some(width), Some(height)) => Ok(match fit {
            ResizeFit::Contain => image.resize(width, height, FilterType::Lanczos3),
            ResizeFit::Cover => image.resize_to_fill(width, height, FilterType::Lanczos3),
            ResizeFit::Fill => image.resize_exact(width, height, FilterType::Lanczos3),
        }),
        (Some(width), None) => {
            let height = scaled(width, source_width, source_height);
            Ok(image.resize_exact(width, height, FilterType::Lanczos3))
        }
        (None, Some(height)) => {
            let width = scaled(height, source_height, source_width);
            Ok(image.resize_exact(width, height, FilterType::Lanczos3))
        }
        (None, None) => Err(ExecutionError::validation("resize needs a width or a height")),
    }
}

pub fn encode(image: &DynamicImage, output: &OutputSpec) -> Result<Vec<u8>, ExecutionError> {
    let mut bytes = Vec::new();
    let encoded = match output.format {
        OutputFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, output.quality);
            encoder.encode_image(&image.to_rgb8())
        }
        OutputFormat::Png => image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png),
    };
    encoded.map_err(|e| ExecutionError::permanent(format!("encoding {:?} failed: {e}", output.format)))?;
    Ok(bytes)
}

#[async_trait]
impl JobProcessor for MediaProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Media
    }

    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, ExecutionError> {
        let JobPayload::Media(media) = &job.payload else {
            return Err(payload_mismatch(JobKind::Media, job));
        };
        self.transform(media, Some(progress)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WatermarkPosition;
    use crate::services::{HeuristicImageTagger, InMemoryStorage};
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn setup() -> (Arc<InMemoryStorage>, MediaProcessor) {
        let storage = Arc::new(InMemoryStorage::new("assets"));
        storage.put("uploads/shoot.png", png(400, 200, [240, 200, 60]), "image/png");
        let processor = MediaProcessor::new(storage.clone(), Arc::new(HeuristicImageTagger::new()));
        (storage, processor)
    }

    fn job(operations: Vec<MediaOperation>, format: OutputFormat) -> MediaJob {
        MediaJob {
            asset_id: "asset-9".to_string(),
            source_key: "uploads/shoot.png".to_string(),
            operations,
            output: OutputSpec {
                format,
                quality: 80,
                destination_key: "renders/shoot".to_string(),
            },
        }
    }

    #[test]
    fn test_resize_modes() {
        let source = || DynamicImage::ImageRgb8(RgbImage::new(400, 200));

        let contain = resize(source(), Some(100), Some(100), ResizeFit::Contain).unwrap();
        assert_eq!((contain.width(), contain.height()), (100, 50));

        let cover = resize(source(), Some(100), Some(100), ResizeFit::Cover).unwrap();
        assert_eq!((cover.width(), cover.height()), (100, 100));

        let fill = resize(source(), Some(30), Some(90), ResizeFit::Fill).unwrap();
        assert_eq!((fill.width(), fill.height()), (30, 90));

        let by_height = resize(source(), None, Some(50), ResizeFit::Contain).unwrap();
        assert_eq!((by_height.width(), by_height.height()), (100, 50));

        assert!(resize(source(), None, None, ResizeFit::Contain).is_err());
    }

    #[tokio::test]
    async fn test_pipeline_resizes_marks_tags_and_uploads() {
        let (storage, processor) = setup();
        let progress = ProgressReporter::detached(crate::models::JobId::new());
        let job = job(
            vec![
                MediaOperation::Resize {
                    width: Some(200),
                    height: None,
                    fit: ResizeFit::Contain,
                },
                MediaOperation::Watermark {
                    text: Some("© North Studio".to_string()),
                    asset_ref: None,
                    position: WatermarkPosition::BottomRight,
                    opacity: 0.6,
                },
                MediaOperation::Tag {
                    confidence: 0.0,
                    max_tags: 2,
                },
            ],
            OutputFormat::Png,
        );

        let result = processor.transform(&job, Some(&progress)).await.unwrap();

        assert_eq!(result["width"], json!(200));
        assert_eq!(result["height"], json!(100));
        assert_eq!(result["operations"], json!(["resize", "watermark", "tag"]));
        assert_eq!(result["tags"].as_array().unwrap().len(), 2);
        assert_eq!(progress.last_reported(), 100);

        let stored = storage.get("renders/shoot").unwrap();
        assert_eq!(stored.content_type, "image/png");
        let decoded = image::load_from_memory(&stored.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[tokio::test]
    async fn test_jpeg_output() {
        let (storage, processor) = setup();
        processor
            .transform(&job(vec![], OutputFormat::Jpeg), None)
            .await
            .unwrap();
        let stored = storage.get("renders/shoot").unwrap();
        assert_eq!(
            image::guess_format(&stored.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_missing_asset_names_operation() {
        let (storage, processor) = setup();
        let job = job(
            vec![
                MediaOperation::Resize {
                    width: Some(100),
                    height: None,
                    fit: ResizeFit::Contain,
                },
                MediaOperation::Watermark {
                    text: None,
                    asset_ref: Some("brand/missing.png".to_string()),
                    position: WatermarkPosition::Center,
                    opacity: 0.5,
                },
            ],
            OutputFormat::Png,
        );

        let err = processor.transform(&job, None).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("operation 1 (watermark): "));
        assert!(storage.get("renders/shoot").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_source_is_permanent() {
        let (storage, processor) = setup();
        storage.put("uploads/shoot.png", b"not an image".to_vec(), "image/png");
        let err = processor
            .transform(&job(vec![], OutputFormat::Png), None)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_storage_outage_is_transient() {
        let (storage, processor) = setup();
        storage.set_available(false);
        let err = processor
            .transform(&job(vec![], OutputFormat::Png), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
