use crate::assets::BenchAssets;
use crate::checkpoints::Resolution;
use crate::errors::{BenchError, BenchResult};
use crate::variants::PipelineVariant;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Inputs handed to every inference call of a run.
/// Images are already at the checkpoint's resolution.
#[derive(Debug, Clone)]
pub struct Conditioning {
    pub prompt: String,
    pub resolution: Resolution,
    pub image: Option<RgbImage>,
    pub mask_image: Option<RgbImage>,
    pub control_image: Option<RgbImage>,
}

impl Conditioning {
    fn text_only(prompt: &str, resolution: Resolution) -> Self {
        Self {
            prompt: prompt.to_string(),
            resolution,
            image: None,
            mask_image: None,
            control_image: None,
        }
    }
}

impl PipelineVariant {
    /// Build the conditioning inputs this variant feeds to the pipeline
    pub fn prepare_conditioning(
        &self,
        assets: &BenchAssets,
        resolution: Resolution,
    ) -> BenchResult<Conditioning> {
        match self {
            PipelineVariant::TextToImage => Ok(text_to_image(assets, resolution)),
            PipelineVariant::ImageToImage => image_to_image(assets, resolution),
            PipelineVariant::Inpainting => inpainting(assets, resolution),
            PipelineVariant::ControlNet | PipelineVariant::ControlNetSdxl => {
                controlled(assets, resolution)
            }
        }
    }
}

fn text_to_image(assets: &BenchAssets, resolution: Resolution) -> Conditioning {
    Conditioning::text_only(&assets.prompt, resolution)
}

fn image_to_image(assets: &BenchAssets, resolution: Resolution) -> BenchResult<Conditioning> {
    let image = required(assets.image.as_ref(), "source image")?;
    Ok(Conditioning {
        image: Some(resize_to(image, resolution)),
        ..Conditioning::text_only(&assets.prompt, resolution)
    })
}

fn inpainting(assets: &BenchAssets, resolution: Resolution) -> BenchResult<Conditioning> {
    let image = required(assets.image.as_ref(), "source image")?;
    let mask = required(assets.mask_image.as_ref(), "mask image")?;
    Ok(Conditioning {
        image: Some(resize_to(image, resolution)),
        mask_image: Some(resize_to(mask, resolution)),
        ..Conditioning::text_only(&assets.prompt, resolution)
    })
}

fn controlled(assets: &BenchAssets, resolution: Resolution) -> BenchResult<Conditioning> {
    let control = required(assets.control_image.as_ref(), "control image")?;
    Ok(Conditioning {
        control_image: Some(resize_to(control, resolution)),
        ..Conditioning::text_only(&assets.prompt, resolution)
    })
}

fn required<'a>(image: Option<&'a DynamicImage>, what: &str) -> BenchResult<&'a DynamicImage> {
    image.ok_or_else(|| BenchError::AssetError(format!("missing {}", what)))
}

/// Resize to exactly the given resolution, ignoring the source aspect ratio
pub fn resize_to(image: &DynamicImage, resolution: Resolution) -> RgbImage {
    image
        .resize_exact(resolution.width, resolution.height, FilterType::CatmullRom)
        .to_rgb8()
}
