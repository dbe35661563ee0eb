use crate::checkpoints::{
    self, CheckpointInfo, CheckpointKind, ModelFamily, CONTROLNET_CANNY, CONTROLNET_CANNY_SDXL,
    SDXL_BASE, SDXL_REFINER, SD_V1_5, SD_V2_1,
};
use crate::errors::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The task a benchmarked pipeline performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineVariant {
    #[serde(rename = "text2img")]
    TextToImage,
    #[serde(rename = "img2img")]
    ImageToImage,
    #[serde(rename = "inpainting")]
    Inpainting,
    #[serde(rename = "controlnet")]
    ControlNet,
    #[serde(rename = "controlnet-sdxl")]
    ControlNetSdxl,
}

/// Which fixed images a variant conditions on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetNeeds {
    pub image: bool,
    pub mask_image: bool,
    pub control_image: bool,
}

impl PipelineVariant {
    pub const ALL: [PipelineVariant; 5] = [
        PipelineVariant::TextToImage,
        PipelineVariant::ImageToImage,
        PipelineVariant::Inpainting,
        PipelineVariant::ControlNet,
        PipelineVariant::ControlNetSdxl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineVariant::TextToImage => "text2img",
            PipelineVariant::ImageToImage => "img2img",
            PipelineVariant::Inpainting => "inpainting",
            PipelineVariant::ControlNet => "controlnet",
            PipelineVariant::ControlNetSdxl => "controlnet-sdxl",
        }
    }

    pub fn is_controlnet(&self) -> bool {
        matches!(
            self,
            PipelineVariant::ControlNet | PipelineVariant::ControlNetSdxl
        )
    }

    pub fn default_checkpoint(&self) -> &'static str {
        match self {
            PipelineVariant::TextToImage
            | PipelineVariant::ImageToImage
            | PipelineVariant::Inpainting => SD_V1_5,
            PipelineVariant::ControlNet => CONTROLNET_CANNY,
            PipelineVariant::ControlNetSdxl => CONTROLNET_CANNY_SDXL,
        }
    }

    /// Checkpoints a full sweep covers for this variant
    pub fn sweep_checkpoints(&self) -> &'static [&'static str] {
        match self {
            PipelineVariant::TextToImage => &[SD_V1_5, SD_V2_1, SDXL_BASE],
            PipelineVariant::ImageToImage => &[SD_V1_5, SD_V2_1, SDXL_REFINER],
            PipelineVariant::Inpainting => &[SD_V1_5, SD_V2_1, SDXL_BASE],
            PipelineVariant::ControlNet => &[CONTROLNET_CANNY],
            PipelineVariant::ControlNetSdxl => &[CONTROLNET_CANNY_SDXL],
        }
    }

    /// Base pipeline a ControlNet variant attaches its conditioning network to
    pub fn root_checkpoint(&self) -> Option<&'static str> {
        match self {
            PipelineVariant::ControlNet => Some(SD_V1_5),
            PipelineVariant::ControlNetSdxl => Some(SDXL_BASE),
            _ => None,
        }
    }

    pub fn required_assets(&self) -> AssetNeeds {
        match self {
            PipelineVariant::TextToImage => AssetNeeds::default(),
            PipelineVariant::ImageToImage => AssetNeeds {
                image: true,
                ..AssetNeeds::default()
            },
            PipelineVariant::Inpainting => AssetNeeds {
                image: true,
                mask_image: true,
                ..AssetNeeds::default()
            },
            PipelineVariant::ControlNet | PipelineVariant::ControlNetSdxl => AssetNeeds {
                control_image: true,
                ..AssetNeeds::default()
            },
        }
    }

    /// Resolve and check the checkpoint this variant is asked to benchmark
    pub fn resolve_checkpoint(&self, ckpt: &str) -> BenchResult<&'static CheckpointInfo> {
        let info = checkpoints::lookup(ckpt)?;
        let expected_kind = if self.is_controlnet() {
            CheckpointKind::ControlNet
        } else {
            CheckpointKind::Base
        };
        if info.kind != expected_kind {
            return Err(BenchError::ConfigError(format!(
                "checkpoint {} is a {:?} checkpoint, but the {} variant expects {:?}",
                ckpt, info.kind, self, expected_kind
            )));
        }
        match self {
            PipelineVariant::ControlNet if info.family.is_xl() => {
                Err(BenchError::ConfigError(format!(
                    "checkpoint {} is an SDXL ControlNet, use the controlnet-sdxl variant",
                    ckpt
                )))
            }
            PipelineVariant::ControlNetSdxl if !info.family.is_xl() => {
                Err(BenchError::ConfigError(format!(
                    "checkpoint {} is not an SDXL ControlNet, use the controlnet variant",
                    ckpt
                )))
            }
            _ => Ok(info),
        }
    }

    /// Name of the concrete pipeline class this variant resolves to for a model family
    pub fn pipeline_class_name(&self, family: ModelFamily) -> &'static str {
        let xl = family.is_xl();
        match self {
            PipelineVariant::TextToImage if xl => "StableDiffusionXLPipeline",
            PipelineVariant::TextToImage => "StableDiffusionPipeline",
            PipelineVariant::ImageToImage if xl => "StableDiffusionXLImg2ImgPipeline",
            PipelineVariant::ImageToImage => "StableDiffusionImg2ImgPipeline",
            PipelineVariant::Inpainting if xl => "StableDiffusionXLInpaintPipeline",
            PipelineVariant::Inpainting => "StableDiffusionInpaintPipeline",
            PipelineVariant::ControlNet => "StableDiffusionControlNetPipeline",
            PipelineVariant::ControlNetSdxl => "StableDiffusionXLControlNetPipeline",
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PipelineVariant {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "text2img" | "text-to-image" => Ok(PipelineVariant::TextToImage),
            "img2img" | "image-to-image" => Ok(PipelineVariant::ImageToImage),
            "inpainting" | "inpaint" => Ok(PipelineVariant::Inpainting),
            "controlnet" => Ok(PipelineVariant::ControlNet),
            "controlnet-sdxl" => Ok(PipelineVariant::ControlNetSdxl),
            _ => Err(BenchError::ConfigError(format!(
                "unknown pipeline variant '{}', expected one of: {}",
                s,
                PipelineVariant::ALL
                    .iter()
                    .map(|v| v.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}
