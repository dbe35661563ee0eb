use crate::errors::{BenchError, BenchResult};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub const SD_V1_5: &str = "runwayml/stable-diffusion-v1-5";
pub const SD_V2_1: &str = "stabilityai/stable-diffusion-2-1";
pub const SDXL_BASE: &str = "stabilityai/stable-diffusion-xl-base-1.0";
pub const SDXL_REFINER: &str = "stabilityai/stable-diffusion-xl-refiner-1.0";
pub const CONTROLNET_CANNY: &str = "lllyasviel/sd-controlnet-canny";
pub const CONTROLNET_CANNY_SDXL: &str = "diffusers/controlnet-canny-sdxl-1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelFamily {
    StableDiffusion15,
    StableDiffusion21,
    StableDiffusionXl,
    StableDiffusionXlRefiner,
}

impl ModelFamily {
    pub fn is_xl(&self) -> bool {
        matches!(
            self,
            ModelFamily::StableDiffusionXl | ModelFamily::StableDiffusionXlRefiner
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CheckpointKind {
    /// A full generation pipeline
    Base,
    /// A conditioning sub-model that plugs into a base pipeline
    ControlNet,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub id: &'static str,
    pub resolution: Resolution,
    pub family: ModelFamily,
    pub kind: CheckpointKind,
}

static REGISTRY: Lazy<HashMap<&'static str, CheckpointInfo>> = Lazy::new(|| {
    [
        (SD_V1_5, 512, ModelFamily::StableDiffusion15, CheckpointKind::Base),
        (SD_V2_1, 768, ModelFamily::StableDiffusion21, CheckpointKind::Base),
        (SDXL_BASE, 1024, ModelFamily::StableDiffusionXl, CheckpointKind::Base),
        (
            SDXL_REFINER,
            1024,
            ModelFamily::StableDiffusionXlRefiner,
            CheckpointKind::Base,
        ),
        (
            CONTROLNET_CANNY,
            512,
            ModelFamily::StableDiffusion15,
            CheckpointKind::ControlNet,
        ),
        (
            CONTROLNET_CANNY_SDXL,
            1024,
            ModelFamily::StableDiffusionXl,
            CheckpointKind::ControlNet,
        ),
    ]
    .into_iter()
    .map(|(id, side, family, kind)| {
        (
            id,
            CheckpointInfo {
                id,
                resolution: Resolution::square(side),
                family,
                kind,
            },
        )
    })
    .collect()
});

/// Look up a checkpoint the harness knows how to benchmark
pub fn lookup(ckpt: &str) -> BenchResult<&'static CheckpointInfo> {
    REGISTRY
        .get(ckpt)
        .ok_or_else(|| BenchError::UnknownCheckpoint(ckpt.to_string()))
}

/// Image resolution the checkpoint was trained at
pub fn resolution_for(ckpt: &str) -> BenchResult<Resolution> {
    lookup(ckpt).map(|info| info.resolution)
}

/// All registered checkpoints, sorted by id
pub fn known_checkpoints() -> Vec<&'static CheckpointInfo> {
    let mut all: Vec<_> = REGISTRY.values().collect();
    all.sort_by_key(|info| info.id);
    all
}
