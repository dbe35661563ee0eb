pub mod candle;
pub mod mock;

use crate::bench_config::RunConfig;
use crate::checkpoints::{ModelFamily, Resolution};
use crate::conditioning::Conditioning;
use crate::errors::{BenchError, BenchResult};
use crate::memory::{MemoryProbe, MemoryTracker};
use crate::settings::Settings;
use crate::variants::PipelineVariant;

pub use self::candle::CandleBackend;
pub use self::mock::MockBackend;

/// What to load from the model hub for one run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub variant: PipelineVariant,
    /// Checkpoint the generation pipeline is loaded from
    pub checkpoint: String,
    /// Conditioning sub-model loaded next to the pipeline (ControlNet)
    pub auxiliary_checkpoint: Option<String>,
    pub family: ModelFamily,
    pub resolution: Resolution,
    pub model_cpu_offload: bool,
}

impl LoadRequest {
    /// Resolve which checkpoints a variant needs for the given run
    pub fn for_run(variant: PipelineVariant, config: &RunConfig) -> BenchResult<Self> {
        let info = variant.resolve_checkpoint(&config.ckpt)?;
        let (checkpoint, auxiliary_checkpoint) = match variant.root_checkpoint() {
            Some(root) => (root.to_string(), Some(config.ckpt.clone())),
            None => (config.ckpt.clone(), None),
        };
        Ok(Self {
            variant,
            checkpoint,
            auxiliary_checkpoint,
            family: info.family,
            resolution: info.resolution,
            model_cpu_offload: config.model_cpu_offload,
        })
    }

    pub fn pipeline_class_name(&self) -> &'static str {
        self.variant.pipeline_class_name(self.family)
    }
}

/// One inference call
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub conditioning: &'a Conditioning,
    pub num_inference_steps: usize,
    pub batch_size: usize,
}

/// A loaded generation pipeline, held for the duration of one run
pub trait DiffusionPipeline {
    /// Concrete pipeline class, reported in the result row
    fn class_name(&self) -> &str;

    /// Optimize the inner computation graph(s) ahead of the first call
    fn compile(&mut self) -> BenchResult<()>;

    /// Run one full generation, sampling memory along the way
    fn generate(
        &mut self,
        request: &GenerationRequest<'_>,
        tracker: &mut MemoryTracker,
    ) -> BenchResult<()>;
}

/// The inference framework a benchmark runs against
pub trait DiffusionBackend {
    fn name(&self) -> &str;

    fn load(&self, request: &LoadRequest) -> BenchResult<Box<dyn DiffusionPipeline>>;

    fn memory_probe(&self) -> BenchResult<Box<dyn MemoryProbe>>;

    /// Total memory of the device pipelines run on, if known
    fn total_memory_bytes(&self) -> Option<u64>;

    /// Release transient memory once a pipeline has been dropped
    fn flush(&self);
}

#[derive(Debug, Clone)]
pub struct BackendMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub variants: Vec<PipelineVariant>,
}

pub fn backends() -> Vec<BackendMetadata> {
    vec![CandleBackend::metadata(), MockBackend::metadata()]
}

pub fn create(name: &str, settings: &Settings) -> BenchResult<Box<dyn DiffusionBackend>> {
    match name {
        "candle" => Ok(Box::new(CandleBackend::from_settings(settings)?)),
        "mock" => Ok(Box::new(MockBackend::new())),
        _ => Err(BenchError::ConfigError(format!(
            "Unknown backend: {} (available: {})",
            name,
            backends()
                .iter()
                .map(|b| b.name)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::{CONTROLNET_CANNY, CONTROLNET_CANNY_SDXL, SDXL_BASE, SD_V1_5, SD_V2_1};

    #[test]
    fn test_load_request_for_base_variant() {
        let config = RunConfig::new(SD_V2_1).with_model_cpu_offload(true);
        let request = LoadRequest::for_run(PipelineVariant::ImageToImage, &config).unwrap();
        assert_eq!(request.checkpoint, SD_V2_1);
        assert_eq!(request.auxiliary_checkpoint, None);
        assert_eq!(request.resolution, Resolution::square(768));
        assert!(request.model_cpu_offload);
        assert_eq!(request.pipeline_class_name(), "StableDiffusionImg2ImgPipeline");
    }

    #[test]
    fn test_load_request_routes_controlnet_to_root_pipeline() {
        let config = RunConfig::new(CONTROLNET_CANNY);
        let request = LoadRequest::for_run(PipelineVariant::ControlNet, &config).unwrap();
        assert_eq!(request.checkpoint, SD_V1_5);
        assert_eq!(request.auxiliary_checkpoint.as_deref(), Some(CONTROLNET_CANNY));
        assert_eq!(request.resolution, Resolution::square(512));

        let config = RunConfig::new(CONTROLNET_CANNY_SDXL);
        let request = LoadRequest::for_run(PipelineVariant::ControlNetSdxl, &config).unwrap();
        assert_eq!(request.checkpoint, SDXL_BASE);
        assert_eq!(request.resolution, Resolution::square(1024));
        assert_eq!(
            request.pipeline_class_name(),
            "StableDiffusionXLControlNetPipeline"
        );
    }

    #[test]
    fn test_load_request_unknown_checkpoint() {
        let config = RunConfig::new("someone/else");
        assert!(matches!(
            LoadRequest::for_run(PipelineVariant::TextToImage, &config),
            Err(BenchError::UnknownCheckpoint(_))
        ));
    }

    #[test]
    fn test_unknown_backend() {
        let settings = Settings {
            backend: "tensorrt".to_string(),
            ..crate::test_support::settings(std::path::Path::new("."))
        };
        let err = create(&settings.backend, &settings).err().unwrap();
        assert!(err.to_string().contains("Unknown backend: tensorrt"));
        assert!(create("mock", &settings).is_ok());
    }
}
