use crate::errors::{BenchError, BenchResult};
use config::{Config, Environment, File, FileFormat};
use etcetera::{choose_base_strategy, BaseStrategy};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROMPT: &str = "ghibli style, a fantasy landscape with castles";
pub const DEFAULT_IMAGE_URL: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/0/0f/1665_Girl_with_a_Pearl_Earring.jpg/800px-1665_Girl_with_a_Pearl_Earring.jpg";
pub const DEFAULT_MASK_URL: &str = "https://raw.githubusercontent.com/CompVis/latent-diffusion/main/data/inpainting_examples/overture-creations-5sI6fQgYIuo_mask.png";
pub const DEFAULT_CONTROL_IMAGE_URL: &str =
    "https://huggingface.co/datasets/diffusers/docs-images/resolve/main/benchmarking/canny_image_condition.png";

/// Where the fixed conditioning images come from
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSettings {
    pub image_url: String,
    pub mask_url: String,
    pub control_image_url: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory result files are written to
    pub base_path: PathBuf,
    pub prompt: String,
    pub backend: String,
    pub device_ordinal: usize,
    pub guidance_scale: f64,
    #[serde(default)]
    pub github_sha: Option<String>,
    /// Overrides the device memory reported by the backend
    #[serde(default)]
    pub total_device_memory_gb: Option<f64>,
    #[serde(default)]
    pub hf_token: Option<String>,
    pub assets: AssetSettings,
}

impl Settings {
    pub fn new() -> BenchResult<Self> {
        Self::load(None)
    }

    /// Defaults, then the optional TOML file, then `DIFFBENCH_*` variables,
    /// then the bare `BASE_PATH`, `GITHUB_SHA`, `HF_TOKEN` and `TOTAL_GPU_MEMORY` variables.
    pub fn load(config_file: Option<&Path>) -> BenchResult<Self> {
        let mut builder = Config::builder()
            .set_default("base_path", ".")?
            .set_default("prompt", DEFAULT_PROMPT)?
            .set_default("backend", "candle")?
            .set_default("device_ordinal", 0i64)?
            .set_default("guidance_scale", 7.5f64)?
            .set_default("assets.image_url", DEFAULT_IMAGE_URL)?
            .set_default("assets.mask_url", DEFAULT_MASK_URL)?
            .set_default("assets.control_image_url", DEFAULT_CONTROL_IMAGE_URL)?;

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let total_gpu_memory = match env::var("TOTAL_GPU_MEMORY") {
            Ok(value) => Some(value.trim().parse::<f64>().map_err(|_| {
                BenchError::ConfigError(format!(
                    "TOTAL_GPU_MEMORY must be a number of gigabytes, got {:?}",
                    value
                ))
            })?),
            Err(_) => None,
        };

        let config = builder
            .add_source(
                Environment::with_prefix("DIFFBENCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("base_path", env::var("BASE_PATH").ok())?
            .set_override_option("github_sha", env::var("GITHUB_SHA").ok())?
            .set_override_option("hf_token", env::var("HF_TOKEN").ok())?
            .set_override_option("total_device_memory_gb", total_gpu_memory)?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        tracing::debug!("Loaded settings: {:?}", settings.redacted());
        Ok(settings)
    }

    /// Asset cache directory, falling back to the platform cache dir
    pub fn asset_cache_dir(&self) -> Option<PathBuf> {
        self.assets.cache_dir.clone().or_else(|| {
            choose_base_strategy()
                .ok()
                .map(|strategy| strategy.cache_dir().join("diffbench"))
        })
    }

    fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        if copy.hf_token.is_some() {
            copy.hf_token = Some("***".to_string());
        }
        copy
    }
}
