use crate::errors::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_NUM_INFERENCE_STEPS: usize = 50;

/// Options for a single benchmark run. Fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub ckpt: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_inference_steps")]
    pub num_inference_steps: usize,
    #[serde(default)]
    pub model_cpu_offload: bool,
    #[serde(default)]
    pub run_compile: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_num_inference_steps() -> usize {
    DEFAULT_NUM_INFERENCE_STEPS
}

impl RunConfig {
    pub fn new(ckpt: impl Into<String>) -> Self {
        Self {
            ckpt: ckpt.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            num_inference_steps: DEFAULT_NUM_INFERENCE_STEPS,
            model_cpu_offload: false,
            run_compile: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_num_inference_steps(mut self, num_inference_steps: usize) -> Self {
        self.num_inference_steps = num_inference_steps;
        self
    }

    pub fn with_model_cpu_offload(mut self, model_cpu_offload: bool) -> Self {
        self.model_cpu_offload = model_cpu_offload;
        self
    }

    pub fn with_run_compile(mut self, run_compile: bool) -> Self {
        self.run_compile = run_compile;
        self
    }

    pub fn from_string(cfg: String) -> BenchResult<Self> {
        let config: RunConfig = serde_json::from_str(&cfg)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_string(&self) -> BenchResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject configurations the harness cannot run
    pub fn validate(&self) -> BenchResult<()> {
        if self.ckpt.trim().is_empty() {
            return Err(BenchError::ConfigError(
                "checkpoint name must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BenchError::ConfigError(
                "batch size must be a positive integer".to_string(),
            ));
        }
        if self.num_inference_steps == 0 {
            return Err(BenchError::ConfigError(
                "number of inference steps must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_filled_when_parsing() {
        let cfg = RunConfig::from_string(r#"{"ckpt": "runwayml/stable-diffusion-v1-5"}"#.into())
            .unwrap();
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.num_inference_steps, 50);
        assert!(!cfg.model_cpu_offload);
        assert!(!cfg.run_compile);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let cfg = RunConfig::new("runwayml/stable-diffusion-v1-5").with_batch_size(0);
        assert!(matches!(cfg.validate(), Err(BenchError::ConfigError(_))));

        let cfg = RunConfig::new("runwayml/stable-diffusion-v1-5").with_num_inference_steps(0);
        assert!(matches!(cfg.validate(), Err(BenchError::ConfigError(_))));

        let cfg = RunConfig::new("  ");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_survives_serialization() {
        let cfg = RunConfig::new("stabilityai/stable-diffusion-2-1")
            .with_batch_size(4)
            .with_num_inference_steps(30)
            .with_run_compile(true);
        let parsed = RunConfig::from_string(cfg.to_string().unwrap()).unwrap();
        assert_eq!(parsed, cfg);
    }
}
