use crate::bench_config::RunConfig;
use serde::{Deserialize, Serialize};

/// Outcome of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub pipeline_class: String,
    pub ckpt: String,
    pub config: RunConfig,
    pub time_secs: f64,
    pub memory_gb: f64,
}

/// One row of a result file. Column names are part of the file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub pipeline_cls: String,
    pub ckpt_id: String,
    pub batch_size: usize,
    pub num_inference_steps: usize,
    pub model_cpu_offload: bool,
    pub run_compile: bool,
    #[serde(rename = "time (secs)")]
    pub time_secs: String,
    #[serde(rename = "memory (gbs)")]
    pub memory_gbs: String,
    #[serde(rename = "actual_gpu_memory (gbs)")]
    pub actual_gpu_memory_gbs: String,
    #[serde(default)]
    pub github_sha: String,
}

impl BenchmarkRecord {
    pub fn new(
        result: &BenchmarkResult,
        actual_gpu_memory_gb: Option<f64>,
        github_sha: Option<&str>,
    ) -> Self {
        Self {
            pipeline_cls: result.pipeline_class.clone(),
            ckpt_id: result.ckpt.clone(),
            batch_size: result.config.batch_size,
            num_inference_steps: result.config.num_inference_steps,
            model_cpu_offload: result.config.model_cpu_offload,
            run_compile: result.config.run_compile,
            time_secs: format!("{:.3}", result.time_secs),
            memory_gbs: format!("{:.3}", result.memory_gb),
            actual_gpu_memory_gbs: actual_gpu_memory_gb
                .map(|gb| format!("{:.3}", gb))
                .unwrap_or_default(),
            github_sha: github_sha.unwrap_or_default().to_string(),
        }
    }
}
