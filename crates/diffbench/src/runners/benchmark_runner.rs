use crate::assets::BenchAssets;
use crate::backend::{self, DiffusionBackend, DiffusionPipeline, GenerationRequest, LoadRequest};
use crate::bench_config::RunConfig;
use crate::conditioning::Conditioning;
use crate::errors::BenchResult;
use crate::memory::{bytes_to_gigabytes, MemoryTracker};
use crate::reporting::{result_filepath, write_to_csv, BenchmarkRecord, BenchmarkResult};
use crate::settings::Settings;
use crate::utilities::benchmark_fn;
use crate::variants::PipelineVariant;

/// Drives one benchmark: load, optionally compile, time one generation and
/// record the result row
pub struct BenchmarkRunner<'a> {
    variant: PipelineVariant,
    config: RunConfig,
    settings: &'a Settings,
    backend: &'a dyn DiffusionBackend,
    assets: &'a BenchAssets,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(
        variant: PipelineVariant,
        config: RunConfig,
        settings: &'a Settings,
        backend: &'a dyn DiffusionBackend,
        assets: &'a BenchAssets,
    ) -> Self {
        Self {
            variant,
            config,
            settings,
            backend,
            assets,
        }
    }

    pub fn run(&self) -> BenchResult<BenchmarkResult> {
        self.config.validate()?;
        let request = LoadRequest::for_run(self.variant, &self.config)?;
        let conditioning = self
            .variant
            .prepare_conditioning(self.assets, request.resolution)?;

        tracing::info!(
            "Benchmarking {} ({}) on {}: bs={} steps={} offload={} compile={}",
            self.config.ckpt,
            self.variant,
            self.backend.name(),
            self.config.batch_size,
            self.config.num_inference_steps,
            self.config.model_cpu_offload,
            self.config.run_compile
        );

        let mut tracker = MemoryTracker::new(self.backend.memory_probe()?);
        let outcome = self
            .backend
            .load(&request)
            .and_then(|pipeline| self.measure(pipeline, &conditioning, &mut tracker));
        // The pipeline is dropped by now, so flushing releases everything it held
        self.backend.flush();
        outcome
    }

    fn measure(
        &self,
        mut pipeline: Box<dyn DiffusionPipeline>,
        conditioning: &Conditioning,
        tracker: &mut MemoryTracker,
    ) -> BenchResult<BenchmarkResult> {
        tracker.sample();

        if self.config.run_compile {
            tracing::info!("Run compile");
            pipeline.compile()?;
        }

        let generation = GenerationRequest {
            conditioning,
            num_inference_steps: self.config.num_inference_steps,
            batch_size: self.config.batch_size,
        };
        let time_secs = benchmark_fn(|| pipeline.generate(&generation, &mut *tracker))?;
        tracker.sample();

        let result = BenchmarkResult {
            pipeline_class: pipeline.class_name().to_string(),
            ckpt: self.config.ckpt.clone(),
            config: self.config.clone(),
            time_secs,
            memory_gb: tracker.peak_gigabytes(),
        };
        tracing::info!(
            "{} took {:.3}s with a peak of {:.3} GB",
            result.pipeline_class,
            result.time_secs,
            result.memory_gb
        );

        let record = BenchmarkRecord::new(
            &result,
            self.actual_device_memory_gb(),
            self.settings.github_sha.as_deref(),
        );
        let path = result_filepath(
            &self.settings.base_path,
            &result.ckpt,
            &result.pipeline_class,
            &self.config,
        );
        write_to_csv(&path, &record)?;
        tracing::info!("Logs written to: {}", path.display());
        Ok(result)
    }

    fn actual_device_memory_gb(&self) -> Option<f64> {
        self.settings
            .total_device_memory_gb
            .or_else(|| self.backend.total_memory_bytes().map(bytes_to_gigabytes))
    }
}

/// Build the configured backend, fetch the variant's assets and run once
pub fn run_benchmark(
    variant: PipelineVariant,
    config: RunConfig,
    settings: &Settings,
) -> BenchResult<BenchmarkResult> {
    config.validate()?;
    variant.resolve_checkpoint(&config.ckpt)?;

    let backend = backend::create(&settings.backend, settings)?;
    let assets = BenchAssets::fetch(
        variant,
        &settings.prompt,
        &settings.assets,
        settings.asset_cache_dir(),
    )?;
    BenchmarkRunner::new(variant, config, settings, backend.as_ref(), &assets).run()
}
