use crate::cli::RunArgs;
use anyhow::Result;
use diffbench::{run_benchmark, RunConfig, Settings};

pub fn handle_run(args: RunArgs, mut settings: Settings) -> Result<()> {
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }

    let config = match args.run_config {
        Some(json) => RunConfig::from_string(json)?,
        None => {
            let ckpt = args
                .ckpt
                .unwrap_or_else(|| args.variant.default_checkpoint().to_string());
            RunConfig::new(ckpt)
                .with_batch_size(args.batch_size)
                .with_num_inference_steps(args.num_inference_steps)
                .with_model_cpu_offload(args.model_cpu_offload)
                .with_run_compile(args.run_compile)
        }
    };

    let result = run_benchmark(args.variant, config, &settings)?;
    println!(
        "{} {}: {:.3} secs, {:.3} GB",
        result.pipeline_class, result.ckpt, result.time_secs, result.memory_gb
    );
    Ok(())
}
