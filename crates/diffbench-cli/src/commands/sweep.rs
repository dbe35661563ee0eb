use crate::cli::SweepArgs;
use anyhow::Result;
use diffbench::runners::sweep_runner::DEFAULT_SWEEP_BATCH_SIZES;
use diffbench::{PipelineVariant, Settings, SweepPlan, SweepRunner};
use std::path::PathBuf;

pub fn handle_sweep(args: SweepArgs, settings: Settings, config_file: Option<PathBuf>) -> Result<()> {
    let variants = if args.variants.is_empty() {
        PipelineVariant::ALL.to_vec()
    } else {
        args.variants
    };
    let batch_sizes = if args.batch_sizes.is_empty() {
        DEFAULT_SWEEP_BATCH_SIZES.to_vec()
    } else {
        args.batch_sizes
    };

    let plan = SweepPlan::new(&variants, &batch_sizes, args.num_inference_steps);
    tracing::info!("Sweeping {} configurations", plan.len());

    let summary = SweepRunner::new(plan, settings.base_path.clone())
        .with_backend(args.backend)
        .with_config_file(config_file)
        .run()?;

    println!(
        "{} succeeded, {} failed. {} rows collated into {}",
        summary.succeeded,
        summary.failed.len(),
        summary.rows,
        summary.collated.display()
    );
    for entry in &summary.failed {
        println!(
            "  failed: {} {} bs={} compile={}",
            entry.variant, entry.config.ckpt, entry.config.batch_size, entry.config.run_compile
        );
    }
    Ok(())
}
