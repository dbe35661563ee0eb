use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use diffbench::bench_config::{DEFAULT_BATCH_SIZE, DEFAULT_NUM_INFERENCE_STEPS};
use diffbench::{PipelineVariant, Settings};
use std::path::PathBuf;

use crate::commands::collate::handle_collate;
use crate::commands::list::list_pipelines;
use crate::commands::run::handle_run;
use crate::commands::sweep::handle_sweep;
use crate::logging::setup_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "TOML settings file",
        long_help = "Settings file layered over the defaults. DIFFBENCH_* environment variables override it."
    )]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    #[arg(
        long,
        value_name = "VARIANT",
        help = "Pipeline variant (text2img, img2img, inpainting, controlnet, controlnet-sdxl)"
    )]
    pub variant: PipelineVariant,

    #[arg(
        long,
        value_name = "CHECKPOINT",
        help = "Checkpoint to benchmark",
        long_help = "Checkpoint to benchmark. Defaults to the variant's default checkpoint."
    )]
    pub ckpt: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_NUM_INFERENCE_STEPS)]
    pub num_inference_steps: usize,

    #[arg(long, help = "Keep sub-models off the device until they are needed")]
    pub model_cpu_offload: bool,

    #[arg(long, help = "Compile the pipeline before benchmarking")]
    pub run_compile: bool,

    #[arg(long, value_name = "NAME", help = "Backend to run on (overrides settings)")]
    pub backend: Option<String>,

    #[arg(
        long,
        value_name = "JSON",
        conflicts_with_all = ["ckpt", "batch_size", "num_inference_steps", "model_cpu_offload", "run_compile"],
        help = "Whole run configuration as JSON",
        long_help = "Whole run configuration as JSON, in place of the individual options. Sweeps hand it to each child process."
    )]
    pub run_config: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SweepArgs {
    #[arg(
        long = "variant",
        value_name = "VARIANT",
        value_delimiter = ',',
        help = "Variants to sweep (defaults to all)"
    )]
    pub variants: Vec<PipelineVariant>,

    #[arg(
        long = "batch-size",
        value_name = "N",
        value_delimiter = ',',
        help = "Batch sizes to sweep (defaults to 1,4)"
    )]
    pub batch_sizes: Vec<usize>,

    #[arg(long, default_value_t = DEFAULT_NUM_INFERENCE_STEPS)]
    pub num_inference_steps: usize,

    #[arg(long, value_name = "NAME", help = "Backend to run on (overrides settings)")]
    pub backend: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CollateArgs {
    #[arg(long, value_name = "DIR", help = "Directory holding result files")]
    pub base_path: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Collated output file (defaults to collated_results.csv under the base path)"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Benchmark one pipeline configuration
    #[command(about = "Benchmark one pipeline configuration")]
    Run(RunArgs),

    /// Benchmark every checkpoint, batch size and compile setting
    #[command(about = "Run each benchmark configuration in its own process")]
    Sweep(SweepArgs),

    /// Merge result files into one CSV
    #[command(about = "Merge result files into one CSV")]
    Collate(CollateArgs),

    /// Show variants, checkpoints and backends
    #[command(about = "List pipeline variants, checkpoints and backends")]
    List,
}

pub fn cli() -> Result<()> {
    let cli = Cli::parse();

    if let Command::List = cli.command {
        list_pipelines();
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let _guard = setup_logging(&settings.base_path, cli.verbose)?;

    match cli.command {
        Command::Run(args) => handle_run(args, settings),
        Command::Sweep(args) => handle_sweep(args, settings, cli.config),
        Command::Collate(args) => handle_collate(args, &settings),
        Command::List => Ok(()),
    }
}
