pub mod assets;
pub mod backend;
pub mod bench_config;
pub mod checkpoints;
pub mod conditioning;
pub mod errors;
pub mod memory;
pub mod reporting;
pub mod runners;
pub mod settings;
pub mod utilities;
pub mod variants;

// Re-export main components for easier use
pub use assets::BenchAssets;
pub use bench_config::RunConfig;
pub use errors::{BenchError, BenchResult};
pub use reporting::{BenchmarkRecord, BenchmarkResult};
pub use runners::{run_benchmark, BenchmarkRunner, SweepPlan, SweepRunner};
pub use settings::Settings;
pub use variants::PipelineVariant;
