pub mod benchmark_runner;
pub mod sweep_runner;

pub use benchmark_runner::{run_benchmark, BenchmarkRunner};
pub use sweep_runner::{SweepEntry, SweepPlan, SweepRunner, SweepSummary};
