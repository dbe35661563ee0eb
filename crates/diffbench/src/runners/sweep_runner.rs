use crate::bench_config::RunConfig;
use crate::errors::{BenchError, BenchResult};
use crate::reporting::{collate_dir, COLLATED_FILENAME};
use crate::utilities::await_process_exit;
use crate::variants::PipelineVariant;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_SWEEP_BATCH_SIZES: [usize; 2] = [1, 4];

#[derive(Debug, Clone, PartialEq)]
pub struct SweepEntry {
    pub variant: PipelineVariant,
    pub config: RunConfig,
}

/// Every variant, checkpoint, batch size and compile setting to benchmark
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    entries: Vec<SweepEntry>,
}

impl SweepPlan {
    pub fn new(variants: &[PipelineVariant], batch_sizes: &[usize], num_inference_steps: usize) -> Self {
        let mut entries = Vec::new();
        for variant in variants {
            for ckpt in variant.sweep_checkpoints() {
                for &batch_size in batch_sizes {
                    for run_compile in [false, true] {
                        entries.push(SweepEntry {
                            variant: *variant,
                            config: RunConfig::new(*ckpt)
                                .with_batch_size(batch_size)
                                .with_num_inference_steps(num_inference_steps)
                                .with_run_compile(run_compile),
                        });
                    }
                }
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[SweepEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub succeeded: usize,
    pub failed: Vec<SweepEntry>,
    pub collated: PathBuf,
    pub rows: usize,
}

/// Runs each plan entry in its own child process, one after another
pub struct SweepRunner {
    plan: SweepPlan,
    base_path: PathBuf,
    executable: Option<PathBuf>,
    backend: Option<String>,
    config_file: Option<PathBuf>,
}

impl SweepRunner {
    pub fn new(plan: SweepPlan, base_path: impl Into<PathBuf>) -> Self {
        Self {
            plan,
            base_path: base_path.into(),
            executable: None,
            backend: None,
            config_file: None,
        }
    }

    /// Binary that understands the `run` subcommand. Defaults to the current executable.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_config_file(mut self, config_file: Option<PathBuf>) -> Self {
        self.config_file = config_file;
        self
    }

    fn command(&self, executable: &Path, entry: &SweepEntry) -> BenchResult<Command> {
        let mut cmd = Command::new(executable);
        cmd.arg("run")
            .arg("--variant")
            .arg(entry.variant.name())
            .arg("--run-config")
            .arg(entry.config.to_string()?);
        if let Some(backend) = &self.backend {
            cmd.arg("--backend").arg(backend);
        }
        if let Some(config_file) = &self.config_file {
            cmd.arg("--config").arg(config_file);
        }
        cmd.env("BASE_PATH", &self.base_path);
        Ok(cmd)
    }

    pub fn run(&self) -> BenchResult<SweepSummary> {
        let executable = match &self.executable {
            Some(path) => path.clone(),
            None => env::current_exe()?,
        };

        let mut succeeded = 0;
        let mut failed = Vec::new();
        for (i, entry) in self.plan.entries().iter().enumerate() {
            tracing::info!(
                "[{}/{}] {} {} bs={} compile={}",
                i + 1,
                self.plan.len(),
                entry.variant,
                entry.config.ckpt,
                entry.config.batch_size,
                entry.config.run_compile
            );

            let ok = match self.command(&executable, entry)?.spawn() {
                Ok(mut child) => await_process_exit(&mut child),
                Err(e) => {
                    return Err(BenchError::Other(format!(
                        "Failed to spawn {}: {}",
                        executable.display(),
                        e
                    )))
                }
            };
            if ok {
                succeeded += 1;
            } else {
                tracing::error!(
                    "Benchmark failed: {} {} bs={} compile={}",
                    entry.variant,
                    entry.config.ckpt,
                    entry.config.batch_size,
                    entry.config.run_compile
                );
                failed.push(entry.clone());
            }
        }

        let collated = self.base_path.join(COLLATED_FILENAME);
        let rows = collate_dir(&self.base_path, &collated)?;
        tracing::info!(
            "Sweep finished: {} succeeded, {} failed, {} rows in {}",
            succeeded,
            failed.len(),
            rows,
            collated.display()
        );

        Ok(SweepSummary {
            succeeded,
            failed,
            collated,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::{CONTROLNET_CANNY, SD_V1_5};

    #[test]
    fn test_plan_is_full_product() {
        let plan = SweepPlan::new(
            &[PipelineVariant::TextToImage, PipelineVariant::ControlNet],
            &DEFAULT_SWEEP_BATCH_SIZES,
            50,
        );
        // (3 + 1) checkpoints x 2 batch sizes x 2 compile settings
        assert_eq!(plan.len(), 16);
        assert_eq!(plan.entries()[0].config, RunConfig::new(SD_V1_5));
        assert!(plan.entries()[1].config.run_compile);
        assert_eq!(plan.entries()[2].config.batch_size, 4);

        let last = &plan.entries()[15];
        assert_eq!(last.variant, PipelineVariant::ControlNet);
        assert_eq!(last.config.ckpt, CONTROLNET_CANNY);
        assert!(plan
            .entries()
            .iter()
            .all(|e| e.config.num_inference_steps == 50));
    }

    #[test]
    fn test_child_command_line() {
        let runner = SweepRunner::new(SweepPlan::default(), "/results")
            .with_backend(Some("mock".to_string()))
            .with_config_file(Some(PathBuf::from("bench.toml")));
        let entry = SweepEntry {
            variant: PipelineVariant::Inpainting,
            config: RunConfig::new(SD_V1_5)
                .with_batch_size(4)
                .with_run_compile(true),
        };

        let cmd = runner.command(Path::new("diffbench"), &entry).unwrap();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.len(), 8);
        assert_eq!(args[..4], ["run", "--variant", "inpainting", "--run-config"]);
        assert_eq!(args[5..], ["--backend", "mock", "--config", "bench.toml"]);
        assert_eq!(RunConfig::from_string(args[4].clone()).unwrap(), entry.config);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_children_do_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let plan = SweepPlan::new(&[PipelineVariant::ControlNet], &[1], 1);
        let summary = SweepRunner::new(plan, dir.path())
            .with_executable("false")
            .run()
            .unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.rows, 0);
    }
}
