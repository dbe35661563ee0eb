use crate::bench_config::RunConfig;
use crate::errors::util::ensure_file_exists;
use crate::errors::{BenchError, BenchResult};
use crate::reporting::types::BenchmarkRecord;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const COLLATED_FILENAME: &str = "collated_results.csv";

/// Result file for a checkpoint, pipeline class and run configuration
pub fn result_filepath(base: &Path, ckpt: &str, pipeline_class: &str, config: &RunConfig) -> PathBuf {
    let name = format!(
        "{}_{}-bs@{}-steps@{}-mco@{}-compile@{}.csv",
        ckpt.replace('/', "_"),
        pipeline_class,
        config.batch_size,
        config.num_inference_steps,
        config.model_cpu_offload,
        config.run_compile
    );
    base.join(name)
}

/// Append a record, writing the header only when the file is new
pub fn write_to_csv(path: &Path, record: &BenchmarkRecord) -> BenchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let exists = path.is_file() && fs::metadata(path)?.len() > 0;
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!exists)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

/// Concatenate result files sharing one header into `output`.
/// Returns the number of data rows written.
pub fn collate_csv(inputs: &[PathBuf], output: &Path) -> BenchResult<usize> {
    let mut header: Option<csv::StringRecord> = None;
    let mut writer = csv::Writer::from_path(output)?;
    let mut rows = 0;

    for input in inputs {
        ensure_file_exists(input)?;
        let mut reader = csv::Reader::from_path(input)?;
        let input_header = reader.headers()?.clone();
        match &header {
            None => {
                writer.write_record(&input_header)?;
                header = Some(input_header);
            }
            Some(expected) if *expected != input_header => {
                return Err(BenchError::Other(format!(
                    "{} does not share the result file header",
                    input.display()
                )));
            }
            Some(_) => {}
        }

        for record in reader.records() {
            writer.write_record(&record?)?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

/// Absolute form of `path` with its directory resolved, whether or not the
/// file itself exists yet
fn resolved(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::canonicalize(parent).ok().map(|dir| dir.join(name))
}

/// Collate every `*.csv` directly under `base` except `output` itself
pub fn collate_dir(base: &Path, output: &Path) -> BenchResult<usize> {
    let output_resolved = resolved(output);
    let mut inputs: Vec<PathBuf> = fs::read_dir(base)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .filter(|path| output_resolved.is_none() || resolved(path) != output_resolved)
        .collect();
    inputs.sort();

    if inputs.is_empty() {
        tracing::warn!("No result files found under {}", base.display());
        return Ok(0);
    }

    tracing::info!("Collating {} result files into {}", inputs.len(), output.display());
    collate_csv(&inputs, output)
}
