use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for the benchmark harness
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    #[error("Pipeline variant {variant} is not supported by the {backend} backend")]
    UnsupportedVariant { variant: String, backend: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to prepare benchmark assets: {0}")]
    AssetError(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Device out of memory: {0}")]
    OutOfMemory(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for benchmark operations
pub type BenchResult<T> = Result<T, BenchError>;

pub mod util {
    use super::*;
    use std::path::Path;

    /// Check if a file exists, returning a FileNotFound error if it doesn't
    pub fn ensure_file_exists<P: AsRef<Path>>(path: P) -> BenchResult<()> {
        let path_ref = path.as_ref();
        if !path_ref.is_file() {
            return Err(BenchError::FileNotFound(path_ref.to_path_buf()));
        }
        Ok(())
    }

    /// Wrap an error from the inference framework, keeping its message as-is
    pub fn to_backend_error<E: fmt::Display>(e: E, context: &str) -> BenchError {
        let message = e.to_string();
        if message.to_lowercase().contains("out of memory") {
            BenchError::OutOfMemory(format!("{}: {}", context, message))
        } else {
            BenchError::BackendError(format!("{}: {}", context, message))
        }
    }
}

impl From<anyhow::Error> for BenchError {
    fn from(err: anyhow::Error) -> Self {
        BenchError::Other(err.to_string())
    }
}

impl From<config::ConfigError> for BenchError {
    fn from(err: config::ConfigError) -> Self {
        BenchError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::util::*;
    use super::*;

    #[test]
    fn test_out_of_memory_is_detected() {
        let err = to_backend_error("CUDA_ERROR_OUT_OF_MEMORY: out of memory", "unet forward");
        assert!(matches!(err, BenchError::OutOfMemory(_)));

        let err = to_backend_error("shape mismatch", "unet forward");
        assert!(matches!(err, BenchError::BackendError(_)));
        assert_eq!(err.to_string(), "Backend error: unet forward: shape mismatch");
    }

    #[test]
    fn test_ensure_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ensure_file_exists(dir.path()),
            Err(BenchError::FileNotFound(_))
        ));

        let file = dir.path().join("present.csv");
        std::fs::write(&file, "a,b\n").unwrap();
        assert!(ensure_file_exists(&file).is_ok());
    }
}
