pub mod csv_writer;
pub mod types;

pub use csv_writer::{collate_csv, collate_dir, result_filepath, write_to_csv, COLLATED_FILENAME};
pub use types::{BenchmarkRecord, BenchmarkResult};
