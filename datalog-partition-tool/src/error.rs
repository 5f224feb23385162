use thiserror::Error;

/// Errors that can occur while loading, parsing or exporting a partition
/// image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid block size {0}: must be a multiple of 4 and hold a block record")]
    InvalidBlockSize(usize),

    #[error("table '{0}' not found in image")]
    TableNotFound(String),
}
