//! Shared transfer logic: how a file is split into segments, how upload
//! progress is reported, and how files are fingerprinted.

mod checksum;
mod plan;
mod progress;
mod validation;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use plan::{MAX_SEGMENTS, SplitPlan};
pub use progress::{Progress, ProgressMeter, UploadFailure, percent};
pub use validation::validate_file_name;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid split plan: {0}")]
    InvalidPlan(String),
}
