//! Error types for host-side pipeline operations

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced to the caller. Kernels never fail; these cover grid
/// ingestion, parameter validation and orchestration.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Grid data length mismatch: expected {expected} bytes, got {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("No voxel grid loaded")]
    NoGrid,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
