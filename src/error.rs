// error.rs — Crate-wide error type.
//
// Every fallible public call returns `kdeshift::Result<T>`. The variants
// split into three groups:
//
//   input validation  — caught before any run starts (bandwidth, coordinates,
//                       dimensionality, configuration values)
//   lifecycle         — the compute context is missing, busy, or failed
//   I/O               — only used by the config loader and the demo binary
//
// Non-convergence is not an error: force-stopped points are reported
// through `RunStats::force_stopped`, not as an error.

use std::path::PathBuf;

use crate::gpu::device::GpuError;

/// Errors returned by the clustering engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bandwidth must be finite and strictly positive.
    #[error("invalid bandwidth {0}: sigma must be finite and > 0")]
    InvalidBandwidth(f32),

    /// A point coordinate was NaN or infinite.
    #[error("point {index} has a non-finite coordinate")]
    NonFiniteCoordinate { index: usize },

    /// Input data does not provide the two dimensions clustering needs.
    #[error("selected data must be 2-dimensional (got {dimensions} dimension(s), requested columns {dim_x} and {dim_y})")]
    Dimensionality {
        dimensions: usize,
        dim_x: usize,
        dim_y: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `cluster()` was called before `initialize()`.
    #[error("engine not initialized: call initialize() before cluster()")]
    NotInitialized,

    /// The compute context is already leased by another run.
    #[error("compute context is already in use by another clustering run")]
    ContextBusy,

    /// The compute context could not be created.
    #[error("failed to initialize compute context: {0}")]
    ContextInit(String),

    /// GPU device or dispatch failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Reading a configuration or data file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
