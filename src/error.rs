//! Graphics error types.

use thiserror::Error;

/// Errors that can occur in the GPU core.
///
/// Device-level failures (`InitializationFailed`, `ResourceCreationFailed`,
/// `OutOfMemory`, `DeviceLost`) are unrecoverable: there is no well-defined
/// way to continue after a corrupted device, so callers are expected to
/// propagate them up and terminate the frame loop. `InvalidParameter` marks
/// an engine-internal ordering or invariant violation that was promoted to a
/// checked error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for results in this crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;
