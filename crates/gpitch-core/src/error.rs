//! Error types for kernel construction, inference and windowing

use thiserror::Error;

/// Errors raised by the GP core
#[derive(Debug, Error)]
pub enum GpError {
    /// Energy and frequency vectors of a spectral kernel disagree
    #[error("kernel {kernel}: {energies} energies but {frequencies} frequencies")]
    KernelShape {
        kernel: &'static str,
        energies: usize,
        frequencies: usize,
    },

    /// Value outside the domain of a parameter transform
    #[error("invalid value {value} for parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: &'static str,
    },

    /// Cholesky factorisation failed even after jitter was added
    #[error("{what} is not positive definite (size {size}, jitter {jitter:e})")]
    NotPositiveDefinite {
        what: &'static str,
        size: usize,
        jitter: f64,
    },

    /// Objective or gradient became NaN/Inf
    #[error("non-finite {what} at iteration {iteration}")]
    NonFinite { what: &'static str, iteration: usize },

    /// Mismatched or empty data arrays
    #[error("data shape error: {0}")]
    DataShape(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Orchestrator step called out of order
    #[error("window {window} is {found:?}, expected {expected:?}")]
    WindowState {
        window: usize,
        found: crate::transcription::WindowState,
        expected: crate::transcription::WindowState,
    },
}

pub type Result<T> = std::result::Result<T, GpError>;
