//! Dense linear algebra helpers for error-term weighting.
//!
//! The only factorization this core needs is a square root of an inverse covariance
//! (information) matrix, `invR = Sᵀ·S`, see [`SquareRootFactor`].

pub mod cholesky;

use thiserror::Error;
use tracing::error;

pub use cholesky::{DEFAULT_SYMMETRY_TOLERANCE, FactorizationMethod, SquareRootFactor};

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix must be square for the requested operation
    #[error("Matrix is not square: got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    /// Matrix deviates from its transpose beyond tolerance
    #[error("Matrix is not symmetric (max asymmetry {max_asymmetry:e})")]
    NotSymmetric { max_asymmetry: f64 },

    /// Symmetric matrix has a clearly negative eigenvalue
    #[error("Matrix is not positive semi-definite (min eigenvalue {min_eigenvalue:e})")]
    NotPositiveSemiDefinite { min_eigenvalue: f64 },

    /// NaN or Inf entries were found
    #[error("Matrix contains NaN or Inf entries")]
    NonFiniteEntries,

    /// Matrix factorization failed (Cholesky, eigen decomposition)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;
