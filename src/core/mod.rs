//! Core components of the calibration backend
//!
//! This module contains the building blocks a least-squares optimizer consumes:
//! - Design variables and the staged update protocol
//! - Jacobian accumulation keyed by design variable
//! - M-estimators for robust re-weighting
//! - Error terms producing weighted residuals and Jacobians
//! - The optimization problem container that assembles them

pub mod design_variable;
pub mod error_term;
pub mod jacobian_container;
pub mod mestimators;
pub mod non_squared_error_term;
pub mod problem;

use thiserror::Error;
use tracing::{error, warn};

use crate::{linalg::LinAlgError, manifold::ManifoldError};

/// Core module error types for design variables, expressions and error terms
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Error term configuration or evaluation failed
    #[error("Error term error: {0}")]
    ErrorTerm(String),

    /// Expression construction or evaluation failed
    #[error("Expression error: {0}")]
    Expression(String),

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// M-estimator configuration error
    #[error("M-estimator error: {0}")]
    MEstimator(String),

    /// Operation called out of order (e.g. weighted Jacobians before evaluating the error)
    #[error("Usage error: {0}")]
    Usage(String),

    /// NaN/Inf values or a degenerate robust weight
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// Inverse covariance factorization failed
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation failed
    #[error("Manifold error: {0}")]
    Manifold(#[from] ManifoldError),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// This method allows for a consistent error logging pattern throughout
    /// the core module, ensuring all errors are properly recorded.
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Arguments
    /// * `source_error` - The original error (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Fail with [`CoreError::NumericalDegeneracy`] if any entry is NaN or Inf.
pub(crate) fn ensure_finite<'a>(
    values: impl IntoIterator<Item = &'a f64>,
    what: &str,
) -> CoreResult<()> {
    if values.into_iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CoreError::NumericalDegeneracy(format!("{what} contains NaN or Inf")).log())
    }
}

/// Return `weight` if it is finite and strictly positive, else [`CoreError::NumericalDegeneracy`].
///
/// `input` is the value the M-estimator was queried with, reported alongside the weight.
pub(crate) fn ensure_valid_weight(weight: f64, input: f64) -> CoreResult<f64> {
    if weight.is_finite() && weight > 0.0 {
        return Ok(weight);
    }
    warn!("M-estimator weight {} for input {}", weight, input);
    Err(CoreError::NumericalDegeneracy(format!(
        "M-estimator weight {weight} is not positive and finite"
    ))
    .log())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_valid_weight() {
        assert_eq!(ensure_valid_weight(0.25, 3.0).ok(), Some(0.25));
        for weight in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ensure_valid_weight(weight, 1.0),
                Err(CoreError::NumericalDegeneracy(_))
            ));
        }
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite([1.0, -2.0].iter(), "values").is_ok());
        assert!(ensure_finite([1.0, f64::NEG_INFINITY].iter(), "values").is_err());
    }
}
