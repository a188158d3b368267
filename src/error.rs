//! Error types for the calib-backend library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! # Error Hierarchy
//!
//! - **`CalibError`** is the top-level error exposed to users via public APIs
//! - **Module errors** (`CoreError`, `LinAlgError`, `ManifoldError`) are wrapped inside it
//! - **Error sources** are preserved, allowing full error chain inspection
//!
//! Example error chain:
//! ```text
//! CalibError::Core(
//!     CoreError::LinearAlgebra(
//!         LinAlgError::NotPositiveSemiDefinite { min_eigenvalue: -0.3 }
//!     )
//! )
//! ```

use crate::{core::CoreError, linalg::LinAlgError, manifold::ManifoldError};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the calib-backend library
pub type CalibResult<T> = Result<T, CalibError>;

/// Main error type for the calib-backend library
///
/// This is the top-level error type exposed by public APIs. It wraps module-specific
/// errors while preserving the full error chain for debugging.
#[derive(Debug, Error)]
pub enum CalibError {
    /// Core module errors (design variables, expressions, error terms, problem assembly)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl CalibError {
    /// Get the full error chain as a string for logging and debugging.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// if let Err(e) = term.weighted_error(true) {
    ///     let e: CalibError = e.into();
    ///     warn!("Error chain: {}", e.chain());
    /// }
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calib_error_display() {
        let error = CalibError::from(LinAlgError::NotSquare { rows: 2, cols: 3 });
        assert!(error.to_string().contains("2x3"));
    }

    #[test]
    fn test_calib_error_chain_follows_sources() {
        let core_error = CoreError::from(LinAlgError::NotPositiveSemiDefinite {
            min_eigenvalue: -0.5,
        });
        let error = CalibError::from(core_error);

        let chain = error.chain();
        assert!(chain.contains("positive semi-definite"));
        assert!(chain.lines().count() >= 2);
    }

    #[test]
    fn test_calib_error_chain_compact() {
        let error = CalibError::from(CoreError::Usage("evaluate_error not called".to_string()));
        let compact = error.chain_compact();
        assert!(compact.contains("evaluate_error not called"));
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn test_transparent_error_conversion() {
        let manifold_error = ManifoldError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };

        let calib_error: CalibError = manifold_error.into();
        match calib_error {
            CalibError::Manifold(_) => { /* Expected */ }
            _ => panic!("Expected Manifold variant"),
        }
    }
}
