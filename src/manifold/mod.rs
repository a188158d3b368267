//! Manifold helpers for design variables that live on non-Euclidean spaces.
//!
//! Euclidean design variables update by plain addition; only the rotation group needs helpers:
//!
//! Lie group M,° | size   | dim | X ∈ M  | Constraint | T_E M        | T_X M      | Exp(T)        | Comp. | Action
//! ------------- | ------ | --- | ------ | ---------- | ------------ | ---------- | ------------- | ----- | ------
//! n-D vector    | Rⁿ,+   | n   | v ∈ Rⁿ | \|v-v\|=0  | v ∈ Rⁿ       | v ∈ Rⁿ     | v = exp(v)    | v₁+v₂ | v + x
//! Rotation      | SO(3),.| 3   | R      | RᵀR = I    | [θ]x ∈ so(3) | [θ] ∈ R³   | R = exp([θ]x) | R₁R₂  | Rx
//!
//! # Perturbation convention
//!
//! Rotations are perturbed on the **left**: `C ← exp(δ^)·C`. Every Jacobian with respect to a
//! rotation in this crate is therefore expressed in the left (global) tangent space.

use thiserror::Error;
use tracing::error;

pub mod so3;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    #[error("Invalid tangent dimension: expected {expected}, got {actual}")]
    InvalidTangentDimension { expected: usize, actual: usize },

    /// Dimension validation failed during conversion
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// NaN or Inf detected in manifold element
    #[error("Invalid number: NaN or Inf detected")]
    InvalidNumber,

    /// Normalization failed for manifold element
    #[error("Normalization failed: {0}")]
    NormalizationFailed(String),
}

impl ManifoldError {
    /// Log the error with tracing::error and return self for chaining
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

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;
