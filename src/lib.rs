//! # Calib Backend
//!
//! The differentiable residual core of a nonlinear least-squares calibration backend. It provides
//! the pieces an iterative optimizer (Gauss-Newton, Levenberg-Marquardt) consumes: design
//! variables with a staged update protocol, expression graphs that propagate Jacobians by the
//! reverse-mode chain rule, and error terms that whiten and robustly re-weight residuals.
//!
//! ## Features
//!
//! - **Design variables**: vectors, Euclidean points, rotations (unit quaternions) and 3x3
//!   matrices with per-entry update masks, shared between expressions and the problem
//! - **Expressions**: vector, Euclidean, rotation and matrix expression graphs with analytic
//!   Jacobians
//! - **Error terms**: inverse covariance whitening through a square-root factor, M-estimator
//!   re-weighting (fixed weight, Geman-McClure, Huber, Cauchy)
//! - **Problem assembly**: block index assignment, dense stacked weighted systems and normal
//!   equations, optionally evaluated in parallel
//!
//! ## Weighting identities
//!
//! For an error term with raw error `e`, inverse covariance `R⁻¹ = SᵀS` and M-estimator weight
//! `w = m(eᵀR⁻¹e)`:
//!
//! - weighted error `√w·S·e`, so `‖√w·S·e‖² = w·eᵀR⁻¹e`
//! - weighted Jacobian `√w·S·J`, so `(√w·S·J)ᵀ(√w·S·J) = w·JᵀR⁻¹J`
//!
//! ## Example
//!
//! ```
//! use calib_backend::core::error_term::ErrorTerm;
//! use calib_backend::core::mestimators::GemanMcClureMEstimator;
//! use calib_backend::residuals::EuclideanResidual;
//! use calib_backend::variables::{EuclideanPoint, RotationQuaternion};
//! use nalgebra::{UnitQuaternion, Vector3};
//! use std::sync::Arc;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let rotation = Arc::new(RotationQuaternion::new(UnitQuaternion::identity()));
//! let point = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 0.0, 0.0)));
//!
//! let predicted = rotation.to_expression() * point.to_expression();
//! let mut term = ErrorTerm::new(EuclideanResidual::new(predicted, Vector3::new(0.0, 1.0, 0.0)))?;
//! term.set_mestimator_policy(Arc::new(GemanMcClureMEstimator::new(1.0)?));
//!
//! let weighted_squared_error = term.evaluate_error()?;
//! assert!(weighted_squared_error < term.raw_squared_error()?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod core;
pub mod error;
pub mod expressions;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod residuals;
pub mod variables;

// Re-export core types
pub use core::design_variable::{DesignVariable, DesignVariableId, DesignVariableSet};
pub use core::error_term::{ErrorTerm, Residual};
pub use core::jacobian_container::JacobianContainer;
pub use core::mestimators::{
    CauchyMEstimator, FixedWeightMEstimator, GemanMcClureMEstimator, HuberMEstimator, MEstimator,
};
pub use core::non_squared_error_term::{ScalarNonSquaredErrorTerm, ScalarResidual};
pub use core::problem::{OptimizationProblem, ProblemConfig, WeightedSystem};
pub use error::{CalibError, CalibResult};

pub use expressions::{EuclideanExpression, MatrixExpression, RotationExpression, VectorExpression};
pub use linalg::{FactorizationMethod, SquareRootFactor};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use variables::{EuclideanPoint, MatrixTransformation, RotationQuaternion, VectorDesignVariable};
