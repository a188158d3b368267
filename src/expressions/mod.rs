//! Composable expressions with analytic Jacobians.
//!
//! An expression is a tree (more precisely a DAG, sub-expressions are shared through `Arc`) of
//! nodes whose leaves are design variables or constants. Every node can
//!
//! - compute its value from the current design variable values,
//! - push its Jacobian with respect to every design variable below it into a
//!   [`JacobianContainer`](crate::core::jacobian_container::JacobianContainer),
//! - collect the design variables below it.
//!
//! # Reverse-mode chain rule
//!
//! Jacobians are propagated top-down. A node receives a chain-rule matrix `C` (`N × d`, where `d`
//! is the node's output dimension and `N` the residual dimension) and hands `C·∂f/∂child` to each
//! child. Leaves finally push `C` (restricted to their tangent space) into the container. A
//! design variable reached along several paths gets the sum of the path contributions.
//!
//! | Family | Value | Tangent basis of the chain matrix |
//! |--------|-------|-----------------------------------|
//! | [`EuclideanExpression`] | `Vector3<f64>` | the 3 coordinates |
//! | [`RotationExpression`] | `UnitQuaternion<f64>` | left perturbation `exp(δ^)·C` |
//! | [`MatrixExpression`] | `Matrix3<f64>` | column-major `vec(A)` (9 entries) |
//! | [`VectorExpression`] | `DVector<f64>` | the `n` coordinates |

pub mod euclidean;
pub mod matrix;
pub mod rotation;
pub mod vector;

pub use euclidean::{EuclideanExpression, EuclideanExpressionNode};
pub use matrix::{MatrixExpression, MatrixExpressionNode};
pub use rotation::{RotationExpression, RotationExpressionNode};
pub use vector::{VectorExpression, VectorExpressionNode};

use nalgebra::{DMatrix, Matrix3};

use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};

/// Copy a fixed 3×3 matrix into a dynamic one so it composes with chain-rule matrices.
pub(crate) fn to_dynamic(m: &Matrix3<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(3, 3, m.as_slice())
}

/// Check that `chain` maps a `dimension`-dimensional node output into `out`'s rows.
pub(crate) fn check_chain_rule(
    out: &JacobianContainer,
    chain: &DMatrix<f64>,
    dimension: usize,
) -> CoreResult<()> {
    if chain.nrows() != out.rows() || chain.ncols() != dimension {
        return Err(CoreError::DimensionMismatch(format!(
            "chain rule matrix is {}x{}, expected {}x{}",
            chain.nrows(),
            chain.ncols(),
            out.rows(),
            dimension
        ))
        .log());
    }
    Ok(())
}
