//! Euclidean point expressions (3-vectors).
//!
//! # Partial derivatives
//!
//! | Node | Value | ∂/∂lhs | ∂/∂rhs |
//! |------|-------|--------|--------|
//! | rotate | `C·p` | `-[C·p]ₓ` (left perturbation) | `C` |
//! | matrix multiply | `A·p` | `(i, i+3j) = p_j` w.r.t. `vec(A)` | `A` |
//! | cross | `a × b` | `-[b]ₓ` | `[a]ₓ` |
//! | add | `a + b` | `I` | `I` |
//! | subtract | `a - b` | `I` | `-I` |
//! | subtract constant | `a - v` | `I` | |
//! | negate | `-a` | `-I` | |
//! | vector adapter | `x` (3-vector expression) | `I` | |

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};
use crate::expressions::matrix::MatrixExpression;
use crate::expressions::rotation::RotationExpression;
use crate::expressions::vector::VectorExpression;
use crate::expressions::{check_chain_rule, to_dynamic};
use crate::manifold::so3::skew;

pub trait EuclideanExpressionNode: Send + Sync + fmt::Debug {
    fn to_value(&self) -> Vector3<f64>;

    /// Push `chain·∂p/∂x` for every design variable `x`; `chain` is `N × 3`.
    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()>;

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(3, 3))
    }

    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// Shared handle to a Euclidean expression node.
///
/// Cloning is cheap and shares the node, so the same sub-expression can feed several parents.
///
/// # Example
///
/// ```
/// use calib_backend::core::jacobian_container::JacobianContainer;
/// use calib_backend::variables::{EuclideanPoint, RotationQuaternion};
/// use nalgebra::{UnitQuaternion, Vector3};
/// use std::sync::Arc;
/// # use calib_backend::core::CoreResult;
/// # fn example() -> CoreResult<()> {
///
/// let rotation = Arc::new(RotationQuaternion::new(UnitQuaternion::identity()));
/// let point = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 0.0, 0.0)));
///
/// let rotated = rotation.to_expression() * point.to_expression();
/// let residual = rotated - Vector3::new(0.0, 1.0, 0.0);
///
/// let mut jacobians = JacobianContainer::new(3);
/// residual.evaluate_jacobians(&mut jacobians)?;
/// assert_eq!(jacobians.len(), 2);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct EuclideanExpression {
    root: Arc<dyn EuclideanExpressionNode>,
}

impl EuclideanExpression {
    pub fn new(root: Arc<dyn EuclideanExpressionNode>) -> Self {
        Self { root }
    }

    pub fn constant(value: Vector3<f64>) -> Self {
        Self::new(Arc::new(EuclideanConstant { value }))
    }

    /// Lift a 3-dimensional vector expression.
    pub fn from_vector(vector: VectorExpression) -> CoreResult<Self> {
        if vector.dimension() != 3 {
            return Err(CoreError::Expression(format!(
                "cannot adapt a {}-vector expression to a Euclidean point",
                vector.dimension()
            ))
            .log());
        }
        Ok(Self::new(Arc::new(VectorToEuclidean { vector })))
    }

    pub fn root(&self) -> &Arc<dyn EuclideanExpressionNode> {
        &self.root
    }

    pub fn to_value(&self) -> Vector3<f64> {
        self.root.to_value()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(3, 3))
    }

    pub fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        check_chain_rule(out, chain, 3)?;
        self.root.evaluate_jacobians_with_chain_rule(out, chain)
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    /// `self × other`
    pub fn cross(&self, other: &EuclideanExpression) -> Self {
        Self::new(Arc::new(EuclideanCross {
            lhs: self.clone(),
            rhs: other.clone(),
        }))
    }

    /// Rotate this point by `rotation`.
    pub fn rotated_by(&self, rotation: &RotationExpression) -> Self {
        Self::new(Arc::new(EuclideanRotated {
            rotation: rotation.clone(),
            point: self.clone(),
        }))
    }

    /// Multiply this point by `matrix`.
    pub fn transformed_by(&self, matrix: &MatrixExpression) -> Self {
        Self::new(Arc::new(EuclideanMatrixMultiply {
            matrix: matrix.clone(),
            point: self.clone(),
        }))
    }
}

impl Add for EuclideanExpression {
    type Output = EuclideanExpression;

    fn add(self, rhs: EuclideanExpression) -> Self::Output {
        EuclideanExpression::new(Arc::new(EuclideanAdd { lhs: self, rhs }))
    }
}

impl Sub for EuclideanExpression {
    type Output = EuclideanExpression;

    fn sub(self, rhs: EuclideanExpression) -> Self::Output {
        EuclideanExpression::new(Arc::new(EuclideanSubtract { lhs: self, rhs }))
    }
}

impl Sub<Vector3<f64>> for EuclideanExpression {
    type Output = EuclideanExpression;

    fn sub(self, rhs: Vector3<f64>) -> Self::Output {
        EuclideanExpression::new(Arc::new(EuclideanSubtractConstant {
            lhs: self,
            constant: rhs,
        }))
    }
}

impl Neg for EuclideanExpression {
    type Output = EuclideanExpression;

    fn neg(self) -> Self::Output {
        EuclideanExpression::new(Arc::new(EuclideanNegate { operand: self }))
    }
}

impl Mul<EuclideanExpression> for RotationExpression {
    type Output = EuclideanExpression;

    fn mul(self, rhs: EuclideanExpression) -> Self::Output {
        rhs.rotated_by(&self)
    }
}

impl Mul<EuclideanExpression> for MatrixExpression {
    type Output = EuclideanExpression;

    fn mul(self, rhs: EuclideanExpression) -> Self::Output {
        rhs.transformed_by(&self)
    }
}

#[derive(Debug)]
struct EuclideanConstant {
    value: Vector3<f64>,
}

impl EuclideanExpressionNode for EuclideanConstant {
    fn to_value(&self) -> Vector3<f64> {
        self.value
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        _out: &mut JacobianContainer,
        _chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn design_variables(&self, _set: &mut DesignVariableSet) {}
}

#[derive(Debug)]
struct EuclideanRotated {
    rotation: RotationExpression,
    point: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanRotated {
    fn to_value(&self) -> Vector3<f64> {
        self.rotation.to_value() * self.point.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let c = self.rotation.to_value().to_rotation_matrix().into_inner();
        let rotated = c * self.point.to_value();

        self.rotation
            .root()
            .evaluate_jacobians_with_chain_rule(
                out,
                &(chain * to_dynamic(&rotation_point_jacobian(&rotated))),
            )?;
        self.point
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&c)))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.rotation.design_variables(set);
        self.point.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanMatrixMultiply {
    matrix: MatrixExpression,
    point: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanMatrixMultiply {
    fn to_value(&self) -> Vector3<f64> {
        self.matrix.to_value() * self.point.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let a = self.matrix.to_value();
        let p = self.point.to_value();

        // ∂(A p)_i / ∂A_ij = p_j, with A_ij at position i + 3j of vec(A)
        let mut d_vec_a = DMatrix::zeros(3, 9);
        for j in 0..3 {
            for i in 0..3 {
                d_vec_a[(i, i + 3 * j)] = p[j];
            }
        }

        self.matrix
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * d_vec_a))?;
        self.point
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&a)))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.matrix.design_variables(set);
        self.point.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanCross {
    lhs: EuclideanExpression,
    rhs: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanCross {
    fn to_value(&self) -> Vector3<f64> {
        self.lhs.to_value().cross(&self.rhs.to_value())
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let a = self.lhs.to_value();
        let b = self.rhs.to_value();
        self.lhs
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&-skew(&b))))?;
        self.rhs
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&skew(&a))))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanAdd {
    lhs: EuclideanExpression,
    rhs: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanAdd {
    fn to_value(&self) -> Vector3<f64> {
        self.lhs.to_value() + self.rhs.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.lhs.root().evaluate_jacobians_with_chain_rule(out, chain)?;
        self.rhs.root().evaluate_jacobians_with_chain_rule(out, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanSubtract {
    lhs: EuclideanExpression,
    rhs: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanSubtract {
    fn to_value(&self) -> Vector3<f64> {
        self.lhs.to_value() - self.rhs.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.lhs.root().evaluate_jacobians_with_chain_rule(out, chain)?;
        self.rhs
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(-chain))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanSubtractConstant {
    lhs: EuclideanExpression,
    constant: Vector3<f64>,
}

impl EuclideanExpressionNode for EuclideanSubtractConstant {
    fn to_value(&self) -> Vector3<f64> {
        self.lhs.to_value() - self.constant
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.lhs.root().evaluate_jacobians_with_chain_rule(out, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
    }
}

#[derive(Debug)]
struct EuclideanNegate {
    operand: EuclideanExpression,
}

impl EuclideanExpressionNode for EuclideanNegate {
    fn to_value(&self) -> Vector3<f64> {
        -self.operand.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.operand
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(-chain))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.operand.design_variables(set);
    }
}

#[derive(Debug)]
struct VectorToEuclidean {
    vector: VectorExpression,
}

impl EuclideanExpressionNode for VectorToEuclidean {
    fn to_value(&self) -> Vector3<f64> {
        let value = self.vector.to_value();
        Vector3::new(value[0], value[1], value[2])
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.vector
            .root()
            .evaluate_jacobians_with_chain_rule(out, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.vector.design_variables(set);
    }
}

/// `∂(C·p)/∂δ` for a left perturbation of `C`.
pub fn rotation_point_jacobian(rotated_point: &Vector3<f64>) -> Matrix3<f64> {
    -skew(rotated_point)
}
