//! Rotation expressions on SO(3).
//!
//! Chain-rule matrices act on the left-perturbation tangent space: a rotation-valued node with
//! value `C` is differentiated with respect to `δ` in `exp(δ^)·C`.
//!
//! - compose `C₁·C₂`: `∂/∂δ₁ = I`, `∂/∂δ₂ = C₁`
//! - inverse `Cᵀ`: `∂/∂δ = -Cᵀ`

use std::fmt;
use std::ops::Mul;
use std::sync::Arc;

use nalgebra::{DMatrix, Matrix3, UnitQuaternion};

use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::CoreResult;
use crate::expressions::{check_chain_rule, to_dynamic};

pub trait RotationExpressionNode: Send + Sync + fmt::Debug {
    fn to_value(&self) -> UnitQuaternion<f64>;

    /// Push `chain·∂δ_C/∂x` for every design variable `x`; `chain` is `N × 3`.
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

/// Shared handle to a rotation expression node.
#[derive(Debug, Clone)]
pub struct RotationExpression {
    root: Arc<dyn RotationExpressionNode>,
}

impl RotationExpression {
    pub fn new(root: Arc<dyn RotationExpressionNode>) -> Self {
        Self { root }
    }

    pub fn constant(value: UnitQuaternion<f64>) -> Self {
        Self::new(Arc::new(RotationConstant { value }))
    }

    pub fn root(&self) -> &Arc<dyn RotationExpressionNode> {
        &self.root
    }

    pub fn to_value(&self) -> UnitQuaternion<f64> {
        self.root.to_value()
    }

    pub fn to_rotation_matrix(&self) -> Matrix3<f64> {
        self.to_value().to_rotation_matrix().into_inner()
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

    pub fn inverse(&self) -> Self {
        Self::new(Arc::new(RotationInverse {
            operand: self.clone(),
        }))
    }
}

impl Mul for RotationExpression {
    type Output = RotationExpression;

    fn mul(self, rhs: RotationExpression) -> Self::Output {
        RotationExpression::new(Arc::new(RotationCompose { lhs: self, rhs }))
    }
}

#[derive(Debug)]
struct RotationConstant {
    value: UnitQuaternion<f64>,
}

impl RotationExpressionNode for RotationConstant {
    fn to_value(&self) -> UnitQuaternion<f64> {
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
struct RotationCompose {
    lhs: RotationExpression,
    rhs: RotationExpression,
}

impl RotationExpressionNode for RotationCompose {
    fn to_value(&self) -> UnitQuaternion<f64> {
        self.lhs.to_value() * self.rhs.to_value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let c1 = self.lhs.to_rotation_matrix();
        self.lhs.root().evaluate_jacobians_with_chain_rule(out, chain)?;
        self.rhs
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&c1)))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.lhs.design_variables(set);
        self.rhs.design_variables(set);
    }
}

#[derive(Debug)]
struct RotationInverse {
    operand: RotationExpression,
}

impl RotationExpressionNode for RotationInverse {
    fn to_value(&self) -> UnitQuaternion<f64> {
        self.operand.to_value().inverse()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let c_transpose = self.operand.to_rotation_matrix().transpose();
        self.operand
            .root()
            .evaluate_jacobians_with_chain_rule(out, &(chain * to_dynamic(&-c_transpose)))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.operand.design_variables(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::design_variable::DesignVariable;
    use crate::variables::RotationQuaternion;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const TOLERANCE: f64 = 1e-12;

    fn rotation(phi: Vector3<f64>) -> Arc<RotationQuaternion> {
        Arc::new(RotationQuaternion::new(UnitQuaternion::from_scaled_axis(phi)))
    }

    #[test]
    fn test_compose_value_and_partials() -> TestResult {
        let a = rotation(Vector3::new(0.2, 0.0, -0.3));
        let b = rotation(Vector3::new(-0.1, 0.5, 0.4));
        let expr = a.to_expression() * b.to_expression();

        let expected = a.value() * b.value();
        assert!(expr.to_value().angle_to(&expected) < TOLERANCE);

        let mut jc = JacobianContainer::new(3);
        expr.evaluate_jacobians(&mut jc)?;
        let ja = jc.block(a.id()).ok_or("missing lhs block")?;
        let jb = jc.block(b.id()).ok_or("missing rhs block")?;
        assert!((ja - DMatrix::<f64>::identity(3, 3)).amax() < TOLERANCE);
        let c1 = to_dynamic(&a.value().to_rotation_matrix().into_inner());
        assert!((jb - c1).amax() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_inverse_partial() -> TestResult {
        let a = rotation(Vector3::new(0.3, -0.6, 0.1));
        let expr = a.to_expression().inverse();
        assert!(expr.to_value().angle_to(&a.value().inverse()) < TOLERANCE);

        let mut jc = JacobianContainer::new(3);
        expr.evaluate_jacobians(&mut jc)?;
        let expected = -to_dynamic(&a.value().to_rotation_matrix().into_inner().transpose());
        let actual = jc.block(a.id()).ok_or("missing block")?;
        assert!((actual - expected).amax() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_rotation_times_its_inverse_has_zero_jacobian() -> TestResult {
        let a = rotation(Vector3::new(0.3, 0.2, 0.1));
        let leaf = a.to_expression();
        let expr = leaf.clone() * leaf.inverse();

        let mut jc = JacobianContainer::new(3);
        expr.evaluate_jacobians(&mut jc)?;
        let block = jc.block(a.id()).ok_or("missing block")?;
        assert!(block.amax() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_constant_rotation() -> TestResult {
        let expr = RotationExpression::constant(UnitQuaternion::identity());
        let mut jc = JacobianContainer::new(3);
        expr.evaluate_jacobians(&mut jc)?;
        assert!(jc.is_empty());
        assert_eq!(expr.to_rotation_matrix(), Matrix3::identity());
        Ok(())
    }
}
