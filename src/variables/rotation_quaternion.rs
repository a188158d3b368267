//! Rotation design variable stored as a unit quaternion.
//!
//! # Notes
//! - update: `C ← exp(δ^)·C` (left perturbation)
//! - parameters: quaternion coefficients `[x, y, z, w]` as a 4×1 column
//! - minimal difference to `Ĉ`: `φ = log(C·Ĉᵀ)`, with `∂φ/∂δ = J_l⁻¹(φ)`

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use parking_lot::RwLock;

use crate::core::CoreResult;
use crate::core::design_variable::{
    DesignVariable, DesignVariableBase, DesignVariableSet, StagedValue, check_parameter_shape,
};
use crate::core::jacobian_container::JacobianContainer;
use crate::expressions::rotation::{RotationExpression, RotationExpressionNode};
use crate::manifold::so3;

#[derive(Debug)]
pub struct RotationQuaternion {
    base: DesignVariableBase,
    state: RwLock<StagedValue<UnitQuaternion<f64>>>,
}

impl RotationQuaternion {
    pub fn new(value: UnitQuaternion<f64>) -> Self {
        Self {
            base: DesignVariableBase::new(),
            state: RwLock::new(StagedValue::new(value)),
        }
    }

    pub fn value(&self) -> UnitQuaternion<f64> {
        *self.state.read().current()
    }

    pub fn to_expression(self: &Arc<Self>) -> RotationExpression {
        RotationExpression::new(Arc::new(RotationLeaf {
            rotation: Arc::clone(self),
        }))
    }

    fn tangent_to(&self, x_hat: &DMatrix<f64>) -> CoreResult<Vector3<f64>> {
        check_parameter_shape(x_hat, 4, 1, "rotation quaternion")?;
        let q_hat = so3::quaternion_from_coeffs(x_hat.as_slice())?;
        Ok(so3::log(&(self.value() * q_hat.inverse())))
    }
}

impl DesignVariable for RotationQuaternion {
    fn base(&self) -> &DesignVariableBase {
        &self.base
    }

    fn minimal_dimensions(&self) -> usize {
        3
    }

    fn update_implementation(&self, delta: &DVector<f64>) -> CoreResult<()> {
        let phi = Vector3::new(delta[0], delta[1], delta[2]);
        let mut state = self.state.write();
        let candidate = so3::exp(&phi) * *state.current();
        state.stage(candidate)
    }

    fn revert_update_implementation(&self) -> CoreResult<()> {
        self.state.write().revert()
    }

    fn accept_update_implementation(&self) -> CoreResult<()> {
        self.state.write().accept()
    }

    fn has_pending_update(&self) -> bool {
        self.state.read().has_pending()
    }

    fn parameters(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(4, 1, &so3::quaternion_coeffs(&self.value()))
    }

    fn set_parameters_implementation(&self, value: &DMatrix<f64>) -> CoreResult<()> {
        check_parameter_shape(value, 4, 1, "rotation quaternion")?;
        let q = so3::quaternion_from_coeffs(value.as_slice())?;
        self.state.write().set(q);
        Ok(())
    }

    fn minimal_difference_implementation(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        let phi = self.tangent_to(x_hat)?;
        Ok(DVector::from_column_slice(phi.as_slice()))
    }

    fn minimal_difference_and_jacobian_implementation(
        &self,
        x_hat: &DMatrix<f64>,
    ) -> CoreResult<(DVector<f64>, DMatrix<f64>)> {
        let phi = self.tangent_to(x_hat)?;
        let jacobian = so3::left_jacobian_inverse(&phi);
        Ok((
            DVector::from_column_slice(phi.as_slice()),
            DMatrix::from_column_slice(3, 3, jacobian.as_slice()),
        ))
    }
}

#[derive(Debug)]
struct RotationLeaf {
    rotation: Arc<RotationQuaternion>,
}

impl RotationExpressionNode for RotationLeaf {
    fn to_value(&self) -> UnitQuaternion<f64> {
        self.rotation.value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let variable: Arc<dyn DesignVariable> = self.rotation.clone();
        out.add(&variable, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        set.insert(self.rotation.clone());
    }
}
