//! Euclidean point design variable.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};
use parking_lot::RwLock;

use crate::core::CoreResult;
use crate::core::design_variable::{
    DesignVariable, DesignVariableBase, DesignVariableSet, StagedValue, check_parameter_shape,
};
use crate::core::jacobian_container::JacobianContainer;
use crate::expressions::euclidean::{EuclideanExpression, EuclideanExpressionNode};

/// A point in R³, updated additively.
#[derive(Debug)]
pub struct EuclideanPoint {
    base: DesignVariableBase,
    state: RwLock<StagedValue<Vector3<f64>>>,
}

impl EuclideanPoint {
    pub fn new(value: Vector3<f64>) -> Self {
        Self {
            base: DesignVariableBase::new(),
            state: RwLock::new(StagedValue::new(value)),
        }
    }

    pub fn value(&self) -> Vector3<f64> {
        *self.state.read().current()
    }

    pub fn to_expression(self: &Arc<Self>) -> EuclideanExpression {
        EuclideanExpression::new(Arc::new(EuclideanPointLeaf {
            point: Arc::clone(self),
        }))
    }
}

impl DesignVariable for EuclideanPoint {
    fn base(&self) -> &DesignVariableBase {
        &self.base
    }

    fn minimal_dimensions(&self) -> usize {
        3
    }

    fn update_implementation(&self, delta: &DVector<f64>) -> CoreResult<()> {
        let mut state = self.state.write();
        let candidate = state.current() + Vector3::new(delta[0], delta[1], delta[2]);
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
        DMatrix::from_column_slice(3, 1, self.value().as_slice())
    }

    fn set_parameters_implementation(&self, value: &DMatrix<f64>) -> CoreResult<()> {
        check_parameter_shape(value, 3, 1, "Euclidean point")?;
        self.state
            .write()
            .set(Vector3::new(value[0], value[1], value[2]));
        Ok(())
    }

    fn minimal_difference_implementation(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        check_parameter_shape(x_hat, 3, 1, "Euclidean point")?;
        let difference = self.value() - Vector3::new(x_hat[0], x_hat[1], x_hat[2]);
        Ok(DVector::from_column_slice(difference.as_slice()))
    }

    fn minimal_difference_and_jacobian_implementation(
        &self,
        x_hat: &DMatrix<f64>,
    ) -> CoreResult<(DVector<f64>, DMatrix<f64>)> {
        Ok((
            self.minimal_difference_implementation(x_hat)?,
            DMatrix::identity(3, 3),
        ))
    }
}

#[derive(Debug)]
struct EuclideanPointLeaf {
    point: Arc<EuclideanPoint>,
}

impl EuclideanExpressionNode for EuclideanPointLeaf {
    fn to_value(&self) -> Vector3<f64> {
        self.point.value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let variable: Arc<dyn DesignVariable> = self.point.clone();
        out.add(&variable, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        set.insert(self.point.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_point_update_and_revert() -> TestResult {
        let point = EuclideanPoint::new(Vector3::new(1.0, 2.0, 3.0));
        point.update(&[0.1, 0.2, 0.3])?;
        assert!((point.value() - Vector3::new(1.1, 2.2, 3.3)).norm() < 1e-15);
        point.revert_update()?;
        assert_eq!(point.value(), Vector3::new(1.0, 2.0, 3.0));
        Ok(())
    }

    #[test]
    fn test_point_parameters_roundtrip() -> TestResult {
        let point = EuclideanPoint::new(Vector3::zeros());
        let params = DMatrix::from_column_slice(3, 1, &[4.0, 5.0, 6.0]);
        point.set_parameters(&params)?;
        assert_eq!(point.parameters(), params);
        assert_eq!(
            point.minimal_difference(&DMatrix::from_column_slice(3, 1, &[1.0, 1.0, 1.0]))?,
            DVector::from_vec(vec![3.0, 4.0, 5.0])
        );
        Ok(())
    }

    #[test]
    fn test_leaf_pushes_chain_directly() -> TestResult {
        let point = Arc::new(EuclideanPoint::new(Vector3::zeros()));
        let chain = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        let mut jc = JacobianContainer::new(1);
        point
            .to_expression()
            .evaluate_jacobians_with_chain_rule(&mut jc, &chain)?;
        assert_eq!(jc.block(point.id()), Some(&chain));
        Ok(())
    }
}
