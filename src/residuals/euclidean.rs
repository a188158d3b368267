//! Euclidean point measurement residual.

use nalgebra::{DVector, Vector3};

use crate::core::CoreResult;
use crate::core::design_variable::DesignVariableSet;
use crate::core::error_term::Residual;
use crate::core::jacobian_container::JacobianContainer;
use crate::expressions::EuclideanExpression;

/// `e = p(x) - measurement`
#[derive(Debug, Clone)]
pub struct EuclideanResidual {
    predicted: EuclideanExpression,
    measurement: Vector3<f64>,
}

impl EuclideanResidual {
    pub fn new(predicted: EuclideanExpression, measurement: Vector3<f64>) -> Self {
        Self {
            predicted,
            measurement,
        }
    }

    pub fn measurement(&self) -> &Vector3<f64> {
        &self.measurement
    }

    pub fn set_measurement(&mut self, measurement: Vector3<f64>) {
        self.measurement = measurement;
    }
}

impl Residual for EuclideanResidual {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate_error(&self) -> CoreResult<DVector<f64>> {
        let error = self.predicted.to_value() - self.measurement;
        Ok(DVector::from_column_slice(error.as_slice()))
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.predicted.evaluate_jacobians(out)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.predicted.design_variables(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::design_variable::DesignVariable;
    use crate::core::error_term::ErrorTerm;
    use crate::variables::{EuclideanPoint, RotationQuaternion};
    use nalgebra::{DMatrix, UnitQuaternion};
    use std::sync::Arc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_rotated_point_error_term() -> TestResult {
        let rotation = Arc::new(RotationQuaternion::new(UnitQuaternion::from_scaled_axis(
            Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        )));
        let point = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 0.0, 0.0)));
        rotation.set_block_index(0);
        point.set_block_index(1);

        let residual =
            EuclideanResidual::new(rotation.to_expression() * point.to_expression(), Vector3::y());
        let mut term = ErrorTerm::new(residual)?;

        term.evaluate_error()?;
        assert!(term.raw_squared_error()? < 1e-24);

        let mut jc = JacobianContainer::new(3);
        term.evaluate_jacobians(&mut jc)?;
        let dense = jc.as_dense_matrix();
        assert_eq!(dense.shape(), (3, 6));

        // Point Jacobian is the rotation matrix
        let c = rotation.value().to_rotation_matrix().into_inner();
        let point_block = dense.columns(3, 3).into_owned();
        assert!((point_block - DMatrix::from_column_slice(3, 3, c.as_slice())).amax() < 1e-12);

        let mut set = DesignVariableSet::new();
        term.design_variables(&mut set);
        assert_eq!(set.len(), 2);
        Ok(())
    }
}
