//! Prior on a single design variable.
//!
//! The error is the minimal difference `x ⊟ x̂` between the variable and its prior mean, and the
//! Jacobian is the one returned by
//! [`DesignVariable::minimal_difference_and_jacobian`](crate::core::design_variable::DesignVariable::minimal_difference_and_jacobian).
//! Weight it with the prior's inverse covariance through the error term.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::core::design_variable::{DesignVariable, DesignVariableSet};
use crate::core::error_term::Residual;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct PriorResidual {
    variable: Arc<dyn DesignVariable>,
    prior: DMatrix<f64>,
}

impl PriorResidual {
    /// Prior centred on `prior`, given in the variable's parameter representation.
    pub fn new(variable: Arc<dyn DesignVariable>, prior: DMatrix<f64>) -> CoreResult<Self> {
        let expected = variable.parameters().shape();
        if prior.shape() != expected {
            return Err(CoreError::DimensionMismatch(format!(
                "prior is {}x{}, {} parameters are {}x{}",
                prior.nrows(),
                prior.ncols(),
                variable.id(),
                expected.0,
                expected.1
            ))
            .log());
        }
        Ok(Self { variable, prior })
    }

    /// Prior centred on the variable's current value.
    pub fn at_current_value(variable: Arc<dyn DesignVariable>) -> Self {
        let prior = variable.parameters();
        Self { variable, prior }
    }

    pub fn prior(&self) -> &DMatrix<f64> {
        &self.prior
    }
}

impl Residual for PriorResidual {
    fn dimension(&self) -> usize {
        self.variable.minimal_dimensions()
    }

    fn evaluate_error(&self) -> CoreResult<DVector<f64>> {
        self.variable.minimal_difference(&self.prior)
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        let (_, jacobian) = self.variable.minimal_difference_and_jacobian(&self.prior)?;
        out.add(&self.variable, &jacobian)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        set.insert(Arc::clone(&self.variable));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_term::ErrorTerm;
    use crate::variables::{EuclideanPoint, RotationQuaternion};
    use nalgebra::{UnitQuaternion, Vector3};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_point_prior_is_zero_at_mean() -> TestResult {
        let point: Arc<dyn DesignVariable> = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 2.0, 3.0)));
        let mut term = ErrorTerm::new(PriorResidual::at_current_value(Arc::clone(&point)))?;
        assert_eq!(term.evaluate_error()?, 0.0);

        point.update(&[0.0, 0.5, 0.0])?;
        point.accept_update()?;
        term.evaluate_error()?;
        assert!((term.raw_squared_error()? - 0.25).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_rotation_prior_jacobian() -> TestResult {
        let rotation: Arc<dyn DesignVariable> = Arc::new(RotationQuaternion::new(
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.3, 0.0)),
        ));
        let prior_mean = DMatrix::from_column_slice(4, 1, &[0.0, 0.0, 0.0, 1.0]);
        let residual = PriorResidual::new(Arc::clone(&rotation), prior_mean)?;

        let error = residual.evaluate_error()?;
        assert!((error - DVector::from_vec(vec![0.0, 0.3, 0.0])).norm() < 1e-12);

        let mut jc = JacobianContainer::new(3);
        residual.evaluate_jacobians(&mut jc)?;
        assert!(jc.contains(rotation.id()));
        Ok(())
    }

    #[test]
    fn test_prior_shape_is_checked() {
        let point: Arc<dyn DesignVariable> = Arc::new(EuclideanPoint::new(Vector3::zeros()));
        assert!(PriorResidual::new(point, DMatrix::zeros(4, 1)).is_err());
    }
}
