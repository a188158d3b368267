//! Vector measurement residual.

use nalgebra::DVector;

use crate::core::design_variable::DesignVariableSet;
use crate::core::error_term::Residual;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};
use crate::expressions::VectorExpression;

/// `e = v(x) - measurement`
#[derive(Debug, Clone)]
pub struct VectorResidual {
    predicted: VectorExpression,
    measurement: DVector<f64>,
}

impl VectorResidual {
    pub fn new(predicted: VectorExpression, measurement: DVector<f64>) -> CoreResult<Self> {
        if predicted.dimension() != measurement.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "{}-vector expression against {}-vector measurement",
                predicted.dimension(),
                measurement.len()
            ))
            .log());
        }
        Ok(Self {
            predicted,
            measurement,
        })
    }

    pub fn measurement(&self) -> &DVector<f64> {
        &self.measurement
    }
}

impl Residual for VectorResidual {
    fn dimension(&self) -> usize {
        self.measurement.len()
    }

    fn evaluate_error(&self) -> CoreResult<DVector<f64>> {
        Ok(self.predicted.to_value() - &self.measurement)
    }

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.predicted.evaluate_jacobians(out)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.predicted.design_variables(set);
    }
}
