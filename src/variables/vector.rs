//! Dynamic-size Euclidean vector design variable.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use parking_lot::RwLock;

use crate::core::CoreResult;
use crate::core::design_variable::{
    DesignVariable, DesignVariableBase, DesignVariableSet, StagedValue, check_parameter_shape,
};
use crate::core::jacobian_container::JacobianContainer;
use crate::expressions::vector::{VectorExpression, VectorExpressionNode};

#[derive(Debug)]
pub struct VectorDesignVariable {
    base: DesignVariableBase,
    state: RwLock<StagedValue<DVector<f64>>>,
}

impl VectorDesignVariable {
    pub fn new(value: DVector<f64>) -> Self {
        Self {
            base: DesignVariableBase::new(),
            state: RwLock::new(StagedValue::new(value)),
        }
    }

    pub fn value(&self) -> DVector<f64> {
        self.state.read().current().clone()
    }

    pub fn dimension(&self) -> usize {
        self.state.read().current().len()
    }

    /// Leaf expression reading this variable.
    pub fn to_expression(self: &Arc<Self>) -> VectorExpression {
        VectorExpression::new(Arc::new(VectorLeaf {
            variable: Arc::clone(self),
        }))
    }
}

impl DesignVariable for VectorDesignVariable {
    fn base(&self) -> &DesignVariableBase {
        &self.base
    }

    fn minimal_dimensions(&self) -> usize {
        self.dimension()
    }

    fn update_implementation(&self, delta: &DVector<f64>) -> CoreResult<()> {
        let mut state = self.state.write();
        let candidate = state.current() + delta;
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
        let value = self.value();
        DMatrix::from_column_slice(value.len(), 1, value.as_slice())
    }

    fn set_parameters_implementation(&self, value: &DMatrix<f64>) -> CoreResult<()> {
        check_parameter_shape(value, self.dimension(), 1, "vector design variable")?;
        self.state
            .write()
            .set(DVector::from_column_slice(value.as_slice()));
        Ok(())
    }

    fn minimal_difference_implementation(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        check_parameter_shape(x_hat, self.dimension(), 1, "vector design variable")?;
        Ok(self.value() - DVector::from_column_slice(x_hat.as_slice()))
    }

    fn minimal_difference_and_jacobian_implementation(
        &self,
        x_hat: &DMatrix<f64>,
    ) -> CoreResult<(DVector<f64>, DMatrix<f64>)> {
        let difference = self.minimal_difference_implementation(x_hat)?;
        let n = difference.len();
        Ok((difference, DMatrix::identity(n, n)))
    }
}

#[derive(Debug)]
struct VectorLeaf {
    variable: Arc<VectorDesignVariable>,
}

impl VectorExpressionNode for VectorLeaf {
    fn dimension(&self) -> usize {
        self.variable.dimension()
    }

    fn to_value(&self) -> DVector<f64> {
        self.variable.value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let variable: Arc<dyn DesignVariable> = self.variable.clone();
        out.add(&variable, chain)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        set.insert(self.variable.clone());
    }
}
