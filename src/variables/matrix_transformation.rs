//! 3×3 matrix design variable with an optional update pattern.
//!
//! The update pattern is a 0/1 matrix marking the entries that are estimated; the others stay
//! constant. The tangent space is the list of estimated entries in column-major order, which is
//! also the order they take in `vec(A)`.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3};
use parking_lot::RwLock;

use crate::core::design_variable::{
    DesignVariable, DesignVariableBase, DesignVariableSet, StagedValue, check_parameter_shape,
};
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};
use crate::expressions::matrix::{MatrixExpression, MatrixExpressionNode};

#[derive(Debug)]
pub struct MatrixTransformation {
    base: DesignVariableBase,
    state: RwLock<StagedValue<Matrix3<f64>>>,
    update_pattern: Matrix3<f64>,
    /// Column-major indices of the estimated entries.
    estimated: Vec<usize>,
}

impl MatrixTransformation {
    /// All nine entries estimated.
    pub fn new(value: Matrix3<f64>) -> Self {
        Self {
            base: DesignVariableBase::new(),
            state: RwLock::new(StagedValue::new(value)),
            update_pattern: Matrix3::repeat(1.0),
            estimated: (0..9).collect(),
        }
    }

    /// Only entries where `update_pattern` is 1 are estimated. A pattern without any 1 is
    /// rejected; use an inactive variable or a constant expression for a fixed matrix.
    pub fn with_update_pattern(value: Matrix3<f64>, update_pattern: Matrix3<f64>) -> CoreResult<Self> {
        let mut estimated = Vec::new();
        for (index, &flag) in update_pattern.iter().enumerate() {
            if flag == 1.0 {
                estimated.push(index);
            } else if flag != 0.0 {
                return Err(CoreError::InvalidInput(format!(
                    "update pattern entries must be 0 or 1, got {flag}"
                ))
                .log());
            }
        }
        if estimated.is_empty() {
            return Err(CoreError::InvalidInput(
                "update pattern estimates no entry".to_string(),
            )
            .log());
        }
        Ok(Self {
            base: DesignVariableBase::new(),
            state: RwLock::new(StagedValue::new(value)),
            update_pattern,
            estimated,
        })
    }

    pub fn value(&self) -> Matrix3<f64> {
        *self.state.read().current()
    }

    pub fn update_pattern(&self) -> &Matrix3<f64> {
        &self.update_pattern
    }

    pub fn to_expression(self: &Arc<Self>) -> MatrixExpression {
        MatrixExpression::new(Arc::new(MatrixLeaf {
            matrix: Arc::clone(self),
        }))
    }

    fn x_hat_matrix(x_hat: &DMatrix<f64>) -> CoreResult<Matrix3<f64>> {
        check_parameter_shape(x_hat, 3, 3, "matrix transformation")?;
        Ok(Matrix3::from_column_slice(x_hat.as_slice()))
    }
}

impl DesignVariable for MatrixTransformation {
    fn base(&self) -> &DesignVariableBase {
        &self.base
    }

    fn minimal_dimensions(&self) -> usize {
        self.estimated.len()
    }

    fn update_implementation(&self, delta: &DVector<f64>) -> CoreResult<()> {
        let mut state = self.state.write();
        let mut candidate = *state.current();
        for (&index, step) in self.estimated.iter().zip(delta.iter()) {
            candidate[index] += step;
        }
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
        DMatrix::from_column_slice(3, 3, self.value().as_slice())
    }

    fn set_parameters_implementation(&self, value: &DMatrix<f64>) -> CoreResult<()> {
        let matrix = Self::x_hat_matrix(value)?;
        self.state.write().set(matrix);
        Ok(())
    }

    fn minimal_difference_implementation(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        let difference = self.value() - Self::x_hat_matrix(x_hat)?;
        Ok(DVector::from_iterator(
            self.estimated.len(),
            self.estimated.iter().map(|&index| difference[index]),
        ))
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
struct MatrixLeaf {
    matrix: Arc<MatrixTransformation>,
}

impl MatrixExpressionNode for MatrixLeaf {
    fn to_value(&self) -> Matrix3<f64> {
        self.matrix.value()
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        let block = chain.select_columns(self.matrix.estimated.iter());
        let variable: Arc<dyn DesignVariable> = self.matrix.clone();
        out.add(&variable, &block)
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        set.insert(self.matrix.clone());
    }
}
