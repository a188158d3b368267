//! 3×3 matrix expressions.
//!
//! Chain-rule matrices are `N × 9` and act on the column-major vectorization `vec(A)`, so entry
//! `A_ij` sits at column `i + 3j`.

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, Matrix3};

use crate::core::CoreResult;
use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::expressions::check_chain_rule;

pub trait MatrixExpressionNode: Send + Sync + fmt::Debug {
    fn to_value(&self) -> Matrix3<f64>;

    /// Push `chain·∂vec(A)/∂x` for every design variable `x`; `chain` is `N × 9`.
    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()>;

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(9, 9))
    }

    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// Shared handle to a matrix expression node.
#[derive(Debug, Clone)]
pub struct MatrixExpression {
    root: Arc<dyn MatrixExpressionNode>,
}

impl MatrixExpression {
    pub fn new(root: Arc<dyn MatrixExpressionNode>) -> Self {
        Self { root }
    }

    pub fn constant(value: Matrix3<f64>) -> Self {
        Self::new(Arc::new(MatrixConstant { value }))
    }

    pub fn root(&self) -> &Arc<dyn MatrixExpressionNode> {
        &self.root
    }

    pub fn to_value(&self) -> Matrix3<f64> {
        self.root.to_value()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(9, 9))
    }

    pub fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        check_chain_rule(out, chain, 9)?;
        self.root.evaluate_jacobians_with_chain_rule(out, chain)
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }
}

#[derive(Debug)]
struct MatrixConstant {
    value: Matrix3<f64>,
}

impl MatrixExpressionNode for MatrixConstant {
    fn to_value(&self) -> Matrix3<f64> {
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
