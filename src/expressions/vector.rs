//! Dynamic-size vector expressions.

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};
use crate::expressions::check_chain_rule;

pub trait VectorExpressionNode: Send + Sync + fmt::Debug {
    fn dimension(&self) -> usize;

    fn to_value(&self) -> DVector<f64>;

    /// Push `chain·∂f/∂x` for every design variable `x`; `chain` is `N × dimension`.
    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()>;

    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        let dimension = self.dimension();
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(dimension, dimension))
    }

    fn design_variables(&self, set: &mut DesignVariableSet);
}

/// Shared handle to a vector expression node.
#[derive(Debug, Clone)]
pub struct VectorExpression {
    root: Arc<dyn VectorExpressionNode>,
}

impl VectorExpression {
    pub fn new(root: Arc<dyn VectorExpressionNode>) -> Self {
        Self { root }
    }

    pub fn constant(value: DVector<f64>) -> Self {
        Self::new(Arc::new(VectorConstant { value }))
    }

    pub fn root(&self) -> &Arc<dyn VectorExpressionNode> {
        &self.root
    }

    pub fn dimension(&self) -> usize {
        self.root.dimension()
    }

    pub fn to_value(&self) -> DVector<f64> {
        self.root.to_value()
    }

    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        let dimension = self.dimension();
        self.evaluate_jacobians_with_chain_rule(out, &DMatrix::identity(dimension, dimension))
    }

    pub fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        check_chain_rule(out, chain, self.dimension())?;
        self.root.evaluate_jacobians_with_chain_rule(out, chain)
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.root.design_variables(set);
    }

    /// `A·self + b`
    pub fn affine(&self, a: DMatrix<f64>, b: DVector<f64>) -> CoreResult<Self> {
        if a.ncols() != self.dimension() || b.len() != a.nrows() {
            return Err(CoreError::Expression(format!(
                "affine map {}x{} + {} does not fit a {}-vector",
                a.nrows(),
                a.ncols(),
                b.len(),
                self.dimension()
            ))
            .log());
        }
        Ok(Self::new(Arc::new(VectorAffine {
            input: self.clone(),
            a,
            b,
        })))
    }

    /// `A·self`
    pub fn linear(&self, a: DMatrix<f64>) -> CoreResult<Self> {
        let rows = a.nrows();
        self.affine(a, DVector::zeros(rows))
    }
}

#[derive(Debug)]
struct VectorConstant {
    value: DVector<f64>,
}

impl VectorExpressionNode for VectorConstant {
    fn dimension(&self) -> usize {
        self.value.len()
    }

    fn to_value(&self) -> DVector<f64> {
        self.value.clone()
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
struct VectorAffine {
    input: VectorExpression,
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl VectorExpressionNode for VectorAffine {
    fn dimension(&self) -> usize {
        self.a.nrows()
    }

    fn to_value(&self) -> DVector<f64> {
        &self.a * self.input.to_value() + &self.b
    }

    fn evaluate_jacobians_with_chain_rule(
        &self,
        out: &mut JacobianContainer,
        chain: &DMatrix<f64>,
    ) -> CoreResult<()> {
        self.input
            .root
            .evaluate_jacobians_with_chain_rule(out, &(chain * &self.a))
    }

    fn design_variables(&self, set: &mut DesignVariableSet) {
        self.input.design_variables(set);
    }
}
