//! Scalar error terms whose raw value is already a cost contribution.
//!
//! Unlike [`crate::core::error_term::ErrorTerm`], the raw scalar `e` is not squared: it enters the
//! objective directly, scaled by a fixed weight `w` and optionally an M-estimator weight `m(e)`.
//! The weighted Jacobian is therefore `w·m·∂e/∂x`, the gradient of the weighted contribution.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::mestimators::MEstimator;
use crate::core::{CoreError, CoreResult, ensure_finite, ensure_valid_weight};

/// Scalar measurement model for [`ScalarNonSquaredErrorTerm`].
pub trait ScalarResidual: Send + Sync {
    fn evaluate_error(&self) -> CoreResult<f64>;

    /// Push `∂e/∂x` as `1 × minimal_dimensions` blocks.
    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()>;

    fn design_variables(&self, set: &mut DesignVariableSet);
}

pub struct ScalarNonSquaredErrorTerm {
    residual: Box<dyn ScalarResidual>,
    weight: f64,
    raw_error: Option<f64>,
    mestimator: Option<Arc<dyn MEstimator>>,
}

impl fmt::Debug for ScalarNonSquaredErrorTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarNonSquaredErrorTerm")
            .field("weight", &self.weight)
            .field("raw_error", &self.raw_error)
            .field("mestimator", &self.mestimator.as_ref().map(|m| m.name()))
            .finish()
    }
}

impl ScalarNonSquaredErrorTerm {
    /// New term with weight 1 and no M-estimator.
    pub fn new(residual: impl ScalarResidual + 'static) -> Self {
        Self {
            residual: Box::new(residual),
            weight: 1.0,
            raw_error: None,
            mestimator: None,
        }
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) -> CoreResult<()> {
        if !weight.is_finite() {
            return Err(CoreError::InvalidInput(format!("weight must be finite, got {weight}")).log());
        }
        self.weight = weight;
        Ok(())
    }

    pub fn set_mestimator_policy(&mut self, policy: Arc<dyn MEstimator>) {
        self.mestimator = Some(policy);
    }

    pub fn clear_mestimator_policy(&mut self) {
        self.mestimator = None;
    }

    /// Evaluate and cache the raw error.
    pub fn update_raw_error(&mut self) -> CoreResult<f64> {
        self.raw_error = None;
        let error = self.residual.evaluate_error()?;
        ensure_finite([error].iter(), "raw scalar error")?;
        self.raw_error = Some(error);
        Ok(error)
    }

    pub fn raw_error(&self) -> CoreResult<f64> {
        self.raw_error.ok_or_else(|| {
            CoreError::Usage("scalar error term queried before update_raw_error".to_string()).log()
        })
    }

    /// `w·m(e)·e`
    pub fn weighted_error(&self, use_mestimator: bool) -> CoreResult<f64> {
        let error = self.raw_error()?;
        let weighted = self.total_weight(error, use_mestimator)? * error;
        ensure_finite([weighted].iter(), "weighted scalar error")?;
        Ok(weighted)
    }

    /// Fill `out` with `∂e/∂x`, discarding previous content.
    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.raw_error()?;
        out.reset(1);
        self.residual.evaluate_jacobians(out)
    }

    /// Fill `out` with `w·m(e)·∂e/∂x`.
    pub fn weighted_jacobians(
        &self,
        out: &mut JacobianContainer,
        use_mestimator: bool,
    ) -> CoreResult<()> {
        let error = self.raw_error()?;
        let scale = self.total_weight(error, use_mestimator)?;
        self.evaluate_jacobians(out)?;
        if scale != 1.0 {
            out.scale(scale);
        }
        for block in out.iter() {
            ensure_finite(block.jacobian.iter(), "weighted scalar Jacobian")?;
        }
        Ok(())
    }

    /// Dense `1 × n` weighted gradient, columns ordered by block index.
    pub fn weighted_gradient(&self, use_mestimator: bool) -> CoreResult<DMatrix<f64>> {
        let mut out = JacobianContainer::new(1);
        self.weighted_jacobians(&mut out, use_mestimator)?;
        Ok(out.as_dense_matrix())
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.residual.design_variables(set);
    }

    /// `w·m(e)`; a NaN, Inf or non-positive `m(e)` is a [`CoreError::NumericalDegeneracy`].
    fn total_weight(&self, error: f64, use_mestimator: bool) -> CoreResult<f64> {
        match (&self.mestimator, use_mestimator) {
            (Some(policy), true) => {
                let robust = ensure_valid_weight(policy.get_weight(error), error)?;
                Ok(self.weight * robust)
            }
            _ => Ok(self.weight),
        }
    }
}
