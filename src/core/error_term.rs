//! Error terms: raw residuals weighted by an inverse covariance and an optional M-estimator.
//!
//! An [`ErrorTerm`] owns a [`Residual`] (the measurement model) and turns it into the weighted
//! quantities a least-squares optimizer stacks into its normal equations.
//!
//! # Mathematical Formulation
//!
//! With raw error `e`, raw Jacobian `J`, inverse covariance `invR = Sᵀ·S` and robust weight
//! `w = w(eᵀ·invR·e)`:
//!
//! ```text
//! raw squared error       s  = eᵀ·invR·e
//! weighted squared error     = w·s
//! weighted error          we = √w·S·e
//! weighted Jacobian       wJ = √w·S·J
//! ```
//!
//! so that `weᵀ·we = w·s`, `wJᵀ·wJ = w·Jᵀ·invR·J` and `wJᵀ·we = w·Jᵀ·invR·e`. Without the
//! M-estimator (`use_mestimator = false`) the same identities hold with `w = 1`.
//!
//! # Evaluation Order
//!
//! 1. [`ErrorTerm::evaluate_error`] computes and caches `e` from the current design variables.
//! 2. [`ErrorTerm::evaluate_jacobians`] / [`ErrorTerm::weighted_jacobians`] /
//!    [`ErrorTerm::weighted_error`] use that cache. Calling them first is a
//!    [`CoreError::Usage`] error.
//!
//! The robust weight is recomputed from the cached raw squared error on every weighted query, so
//! the weighted error and Jacobian of one pass always agree as long as `evaluate_error` is not
//! called in between.

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::core::design_variable::DesignVariableSet;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::mestimators::MEstimator;
use crate::core::{CoreError, CoreResult, ensure_finite, ensure_valid_weight};
use crate::linalg::SquareRootFactor;
use crate::linalg::cholesky::DEFAULT_SYMMETRY_TOLERANCE;

/// The measurement model behind an error term.
///
/// Implementors compute the raw error vector from the current design variable values and push
/// its Jacobian blocks, usually by delegating to an expression tree.
pub trait Residual: Send + Sync {
    /// Dimension of the error vector.
    fn dimension(&self) -> usize;

    fn evaluate_error(&self) -> CoreResult<DVector<f64>>;

    /// Push `∂e/∂x` for every design variable into `out`, which has [`Self::dimension`] rows.
    fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()>;

    /// Collect every design variable the error depends on.
    fn design_variables(&self, set: &mut DesignVariableSet);
}

pub struct ErrorTerm {
    residual: Box<dyn Residual>,
    inv_r: DMatrix<f64>,
    sqrt_inv_r: SquareRootFactor,
    error: Option<DVector<f64>>,
    raw_squared_error: f64,
    mestimator: Option<Arc<dyn MEstimator>>,
}

impl fmt::Debug for ErrorTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTerm")
            .field("dimension", &self.dimension())
            .field("evaluated", &self.error.is_some())
            .field("raw_squared_error", &self.raw_squared_error)
            .field("mestimator", &self.mestimator.as_ref().map(|m| m.name()))
            .finish()
    }
}

impl ErrorTerm {
    /// Error term with identity inverse covariance.
    pub fn new(residual: impl Residual + 'static) -> CoreResult<Self> {
        let dimension = residual.dimension();
        Self::with_inv_r(residual, DMatrix::identity(dimension, dimension))
    }

    /// Error term with the given inverse covariance.
    pub fn with_inv_r(residual: impl Residual + 'static, inv_r: DMatrix<f64>) -> CoreResult<Self> {
        Self::from_boxed(Box::new(residual), inv_r)
    }

    pub fn from_boxed(residual: Box<dyn Residual>, inv_r: DMatrix<f64>) -> CoreResult<Self> {
        if residual.dimension() == 0 {
            return Err(
                CoreError::ErrorTerm("error term dimension must be positive".to_string()).log(),
            );
        }
        check_inv_r_shape(&inv_r, residual.dimension())?;
        let sqrt_inv_r = SquareRootFactor::compute(&inv_r)?;
        Ok(Self {
            residual,
            inv_r,
            sqrt_inv_r,
            error: None,
            raw_squared_error: 0.0,
            mestimator: None,
        })
    }

    pub fn dimension(&self) -> usize {
        self.residual.dimension()
    }

    pub fn residual(&self) -> &dyn Residual {
        self.residual.as_ref()
    }

    /// Evaluate and cache the raw error, returning the weighted squared error `w·eᵀ·invR·e`.
    ///
    /// A degenerate M-estimator weight fails the whole evaluation: nothing is cached.
    pub fn evaluate_error(&mut self) -> CoreResult<f64> {
        self.evaluate(true)
    }

    /// Evaluate and cache the raw error without consulting the M-estimator, returning
    /// `eᵀ·invR·e`.
    pub fn evaluate_raw_error(&mut self) -> CoreResult<f64> {
        self.evaluate(false)
    }

    fn evaluate(&mut self, use_mestimator: bool) -> CoreResult<f64> {
        // Invalidate first so a failed evaluation leaves no stale cache behind
        self.error = None;
        self.raw_squared_error = 0.0;

        let error = self.residual.evaluate_error()?;
        if error.len() != self.dimension() {
            return Err(CoreError::DimensionMismatch(format!(
                "residual returned {} entries, error term dimension is {}",
                error.len(),
                self.dimension()
            ))
            .log());
        }
        ensure_finite(error.iter(), "raw error")?;

        let raw_squared_error = error.dot(&(&self.inv_r * &error));
        let weight = if use_mestimator {
            ensure_valid_weight(self.mestimator_weight(raw_squared_error), raw_squared_error)?
        } else {
            1.0
        };

        self.raw_squared_error = raw_squared_error;
        self.error = Some(error);
        Ok(weight * raw_squared_error)
    }

    /// The cached raw error.
    pub fn error(&self) -> CoreResult<&DVector<f64>> {
        self.error.as_ref().ok_or_else(|| {
            CoreError::Usage("error term queried before evaluate_error".to_string()).log()
        })
    }

    /// `eᵀ·invR·e` of the cached error.
    pub fn raw_squared_error(&self) -> CoreResult<f64> {
        self.error()?;
        Ok(self.raw_squared_error)
    }

    /// `w·eᵀ·invR·e` of the cached error.
    pub fn weighted_squared_error(&self) -> CoreResult<f64> {
        let raw = self.raw_squared_error()?;
        Ok(self.checked_weight(true)? * raw)
    }

    /// The policy's weight for `squared_error`, or 1 without a policy.
    pub fn mestimator_weight(&self, squared_error: f64) -> f64 {
        self.mestimator
            .as_ref()
            .map_or(1.0, |policy| policy.get_weight(squared_error))
    }

    /// The weight for the most recently evaluated raw squared error (0 before any evaluation).
    pub fn current_mestimator_weight(&self) -> f64 {
        self.mestimator_weight(self.raw_squared_error)
    }

    /// `√w·S·e`, with `w = 1` when `use_mestimator` is false.
    pub fn weighted_error(&self, use_mestimator: bool) -> CoreResult<DVector<f64>> {
        let error = self.error()?;
        let sqrt_weight = self.checked_weight(use_mestimator)?.sqrt();
        Ok(self.sqrt_inv_r.apply(error) * sqrt_weight)
    }

    /// Fill `out` with the raw Jacobian `J`. Any previous content of `out` is discarded.
    pub fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
        self.error()?;
        out.reset(self.dimension());
        self.residual.evaluate_jacobians(out)?;
        for block in out.iter() {
            ensure_finite(block.jacobian.iter(), "raw Jacobian")?;
        }
        Ok(())
    }

    /// Fill `out` with `√w·S·J`, with `w = 1` when `use_mestimator` is false.
    pub fn weighted_jacobians(
        &self,
        out: &mut JacobianContainer,
        use_mestimator: bool,
    ) -> CoreResult<()> {
        let sqrt_weight = self.checked_weight(use_mestimator)?.sqrt();
        self.evaluate_jacobians(out)?;
        out.apply_lhs(self.sqrt_inv_r.factor())?;
        out.scale(sqrt_weight);
        Ok(())
    }

    pub fn inv_r(&self) -> &DMatrix<f64> {
        &self.inv_r
    }

    pub fn sqrt_inv_r(&self) -> &SquareRootFactor {
        &self.sqrt_inv_r
    }

    /// Replace the inverse covariance. A cached error is kept and its squared error recomputed.
    pub fn set_inv_r(&mut self, inv_r: DMatrix<f64>) -> CoreResult<()> {
        self.set_inv_r_with_tolerance(inv_r, DEFAULT_SYMMETRY_TOLERANCE)
    }

    /// [`Self::set_inv_r`] with an explicit relative symmetry tolerance.
    pub fn set_inv_r_with_tolerance(&mut self, inv_r: DMatrix<f64>, tolerance: f64) -> CoreResult<()> {
        check_inv_r_shape(&inv_r, self.dimension())?;
        let sqrt_inv_r = SquareRootFactor::compute_with_tolerance(&inv_r, tolerance)?;
        debug!(
            "Error term inverse covariance set ({:?} factor)",
            sqrt_inv_r.method()
        );

        if let Some(error) = &self.error {
            self.raw_squared_error = error.dot(&(&inv_r * error));
        }
        self.inv_r = inv_r;
        self.sqrt_inv_r = sqrt_inv_r;
        Ok(())
    }

    pub fn set_mestimator_policy(&mut self, policy: Arc<dyn MEstimator>) {
        self.mestimator = Some(policy);
    }

    pub fn clear_mestimator_policy(&mut self) {
        self.mestimator = None;
    }

    pub fn has_mestimator_policy(&self) -> bool {
        self.mestimator.is_some()
    }

    /// The policy as `Arc<T>`, or `None` if there is no policy or it is not a `T`.
    pub fn mestimator_policy<T: MEstimator + 'static>(&self) -> Option<Arc<T>> {
        let policy = Arc::clone(self.mestimator.as_ref()?);
        policy.as_any_arc().downcast::<T>().ok()
    }

    pub fn design_variables(&self, set: &mut DesignVariableSet) {
        self.residual.design_variables(set);
    }

    fn checked_weight(&self, use_mestimator: bool) -> CoreResult<f64> {
        if !use_mestimator {
            return Ok(1.0);
        }
        ensure_valid_weight(self.current_mestimator_weight(), self.raw_squared_error)
    }
}

fn check_inv_r_shape(inv_r: &DMatrix<f64>, dimension: usize) -> CoreResult<()> {
    if inv_r.shape() != (dimension, dimension) {
        return Err(CoreError::DimensionMismatch(format!(
            "inverse covariance is {}x{}, error term dimension is {}",
            inv_r.nrows(),
            inv_r.ncols(),
            dimension
        ))
        .log());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::design_variable::DesignVariable;
    use crate::core::mestimators::{FixedWeightMEstimator, GemanMcClureMEstimator};
    use crate::variables::VectorDesignVariable;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// e = x - target
    struct OffsetResidual {
        x: Arc<VectorDesignVariable>,
        target: DVector<f64>,
    }

    impl Residual for OffsetResidual {
        fn dimension(&self) -> usize {
            self.target.len()
        }

        fn evaluate_error(&self) -> CoreResult<DVector<f64>> {
            Ok(self.x.value() - &self.target)
        }

        fn evaluate_jacobians(&self, out: &mut JacobianContainer) -> CoreResult<()> {
            let dv: Arc<dyn DesignVariable> = self.x.clone();
            out.add(&dv, &DMatrix::identity(self.dimension(), self.dimension()))
        }

        fn design_variables(&self, set: &mut DesignVariableSet) {
            set.insert(self.x.clone());
        }
    }

    fn offset_term(value: &[f64], target: &[f64]) -> CoreResult<(Arc<VectorDesignVariable>, ErrorTerm)> {
        let x = Arc::new(VectorDesignVariable::new(DVector::from_column_slice(value)));
        let term = ErrorTerm::new(OffsetResidual {
            x: Arc::clone(&x),
            target: DVector::from_column_slice(target),
        })?;
        Ok((x, term))
    }

    #[test]
    fn test_mestimator_getter() -> TestResult {
        let (_x, mut term) = offset_term(&[1.0, 2.0], &[0.0, 0.0])?;
        let policy = Arc::new(FixedWeightMEstimator::new(4.0)?);
        term.set_mestimator_policy(policy);
        assert_eq!(term.current_mestimator_weight(), 4.0);

        term.mestimator_policy::<FixedWeightMEstimator>()
            .ok_or("fixed weight policy not found")?
            .set_weight(5.0)?;
        assert_eq!(term.current_mestimator_weight(), 5.0);

        assert!(term.mestimator_policy::<GemanMcClureMEstimator>().is_none());

        term.clear_mestimator_policy();
        assert!(term.mestimator_policy::<FixedWeightMEstimator>().is_none());
        assert_eq!(term.current_mestimator_weight(), 1.0);
        Ok(())
    }

    #[test]
    fn test_raw_and_weighted_squared_error() -> TestResult {
        let (_x, mut term) = offset_term(&[1.0, 2.0], &[0.0, 0.0])?;
        term.set_inv_r(DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 3.0]))?;
        term.set_mestimator_policy(Arc::new(FixedWeightMEstimator::new(0.5)?));

        // e = [1, 2], eᵀ invR e = 2 + 12
        let weighted = term.evaluate_error()?;
        assert!((term.raw_squared_error()? - 14.0).abs() < 1e-12);
        assert!((weighted - 7.0).abs() < 1e-12);
        assert!((term.weighted_squared_error()? - 7.0).abs() < 1e-12);

        let we = term.weighted_error(false)?;
        assert!((we.dot(&we) - 14.0).abs() < 1e-12);
        let we = term.weighted_error(true)?;
        assert!((we.dot(&we) - 7.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_queries_before_evaluation_are_usage_errors() -> TestResult {
        let (_x, term) = offset_term(&[1.0], &[0.0])?;
        let mut jc = JacobianContainer::new(1);
        assert!(matches!(term.error(), Err(CoreError::Usage(_))));
        assert!(matches!(term.raw_squared_error(), Err(CoreError::Usage(_))));
        assert!(matches!(term.weighted_error(true), Err(CoreError::Usage(_))));
        assert!(matches!(
            term.evaluate_jacobians(&mut jc),
            Err(CoreError::Usage(_))
        ));
        assert!(matches!(
            term.weighted_jacobians(&mut jc, false),
            Err(CoreError::Usage(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_inverse_covariance_is_rejected() -> TestResult {
        let (_x, mut term) = offset_term(&[1.0, 2.0], &[0.0, 0.0])?;
        assert!(matches!(
            term.set_inv_r(DMatrix::identity(3, 3)),
            Err(CoreError::DimensionMismatch(_))
        ));
        assert!(matches!(
            term.set_inv_r(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0])),
            Err(CoreError::LinearAlgebra(_))
        ));
        // Failed updates keep the previous inverse covariance
        assert_eq!(term.inv_r(), &DMatrix::identity(2, 2));
        Ok(())
    }

    #[test]
    fn test_nan_error_is_reported() -> TestResult {
        let (_x, mut term) = offset_term(&[f64::NAN], &[0.0])?;
        assert!(matches!(
            term.evaluate_error(),
            Err(CoreError::NumericalDegeneracy(_))
        ));
        assert!(term.error().is_err());
        Ok(())
    }

    #[test]
    fn test_zero_weight_is_reported() -> TestResult {
        let (_x, mut term) = offset_term(&[1.0], &[0.0])?;
        term.set_mestimator_policy(Arc::new(FixedWeightMEstimator::new(0.0)?));
        assert!(matches!(
            term.evaluate_error(),
            Err(CoreError::NumericalDegeneracy(_))
        ));
        // The failed evaluation leaves nothing behind
        assert!(matches!(term.error(), Err(CoreError::Usage(_))));
        assert!(matches!(term.raw_squared_error(), Err(CoreError::Usage(_))));
        assert!(matches!(term.weighted_error(false), Err(CoreError::Usage(_))));
        let mut jc = JacobianContainer::new(1);
        assert!(matches!(term.evaluate_jacobians(&mut jc), Err(CoreError::Usage(_))));

        // Evaluating without the robustifier does not consult its weight
        assert_eq!(term.evaluate_raw_error()?, 1.0);
        assert_eq!(term.weighted_error(false)?, DVector::from_element(1, 1.0));
        assert!(matches!(
            term.weighted_error(true),
            Err(CoreError::NumericalDegeneracy(_))
        ));
        Ok(())
    }

    #[test]
    fn test_weighted_jacobians_clear_previous_content() -> TestResult {
        let (x, mut term) = offset_term(&[1.0, 2.0], &[0.0, 0.0])?;
        x.set_block_index(0);
        term.evaluate_error()?;

        let mut jc = JacobianContainer::new(2);
        term.weighted_jacobians(&mut jc, false)?;
        term.weighted_jacobians(&mut jc, false)?;
        assert_eq!(jc.as_dense_matrix(), DMatrix::identity(2, 2));
        Ok(())
    }
}
