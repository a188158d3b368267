//! M-estimator policies for robust re-weighting of error terms.
//!
//! An M-estimator maps the raw squared error `s = eᵀ·invR·e` of an error term to a scalar weight
//! `w(s)`. The error term then scales its weighted residual and Jacobian by `√w`, so the
//! optimizer minimizes `Σ w(sᵢ)·sᵢ` with the weights held fixed during one linearization
//! (iteratively re-weighted least squares).
//!
//! # Available Policies
//!
//! | Policy | Weight `w(s)` | Parameter |
//! |--------|---------------|-----------|
//! | [`FixedWeightMEstimator`] | `w` (constant) | weight ≥ 0 |
//! | [`GemanMcClureMEstimator`] | `c² / (c + s)²` | scale `c` > 0 |
//! | [`HuberMEstimator`] | `1` if `√s ≤ k`, else `k / √s` | threshold `k` > 0 |
//! | [`CauchyMEstimator`] | `1 / (1 + s / c²)` | scale `c` > 0 |
//!
//! Policies are shared between error terms as `Arc<dyn MEstimator>` and can be recovered at their
//! concrete type through [`crate::core::error_term::ErrorTerm::mestimator_policy`].
//!
//! # Example
//!
//! ```
//! use calib_backend::core::mestimators::{GemanMcClureMEstimator, MEstimator};
//! # use calib_backend::error::CalibResult;
//! # fn example() -> CalibResult<()> {
//!
//! let policy = GemanMcClureMEstimator::new(2.0)?;
//! assert_eq!(policy.get_weight(0.0), 1.0);
//! assert!(policy.get_weight(2.0) < 1.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::CoreError;
use crate::error::CalibResult;

/// Upcast an `Arc<T>` to `Arc<dyn Any>` so trait objects can be downcast to their concrete type.
pub trait AsAnyArc {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Robust weight policy.
pub trait MEstimator: AsAnyArc + Send + Sync + fmt::Debug {
    /// Weight for a non-negative squared error.
    fn get_weight(&self, squared_error: f64) -> f64;

    /// Human readable name used in logs.
    fn name(&self) -> &'static str;
}

fn validate_parameter(value: f64, what: &str) -> CalibResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::MEstimator(format!(
            "{what} must be positive and finite, got {value}"
        ))
        .log()
        .into());
    }
    Ok(value)
}

/// Constant weight, independent of the error.
///
/// The weight can be changed through [`FixedWeightMEstimator::set_weight`]; this must not race
/// with weight queries of an ongoing evaluation.
#[derive(Debug)]
pub struct FixedWeightMEstimator {
    weight: RwLock<f64>,
}

impl FixedWeightMEstimator {
    pub fn new(weight: f64) -> CalibResult<Self> {
        Ok(Self {
            weight: RwLock::new(Self::validate(weight)?),
        })
    }

    pub fn weight(&self) -> f64 {
        *self.weight.read()
    }

    pub fn set_weight(&self, weight: f64) -> CalibResult<()> {
        *self.weight.write() = Self::validate(weight)?;
        Ok(())
    }

    fn validate(weight: f64) -> CalibResult<f64> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(CoreError::MEstimator(format!(
                "fixed weight must be non-negative and finite, got {weight}"
            ))
            .log()
            .into());
        }
        Ok(weight)
    }
}

impl Default for FixedWeightMEstimator {
    fn default() -> Self {
        Self {
            weight: RwLock::new(1.0),
        }
    }
}

impl MEstimator for FixedWeightMEstimator {
    fn get_weight(&self, _squared_error: f64) -> f64 {
        self.weight()
    }

    fn name(&self) -> &'static str {
        "fixed_weight"
    }
}

/// Geman-McClure: `w(s) = c² / (c + s)²`.
///
/// Strictly decreasing in `s`, equal to 1 only at `s = 0`. A common choice for `c` is the term's
/// own raw squared error at construction, which gives that term a weight of 1/4.
#[derive(Debug, Clone)]
pub struct GemanMcClureMEstimator {
    scale: f64,
}

impl GemanMcClureMEstimator {
    pub fn new(scale: f64) -> CalibResult<Self> {
        Ok(Self {
            scale: validate_parameter(scale, "Geman-McClure scale")?,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl MEstimator for GemanMcClureMEstimator {
    fn get_weight(&self, squared_error: f64) -> f64 {
        let denominator = self.scale + squared_error;
        self.scale * self.scale / (denominator * denominator)
    }

    fn name(&self) -> &'static str {
        "geman_mcclure"
    }
}

/// Huber: quadratic for `√s ≤ k`, linear beyond.
#[derive(Debug, Clone)]
pub struct HuberMEstimator {
    threshold: f64,
}

impl HuberMEstimator {
    pub fn new(threshold: f64) -> CalibResult<Self> {
        Ok(Self {
            threshold: validate_parameter(threshold, "Huber threshold")?,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl MEstimator for HuberMEstimator {
    fn get_weight(&self, squared_error: f64) -> f64 {
        let norm = squared_error.sqrt();
        if norm <= self.threshold {
            1.0
        } else {
            self.threshold / norm
        }
    }

    fn name(&self) -> &'static str {
        "huber"
    }
}

/// Cauchy: `w(s) = 1 / (1 + s / c²)`.
#[derive(Debug, Clone)]
pub struct CauchyMEstimator {
    scale2: f64,
}

impl CauchyMEstimator {
    pub fn new(scale: f64) -> CalibResult<Self> {
        let scale = validate_parameter(scale, "Cauchy scale")?;
        Ok(Self {
            scale2: scale * scale,
        })
    }
}

impl MEstimator for CauchyMEstimator {
    fn get_weight(&self, squared_error: f64) -> f64 {
        1.0 / (1.0 + squared_error / self.scale2)
    }

    fn name(&self) -> &'static str {
        "cauchy"
    }
}
