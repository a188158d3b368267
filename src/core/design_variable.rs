//! Design variables: the mutable unknowns every expression bottoms out on.
//!
//! A design variable stores a value (vector, point, rotation, matrix), exposes a tangent space of
//! [`DesignVariable::minimal_dimensions`] and is perturbed by the optimizer through a staged
//! update protocol:
//!
//! ```text
//! update(δ)  ──►  pending  ──► accept_update()  ──► committed (δ kept)
//!                    │
//!                    └──────► revert_update()  ──► committed (exact previous value)
//! ```
//!
//! Only one update may be pending at a time. A second `update` before accepting or reverting is a
//! [`CoreError::Usage`] error, as is accepting or reverting with nothing pending.
//!
//! Design variables are shared between expressions and the optimization problem through
//! `Arc<dyn DesignVariable>` (or the concrete `Arc<T>`), so every method takes `&self` and the
//! implementations keep their value behind a `parking_lot::RwLock`.
//!
//! # Example
//!
//! ```
//! use calib_backend::core::design_variable::DesignVariable;
//! use calib_backend::variables::EuclideanPoint;
//! use nalgebra::Vector3;
//! # use calib_backend::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let point = EuclideanPoint::new(Vector3::new(1.0, 2.0, 3.0));
//! point.update(&[0.5, 0.0, 0.0])?;
//! assert_eq!(point.value().x, 1.5);
//!
//! point.revert_update()?;
//! assert_eq!(point.value().x, 1.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreError, CoreResult, ensure_finite};

static NEXT_DESIGN_VARIABLE_ID: AtomicU64 = AtomicU64::new(0);

const UNASSIGNED_BLOCK_INDEX: usize = usize::MAX;

/// Process-unique identity of a design variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DesignVariableId(u64);

impl DesignVariableId {
    fn next() -> Self {
        Self(NEXT_DESIGN_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DesignVariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dv#{}", self.0)
    }
}

/// Bookkeeping shared by every design variable: identity, block index and active flag.
///
/// The optimizer assigns the block index when it places the variable's columns in the global
/// Jacobian. Inactive variables are treated as constants.
#[derive(Debug)]
pub struct DesignVariableBase {
    id: DesignVariableId,
    block_index: AtomicUsize,
    active: AtomicBool,
}

impl DesignVariableBase {
    pub fn new() -> Self {
        Self {
            id: DesignVariableId::next(),
            block_index: AtomicUsize::new(UNASSIGNED_BLOCK_INDEX),
            active: AtomicBool::new(true),
        }
    }
}

impl Default for DesignVariableBase {
    fn default() -> Self {
        Self::new()
    }
}

/// A value with at most one staged candidate.
///
/// `stage` swaps in a candidate and keeps the previous value so `revert` restores it bit for bit.
#[derive(Debug, Clone)]
pub struct StagedValue<T> {
    current: T,
    previous: Option<T>,
}

impl<T> StagedValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: value,
            previous: None,
        }
    }

    /// The current value, which is the candidate while an update is pending.
    pub fn current(&self) -> &T {
        &self.current
    }

    /// Overwrite the value and discard any pending update.
    pub fn set(&mut self, value: T) {
        self.current = value;
        self.previous = None;
    }

    pub fn stage(&mut self, candidate: T) -> CoreResult<()> {
        if self.previous.is_some() {
            return Err(CoreError::Usage(
                "update called while a previous update is still pending".to_string(),
            )
            .log());
        }
        self.previous = Some(std::mem::replace(&mut self.current, candidate));
        Ok(())
    }

    pub fn revert(&mut self) -> CoreResult<()> {
        match self.previous.take() {
            Some(previous) => {
                self.current = previous;
                Ok(())
            }
            None => Err(CoreError::Usage("revert_update called with no pending update".to_string()).log()),
        }
    }

    pub fn accept(&mut self) -> CoreResult<()> {
        match self.previous.take() {
            Some(_) => Ok(()),
            None => Err(CoreError::Usage("accept_update called with no pending update".to_string()).log()),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.previous.is_some()
    }
}

/// The contract every design variable fulfils.
///
/// Implementors provide the `*_implementation` hooks; callers use the provided methods, which
/// validate their input first.
pub trait DesignVariable: Send + Sync + fmt::Debug {
    /// Identity, block index and active flag.
    fn base(&self) -> &DesignVariableBase;

    /// Dimension of the tangent space.
    fn minimal_dimensions(&self) -> usize;

    /// Stage `value ⊞ delta`; `delta` has already been checked for length and finiteness.
    fn update_implementation(&self, delta: &DVector<f64>) -> CoreResult<()>;

    fn revert_update_implementation(&self) -> CoreResult<()>;

    fn accept_update_implementation(&self) -> CoreResult<()>;

    fn has_pending_update(&self) -> bool;

    /// Full stored representation as a matrix (column vector for vector-valued variables).
    fn parameters(&self) -> DMatrix<f64>;

    fn set_parameters_implementation(&self, value: &DMatrix<f64>) -> CoreResult<()>;

    /// Tangent vector taking the variable from `x_hat` to its current value.
    fn minimal_difference_implementation(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>>;

    /// [`Self::minimal_difference_implementation`] plus its Jacobian with respect to a tangent
    /// perturbation of the current value.
    fn minimal_difference_and_jacobian_implementation(
        &self,
        x_hat: &DMatrix<f64>,
    ) -> CoreResult<(DVector<f64>, DMatrix<f64>)>;

    /// Apply a tangent-space perturbation of length [`Self::minimal_dimensions`].
    fn update(&self, delta: &[f64]) -> CoreResult<()> {
        if delta.len() != self.minimal_dimensions() {
            return Err(CoreError::DimensionMismatch(format!(
                "{}: update of size {} for minimal dimension {}",
                self.id(),
                delta.len(),
                self.minimal_dimensions()
            ))
            .log());
        }
        ensure_finite(delta, "design variable update")?;
        self.update_implementation(&DVector::from_column_slice(delta))
    }

    /// Restore the value present before the pending update.
    fn revert_update(&self) -> CoreResult<()> {
        self.revert_update_implementation()
    }

    /// Commit the pending update.
    fn accept_update(&self) -> CoreResult<()> {
        self.accept_update_implementation()
    }

    /// Replace the stored representation; any pending update is discarded.
    fn set_parameters(&self, value: &DMatrix<f64>) -> CoreResult<()> {
        ensure_finite(value.iter(), "design variable parameters")?;
        self.set_parameters_implementation(value)
    }

    fn minimal_difference(&self, x_hat: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        self.minimal_difference_implementation(x_hat)
    }

    fn minimal_difference_and_jacobian(
        &self,
        x_hat: &DMatrix<f64>,
    ) -> CoreResult<(DVector<f64>, DMatrix<f64>)> {
        self.minimal_difference_and_jacobian_implementation(x_hat)
    }

    fn id(&self) -> DesignVariableId {
        self.base().id
    }

    fn block_index(&self) -> Option<usize> {
        match self.base().block_index.load(Ordering::Acquire) {
            UNASSIGNED_BLOCK_INDEX => None,
            index => Some(index),
        }
    }

    fn set_block_index(&self, index: usize) {
        self.base().block_index.store(index, Ordering::Release);
    }

    fn clear_block_index(&self) {
        self.base()
            .block_index
            .store(UNASSIGNED_BLOCK_INDEX, Ordering::Release);
    }

    /// The block index, or a [`CoreError::Usage`] error when the optimizer has not assigned one.
    fn require_block_index(&self) -> CoreResult<usize> {
        self.block_index().ok_or_else(|| {
            CoreError::Usage(format!("{} has no block index assigned", self.id())).log()
        })
    }

    fn is_active(&self) -> bool {
        self.base().active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.base().active.store(active, Ordering::Release);
    }
}

/// Check that a parameter matrix has the expected shape.
pub(crate) fn check_parameter_shape(
    value: &DMatrix<f64>,
    rows: usize,
    cols: usize,
    what: &str,
) -> CoreResult<()> {
    if value.shape() != (rows, cols) {
        return Err(CoreError::DimensionMismatch(format!(
            "{what}: expected {rows}x{cols} parameters, got {}x{}",
            value.nrows(),
            value.ncols()
        ))
        .log());
    }
    Ok(())
}

/// Insertion-ordered set of design variables, unique by identity.
#[derive(Debug, Default, Clone)]
pub struct DesignVariableSet {
    variables: Vec<Arc<dyn DesignVariable>>,
    ids: HashSet<DesignVariableId>,
}

impl DesignVariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `variable`, returning `false` if it was already present.
    pub fn insert(&mut self, variable: Arc<dyn DesignVariable>) -> bool {
        if self.ids.insert(variable.id()) {
            self.variables.push(variable);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: DesignVariableId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DesignVariable>> {
        self.variables.iter()
    }

    /// Only the active variables, in insertion order.
    pub fn active(&self) -> impl Iterator<Item = &Arc<dyn DesignVariable>> {
        self.variables.iter().filter(|dv| dv.is_active())
    }

    pub fn into_vec(self) -> Vec<Arc<dyn DesignVariable>> {
        self.variables
    }
}
