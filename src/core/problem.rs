//! Optimization problem container.
//!
//! The `OptimizationProblem` owns the error terms and shares the design variables with the
//! expressions that reference them. It is the glue between this crate and an external solver:
//!
//! 1. **Registration**: design variables first, then error terms whose active design variables
//!    must all be registered
//! 2. **Column placement**: [`OptimizationProblem::assign_block_indices`] gives every active
//!    design variable a block index and a column offset in the stacked Jacobian
//! 3. **Evaluation phase**: error terms are evaluated independently (in parallel with the
//!    `parallel` feature) and stacked into a dense [`WeightedSystem`]
//! 4. **Update phase**: the solver's step is scattered to the design variables with
//!    [`OptimizationProblem::apply_update`] and then accepted or reverted
//!
//! The evaluation and update phases must not overlap: evaluation only reads design variables,
//! updates mutate them.
//!
//! # Example
//!
//! ```
//! use calib_backend::core::error_term::ErrorTerm;
//! use calib_backend::core::problem::OptimizationProblem;
//! use calib_backend::residuals::EuclideanResidual;
//! use calib_backend::variables::EuclideanPoint;
//! use nalgebra::Vector3;
//! use std::sync::Arc;
//! # use calib_backend::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let point = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 2.0, 3.0)));
//! let mut problem = OptimizationProblem::new();
//! problem.add_design_variable(point.clone())?;
//! problem.add_error_term(ErrorTerm::new(EuclideanResidual::new(
//!     point.to_expression(),
//!     Vector3::zeros(),
//! ))?)?;
//!
//! problem.assign_block_indices();
//! let system = problem.build_weighted_system()?;
//! let (jtj, jte) = system.normal_equations();
//!
//! // One Gauss-Newton step: JᵀJ·δ = -Jᵀe
//! let step = -jtj.lu().solve(&jte).unwrap();
//! problem.apply_update(step.as_slice())?;
//! problem.accept_update()?;
//! assert!(point.value().norm() < 1e-12);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::design_variable::{DesignVariable, DesignVariableId, DesignVariableSet};
use crate::core::error_term::ErrorTerm;
use crate::core::jacobian_container::JacobianContainer;
use crate::core::{CoreError, CoreResult};
use crate::linalg::cholesky::DEFAULT_SYMMETRY_TOLERANCE;

/// Configuration for problem evaluation.
#[derive(Debug, Clone)]
pub struct ProblemConfig {
    /// Apply the error terms' M-estimator weights when building the weighted system
    pub use_mestimators: bool,
    /// Evaluate error terms on the rayon thread pool (only with the `parallel` feature)
    pub parallel_evaluation: bool,
    /// Relative symmetry tolerance for inverse covariances set through the problem
    pub symmetry_tolerance: f64,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            use_mestimators: true,
            parallel_evaluation: true,
            symmetry_tolerance: DEFAULT_SYMMETRY_TOLERANCE,
        }
    }
}

impl ProblemConfig {
    /// Create a new configuration with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_use_mestimators(mut self, use_mestimators: bool) -> Self {
        self.use_mestimators = use_mestimators;
        self
    }

    pub fn with_parallel_evaluation(mut self, parallel_evaluation: bool) -> Self {
        self.parallel_evaluation = parallel_evaluation;
        self
    }

    pub fn with_symmetry_tolerance(mut self, symmetry_tolerance: f64) -> Self {
        self.symmetry_tolerance = symmetry_tolerance;
        self
    }
}

/// Stacked weighted residual and Jacobian of all error terms.
#[derive(Debug, Clone)]
pub struct WeightedSystem {
    pub jacobian: DMatrix<f64>,
    pub error: DVector<f64>,
}

impl WeightedSystem {
    /// `(JᵀJ, Jᵀe)`
    pub fn normal_equations(&self) -> (DMatrix<f64>, DVector<f64>) {
        let jt = self.jacobian.transpose();
        (&jt * &self.jacobian, &jt * &self.error)
    }

    /// `eᵀe`, the total weighted squared error.
    pub fn squared_error(&self) -> f64 {
        self.error.norm_squared()
    }
}

#[derive(Debug)]
pub struct OptimizationProblem {
    config: ProblemConfig,
    design_variables: Vec<Arc<dyn DesignVariable>>,
    registered: HashSet<DesignVariableId>,
    error_terms: Vec<ErrorTerm>,
    column_offsets: HashMap<DesignVariableId, usize>,
    total_columns: usize,
}

impl Default for OptimizationProblem {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationProblem {
    pub fn new() -> Self {
        Self::with_config(ProblemConfig::default())
    }

    pub fn with_config(config: ProblemConfig) -> Self {
        Self {
            config,
            design_variables: Vec::new(),
            registered: HashSet::new(),
            error_terms: Vec::new(),
            column_offsets: HashMap::new(),
            total_columns: 0,
        }
    }

    pub fn config(&self) -> &ProblemConfig {
        &self.config
    }

    /// Register a design variable. Registering the same variable twice is an error.
    pub fn add_design_variable(&mut self, design_variable: Arc<dyn DesignVariable>) -> CoreResult<()> {
        let id = design_variable.id();
        if !self.registered.insert(id) {
            return Err(CoreError::InvalidInput(format!("{id} is already registered")).log());
        }
        self.design_variables.push(design_variable);
        Ok(())
    }

    /// Add an error term, returning its index.
    ///
    /// Every active design variable the term depends on must already be registered.
    pub fn add_error_term(&mut self, error_term: ErrorTerm) -> CoreResult<usize> {
        let mut set = DesignVariableSet::new();
        error_term.design_variables(&mut set);
        if let Some(missing) = set.active().find(|dv| !self.registered.contains(&dv.id())) {
            return Err(CoreError::InvalidInput(format!(
                "error term depends on unregistered design variable {}",
                missing.id()
            ))
            .log());
        }
        self.error_terms.push(error_term);
        Ok(self.error_terms.len() - 1)
    }

    pub fn design_variables(&self) -> &[Arc<dyn DesignVariable>] {
        &self.design_variables
    }

    pub fn num_design_variables(&self) -> usize {
        self.design_variables.len()
    }

    pub fn num_error_terms(&self) -> usize {
        self.error_terms.len()
    }

    pub fn error_term(&self, index: usize) -> Option<&ErrorTerm> {
        self.error_terms.get(index)
    }

    pub fn error_term_mut(&mut self, index: usize) -> Option<&mut ErrorTerm> {
        self.error_terms.get_mut(index)
    }

    /// Replace an error term's inverse covariance using the configured symmetry tolerance.
    pub fn set_inv_r(&mut self, index: usize, inv_r: DMatrix<f64>) -> CoreResult<()> {
        let tolerance = self.config.symmetry_tolerance;
        let term = self.error_terms.get_mut(index).ok_or_else(|| {
            CoreError::InvalidInput(format!("no error term at index {index}")).log()
        })?;
        term.set_inv_r_with_tolerance(inv_r, tolerance)
    }

    /// Number of rows of the stacked system.
    pub fn total_residual_dimension(&self) -> usize {
        self.error_terms.iter().map(ErrorTerm::dimension).sum()
    }

    /// Number of columns of the stacked system (after [`Self::assign_block_indices`]).
    pub fn total_columns(&self) -> usize {
        self.total_columns
    }

    /// Column offset of a design variable in the stacked Jacobian.
    pub fn column_offset(&self, id: DesignVariableId) -> Option<usize> {
        self.column_offsets.get(&id).copied()
    }

    /// Give active design variables consecutive block indices in registration order and clear the
    /// index of inactive ones. Returns the number of columns.
    pub fn assign_block_indices(&mut self) -> usize {
        self.column_offsets.clear();
        let mut block_index = 0;
        let mut column = 0;
        for dv in &self.design_variables {
            if dv.is_active() {
                dv.set_block_index(block_index);
                self.column_offsets.insert(dv.id(), column);
                block_index += 1;
                column += dv.minimal_dimensions();
            } else {
                dv.clear_block_index();
            }
        }
        self.total_columns = column;

        info!(
            "Problem: {} design variables ({} active, {} columns), {} error terms ({} rows)",
            self.design_variables.len(),
            block_index,
            column,
            self.error_terms.len(),
            self.total_residual_dimension()
        );
        column
    }

    /// Evaluate every error term and return the total squared error, M-estimator weighted when
    /// `use_mestimators` is set.
    pub fn evaluate_errors(&mut self) -> CoreResult<f64> {
        let use_mestimators = self.config.use_mestimators;
        let evaluate = |term: &mut ErrorTerm| -> CoreResult<f64> {
            if use_mestimators {
                term.evaluate_error()
            } else {
                term.evaluate_raw_error()
            }
        };

        #[cfg(feature = "parallel")]
        let errors: CoreResult<Vec<f64>> = if self.config.parallel_evaluation {
            self.error_terms.par_iter_mut().map(evaluate).collect()
        } else {
            self.error_terms.iter_mut().map(evaluate).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let errors: CoreResult<Vec<f64>> = self.error_terms.iter_mut().map(evaluate).collect();

        Ok(errors?.into_iter().sum())
    }

    /// Evaluate all error terms and stack their weighted errors and Jacobians.
    ///
    /// Requires [`Self::assign_block_indices`]; a design variable without a column is a
    /// [`CoreError::Usage`] error.
    pub fn build_weighted_system(&mut self) -> CoreResult<WeightedSystem> {
        self.evaluate_errors()?;

        let use_mestimators = self.config.use_mestimators;
        let weigh = |term: &ErrorTerm| -> CoreResult<(DVector<f64>, JacobianContainer)> {
            let mut jacobians = JacobianContainer::new(term.dimension());
            term.weighted_jacobians(&mut jacobians, use_mestimators)?;
            Ok((term.weighted_error(use_mestimators)?, jacobians))
        };

        #[cfg(feature = "parallel")]
        let blocks: CoreResult<Vec<_>> = if self.config.parallel_evaluation {
            self.error_terms.par_iter().map(weigh).collect()
        } else {
            self.error_terms.iter().map(weigh).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let blocks: CoreResult<Vec<_>> = self.error_terms.iter().map(weigh).collect();

        let blocks = blocks?;

        let rows = self.total_residual_dimension();
        let mut jacobian = DMatrix::zeros(rows, self.total_columns);
        let mut error = DVector::zeros(rows);
        let mut row = 0;
        for (weighted_error, jacobians) in &blocks {
            let dimension = weighted_error.len();
            error.rows_mut(row, dimension).copy_from(weighted_error);
            for block in jacobians.iter() {
                let dv = &block.design_variable;
                dv.require_block_index()?;
                let column = self.column_offset(dv.id()).ok_or_else(|| {
                    CoreError::Usage(format!(
                        "{} has a block index but no column in this problem",
                        dv.id()
                    ))
                    .log()
                })?;
                jacobian
                    .view_mut((row, column), block.jacobian.shape())
                    .copy_from(&block.jacobian);
            }
            row += dimension;
        }

        debug!(
            "Weighted system {}x{}, squared error {:.6e}",
            rows,
            self.total_columns,
            error.norm_squared()
        );
        Ok(WeightedSystem { jacobian, error })
    }

    /// Scatter a stacked step to the active design variables as pending updates.
    ///
    /// If any variable rejects its slice, the updates already staged are reverted. An active
    /// variable without a column (activated after [`Self::assign_block_indices`]) is a
    /// [`CoreError::Usage`] error.
    pub fn apply_update(&self, step: &[f64]) -> CoreResult<()> {
        if step.len() != self.total_columns {
            return Err(CoreError::DimensionMismatch(format!(
                "step has {} entries, problem has {} columns",
                step.len(),
                self.total_columns
            ))
            .log());
        }

        let mut staged: Vec<&Arc<dyn DesignVariable>> = Vec::new();
        for dv in self.design_variables.iter().filter(|dv| dv.is_active()) {
            let result = self
                .column_offset(dv.id())
                .ok_or_else(|| {
                    CoreError::Usage(format!(
                        "{} is active but has no column; call assign_block_indices first",
                        dv.id()
                    ))
                    .log()
                })
                .and_then(|column| {
                    let end = column + dv.minimal_dimensions();
                    if end > step.len() {
                        return Err(CoreError::DimensionMismatch(format!(
                            "{} spans columns {column}..{end} beyond the step",
                            dv.id()
                        ))
                        .log());
                    }
                    dv.update(&step[column..end])
                });
            if let Err(error) = result {
                for applied in staged {
                    applied.revert_update()?;
                }
                return Err(error);
            }
            staged.push(dv);
        }
        Ok(())
    }

    /// Commit the pending update of every active design variable.
    pub fn accept_update(&self) -> CoreResult<()> {
        for dv in self.pending() {
            dv.accept_update()?;
        }
        Ok(())
    }

    /// Restore every active design variable to its value before [`Self::apply_update`].
    pub fn revert_update(&self) -> CoreResult<()> {
        for dv in self.pending() {
            dv.revert_update()?;
        }
        Ok(())
    }

    fn pending(&self) -> impl Iterator<Item = &Arc<dyn DesignVariable>> {
        self.design_variables
            .iter()
            .filter(|dv| dv.is_active() && dv.has_pending_update())
    }
}
