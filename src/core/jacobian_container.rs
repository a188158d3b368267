//! Accumulator for per-design-variable Jacobian blocks.
//!
//! An expression tree pushes one block per (path, design variable). A design variable that is
//! reachable through several paths receives the sum of its path-wise contributions, which is the
//! multivariate chain rule. Inactive design variables are constants and never get a block.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::core::design_variable::{DesignVariable, DesignVariableId};
use crate::core::{CoreError, CoreResult};

/// One accumulated block: `rows × minimal_dimensions` of its design variable.
#[derive(Debug, Clone)]
pub struct JacobianBlock {
    pub design_variable: Arc<dyn DesignVariable>,
    pub jacobian: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct JacobianContainer {
    rows: usize,
    blocks: Vec<JacobianBlock>,
    index: HashMap<DesignVariableId, usize>,
}

impl JacobianContainer {
    /// An empty container for a residual of dimension `rows`.
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            blocks: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of design variables with a block.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop all blocks, keeping the row dimension.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.index.clear();
    }

    /// Drop all blocks and change the row dimension.
    pub fn reset(&mut self, rows: usize) {
        self.clear();
        self.rows = rows;
    }

    /// Accumulate `block` into the design variable's entry, creating it on first touch.
    ///
    /// Blocks for inactive design variables are ignored.
    pub fn add(
        &mut self,
        design_variable: &Arc<dyn DesignVariable>,
        block: &DMatrix<f64>,
    ) -> CoreResult<()> {
        if !design_variable.is_active() {
            return Ok(());
        }

        let expected = (self.rows, design_variable.minimal_dimensions());
        if block.shape() != expected {
            return Err(CoreError::DimensionMismatch(format!(
                "Jacobian block for {} is {}x{}, expected {}x{}",
                design_variable.id(),
                block.nrows(),
                block.ncols(),
                expected.0,
                expected.1
            ))
            .log());
        }

        match self.index.get(&design_variable.id()) {
            Some(&slot) => self.blocks[slot].jacobian += block,
            None => {
                self.index.insert(design_variable.id(), self.blocks.len());
                self.blocks.push(JacobianBlock {
                    design_variable: Arc::clone(design_variable),
                    jacobian: block.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: DesignVariableId) -> bool {
        self.index.contains_key(&id)
    }

    /// The accumulated block for `id`, if any.
    pub fn block(&self, id: DesignVariableId) -> Option<&DMatrix<f64>> {
        self.index.get(&id).map(|&slot| &self.blocks[slot].jacobian)
    }

    /// Blocks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &JacobianBlock> {
        self.blocks.iter()
    }

    /// Replace every block `J` by `M·J`; the container then has `M.nrows()` rows.
    pub fn apply_lhs(&mut self, lhs: &DMatrix<f64>) -> CoreResult<()> {
        if lhs.ncols() != self.rows {
            return Err(CoreError::DimensionMismatch(format!(
                "cannot left-multiply {}-row Jacobian by {}x{} matrix",
                self.rows,
                lhs.nrows(),
                lhs.ncols()
            ))
            .log());
        }
        for block in &mut self.blocks {
            block.jacobian = lhs * &block.jacobian;
        }
        self.rows = lhs.nrows();
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        for block in &mut self.blocks {
            block.jacobian *= factor;
        }
    }

    /// Blocks sorted by ascending block index; unassigned variables come last in insertion order.
    pub fn ordered_blocks(&self) -> Vec<&JacobianBlock> {
        let mut ordered: Vec<&JacobianBlock> = self.blocks.iter().collect();
        // Stable sort keeps insertion order among equal keys
        ordered.sort_by_key(|block| {
            block
                .design_variable
                .block_index()
                .map_or((1, 0), |index| (0, index))
        });
        ordered
    }

    /// Total number of columns over all blocks.
    pub fn column_count(&self) -> usize {
        self.blocks.iter().map(|block| block.jacobian.ncols()).sum()
    }

    /// Render the blocks side by side in [`Self::ordered_blocks`] order.
    pub fn as_dense_matrix(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows, self.column_count());
        let mut column = 0;
        for block in self.ordered_blocks() {
            let cols = block.jacobian.ncols();
            dense
                .view_mut((0, column), (self.rows, cols))
                .copy_from(&block.jacobian);
            column += cols;
        }
        dense
    }
}
