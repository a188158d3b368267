//! Square-root factors of inverse covariance matrices.
//!
//! Error terms weight their residuals with a factor `S` such that `invR = Sᵀ·S`. For a strictly
//! positive-definite `invR` this is the transposed Cholesky factor. Singular but positive
//! semi-definite matrices (e.g. a measurement that constrains only some directions) fall back
//! to a symmetric eigen decomposition `invR = V·Λ·Vᵀ`, giving `S = Λ^½·Vᵀ`.
//!
//! # Example
//!
//! ```
//! use calib_backend::linalg::SquareRootFactor;
//! use nalgebra::{DMatrix, DVector};
//! # use calib_backend::linalg::LinAlgResult;
//! # fn example() -> LinAlgResult<()> {
//!
//! let inv_r = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
//! let sqrt = SquareRootFactor::compute(&inv_r)?;
//!
//! let e = DVector::from_vec(vec![0.5, -1.0]);
//! let we = sqrt.apply(&e);
//! assert!((we.dot(&we) - e.dot(&(&inv_r * &e))).abs() < 1e-12);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use tracing::debug;

use crate::linalg::{LinAlgError, LinAlgResult};

/// Relative tolerance used for the symmetry and semi-definiteness checks.
pub const DEFAULT_SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Which decomposition produced a [`SquareRootFactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorizationMethod {
    /// `S = Lᵀ` from `invR = L·Lᵀ`
    Cholesky,
    /// `S = Λ^½·Vᵀ` from `invR = V·Λ·Vᵀ`
    SymmetricEigen,
}

/// Square root `S` of a symmetric positive semi-definite matrix `M`, with `M = Sᵀ·S`.
#[derive(Debug, Clone)]
pub struct SquareRootFactor {
    factor: DMatrix<f64>,
    method: FactorizationMethod,
}

impl SquareRootFactor {
    /// Factor `matrix` using [`DEFAULT_SYMMETRY_TOLERANCE`].
    pub fn compute(matrix: &DMatrix<f64>) -> LinAlgResult<Self> {
        Self::compute_with_tolerance(matrix, DEFAULT_SYMMETRY_TOLERANCE)
    }

    /// Factor `matrix`, rejecting it when it is not square, not finite, not symmetric within
    /// `tolerance` (relative to its largest entry), or has an eigenvalue below `-tolerance`
    /// (relative to its largest eigenvalue).
    pub fn compute_with_tolerance(matrix: &DMatrix<f64>, tolerance: f64) -> LinAlgResult<Self> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(LinAlgError::NotSquare { rows, cols }.log());
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::NonFiniteEntries.log());
        }

        let scale = matrix.amax().max(1.0);
        let asymmetry = max_asymmetry(matrix);
        if asymmetry > tolerance * scale {
            return Err(LinAlgError::NotSymmetric {
                max_asymmetry: asymmetry,
            }
            .log());
        }

        let symmetric = (matrix + matrix.transpose()) * 0.5;

        if let Some(llt) = symmetric.clone().cholesky() {
            return Ok(Self {
                factor: llt.l().transpose(),
                method: FactorizationMethod::Cholesky,
            });
        }

        debug!(
            "Cholesky failed on {}x{} information matrix, falling back to eigen decomposition",
            rows, cols
        );

        let eigen = SymmetricEigen::new(symmetric);
        let largest = eigen.eigenvalues.amax().max(f64::MIN_POSITIVE);
        let min_eigenvalue = eigen.eigenvalues.min();
        if min_eigenvalue < -tolerance * largest.max(1.0) {
            return Err(LinAlgError::NotPositiveSemiDefinite { min_eigenvalue }.log());
        }

        let sqrt_eigenvalues = eigen.eigenvalues.map(|lambda| lambda.max(0.0).sqrt());
        let factor = DMatrix::from_diagonal(&sqrt_eigenvalues) * eigen.eigenvectors.transpose();
        if factor.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::FactorizationFailed(
                "eigen decomposition produced non-finite square root".to_string(),
            )
            .log());
        }

        Ok(Self {
            factor,
            method: FactorizationMethod::SymmetricEigen,
        })
    }

    /// The factor `S`.
    pub fn factor(&self) -> &DMatrix<f64> {
        &self.factor
    }

    pub fn method(&self) -> FactorizationMethod {
        self.method
    }

    /// Dimension of the factored matrix.
    pub fn dimension(&self) -> usize {
        self.factor.ncols()
    }

    /// `S·v`
    pub fn apply(&self, vector: &DVector<f64>) -> DVector<f64> {
        &self.factor * vector
    }

    /// `S·M`
    pub fn apply_to_matrix(&self, matrix: &DMatrix<f64>) -> DMatrix<f64> {
        &self.factor * matrix
    }

    /// `Sᵀ·S`, equal to the factored matrix up to round-off.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        self.factor.transpose() * &self.factor
    }
}

/// Largest absolute difference between `matrix` and its transpose.
pub fn max_asymmetry(matrix: &DMatrix<f64>) -> f64 {
    let n = matrix.nrows().min(matrix.ncols());
    let mut worst: f64 = 0.0;
    for j in 0..n {
        for i in (j + 1)..n {
            worst = worst.max((matrix[(i, j)] - matrix[(j, i)]).abs());
        }
    }
    worst
}
