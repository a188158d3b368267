//! Residual models backing [`ErrorTerm`](crate::core::error_term::ErrorTerm).
//!
//! - [`EuclideanResidual`]: `p(x) - z` for a Euclidean expression `p`
//! - [`VectorResidual`]: `v(x) - z` for a vector expression `v`
//! - [`PriorResidual`]: `x ⊟ x̂` for a single design variable

pub mod euclidean;
pub mod prior;
pub mod vector;

pub use euclidean::EuclideanResidual;
pub use prior::PriorResidual;
pub use vector::VectorResidual;
