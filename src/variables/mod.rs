//! Concrete design variables.
//!
//! | Variable | Value | Minimal dimension | Update |
//! |----------|-------|-------------------|--------|
//! | [`VectorDesignVariable`] | `DVector<f64>` | `n` | `x + δ` |
//! | [`EuclideanPoint`] | `Vector3<f64>` | 3 | `p + δ` |
//! | [`RotationQuaternion`] | `UnitQuaternion<f64>` | 3 | `exp(δ^)·C` |
//! | [`MatrixTransformation`] | `Matrix3<f64>` | number of estimated entries | `A + scatter(δ)` |
//!
//! Each variable exposes itself as an expression leaf through `to_expression`, called on the
//! shared `Arc` so the leaf and the optimization problem see the same variable.

pub mod euclidean_point;
pub mod matrix_transformation;
pub mod rotation_quaternion;
pub mod vector;

pub use euclidean_point::EuclideanPoint;
pub use matrix_transformation::MatrixTransformation;
pub use rotation_quaternion::RotationQuaternion;
pub use vector::VectorDesignVariable;
