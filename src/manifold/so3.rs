//! SO(3) helpers: hat map, exponential/logarithm and the Jacobians of the exponential map.
//!
//! Rotations are stored as `UnitQuaternion<f64>`; tangent vectors are axis-angle `Vector3<f64>`.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::manifold::{ManifoldError, ManifoldResult};

/// Below this squared angle the series expansions are used.
pub const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Hat map for SO(3)
///
/// # Notes
/// [θ]ₓ = [0 -θz θy; θz 0 -θx; -θy θx 0]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Vee map, inverse of [`skew`] for skew-symmetric input.
pub fn vee(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(m[(2, 1)], m[(0, 2)], m[(1, 0)])
}

/// Exponential map: q = cos(θ/2) + u sin(θ/2)
pub fn exp(phi: &Vector3<f64>) -> UnitQuaternion<f64> {
    if phi.norm_squared() > SMALL_ANGLE_THRESHOLD {
        UnitQuaternion::from_scaled_axis(*phi)
    } else {
        UnitQuaternion::from_quaternion(Quaternion::new(
            1.0,
            phi.x / 2.0,
            phi.y / 2.0,
            phi.z / 2.0,
        ))
    }
}

/// Logarithmic map, returning the axis-angle vector with angle in [0, π].
pub fn log(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    q.scaled_axis()
}

/// Left Jacobian of the exponential map
///
/// # Notes
/// J_l(θ) = I + (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²
pub fn left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let angle_squared = phi.norm_squared();
    let phi_hat = skew(phi);

    if angle_squared <= SMALL_ANGLE_THRESHOLD {
        Matrix3::identity() + 0.5 * phi_hat + phi_hat * phi_hat / 6.0
    } else {
        let theta = angle_squared.sqrt();
        Matrix3::identity()
            + (1.0 - theta.cos()) / angle_squared * phi_hat
            + (theta - theta.sin()) / (angle_squared * theta) * phi_hat * phi_hat
    }
}

/// Inverse of the left Jacobian
///
/// # Notes
/// J_l⁻¹(θ) = I - ½[θ]ₓ + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]ₓ²
pub fn left_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    let angle_squared = phi.norm_squared();
    let phi_hat = skew(phi);

    if angle_squared <= SMALL_ANGLE_THRESHOLD {
        Matrix3::identity() - 0.5 * phi_hat + phi_hat * phi_hat / 12.0
    } else {
        let theta = angle_squared.sqrt();
        Matrix3::identity() - 0.5 * phi_hat
            + (1.0 / angle_squared - (1.0 + theta.cos()) / (2.0 * theta * theta.sin()))
                * phi_hat
                * phi_hat
    }
}

/// Right Jacobian, J_r(θ) = J_l(-θ) = J_l(θ)ᵀ
pub fn right_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    left_jacobian(phi).transpose()
}

/// The i-th generator of so(3).
pub fn generator(i: usize) -> ManifoldResult<Matrix3<f64>> {
    match i {
        0 => Ok(Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0)),
        1 => Ok(Matrix3::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0)),
        2 => Ok(Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0)),
        _ => Err(ManifoldError::InvalidTangentDimension {
            expected: 3,
            actual: i + 1,
        }),
    }
}

/// Normalize raw quaternion coefficients `[x, y, z, w]` onto the unit sphere.
pub fn quaternion_from_coeffs(coeffs: &[f64]) -> ManifoldResult<UnitQuaternion<f64>> {
    if coeffs.len() != 4 {
        return Err(ManifoldError::DimensionMismatch {
            expected: 4,
            actual: coeffs.len(),
        });
    }
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(ManifoldError::InvalidNumber);
    }
    let q = Quaternion::new(coeffs[3], coeffs[0], coeffs[1], coeffs[2]);
    if q.norm() < f64::EPSILON {
        return Err(ManifoldError::NormalizationFailed(
            "zero-norm quaternion".to_string(),
        ));
    }
    Ok(UnitQuaternion::from_quaternion(q))
}

/// Quaternion coefficients in `[x, y, z, w]` order.
pub fn quaternion_coeffs(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.i, q.j, q.k, q.w]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_skew_vee_roundtrip_and_cross_product() {
        let a = Vector3::new(0.3, -1.2, 2.0);
        let b = Vector3::new(-0.7, 0.1, 0.4);
        assert!((vee(&skew(&a)) - a).norm() < TOLERANCE);
        assert!((skew(&a) * b - a.cross(&b)).norm() < TOLERANCE);
    }

    #[test]
    fn test_exp_log_inverse() {
        let phi = Vector3::new(0.4, -0.2, 0.9);
        assert!((log(&exp(&phi)) - phi).norm() < TOLERANCE);
        assert!((log(&exp(&Vector3::zeros()))).norm() < TOLERANCE);
    }

    #[test]
    fn test_left_jacobian_inverse_is_inverse() {
        for phi in [
            Vector3::new(0.4, -0.2, 0.9),
            Vector3::new(1e-7, 2e-7, -1e-7),
            Vector3::new(2.5, 0.3, -0.1),
        ] {
            let product = left_jacobian(&phi) * left_jacobian_inverse(&phi);
            assert!((product - Matrix3::identity()).amax() < 1e-8);
        }
    }

    #[test]
    fn test_left_jacobian_matches_finite_difference() {
        // exp((φ + ε)^) ≈ exp((J_l ε)^) exp(φ^)
        let phi = Vector3::new(0.3, 0.5, -0.4);
        let base = exp(&phi);
        let jl = left_jacobian(&phi);
        let eps = 1e-6;
        for i in 0..3 {
            let mut delta = Vector3::zeros();
            delta[i] = eps;
            let perturbed = exp(&(phi + delta));
            let numeric = log(&(perturbed * base.inverse())) / eps;
            assert!((numeric - jl.column(i)).norm() < 1e-5);
        }
    }

    #[test]
    fn test_generators_match_skew() {
        for i in 0..3 {
            let mut e = Vector3::zeros();
            e[i] = 1.0;
            assert_eq!(generator(i).ok(), Some(skew(&e)));
        }
        assert!(generator(3).is_err());
    }

    #[test]
    fn test_quaternion_from_coeffs_normalizes() -> Result<(), Box<dyn std::error::Error>> {
        let q = quaternion_from_coeffs(&[0.0, 0.0, 0.0, 2.0])?;
        assert!((q.w - 1.0).abs() < TOLERANCE);
        assert_eq!(quaternion_coeffs(&q), [0.0, 0.0, 0.0, 1.0]);
        assert!(quaternion_from_coeffs(&[0.0; 4]).is_err());
        assert!(quaternion_from_coeffs(&[1.0, 0.0, 0.0]).is_err());
        Ok(())
    }
}
