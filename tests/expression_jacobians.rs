//! Integration tests comparing expression Jacobians against central finite differences
//!
//! Every design variable is perturbed through its own update protocol (`update` followed by
//! `revert_update`), so rotations are perturbed on the left exactly as the optimizer would.

use std::sync::Arc;

use calib_backend::core::design_variable::{DesignVariable, DesignVariableSet};
use calib_backend::core::jacobian_container::JacobianContainer;
use calib_backend::expressions::{EuclideanExpression, RotationExpression};
use calib_backend::manifold::so3;
use calib_backend::variables::{
    EuclideanPoint, MatrixTransformation, RotationQuaternion, VectorDesignVariable,
};
use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};

const STEP: f64 = 1e-6;
const TOLERANCE: f64 = 1e-6;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Central difference of `difference(plus, minus)` for each minimal direction of `variable`
fn numerical_jacobian<T>(
    variable: &Arc<dyn DesignVariable>,
    rows: usize,
    value: impl Fn() -> T,
    difference: impl Fn(&T, &T) -> DVector<f64>,
) -> Result<DMatrix<f64>, Box<dyn std::error::Error>> {
    let columns = variable.minimal_dimensions();
    let mut jacobian = DMatrix::zeros(rows, columns);
    for k in 0..columns {
        let mut delta = vec![0.0; columns];

        delta[k] = STEP;
        variable.update(&delta)?;
        let plus = value();
        variable.revert_update()?;

        delta[k] = -STEP;
        variable.update(&delta)?;
        let minus = value();
        variable.revert_update()?;

        jacobian.set_column(k, &(difference(&plus, &minus) / (2.0 * STEP)));
    }
    Ok(jacobian)
}

fn euclidean_difference(plus: &Vector3<f64>, minus: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice((plus - minus).as_slice())
}

fn assert_block_matches(
    analytic: &JacobianContainer,
    variable: &Arc<dyn DesignVariable>,
    numerical: &DMatrix<f64>,
) -> TestResult {
    let block = analytic
        .block(variable.id())
        .ok_or_else(|| format!("no Jacobian block for {}", variable.id()))?;
    let max_error = (block - numerical).amax();
    assert!(
        max_error < TOLERANCE,
        "{}: analytic and numerical Jacobians differ by {max_error:e}\n{block}\n{numerical}",
        variable.id()
    );
    Ok(())
}

fn check_euclidean(expression: &EuclideanExpression) -> TestResult {
    let mut analytic = JacobianContainer::new(3);
    expression.evaluate_jacobians(&mut analytic)?;

    let mut set = DesignVariableSet::new();
    expression.design_variables(&mut set);
    assert!(!set.is_empty());
    for variable in set.active() {
        let numerical =
            numerical_jacobian(variable, 3, || expression.to_value(), euclidean_difference)?;
        assert_block_matches(&analytic, variable, &numerical)?;
    }
    Ok(())
}

fn rotation(x: f64, y: f64, z: f64) -> Arc<RotationQuaternion> {
    Arc::new(RotationQuaternion::new(UnitQuaternion::from_scaled_axis(
        Vector3::new(x, y, z),
    )))
}

#[test]
fn test_rotated_point() -> TestResult {
    let c = rotation(0.3, -0.2, 0.9);
    let p = Arc::new(EuclideanPoint::new(Vector3::new(1.0, -2.0, 0.5)));
    check_euclidean(&(c.to_expression() * p.to_expression()))
}

#[test]
fn test_composed_and_inverted_rotations() -> TestResult {
    let c1 = rotation(0.3, -0.2, 0.9);
    let c2 = rotation(-1.1, 0.4, 0.2);
    let p = Arc::new(EuclideanPoint::new(Vector3::new(0.2, 0.7, -1.5)));

    let composed = c1.to_expression() * c2.to_expression().inverse();
    check_euclidean(&p.to_expression().rotated_by(&composed))
}

#[test]
fn test_matrix_transformed_point() -> TestResult {
    let pattern = Matrix3::new(1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0);
    let m = Arc::new(MatrixTransformation::with_update_pattern(
        Matrix3::new(1.0, 0.1, 0.0, 0.0, 0.9, -0.2, 0.0, 0.0, 1.1),
        pattern,
    )?);
    let p = Arc::new(EuclideanPoint::new(Vector3::new(0.4, -0.3, 2.0)));
    check_euclidean(&(m.to_expression() * p.to_expression()))
}

#[test]
fn test_composite_expression_graph() -> TestResult {
    let c = rotation(0.5, 0.1, -0.4);
    let m = Arc::new(MatrixTransformation::new(Matrix3::new(
        1.0, 0.2, -0.1, 0.0, 1.3, 0.4, 0.3, 0.0, 0.8,
    )));
    let p = Arc::new(EuclideanPoint::new(Vector3::new(1.0, 2.0, -0.5)));
    let q = Arc::new(EuclideanPoint::new(Vector3::new(-0.3, 0.6, 1.2)));
    let v = Arc::new(VectorDesignVariable::new(DVector::from_vec(vec![0.1, -0.2, 0.3])));

    // p and c appear twice; their contributions must accumulate
    let lever = EuclideanExpression::from_vector(v.to_expression())? + q.to_expression();
    let expression = (c.to_expression() * (m.to_expression() * p.to_expression()))
        .cross(&lever)
        - (c.to_expression().inverse() * p.to_expression())
        - Vector3::new(0.5, 0.5, 0.5);
    check_euclidean(&-expression)
}

#[test]
fn test_inactive_variable_is_constant() -> TestResult {
    let c = rotation(0.3, -0.2, 0.9);
    let p = Arc::new(EuclideanPoint::new(Vector3::new(1.0, -2.0, 0.5)));
    c.set_active(false);

    let expression = c.to_expression() * p.to_expression();
    let mut analytic = JacobianContainer::new(3);
    expression.evaluate_jacobians(&mut analytic)?;
    assert!(!analytic.contains(c.id()));
    assert!(analytic.contains(p.id()));

    check_euclidean(&expression)
}

#[test]
fn test_rotation_expression_jacobian() -> TestResult {
    let c1 = rotation(0.3, -0.2, 0.9);
    let c2 = rotation(-1.1, 0.4, 0.2);
    let expression: RotationExpression = c1.to_expression().inverse() * c2.to_expression();

    let mut analytic = JacobianContainer::new(3);
    expression.evaluate_jacobians(&mut analytic)?;

    // Output perturbations are measured on the left, like the inputs
    let rotation_difference = |plus: &UnitQuaternion<f64>, minus: &UnitQuaternion<f64>| {
        let phi = so3::log(&(plus * minus.inverse()));
        DVector::from_column_slice(phi.as_slice())
    };

    for variable in [c1 as Arc<dyn DesignVariable>, c2 as Arc<dyn DesignVariable>] {
        let numerical =
            numerical_jacobian(&variable, 3, || expression.to_value(), rotation_difference)?;
        assert_block_matches(&analytic, &variable, &numerical)?;
    }
    Ok(())
}

#[test]
fn test_affine_vector_expression() -> TestResult {
    let x = Arc::new(VectorDesignVariable::new(DVector::from_vec(vec![0.5, -1.0])));
    let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, -1.0, 3.0, 0.5]);
    let expression = x.to_expression().affine(a.clone(), DVector::from_vec(vec![1.0, 0.0, -1.0]))?;

    let mut analytic = JacobianContainer::new(3);
    expression.evaluate_jacobians(&mut analytic)?;

    let variable: Arc<dyn DesignVariable> = x;
    let numerical = numerical_jacobian(
        &variable,
        3,
        || expression.to_value(),
        |plus: &DVector<f64>, minus: &DVector<f64>| plus - minus,
    )?;
    assert_block_matches(&analytic, &variable, &numerical)?;
    assert!((numerical - a).amax() < TOLERANCE);
    Ok(())
}
