//! End-to-end calibration tests
//!
//! A small Gauss-Newton loop drives `OptimizationProblem` the way an external solver would:
//! build the weighted system, solve the normal equations, apply the step, then accept it when
//! the cost decreases and revert it otherwise.

use std::sync::Arc;

use calib_backend::core::design_variable::DesignVariable;
use calib_backend::core::error_term::ErrorTerm;
use calib_backend::core::mestimators::CauchyMEstimator;
use calib_backend::core::problem::{OptimizationProblem, ProblemConfig};
use calib_backend::manifold::so3;
use calib_backend::residuals::{EuclideanResidual, PriorResidual};
use calib_backend::variables::{EuclideanPoint, MatrixTransformation, RotationQuaternion};
use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Run damped Gauss-Newton, returning the final cost
fn solve(problem: &mut OptimizationProblem, iterations: usize) -> Result<f64, Box<dyn std::error::Error>> {
    problem.assign_block_indices();
    let mut cost = problem.evaluate_errors()?;
    for _ in 0..iterations {
        let system = problem.build_weighted_system()?;
        let (mut jtj, jte) = system.normal_equations();
        for i in 0..jtj.nrows() {
            jtj[(i, i)] += 1e-9;
        }
        let step = -jtj.lu().solve(&jte).ok_or("singular normal equations")?;

        problem.apply_update(step.as_slice())?;
        let candidate = problem.evaluate_errors()?;
        if candidate <= cost {
            problem.accept_update()?;
            cost = candidate;
        } else {
            problem.revert_update()?;
            problem.evaluate_errors()?;
        }
    }
    Ok(cost)
}

fn landmarks() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 2.0, 0.0),
        Vector3::new(0.0, 0.0, 3.0),
        Vector3::new(1.0, -1.0, 0.5),
        Vector3::new(-2.0, 0.5, 1.0),
        Vector3::new(0.3, 0.7, -1.2),
    ]
}

#[test]
fn test_recover_rotation_from_point_correspondences() -> TestResult {
    let truth = UnitQuaternion::from_scaled_axis(Vector3::new(0.4, -0.7, 1.1));
    let rotation = Arc::new(RotationQuaternion::new(UnitQuaternion::identity()));

    let mut problem = OptimizationProblem::new();
    problem.add_design_variable(rotation.clone())?;
    for p in landmarks() {
        let point = Arc::new(EuclideanPoint::new(p));
        point.set_active(false);
        problem.add_error_term(ErrorTerm::new(EuclideanResidual::new(
            rotation.to_expression() * point.to_expression(),
            truth * p,
        ))?)?;
    }

    let cost = solve(&mut problem, 20)?;
    assert!(cost < 1e-16, "final cost {cost:e}");
    assert!(so3::log(&(rotation.value() * truth.inverse())).norm() < 1e-8);
    assert_eq!(problem.total_columns(), 3);
    Ok(())
}

#[test]
fn test_recover_rotation_and_scale_with_prior() -> TestResult {
    let truth_rotation = UnitQuaternion::from_scaled_axis(Vector3::new(-0.2, 0.3, 0.5));
    let truth_scale = Matrix3::new(1.1, 0.05, 0.0, 0.0, 0.9, 0.0, 0.0, 0.0, 1.0);

    let rotation = Arc::new(RotationQuaternion::new(UnitQuaternion::identity()));
    let scale = Arc::new(MatrixTransformation::with_update_pattern(
        Matrix3::identity(),
        Matrix3::new(1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0),
    )?);

    let mut problem =
        OptimizationProblem::with_config(ProblemConfig::new().with_parallel_evaluation(false));
    problem.add_design_variable(rotation.clone())?;
    problem.add_design_variable(scale.clone())?;

    for p in landmarks() {
        let point = Arc::new(EuclideanPoint::new(p));
        point.set_active(false);
        let predicted = rotation.to_expression() * (scale.to_expression() * point.to_expression());
        problem.add_error_term(ErrorTerm::new(EuclideanResidual::new(
            predicted,
            truth_rotation * (truth_scale * p),
        ))?)?;
    }

    // A weak prior on the scale at its initial value
    let prior = PriorResidual::at_current_value(scale.clone());
    let index = problem.add_error_term(ErrorTerm::new(prior)?)?;
    problem.set_inv_r(index, DMatrix::identity(3, 3) * 1e-12)?;

    let cost = solve(&mut problem, 30)?;
    assert!(cost < 1e-10, "final cost {cost:e}");
    assert_eq!(problem.total_columns(), 6);
    assert!((scale.value() - truth_scale).amax() < 1e-5);
    assert!(so3::log(&(rotation.value() * truth_rotation.inverse())).norm() < 1e-5);
    Ok(())
}

#[test]
fn test_robust_estimator_downweights_outlier() -> TestResult {
    let truth = Vector3::new(1.0, -2.0, 0.5);
    let point = Arc::new(EuclideanPoint::new(Vector3::zeros()));

    let mut problem = OptimizationProblem::new();
    problem.add_design_variable(point.clone())?;
    let policy = Arc::new(CauchyMEstimator::new(0.1)?);
    let observations = [
        truth,
        truth + Vector3::new(0.01, 0.0, 0.0),
        truth - Vector3::new(0.01, 0.0, 0.0),
        truth + Vector3::new(0.0, 0.01, 0.0),
        truth + Vector3::new(20.0, 20.0, -20.0),
    ];
    for z in observations {
        let mut term = ErrorTerm::new(EuclideanResidual::new(point.to_expression(), z))?;
        term.set_mestimator_policy(policy.clone());
        problem.add_error_term(term)?;
    }

    solve(&mut problem, 50)?;
    // The unweighted mean would sit four metres away
    assert!((point.value() - truth).norm() < 0.1);
    Ok(())
}
