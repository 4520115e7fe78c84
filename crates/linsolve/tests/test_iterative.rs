//! Krylov adapter behaviour: configuration, convergence bookkeeping and
//! agreement with the direct solvers.

mod helpers;

use approx::assert_relative_eq;
use linsolve::{
    create, AdapterState, IterativeSolver, LinearSolver, PreconditionerKind, SolverError,
};
use nalgebra::DVector;
use serde_json::json;

use helpers::{block_chain, laplacian_1d, random_diag_dominant, random_vector, relative_residual};

#[test]
fn single_iteration_budget_reports_failure_with_diagnostics() {
    let a = laplacian_1d(50);
    let b = DVector::from_element(50, 1.0);

    for name in ["GMRES", "CG", "BiCGSTAB"] {
        let mut solver = create(name).unwrap();
        solver.set_parameters(&json!({"max_iter": 1, "conv_tol": 1e-10}));
        solver.analyze_pattern(&a, 0).unwrap();
        let mut x = DVector::zeros(50);

        let err = solver.solve(&b, &mut x).unwrap_err();
        assert!(err.is_convergence_failure(), "{name}: {err}");
        let info = solver.info();
        assert!(info.iterations <= 1, "{name}: {} iterations", info.iterations);
        assert!(!info.converged);
        assert!(info.final_residual_norm > 1e-10);
        assert!(x.iter().all(|v| v.is_finite()));
        assert!(x.norm() > 0.0, "{name}: approximation was discarded");
    }
}

#[test]
fn solver_stays_usable_after_convergence_failure() {
    let a = laplacian_1d(30);
    let b = DVector::from_element(30, 1.0);
    let mut solver = IterativeSolver::gmres();
    solver.set_parameters(&json!({"max_iter": 1, "conv_tol": 1e-10}));
    solver.analyze_pattern(&a, 0).unwrap();

    let mut x = DVector::zeros(30);
    assert!(solver.solve(&b, &mut x).is_err());
    assert_eq!(solver.state(), AdapterState::Analyzed);

    solver.set_parameters(&json!({"max_iter": 5000}));
    solver.solve(&b, &mut x).unwrap();
    assert_eq!(solver.state(), AdapterState::Solved);
    assert!(relative_residual(&a, &x, &b) < 2e-10);
}

#[test]
fn zero_iteration_cap_is_clamped_to_one() {
    let mut solver = IterativeSolver::cg();
    solver.set_parameters(&json!({"max_iter": 0, "pre_max_iter": 0, "dimension": 0}));
    assert_eq!(solver.config().max_iterations, 1);
    assert_eq!(solver.config().pre_max_iterations, 1);
    assert_eq!(solver.config().dimension, 1);

    let a = laplacian_1d(20);
    solver.analyze_pattern(&a, 0).unwrap();
    let mut x = DVector::zeros(20);
    let _ = solver.solve(&DVector::from_element(20, 1.0), &mut x);
    assert_eq!(solver.info().iterations, 1);
}

#[test]
fn default_configuration_is_deterministic() {
    let a = block_chain(12);
    let b = random_vector(36, 7);

    let run = || {
        let mut solver = create("GMRES").unwrap();
        solver.set_parameters(&json!({"partitions": 3}));
        solver.analyze_pattern(&a, 0).unwrap();
        let mut x = DVector::zeros(36);
        solver.solve(&b, &mut x).unwrap();
        (x, solver.info())
    };

    let (x1, info1) = run();
    let (x2, info2) = run();
    assert_eq!(x1, x2);
    assert_eq!(info1, info2);
    assert!(info1.final_residual_norm <= 1e-4);
}

#[test]
fn partition_count_does_not_change_the_answer() {
    let a = random_diag_dominant(40, 3);
    let b = random_vector(40, 4);

    let solve_with = |partitions: usize| {
        let mut solver = create("BiCGSTAB").unwrap();
        solver.set_parameters(&json!({"partitions": partitions, "conv_tol": 1e-11}));
        solver.analyze_pattern(&a, 0).unwrap();
        let mut x = DVector::zeros(40);
        solver.solve(&b, &mut x).unwrap();
        x
    };

    assert_relative_eq!(solve_with(1), solve_with(4), epsilon = 1e-9);
}

#[test]
fn iterative_and_direct_solvers_agree() {
    let a = random_diag_dominant(40, 11);
    let b = random_vector(40, 12);

    let mut reference = DVector::zeros(40);
    let mut lu = create("DenseLU").unwrap();
    lu.analyze_pattern(&a, 0).unwrap();
    lu.factorize(&a).unwrap();
    lu.solve(&b, &mut reference).unwrap();

    for name in ["GMRES", "BiCGSTAB"] {
        let mut solver = create(name).unwrap();
        solver.set_parameters(&json!({"conv_tol": 1e-11}));
        solver.analyze_pattern(&a, 0).unwrap();
        let mut x = DVector::zeros(40);
        solver.solve(&b, &mut x).unwrap();
        assert_relative_eq!(x, reference, epsilon = 1e-8);
        assert!(relative_residual(&a, &x, &b) < 2e-11);
    }
}

#[test]
fn block_preconditioning_for_vector_unknowns() {
    let a = block_chain(10);
    let expected = random_vector(30, 5);
    let b = a.mul_vec(&expected);

    let mut chol = create("SparseCholesky").unwrap();
    chol.analyze_pattern(&a, 0).unwrap();
    chol.factorize(&a).unwrap();
    let mut reference = DVector::zeros(30);
    chol.solve(&b, &mut reference).unwrap();
    assert_relative_eq!(reference, expected, epsilon = 1e-10);

    let mut cg = IterativeSolver::cg();
    cg.set_parameters(&json!({
        "dimension": 3,
        "pre_max_iter": 2,
        "conv_tol": 1e-10,
        "partitions": 3
    }));
    cg.analyze_pattern(&a, 0).unwrap();
    let mut x = DVector::zeros(30);
    cg.solve(&b, &mut x).unwrap();

    assert_eq!(cg.config().preconditioner, PreconditionerKind::BlockJacobi);
    assert_eq!(cg.backend().preconditioner_name(), Some("block_jacobi"));
    assert!(relative_residual(&a, &x, &b) < 2e-10);
    assert_relative_eq!(x, reference, epsilon = 1e-8);
}

#[test]
fn preconditioner_can_be_switched_between_solves() {
    let a = random_diag_dominant(25, 21);
    let b = random_vector(25, 22);
    let mut solver = IterativeSolver::gmres();
    solver.analyze_pattern(&a, 0).unwrap();

    for kind in ["none", "jacobi", "block_jacobi"] {
        solver.set_parameters(&json!({"preconditioner": kind, "conv_tol": 1e-10}));
        let mut x = DVector::zeros(25);
        solver.solve(&b, &mut x).unwrap();
        assert!(relative_residual(&a, &x, &b) < 2e-10, "{kind}");
    }
    assert_eq!(solver.backend().preconditioner_name(), Some("jacobi"));
}

#[test]
fn initial_guess_is_used() {
    let a = laplacian_1d(10);
    let b = DVector::from_element(10, 1.0);
    let mut solver = IterativeSolver::cg();
    solver.set_parameters(&json!({"conv_tol": 1e-10}));
    solver.analyze_pattern(&a, 0).unwrap();

    let mut x = DVector::zeros(10);
    solver.solve(&b, &mut x).unwrap();
    assert!(solver.info().iterations > 0);

    solver.solve(&b, &mut x).unwrap();
    assert_eq!(solver.info().iterations, 0);
}

#[test]
fn unknown_parameters_are_ignored() {
    let a = laplacian_1d(6);
    let b = DVector::from_element(6, 1.0);
    let mut solver = create("GMRES").unwrap();
    solver.set_parameters(&json!({
        "conv_tol": 1e-9,
        "mtype": -2,
        "block_size": "big",
        "nested": {"a": 1}
    }));
    solver.analyze_pattern(&a, 0).unwrap();
    let mut x = DVector::zeros(6);
    solver.solve(&b, &mut x).unwrap();
    assert!(relative_residual(&a, &x, &b) < 2e-9);
}

#[test]
fn zero_rhs_gives_zero_solution() {
    let a = laplacian_1d(5);
    let mut solver = create("BiCGSTAB").unwrap();
    solver.analyze_pattern(&a, 0).unwrap();
    let mut x = DVector::from_element(5, 3.0);
    solver.solve(&DVector::zeros(5), &mut x).unwrap();
    assert_eq!(x, DVector::zeros(5));
    assert_eq!(solver.info().iterations, 0);
}

#[test]
fn rectangular_matrix_leaves_no_backend_matrix() {
    let mut solver = IterativeSolver::gmres();
    solver.analyze_pattern(&laplacian_1d(4), 0).unwrap();
    assert!(solver.has_matrix());

    let rect = linsolve::SparseMatrixView::from_triplets(3, 4, vec![0], vec![3], vec![1.0]).unwrap();
    assert!(matches!(
        solver.analyze_pattern(&rect, 0),
        Err(SolverError::Structural(_))
    ));
    assert!(!solver.has_matrix());
    let mut x = DVector::zeros(4);
    assert_eq!(
        solver.solve(&DVector::zeros(4), &mut x),
        Err(SolverError::NotAnalyzed)
    );
}

#[test]
fn huge_gmres_restart_still_solves() {
    let a = linsolve::SparseMatrixView::from_entries(3, &[(0, 0, 4.0), (1, 1, 4.0), (2, 2, 4.0)])
        .unwrap();
    let b = DVector::from_vec(vec![4.0, 8.0, 12.0]);
    let mut solver = create("GMRES").unwrap();
    solver.set_parameters(&json!({"gmres_restart": u64::MAX, "conv_tol": 1e-10}));
    solver.analyze_pattern(&a, 0).unwrap();
    let mut x = DVector::zeros(3);
    solver.solve(&b, &mut x).unwrap();
    assert_relative_eq!(x, DVector::from_vec(vec![1.0, 2.0, 3.0]), epsilon = 1e-10);
}
