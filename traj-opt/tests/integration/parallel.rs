//! Parallel multi-shot execution must be bit-identical to serial.

use std::sync::Arc;

use nalgebra::{dvector, DVector};

use traj_linkage::{LinkageModel, LinkageWorld};
use traj_opt::{
    ConvergenceOutcome, IkMapping, MultiShot, Problem, ProjectedGradientSolver, RolloutView,
    SolverConfig,
};
use traj_types::Simulator;

fn jump_worm_problem(world: &LinkageWorld, parallel: bool) -> MultiShot<LinkageWorld> {
    let loss = crate::support::final_state_tracking_loss(0.05);
    let mut problem = MultiShot::new(world, loss, 100, 20, true);
    problem.add_mapping("ik", Arc::new(IkMapping::spatial(&[4])), world);
    problem.set_tune_masses(true);
    problem.set_parallel_operations_enabled(parallel);
    problem
}

fn probe_vector(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.1 * (i as f64 * 0.17).sin()).collect()
}

/// Property: on a fixed input, serial and parallel modes produce
/// identical bounds, gradients, sparse Jacobian values, and reconstructed
/// rollouts (threshold zero).
#[test]
fn parallel_and_serial_evaluations_are_bit_identical() {
    let model = LinkageModel::jump_worm();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.05, 0.2, -0.1, 0.15, -0.05]);

    let mut serial = jump_worm_problem(&world, false);
    let mut parallel = jump_worm_problem(&world, true);
    let n = serial.flat_dim();
    assert_eq!(n, parallel.flat_dim());
    let mut x = probe_vector(n);
    // Masses live in the last five slots; keep them physical.
    for slot in &mut x[n - 5..] {
        *slot = 0.8;
    }
    serial.unflatten(&x);
    parallel.unflatten(&x);

    let mut bounds_a = vec![0.0; n];
    let mut bounds_b = vec![0.0; n];
    serial.lower_bounds(&world, &mut bounds_a);
    parallel.lower_bounds(&world, &mut bounds_b);
    assert_eq!(bounds_a, bounds_b);
    serial.upper_bounds(&world, &mut bounds_a);
    parallel.upper_bounds(&world, &mut bounds_b);
    assert_eq!(bounds_a, bounds_b);

    let mut grad_a = vec![0.0; n];
    let mut grad_b = vec![0.0; n];
    let loss_a = serial.backprop_gradient(&mut world, &mut grad_a).expect("gradient");
    let loss_b = parallel
        .backprop_gradient(&mut world, &mut grad_b)
        .expect("gradient");
    assert_eq!(loss_a.to_bits(), loss_b.to_bits());
    assert_eq!(grad_a, grad_b);

    let m = serial.constraint_dim();
    let mut c_a = vec![0.0; m];
    let mut c_b = vec![0.0; m];
    serial.compute_constraints(&mut world, &mut c_a).expect("constraints");
    parallel
        .compute_constraints(&mut world, &mut c_b)
        .expect("constraints");
    assert_eq!(c_a, c_b);

    let nnz = serial.jacobian_nnz();
    assert_eq!(nnz, parallel.jacobian_nnz());
    let mut sparse_a = vec![0.0; nnz];
    let mut sparse_b = vec![0.0; nnz];
    serial.sparse_jacobian(&mut world, &mut sparse_a).expect("sparse");
    parallel
        .sparse_jacobian(&mut world, &mut sparse_b)
        .expect("sparse");
    assert_eq!(sparse_a, sparse_b);

    let mut rollout_a = serial.make_rollout();
    let mut rollout_b = parallel.make_rollout();
    serial.get_states(&mut world, &mut rollout_a, true).expect("states");
    parallel
        .get_states(&mut world, &mut rollout_b, true)
        .expect("states");
    for name in ["identity", "ik"] {
        assert_eq!(rollout_a.poses_matrix(name), rollout_b.poses_matrix(name));
        assert_eq!(rollout_a.vels_matrix(name), rollout_b.vels_matrix(name));
        assert_eq!(rollout_a.forces_matrix(name), rollout_b.forces_matrix(name));
    }
}

/// Parallel-jumpworm scenario: the serial and parallel optimizers walk
/// identical iteration sequences for ten-plus solver iterations.
#[test]
fn parallel_and_serial_optimizers_walk_identical_iterations() {
    let model = LinkageModel::jump_worm();
    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 12,
        tolerance: 1e-14,
        constraint_penalty: 1e3,
        initial_step: 1.0,
    });

    let run = |parallel: bool| {
        let mut world = model.make_world();
        world.set_positions(&dvector![0.05, 0.2, -0.1, 0.15, -0.05]);
        let mut problem = jump_worm_problem(&world, parallel);
        let (record, outcome) = solver.optimize(&mut problem, &mut world);
        (record, outcome)
    };

    let (record_a, outcome_a) = run(false);
    let (record_b, outcome_b) = run(true);

    assert_eq!(outcome_a, outcome_b);
    assert_ne!(outcome_a, ConvergenceOutcome::Invalid);
    assert!(record_a.len() >= 10, "need ten-plus iterations to compare");
    assert_eq!(record_a.len(), record_b.len());

    for (a, b) in record_a.steps().iter().zip(record_b.steps()) {
        assert_eq!(a.index, b.index);
        assert_eq!(a.loss.to_bits(), b.loss.to_bits());
        assert_eq!(bits(&a.x), bits(&b.x));
        assert_eq!(bits(&a.gradient), bits(&b.gradient));
        assert_eq!(bits(&a.constraints), bits(&b.constraints));
        assert_eq!(bits(&a.sparse_jacobian), bits(&b.sparse_jacobian));
        assert_eq!(
            a.rollout.poses_matrix("identity"),
            b.rollout.poses_matrix("identity")
        );
        assert_eq!(RolloutView::steps(&a.rollout), RolloutView::steps(&b.rollout));
    }
}

fn bits(v: &DVector<f64>) -> Vec<u64> {
    v.iter().map(|x| x.to_bits()).collect()
}
