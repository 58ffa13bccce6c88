//! Multi-shot flattening, knot defects, sparse layout, reconstruction,
//! and the cartpole / constrained-cycle scenarios.

use nalgebra::{dvector, DMatrix, DVector};

use traj_linkage::LinkageModel;
use traj_opt::{
    ConvergenceOutcome, LossFn, MultiShot, Problem, ProjectedGradientSolver, RolloutView,
    SolverConfig,
};
use traj_types::Simulator;

use crate::support::{
    assert_matrix_close, assert_vector_close, final_state_tracking_loss,
    ridders_constraints_jacobian, ridders_loss_gradient,
};

/// A deterministic, mildly structured flat vector.
fn probe_vector(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.21 * (i as f64 * 0.37).sin()).collect()
}

#[test]
fn flatten_unflatten_round_trips_bitwise() {
    let model = LinkageModel::cartpole();
    let world = model.make_world();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 10, 4, true);
    problem.set_tune_masses(true);

    let n = problem.flat_dim();
    let x = probe_vector(n);
    problem.unflatten(&x);
    let mut y = vec![0.0; n];
    problem.flatten(&mut y);
    assert_eq!(x, y, "flatten(unflatten(x)) must round-trip bitwise");
}

#[test]
fn shot_sizing_uses_remainder_last() {
    let model = LinkageModel::cartpole();
    let world = model.make_world();
    let problem = MultiShot::new(&world, LossFn::zero(), 10, 4, false);
    assert_eq!(problem.num_shots(), 3);
    assert_eq!(problem.num_steps(), 10);
    // 2 knot pairs, each posDim + velDim = 4 rows.
    assert_eq!(problem.constraint_dim(), 8);
}

/// Property: replicating a shot's predicted final state into the next
/// shot's start state zeroes the defect exactly.
#[test]
fn defect_is_zero_at_matched_knots() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 8, 4, false);

    let n = problem.flat_dim();
    let m = problem.constraint_dim();
    // Layout: shot 0 has 2×4 force entries, shot 1 starts at 8 with its
    // 4-entry start state.
    let mut x = probe_vector(n);
    problem.unflatten(&x);
    let mut rollout = problem.make_rollout();
    problem.unroll(&mut world, &mut rollout).expect("unroll");

    // Copy shot 0's predicted end state (column 3) into shot 1's start.
    x[8] = rollout.poses_matrix("identity")[(0, 3)];
    x[9] = rollout.poses_matrix("identity")[(1, 3)];
    x[10] = rollout.vels_matrix("identity")[(0, 3)];
    x[11] = rollout.vels_matrix("identity")[(1, 3)];
    problem.unflatten(&x);
    let mut closed = vec![0.0; m];
    problem
        .compute_constraints(&mut world, &mut closed)
        .expect("constraints");
    for (i, d) in closed.iter().enumerate() {
        assert_eq!(*d, 0.0, "defect row {i} must close exactly");
    }
}

/// Property: scattering the sparse Jacobian values into the declared
/// pattern reconstructs the dense Jacobian with threshold zero.
#[test]
fn sparse_jacobian_equals_dense() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 12, 4, false);
    problem.set_tune_masses(true);
    problem.add_constraint(
        LossFn::new(|r: &dyn RolloutView| {
            let p = r.poses("identity");
            (p[(0, 0)] - p[(0, r.steps() - 1)]).powi(2)
        })
        .with_bounds(0.0, 0.0),
    );

    let n = problem.flat_dim();
    let m = problem.constraint_dim();
    problem.unflatten(&probe_vector(n));

    let mut dense = DMatrix::zeros(m, n);
    problem
        .backprop_jacobian(&mut world, &mut dense)
        .expect("dense jacobian");

    let nnz = problem.jacobian_nnz();
    let mut rows = vec![0_usize; nnz];
    let mut cols = vec![0_usize; nnz];
    problem.jacobian_sparsity(&mut rows, &mut cols);
    let mut values = vec![0.0; nnz];
    problem
        .sparse_jacobian(&mut world, &mut values)
        .expect("sparse jacobian");

    let mut scattered = DMatrix::zeros(m, n);
    for k in 0..nnz {
        assert!(rows[k] < m && cols[k] < n, "sparsity index out of range");
        scattered[(rows[k], cols[k])] = values[k];
    }
    assert_eq!(dense, scattered, "sparse scatter must equal dense exactly");
}

#[test]
fn jacobian_matches_finite_differences_sliding_box_8x2() {
    let model = LinkageModel::sliding_box();
    let mut world = model.make_world();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 16, 2, false);
    let n = problem.flat_dim();
    let x = probe_vector(n);
    problem.unflatten(&x);

    let m = problem.constraint_dim();
    let mut dense = DMatrix::zeros(m, n);
    problem
        .backprop_jacobian(&mut world, &mut dense)
        .expect("dense jacobian");
    let fd = ridders_constraints_jacobian(&mut problem, &mut world, &x, 1e-3);
    assert_matrix_close(&dense, &fd, 1e-8, "8×2 multi-shot jacobian");
}

/// Knot-defect rows carry correct mass columns when mass tuning is on.
#[test]
fn jacobian_matches_finite_differences_with_mass_tuning() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 12, 4, false);
    problem.set_tune_masses(true);

    let n = problem.flat_dim();
    let mut x = probe_vector(n);
    // Keep the mass entries near their defaults and strictly positive.
    x[n - 2] = 1.1;
    x[n - 1] = 0.6;
    problem.unflatten(&x);

    let m = problem.constraint_dim();
    let mut dense = DMatrix::zeros(m, n);
    problem
        .backprop_jacobian(&mut world, &mut dense)
        .expect("dense jacobian");
    let fd = ridders_constraints_jacobian(&mut problem, &mut world, &x, 1e-3);
    assert_matrix_close(&dense, &fd, 1e-8, "mass-tuned multi-shot jacobian");
}

/// Cartpole scenario: multi-shot gradient against finite differences on
/// `‖p_T‖² + ‖v_T‖² + Σ‖u_t‖²`.
#[test]
fn cartpole_gradient_matches_finite_differences() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.0, 15.0_f64.to_radians()]);

    let mut problem = MultiShot::new(&world, final_state_tracking_loss(1.0), 20, 10, false);
    let n = problem.flat_dim();
    let x = probe_vector(n);
    problem.unflatten(&x);

    let mut analytic = vec![0.0; n];
    problem
        .backprop_gradient(&mut world, &mut analytic)
        .expect("gradient");
    let fd = ridders_loss_gradient(&mut problem, &mut world, &x, 1e-3);
    assert_vector_close(
        &DVector::from_column_slice(&analytic),
        &fd,
        2e-8,
        "cartpole multi-shot gradient",
    );
}

/// State reconstruction with and without knots on mismatched knot states.
#[test]
fn state_reconstruction_matches_manual_replay() {
    let model = LinkageModel::jump_worm();
    let mut world = model.make_world();
    let nv = world.num_dofs();
    let mut problem = MultiShot::new(&world, LossFn::zero(), 12, 3, true);

    let n = problem.flat_dim();
    let x = probe_vector(n);
    problem.unflatten(&x);

    // With knots: every segment replays from its own (deliberately
    // mismatched) start state.
    let mut with_knots = problem.make_rollout();
    problem
        .get_states(&mut world, &mut with_knots, true)
        .expect("with knots");

    let shot_dims = nv * 2 + nv * 3; // start state + 3 force columns
    let mut cursor = 0;
    let mut manual_col = 0;
    let mut expected = DMatrix::zeros(nv, 12);
    for _ in 0..4 {
        let mut probe = world.clone();
        probe.set_positions(&DVector::from_column_slice(&x[cursor..cursor + nv]));
        probe.set_velocities(&DVector::from_column_slice(&x[cursor + nv..cursor + 2 * nv]));
        for t in 0..3 {
            let offset = cursor + 2 * nv + t * nv;
            probe.set_forces(&DVector::from_column_slice(&x[offset..offset + nv]));
            probe.step().expect("step");
            expected.column_mut(manual_col).copy_from(&probe.positions());
            manual_col += 1;
        }
        cursor += shot_dims;
    }
    assert_eq!(
        with_knots.poses_matrix("identity"),
        &expected,
        "with-knot reconstruction must equal per-segment replay exactly"
    );

    // Without knots: one continuous simulation from the first start state.
    let mut without_knots = problem.make_rollout();
    problem
        .get_states(&mut world, &mut without_knots, false)
        .expect("without knots");

    let mut probe = world.clone();
    probe.set_positions(&DVector::from_column_slice(&x[0..nv]));
    probe.set_velocities(&DVector::from_column_slice(&x[nv..2 * nv]));
    let mut expected = DMatrix::zeros(nv, 12);
    let mut manual_col = 0;
    let mut cursor = 0;
    for _ in 0..4 {
        for t in 0..3 {
            let offset = cursor + 2 * nv + t * nv;
            probe.set_forces(&DVector::from_column_slice(&x[offset..offset + nv]));
            probe.step().expect("step");
            expected.column_mut(manual_col).copy_from(&probe.positions());
            manual_col += 1;
        }
        cursor += shot_dims;
    }
    assert_eq!(
        without_knots.poses_matrix("identity"),
        &expected,
        "without-knot reconstruction must equal one continuous replay exactly"
    );
}

/// Constrained-cycle scenario: a pendulum forced toward a mid-trajectory
/// target while the first and last poses are constrained to match.
#[test]
fn constrained_cycle_reduces_objective_and_defect() {
    let model = LinkageModel::spinner();
    let mut world = model.make_world();
    world.set_positions(&dvector![15.0_f64.to_radians()]);

    let objective = LossFn::new(|r: &dyn RolloutView| {
        let p = r.poses("identity");
        (p[(0, r.steps() / 2)] - 0.1).powi(2)
    });
    let cycle = LossFn::new(|r: &dyn RolloutView| {
        let p = r.poses("identity");
        (p[(0, 0)] - p[(0, r.steps() - 1)]).powi(2)
    })
    .with_bounds(0.0, 0.0);

    let mut problem = MultiShot::new(&world, objective, 12, 3, true);
    problem.add_constraint(cycle);

    // A forced initial guess so the cycle starts visibly open.
    let n = problem.flat_dim();
    let mut x = vec![0.0; n];
    problem.flatten(&mut x);
    let shot_dims = 2 + 3; // 1-DOF: start state + 3 forces
    for s in 0..4 {
        for t in 0..3 {
            x[s * shot_dims + 2 + t] = 0.4;
        }
    }
    problem.unflatten(&x);

    // The Jacobian is trustworthy at this point.
    let m = problem.constraint_dim();
    let mut dense = DMatrix::zeros(m, n);
    problem
        .backprop_jacobian(&mut world, &mut dense)
        .expect("dense jacobian");
    let fd = ridders_constraints_jacobian(&mut problem, &mut world, &x, 1e-3);
    assert_matrix_close(&dense, &fd, 1e-8, "constrained-cycle jacobian");

    problem.unflatten(&x);
    let initial_loss = problem.compute_loss(&mut world).expect("loss");
    let mut constraints = vec![0.0; m];
    problem
        .compute_constraints(&mut world, &mut constraints)
        .expect("constraints");
    let initial_cycle = constraints[0];
    assert!(initial_cycle > 0.0, "the cycle must start open");

    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 3000,
        tolerance: 1e-12,
        constraint_penalty: 1e6,
        initial_step: 1.0,
    });
    let (record, outcome) = solver.optimize(&mut problem, &mut world);
    assert_ne!(outcome, ConvergenceOutcome::Invalid);
    assert!(!record.is_empty());

    let final_loss = problem.compute_loss(&mut world).expect("loss");
    problem
        .compute_constraints(&mut world, &mut constraints)
        .expect("constraints");
    let final_cycle = constraints[0];
    assert!(
        final_loss < initial_loss,
        "objective must drop: {initial_loss:.6e} → {final_loss:.6e}"
    );
    assert!(
        final_cycle.abs() < initial_cycle.abs(),
        "cycle defect must shrink: {initial_cycle:.6e} → {final_cycle:.6e}"
    );
}
