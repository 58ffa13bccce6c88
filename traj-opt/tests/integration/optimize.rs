//! End-to-end optimization: mass recovery and re-entrant records.

use nalgebra::{dvector, DMatrix};

use traj_linkage::LinkageModel;
use traj_opt::{
    ConvergenceOutcome, LossFn, Problem, ProjectedGradientSolver, RolloutView, SingleShot,
    SolverConfig,
};
use traj_types::{scoped, Simulator};

/// Mass-recovery scenario: a 1-DOF translational body driven by a pinned
/// force trajectory; target poses come from a ground-truth mass of 2.5,
/// and the optimizer recovers it through the mass-tuning block alone.
#[test]
fn optimizer_recovers_ground_truth_mass() {
    let model = LinkageModel::sliding_box();
    let mut world = model.make_world();
    let steps = 12;
    let forces = DMatrix::from_fn(1, steps, |_, t| 5.0 * (t as f64 * 0.7).sin() + 2.0);

    // Generate targets with the true mass, then forget it.
    let targets: DMatrix<f64> = scoped(&mut world, |w| {
        w.set_masses(&dvector![2.5]);
        let mut out = DMatrix::zeros(1, steps);
        for t in 0..steps {
            w.set_forces(&forces.column(t).clone_owned());
            w.step().expect("step");
            out[(0, t)] = w.positions()[0];
        }
        out
    });

    let tracking = {
        let targets = targets.clone();
        LossFn::new(move |r: &dyn RolloutView| {
            let p = r.poses("identity");
            (0..r.steps())
                .map(|t| (p[(0, t)] - targets[(0, t)]).powi(2))
                .sum()
        })
    };
    let targets_for_grad = targets.clone();
    let tracking = tracking.with_gradient(move |r, g| {
        let p = r.poses("identity").clone_owned();
        let mut value = 0.0;
        for t in 0..p.ncols() {
            let diff = p[(0, t)] - targets_for_grad[(0, t)];
            value += diff * diff;
            g.poses_mut("identity")[(0, t)] = 2.0 * diff;
        }
        value
    });

    // The world sits at the default mass (1.0) — that is the initial guess.
    let mut shot = SingleShot::new(&world, tracking, steps, false);
    shot.set_forces(&forces);
    shot.set_force_bounds(forces.clone(), forces.clone());
    shot.set_tune_masses(true);

    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 20_000,
        tolerance: 1e-13,
        constraint_penalty: 0.0,
        initial_step: 1.0,
    });
    let (record, outcome) = solver.optimize(&mut shot, &mut world);
    assert_ne!(outcome, ConvergenceOutcome::Invalid);
    assert!(!record.is_empty());

    let n = shot.flat_dim();
    let mut x = vec![0.0; n];
    shot.flatten(&mut x);
    let recovered = x[n - 1];
    assert!(
        (recovered - 2.5).abs() < 1e-7,
        "recovered mass {recovered:.10} should match 2.5"
    );
    // The pinned forces never moved.
    for t in 0..steps {
        assert_eq!(x[t], forces[(0, t)]);
    }
}

#[test]
fn record_supports_reentrant_optimization() {
    let model = LinkageModel::spinner();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.26]);

    let loss = crate::support::final_state_tracking_loss(0.1);
    let mut shot = SingleShot::new(&world, loss, 10, true);

    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 40,
        tolerance: 1e-14,
        constraint_penalty: 0.0,
        initial_step: 1.0,
    });
    let (mut record, outcome) = solver.optimize(&mut shot, &mut world);
    assert_ne!(outcome, ConvergenceOutcome::Invalid);
    let first_pass = record.len();
    assert!(first_pass > 0);
    assert_eq!(record.steps()[0].index, 0);
    let best_after_first = record.best_loss();
    assert!(best_after_first.is_finite());

    let outcome = record.reoptimize(&solver, &mut shot, &mut world);
    assert_ne!(outcome, ConvergenceOutcome::Invalid);
    assert!(record.len() > first_pass, "reoptimize must append steps");
    // The iteration index restarts while the history keeps growing.
    assert_eq!(record.steps()[first_pass].index, 0);
    assert!(record.best_loss() <= best_after_first);

    // Every recorded step carries a full snapshot.
    let step = &record.steps()[record.len() - 1];
    assert_eq!(step.x.len(), shot.flat_dim());
    assert_eq!(RolloutView::steps(&step.rollout), 10);
}

#[test]
fn iteration_limit_is_reported() {
    let model = LinkageModel::spinner();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.26]);
    let mut shot = SingleShot::new(&world, crate::support::final_state_tracking_loss(0.1), 6, true);

    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 3,
        tolerance: 1e-16,
        constraint_penalty: 0.0,
        initial_step: 1.0,
    });
    let (record, outcome) = solver.optimize(&mut shot, &mut world);
    assert_eq!(outcome, ConvergenceOutcome::IterationLimit);
    assert_eq!(record.len(), 3);
}
