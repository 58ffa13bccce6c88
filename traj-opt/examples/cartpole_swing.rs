//! Drive a cartpole toward the origin with a short multi-shot solve and
//! emit the resulting trajectory as JSON.

use nalgebra::dvector;

use traj_linkage::LinkageModel;
use traj_opt::{
    rollout_to_json, LossFn, MultiShot, Problem, ProjectedGradientSolver, RolloutView,
    SolverConfig,
};
use traj_types::Simulator;

fn main() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.0, 15.0_f64.to_radians()]);

    let loss = LossFn::new(|r: &dyn RolloutView| {
        let last = r.steps() - 1;
        let mut value = r.poses("identity").column(last).norm_squared()
            + r.vels("identity").column(last).norm_squared();
        let forces = r.forces("identity");
        for t in 0..r.steps() {
            value += 1e-3 * forces.column(t).norm_squared();
        }
        value
    });

    let mut problem = MultiShot::new(&world, loss, 40, 10, false);
    problem.set_parallel_operations_enabled(true);

    let solver = ProjectedGradientSolver::new(SolverConfig {
        iteration_limit: 60,
        ..SolverConfig::default()
    });
    let (record, outcome) = solver.optimize(&mut problem, &mut world);
    println!("finished: {outcome:?} after {} iterations", record.len());
    println!(
        "loss {:.6} → best {:.6}",
        record.steps()[0].loss,
        record.best_loss()
    );

    // The trajectory the solver would see once all defects close.
    let mut rollout = problem.make_rollout();
    problem
        .get_states(&mut world, &mut rollout, false)
        .expect("replay");
    let json = rollout_to_json(&rollout, &mut world);
    println!("rollout json: {} bytes", json.len());
}
