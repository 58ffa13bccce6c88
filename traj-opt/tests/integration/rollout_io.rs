//! Rollout plumbing end to end: metadata flow, slicing over unrolled
//! data, and JSON emission through forward kinematics.

use nalgebra::{dvector, DMatrix};

use traj_linkage::LinkageModel;
use traj_opt::{rollout_to_json, LossFn, Problem, RolloutView, SingleShot};
use traj_types::Simulator;

#[test]
fn metadata_rides_along_into_rollouts() {
    let model = LinkageModel::sliding_box();
    let world = model.make_world();
    let mut shot = SingleShot::new(&world, LossFn::zero(), 3, false);
    shot.set_metadata("target", DMatrix::from_element(1, 3, 0.5));

    let rollout = shot.make_rollout();
    let target = RolloutView::metadata(&rollout, "target");
    assert_eq!(target.nrows(), 1);
    assert_eq!(target[(0, 2)], 0.5);
    // Unknown keys degrade to an empty zero matrix.
    assert_eq!(RolloutView::metadata(&rollout, "absent").nrows(), 0);
}

#[test]
fn slices_window_unrolled_data() {
    let model = LinkageModel::sliding_box();
    let mut world = model.make_world();
    let mut shot = SingleShot::new(&world, LossFn::zero(), 6, false);
    shot.set_forces(&DMatrix::from_fn(1, 6, |_, t| t as f64));

    let mut rollout = shot.make_rollout();
    shot.unroll(&mut world, &mut rollout).expect("unroll");

    let slice = rollout.slice_const(2, 3);
    assert_eq!(slice.steps(), 3);
    assert_eq!(
        slice.forces("identity")[(0, 0)],
        rollout.forces_matrix("identity")[(0, 2)]
    );
}

#[test]
fn json_emission_replays_forward_kinematics_and_restores_state() {
    let model = LinkageModel::sliding_box();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.7]);

    let mut shot = SingleShot::new(&world, LossFn::zero(), 3, false);
    shot.set_forces(&DMatrix::from_element(1, 3, 2.0));
    let mut rollout = shot.make_rollout();
    shot.unroll(&mut world, &mut rollout).expect("unroll");

    let before = world.positions();
    let json = rollout_to_json(&rollout, &mut world);
    assert_eq!(world.positions(), before, "world state must be restored");

    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    let body = &value["sliding_box.box"];
    for key in ["pos_x", "pos_y", "pos_z", "rot_x", "rot_y", "rot_z"] {
        assert_eq!(
            body[key].as_array().map(Vec::len),
            Some(3),
            "{key} must hold one entry per timestep"
        );
    }
    // The box slides along X: pos_x tracks the joint coordinate, the
    // rotation channels stay flat.
    for t in 0..3 {
        let emitted = body["pos_x"][t].as_f64().expect("number");
        let expected = rollout.poses_matrix("identity")[(0, t)];
        assert!((emitted - expected).abs() < 1e-12);
        assert_eq!(body["rot_y"][t].as_f64(), Some(0.0));
    }
}
