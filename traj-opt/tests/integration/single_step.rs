//! Single-step linearizations against finite differences: the six
//! velVel / forceVel / posPos / posVel / velPos / forcePos Jacobians.

use nalgebra::{dvector, DMatrix, DVector};

use traj_linkage::{LinkageModel, LinkageWorld};
use traj_types::Simulator;

use crate::support::{assert_matrix_close, ridders_derivative};

fn stacked_next_state(world: &mut LinkageWorld) -> DVector<f64> {
    let nv = world.num_dofs();
    world.step().expect("step");
    let mut out = DVector::zeros(2 * nv);
    out.rows_mut(0, nv).copy_from(&world.positions());
    out.rows_mut(nv, nv).copy_from(&world.velocities());
    out
}

/// Ridders Jacobian of one step with respect to one input vector,
/// stacked `[∂pos'; ∂vel']`.
fn fd_step_jacobian(
    world: &LinkageWorld,
    write: fn(&mut LinkageWorld, &DVector<f64>),
    nominal: &DVector<f64>,
) -> DMatrix<f64> {
    let nv = world.num_dofs();
    let mut jac = DMatrix::zeros(2 * nv, nominal.len());
    for j in 0..nominal.len() {
        let column = ridders_derivative(
            |v| {
                let mut probe = world.clone();
                let mut input = nominal.clone();
                input[j] = v;
                write(&mut probe, &input);
                stacked_next_state(&mut probe)
            },
            nominal[j],
            1e-3,
        );
        jac.column_mut(j).copy_from(&column);
    }
    jac
}

fn check_world(world: &LinkageWorld, label: &str) {
    let nv = world.num_dofs();
    let lin = world.clone().step_with_linearization().expect("linearize");

    let fd_pos = fd_step_jacobian(world, LinkageWorld::set_positions, &world.positions());
    assert_matrix_close(
        &lin.pos_pos,
        &fd_pos.view((0, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: posPos"),
    );
    assert_matrix_close(
        &lin.pos_vel,
        &fd_pos.view((nv, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: posVel"),
    );

    let fd_vel = fd_step_jacobian(world, LinkageWorld::set_velocities, &world.velocities());
    assert_matrix_close(
        &lin.vel_pos,
        &fd_vel.view((0, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: velPos"),
    );
    assert_matrix_close(
        &lin.vel_vel,
        &fd_vel.view((nv, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: velVel"),
    );

    let fd_force = fd_step_jacobian(world, LinkageWorld::set_forces, &world.forces());
    assert_matrix_close(
        &lin.force_pos,
        &fd_force.view((0, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: forcePos"),
    );
    assert_matrix_close(
        &lin.force_vel,
        &fd_force.view((nv, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: forceVel"),
    );

    let fd_mass = fd_step_jacobian(world, LinkageWorld::set_masses, &world.masses());
    assert_matrix_close(
        &lin.mass_pos,
        &fd_mass.view((0, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: massPos"),
    );
    assert_matrix_close(
        &lin.mass_vel,
        &fd_mass.view((nv, 0), (nv, nv)).clone_owned(),
        1e-8,
        &format!("{label}: massVel"),
    );
}

#[test]
fn sliding_box_single_step() {
    let model = LinkageModel::sliding_box();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.4]);
    world.set_velocities(&dvector![-0.2]);
    world.set_forces(&dvector![1.5]);
    check_world(&world, "sliding box");
}

#[test]
fn spinner_single_step() {
    let model = LinkageModel::spinner();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.26]);
    world.set_velocities(&dvector![0.1]);
    world.set_forces(&dvector![0.3]);
    check_world(&world, "spinner");
}

#[test]
fn cartpole_single_step() {
    let model = LinkageModel::cartpole();
    let mut world = model.make_world();
    world.set_positions(&dvector![0.1, 0.26]);
    world.set_velocities(&dvector![-0.3, 0.2]);
    world.set_forces(&dvector![0.8, -0.1]);
    check_world(&world, "cartpole");
}

#[test]
fn jump_worm_single_step() {
    let model = LinkageModel::jump_worm();
    let mut world = model.make_world();
    world.set_positions(&dvector![-0.02, 0.3, -0.2, 0.1, 0.25]);
    world.set_velocities(&dvector![0.1, -0.4, 0.2, 0.0, -0.1]);
    world.set_forces(&dvector![1.0, -0.5, 0.25, 0.0, 0.75]);
    check_world(&world, "jump worm");
}
