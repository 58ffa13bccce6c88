//! Forward kinematics for serial linkage chains.

use nalgebra::{DMatrix, DVector, Isometry3, Translation3, Unit, UnitQuaternion};

pub use traj_types::euler::matrix_to_euler_xyz;

use crate::model::{JointKind, LinkageModel};

/// World-frame transform of every body at configuration `q`, root first.
#[must_use]
pub fn body_transforms(model: &LinkageModel, q: &DVector<f64>) -> Vec<Isometry3<f64>> {
    assert_eq!(
        q.len(),
        model.num_dofs(),
        "configuration length {} does not match dof count {}",
        q.len(),
        model.num_dofs()
    );
    let mut current = Isometry3::identity();
    let mut out = Vec::with_capacity(model.joints.len());
    for (i, joint) in model.joints.iter().enumerate() {
        current *= Translation3::from(joint.offset);
        match joint.kind {
            JointKind::Slide => {
                current *= Translation3::from(joint.axis * q[i]);
            }
            JointKind::Hinge => {
                current *= UnitQuaternion::from_axis_angle(&Unit::new_normalize(joint.axis), q[i]);
            }
        }
        out.push(current);
    }
    out
}

/// Spatial Jacobian of body `body` at configuration `q`: the `6 × nv`
/// matrix mapping joint velocities to world-frame `[angular; linear]`
/// velocity of the body origin. Columns for joints past `body` are zero.
#[must_use]
pub fn body_jacobian(model: &LinkageModel, q: &DVector<f64>, body: usize) -> DMatrix<f64> {
    assert!(
        body < model.joints.len(),
        "body index {body} out of range ({} bodies)",
        model.joints.len()
    );
    let nv = model.num_dofs();
    let mut jac = DMatrix::zeros(6, nv);

    // Walk the chain once, recording each joint's world axis and origin at
    // the frame *before* its own motion is applied.
    let mut current = Isometry3::identity();
    let mut world_axes = Vec::with_capacity(body + 1);
    let mut origins = Vec::with_capacity(body + 1);
    for (i, joint) in model.joints.iter().enumerate().take(body + 1) {
        current *= Translation3::from(joint.offset);
        world_axes.push(current.rotation * joint.axis);
        origins.push(current.translation.vector);
        match joint.kind {
            JointKind::Slide => {
                current *= Translation3::from(joint.axis * q[i]);
            }
            JointKind::Hinge => {
                current *= UnitQuaternion::from_axis_angle(&Unit::new_normalize(joint.axis), q[i]);
            }
        }
    }
    let body_origin = current.translation.vector;

    for j in 0..=body {
        let axis = world_axes[j];
        match model.joints[j].kind {
            JointKind::Slide => {
                jac.fixed_view_mut::<3, 1>(3, j).copy_from(&axis);
            }
            JointKind::Hinge => {
                let lin = axis.cross(&(body_origin - origins[j]));
                jac.fixed_view_mut::<3, 1>(0, j).copy_from(&axis);
                jac.fixed_view_mut::<3, 1>(3, j).copy_from(&lin);
            }
        }
    }
    jac
}
