//! Euler-angle conversions consumed as pure functions.

use nalgebra::{Rotation3, Vector3};

/// Extract XYZ Euler angles from a rotation: the `(x, y, z)` such that
/// `R = Rx(x) · Ry(y) · Rz(z)`.
///
/// The middle angle is clamped into `[-π/2, π/2]`; at the gimbal-lock
/// boundary the split between `x` and `z` is the conventional one with
/// `z` absorbing the residual.
#[must_use]
pub fn matrix_to_euler_xyz(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let r = rotation.matrix();
    let y = r[(0, 2)].clamp(-1.0, 1.0).asin();
    let x = (-r[(1, 2)]).atan2(r[(2, 2)]);
    let z = (-r[(0, 1)]).atan2(r[(0, 0)]);
    Vector3::new(x, y, z)
}
