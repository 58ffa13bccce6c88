//! The consumed simulator interface and scoped world-state restoration.

use nalgebra::{DMatrix, DVector, Isometry3};

use crate::error::StepError;
use crate::linearization::StepLinearization;

/// A time-stepping rigid-body simulator, as consumed by problem builders.
///
/// The problem core drives a `Simulator` forward one tick at a time,
/// collects [`StepLinearization`]s, and reads state in and out. It never
/// reaches into the dynamics: contact resolution, constraint solving, and
/// kinematics stay behind this trait.
///
/// # State model
///
/// Positions, velocities, and forces are flat `DVector`s of [`num_dofs`]
/// entries. Mass parameters are a separate vector of [`mass_dim`] entries
/// (possibly empty). All reads are deterministic given world state.
///
/// # Bounds
///
/// Per-DOF limits back the variable bounds the outer solver sees: joint
/// limits for positions/velocities, actuation limits for forces, registered
/// parameter ranges for masses. Unbounded entries are `±∞`.
///
/// [`num_dofs`]: Simulator::num_dofs
/// [`mass_dim`]: Simulator::mass_dim
pub trait Simulator {
    /// Number of generalized coordinates.
    fn num_dofs(&self) -> usize;
    /// Number of tunable mass parameters (zero if none).
    fn mass_dim(&self) -> usize;

    /// Current generalized positions.
    fn positions(&self) -> DVector<f64>;
    /// Current generalized velocities.
    fn velocities(&self) -> DVector<f64>;
    /// Currently applied generalized forces.
    fn forces(&self) -> DVector<f64>;
    /// Current mass parameters.
    fn masses(&self) -> DVector<f64>;

    /// Overwrite generalized positions.
    fn set_positions(&mut self, positions: &DVector<f64>);
    /// Overwrite generalized velocities.
    fn set_velocities(&mut self, velocities: &DVector<f64>);
    /// Overwrite applied generalized forces.
    fn set_forces(&mut self, forces: &DVector<f64>);
    /// Overwrite mass parameters.
    fn set_masses(&mut self, masses: &DVector<f64>);

    /// Per-DOF position lower limits.
    fn position_lower_limits(&self) -> DVector<f64>;
    /// Per-DOF position upper limits.
    fn position_upper_limits(&self) -> DVector<f64>;
    /// Per-DOF velocity lower limits.
    fn velocity_lower_limits(&self) -> DVector<f64>;
    /// Per-DOF velocity upper limits.
    fn velocity_upper_limits(&self) -> DVector<f64>;
    /// Per-DOF force lower limits.
    fn force_lower_limits(&self) -> DVector<f64>;
    /// Per-DOF force upper limits.
    fn force_upper_limits(&self) -> DVector<f64>;
    /// Mass-parameter lower limits.
    fn mass_lower_limits(&self) -> DVector<f64>;
    /// Mass-parameter upper limits.
    fn mass_upper_limits(&self) -> DVector<f64>;

    /// Advance the world by one tick.
    ///
    /// # Errors
    ///
    /// Returns a [`StepError`] on numerical failure; the current unroll is
    /// aborted and the error propagates to the caller.
    fn step(&mut self) -> Result<(), StepError>;

    /// Advance the world by one tick and return the step's linearization,
    /// taken with respect to the pre-step state.
    ///
    /// # Errors
    ///
    /// Same contract as [`step`](Simulator::step).
    fn step_with_linearization(&mut self) -> Result<StepLinearization, StepError>;

    /// Number of body nodes (for kinematic views and JSON emission).
    fn num_bodies(&self) -> usize;
    /// Name of body `body`. Panics if out of range.
    fn body_name(&self, body: usize) -> &str;
    /// World-frame transform of body `body` at the current positions.
    fn body_world_transform(&self, body: usize) -> Isometry3<f64>;
    /// Spatial Jacobian of body `body`: a `6 × num_dofs` matrix mapping
    /// joint velocities to world-frame `[angular; linear]` velocity.
    fn body_world_jacobian(&self, body: usize) -> DMatrix<f64>;
    /// Name of the world (used to namespace body keys in emitted JSON).
    fn world_name(&self) -> &str;
}

/// A captured copy of the mutable world state.
///
/// Everything a problem operation may overwrite is captured: positions,
/// velocities, forces, and mass parameters. Restoring writes all four back.
#[derive(Debug, Clone)]
pub struct WorldState {
    positions: DVector<f64>,
    velocities: DVector<f64>,
    forces: DVector<f64>,
    masses: DVector<f64>,
}

impl WorldState {
    /// Capture the current state of `world`.
    #[must_use]
    pub fn capture<S: Simulator + ?Sized>(world: &S) -> Self {
        Self {
            positions: world.positions(),
            velocities: world.velocities(),
            forces: world.forces(),
            masses: world.masses(),
        }
    }

    /// Write the captured state back into `world`.
    pub fn restore<S: Simulator + ?Sized>(&self, world: &mut S) {
        world.set_positions(&self.positions);
        world.set_velocities(&self.velocities);
        world.set_forces(&self.forces);
        world.set_masses(&self.masses);
    }
}

/// Run `f` against `world` and restore the prior world state afterwards.
///
/// The restore happens on every value exit path, including early `?` returns
/// inside `f` when `R` is a `Result` — the saved state is written back before
/// the closure's value is handed to the caller. Operations that temporarily
/// mutate the world (unrolls, representation switches, state reconstruction,
/// JSON emission) go through here rather than pairing save/restore calls.
pub fn scoped<S, R>(world: &mut S, f: impl FnOnce(&mut S) -> R) -> R
where
    S: Simulator + ?Sized,
{
    let saved = WorldState::capture(world);
    let out = f(world);
    saved.restore(world);
    out
}
