//! Named views over the simulator state.

use nalgebra::{DMatrix, DVector};

use crate::simulator::Simulator;

/// A named, invertible view over the simulator's state.
///
/// A mapping reads positions, velocities, and forces out of a world into its
/// own coordinate space and writes them back. Dimensions are fixed for the
/// lifetime of a problem (they are recorded once when the mapping is
/// registered), and reads are deterministic given world state.
///
/// The read Jacobians conjugate per-step linearizations into mapped space
/// when a non-identity mapping is used as the problem's representation.
/// Writes are the (pseudo-)inverse direction; a mapping with lower intrinsic
/// dimension than the world loses information and is not guaranteed to
/// round-trip.
pub trait Mapping<S: Simulator>: Send + Sync {
    /// Dimension of mapped positions.
    fn pos_dim(&self, world: &S) -> usize;
    /// Dimension of mapped velocities.
    fn vel_dim(&self, world: &S) -> usize;
    /// Dimension of mapped forces.
    fn force_dim(&self, world: &S) -> usize;

    /// Read the world's positions in mapped coordinates.
    fn read_positions(&self, world: &S) -> DVector<f64>;
    /// Read the world's velocities in mapped coordinates.
    fn read_velocities(&self, world: &S) -> DVector<f64>;
    /// Read the world's applied forces in mapped coordinates.
    fn read_forces(&self, world: &S) -> DVector<f64>;

    /// Write mapped positions into the world.
    fn write_positions(&self, world: &mut S, positions: &DVector<f64>);
    /// Write mapped velocities into the world.
    fn write_velocities(&self, world: &mut S, velocities: &DVector<f64>);
    /// Write mapped forces into the world.
    fn write_forces(&self, world: &mut S, forces: &DVector<f64>);

    /// Lower bounds on mapped positions.
    fn position_lower_limits(&self, world: &S) -> DVector<f64>;
    /// Upper bounds on mapped positions.
    fn position_upper_limits(&self, world: &S) -> DVector<f64>;
    /// Lower bounds on mapped velocities.
    fn velocity_lower_limits(&self, world: &S) -> DVector<f64>;
    /// Upper bounds on mapped velocities.
    fn velocity_upper_limits(&self, world: &S) -> DVector<f64>;
    /// Lower bounds on mapped forces.
    fn force_lower_limits(&self, world: &S) -> DVector<f64>;
    /// Upper bounds on mapped forces.
    fn force_upper_limits(&self, world: &S) -> DVector<f64>;

    /// `∂(mapped positions)/∂(world positions)`, `posDim × num_dofs`,
    /// evaluated at the world's current state.
    fn jacobian_wrt_positions(&self, world: &S) -> DMatrix<f64>;
    /// `∂(mapped velocities)/∂(world velocities)`, `velDim × num_dofs`.
    fn jacobian_wrt_velocities(&self, world: &S) -> DMatrix<f64>;
    /// `∂(mapped forces)/∂(world forces)`, `forceDim × num_dofs`.
    fn jacobian_wrt_forces(&self, world: &S) -> DMatrix<f64>;

    /// Whether this mapping is the raw joint-space identity. Identity
    /// representations skip linearization conjugation entirely.
    fn is_identity(&self) -> bool {
        false
    }
}

/// The raw joint-space view: mapped coordinates are the world's own
/// generalized positions, velocities, and forces.
///
/// Every problem registers this under the name `"identity"` and uses it as
/// the default representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapping;

impl IdentityMapping {
    /// Create the identity mapping.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S: Simulator> Mapping<S> for IdentityMapping {
    fn pos_dim(&self, world: &S) -> usize {
        world.num_dofs()
    }

    fn vel_dim(&self, world: &S) -> usize {
        world.num_dofs()
    }

    fn force_dim(&self, world: &S) -> usize {
        world.num_dofs()
    }

    fn read_positions(&self, world: &S) -> DVector<f64> {
        world.positions()
    }

    fn read_velocities(&self, world: &S) -> DVector<f64> {
        world.velocities()
    }

    fn read_forces(&self, world: &S) -> DVector<f64> {
        world.forces()
    }

    fn write_positions(&self, world: &mut S, positions: &DVector<f64>) {
        world.set_positions(positions);
    }

    fn write_velocities(&self, world: &mut S, velocities: &DVector<f64>) {
        world.set_velocities(velocities);
    }

    fn write_forces(&self, world: &mut S, forces: &DVector<f64>) {
        world.set_forces(forces);
    }

    fn position_lower_limits(&self, world: &S) -> DVector<f64> {
        world.position_lower_limits()
    }

    fn position_upper_limits(&self, world: &S) -> DVector<f64> {
        world.position_upper_limits()
    }

    fn velocity_lower_limits(&self, world: &S) -> DVector<f64> {
        world.velocity_lower_limits()
    }

    fn velocity_upper_limits(&self, world: &S) -> DVector<f64> {
        world.velocity_upper_limits()
    }

    fn force_lower_limits(&self, world: &S) -> DVector<f64> {
        world.force_lower_limits()
    }

    fn force_upper_limits(&self, world: &S) -> DVector<f64> {
        world.force_upper_limits()
    }

    fn jacobian_wrt_positions(&self, world: &S) -> DMatrix<f64> {
        DMatrix::identity(world.num_dofs(), world.num_dofs())
    }

    fn jacobian_wrt_velocities(&self, world: &S) -> DMatrix<f64> {
        DMatrix::identity(world.num_dofs(), world.num_dofs())
    }

    fn jacobian_wrt_forces(&self, world: &S) -> DMatrix<f64> {
        DMatrix::identity(world.num_dofs(), world.num_dofs())
    }

    fn is_identity(&self) -> bool {
        true
    }
}
