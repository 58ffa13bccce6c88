//! The solver-facing problem contract.

use nalgebra::DMatrix;

use traj_types::{Simulator, StepError};

use crate::rollout::Rollout;

/// The contract an outer solver consumes.
///
/// A problem exposes a flat decision vector with bounds, a scalar
/// objective with a backpropagated gradient, and a constraint vector with
/// dense and sparse Jacobians. The solver is free to invoke these in any
/// order that respects its own state machine; a problem's lifecycle is
/// simply *constructed → repeatedly evaluated → dropped*.
///
/// All slice arguments are sized by the caller: `flat_dim()` entries for
/// variable-space vectors, `constraint_dim()` for constraint-space ones,
/// `jacobian_nnz()` for sparse values. Length mismatches are
/// programmer-contract violations and panic.
///
/// The simulator is threaded explicitly into every operation that needs
/// it; operations that mutate it restore the prior world state on all
/// exit paths.
pub trait Problem<S: Simulator> {
    /// Number of simulated timesteps.
    fn num_steps(&self) -> usize;

    /// Length of the flat decision vector.
    fn flat_dim(&self) -> usize;

    /// Length of the constraint vector.
    fn constraint_dim(&self) -> usize;

    /// Write the current decision variables into `out`.
    fn flatten(&self, out: &mut [f64]);

    /// Load decision variables from `flat`, invalidating cached unrolls.
    fn unflatten(&mut self, flat: &[f64]);

    /// The starting point handed to the solver (the current variables).
    fn initial_guess(&self, out: &mut [f64]);

    /// Per-variable lower bounds.
    fn lower_bounds(&self, world: &S, out: &mut [f64]);

    /// Per-variable upper bounds.
    fn upper_bounds(&self, world: &S, out: &mut [f64]);

    /// Per-constraint lower bounds.
    fn constraint_lower_bounds(&self, out: &mut [f64]);

    /// Per-constraint upper bounds.
    fn constraint_upper_bounds(&self, out: &mut [f64]);

    /// Evaluate the objective at the current variables.
    ///
    /// # Errors
    ///
    /// Propagates [`StepError`] from the simulator; the unroll is aborted
    /// and the world restored.
    fn compute_loss(&mut self, world: &mut S) -> Result<f64, StepError>;

    /// Evaluate the constraint vector at the current variables.
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn compute_constraints(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError>;

    /// Backpropagate the objective gradient into `out` and return the
    /// objective value.
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn backprop_gradient(&mut self, world: &mut S, out: &mut [f64]) -> Result<f64, StepError>;

    /// Assemble the dense `constraint_dim × flat_dim` Jacobian.
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn backprop_jacobian(&mut self, world: &mut S, jac: &mut DMatrix<f64>)
        -> Result<(), StepError>;

    /// Number of structurally non-zero Jacobian entries.
    fn jacobian_nnz(&self) -> usize;

    /// Emit the sparsity pattern as parallel row/column index arrays of
    /// length [`jacobian_nnz`](Problem::jacobian_nnz). The pattern is
    /// fixed for the problem's lifetime; values change per iteration.
    fn jacobian_sparsity(&self, rows: &mut [usize], cols: &mut [usize]);

    /// Write the Jacobian values in sparsity-pattern order.
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn sparse_jacobian(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError>;

    /// Allocate a rollout shaped for this problem's mapping registry.
    fn make_rollout(&self) -> Rollout;

    /// Unroll the current variables into `out` (knot-respecting form).
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn unroll(&mut self, world: &mut S, out: &mut Rollout) -> Result<(), StepError>;

    /// Reconstruct trajectory states into `out`.
    ///
    /// With `use_knots`, each segment replays from its own start state
    /// (identical to [`unroll`](Problem::unroll)). Without knots, the
    /// stored forces replay through one continuous simulation from the
    /// first start state — the trajectory the solver would see once all
    /// defects close.
    ///
    /// # Errors
    ///
    /// See [`compute_loss`](Problem::compute_loss).
    fn get_states(
        &mut self,
        world: &mut S,
        out: &mut Rollout,
        use_knots: bool,
    ) -> Result<(), StepError>;
}
