//! Per-step linearization of the simulation transition.

use nalgebra::DMatrix;

/// First-order linearization of one simulation step.
///
/// Given the transition `(pos_{t+1}, vel_{t+1}) = f(pos_t, vel_t, force_t, mass)`,
/// the six state matrices encode the step Jacobians in input→output naming:
/// `pos_vel` is `∂vel_{t+1}/∂pos_t`, `force_pos` is `∂pos_{t+1}/∂force_t`,
/// and so on. The two `mass_*` blocks carry the columns with respect to the
/// tunable mass parameters; they are `posDim × 0` / `velDim × 0` when the
/// world exposes none.
///
/// Problem builders treat every block as a black box: how the simulator
/// produces them (analytically, by finite differences, hybrid) is its own
/// business. The only contract is consistency with [`step`].
///
/// [`step`]: crate::Simulator::step
#[derive(Debug, Clone)]
pub struct StepLinearization {
    /// `∂pos_{t+1}/∂pos_t`, `posDim × posDim`.
    pub pos_pos: DMatrix<f64>,
    /// `∂pos_{t+1}/∂vel_t`, `posDim × velDim`.
    pub vel_pos: DMatrix<f64>,
    /// `∂pos_{t+1}/∂force_t`, `posDim × forceDim`.
    pub force_pos: DMatrix<f64>,
    /// `∂vel_{t+1}/∂pos_t`, `velDim × posDim`.
    pub pos_vel: DMatrix<f64>,
    /// `∂vel_{t+1}/∂vel_t`, `velDim × velDim`.
    pub vel_vel: DMatrix<f64>,
    /// `∂vel_{t+1}/∂force_t`, `velDim × forceDim`.
    pub force_vel: DMatrix<f64>,
    /// `∂pos_{t+1}/∂mass`, `posDim × massDim`.
    pub mass_pos: DMatrix<f64>,
    /// `∂vel_{t+1}/∂mass`, `velDim × massDim`.
    pub mass_vel: DMatrix<f64>,
}

impl StepLinearization {
    /// Allocate a zeroed linearization for the given dimensions.
    #[must_use]
    pub fn zeros(pos_dim: usize, vel_dim: usize, force_dim: usize, mass_dim: usize) -> Self {
        Self {
            pos_pos: DMatrix::zeros(pos_dim, pos_dim),
            vel_pos: DMatrix::zeros(pos_dim, vel_dim),
            force_pos: DMatrix::zeros(pos_dim, force_dim),
            pos_vel: DMatrix::zeros(vel_dim, pos_dim),
            vel_vel: DMatrix::zeros(vel_dim, vel_dim),
            force_vel: DMatrix::zeros(vel_dim, force_dim),
            mass_pos: DMatrix::zeros(pos_dim, mass_dim),
            mass_vel: DMatrix::zeros(vel_dim, mass_dim),
        }
    }

    /// Output position dimension.
    #[must_use]
    pub fn pos_dim(&self) -> usize {
        self.pos_pos.nrows()
    }

    /// Output velocity dimension.
    #[must_use]
    pub fn vel_dim(&self) -> usize {
        self.vel_vel.nrows()
    }

    /// Input force dimension.
    #[must_use]
    pub fn force_dim(&self) -> usize {
        self.force_vel.ncols()
    }

    /// Mass-parameter dimension (zero when masses are not exposed).
    #[must_use]
    pub fn mass_dim(&self) -> usize {
        self.mass_vel.ncols()
    }
}
