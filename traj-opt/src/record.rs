//! Per-iteration optimization history.

use nalgebra::DVector;

use traj_types::Simulator;

use crate::problem::Problem;
use crate::rollout::Rollout;
use crate::solver::{ConvergenceOutcome, ProjectedGradientSolver};

/// One recorded solver iteration.
#[derive(Debug, Clone)]
pub struct OptimizationStep {
    /// Iteration index within the drive that produced this step.
    pub index: usize,
    /// The flat decision vector at this iteration.
    pub x: DVector<f64>,
    /// Objective value.
    pub loss: f64,
    /// Backpropagated objective gradient.
    pub gradient: DVector<f64>,
    /// Constraint values.
    pub constraints: DVector<f64>,
    /// Sparse Jacobian values in sparsity-pattern order.
    pub sparse_jacobian: DVector<f64>,
    /// Deep-copied rollout snapshot for post-hoc inspection.
    pub rollout: Rollout,
}

/// Append-only record of solver iterations plus the running best point.
///
/// The solver driver registers a step each time it announces a new
/// iteration; the record is retained after the solve so trajectories,
/// gradients, and Jacobians can be inspected afterwards. It also supports
/// re-entrant optimization: [`reoptimize`](OptimizationRecord::reoptimize)
/// resumes the solver from the stored best point with a fresh iteration
/// index, appending to the same history.
#[derive(Debug)]
pub struct OptimizationRecord {
    steps: Vec<OptimizationStep>,
    best_x: Option<DVector<f64>>,
    best_loss: f64,
}

impl Default for OptimizationRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationRecord {
    /// An empty record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            best_x: None,
            best_loss: f64::INFINITY,
        }
    }

    /// Append an iteration snapshot, updating the running best.
    #[allow(clippy::too_many_arguments)]
    pub fn register_step(
        &mut self,
        index: usize,
        x: DVector<f64>,
        loss: f64,
        gradient: DVector<f64>,
        constraints: DVector<f64>,
        sparse_jacobian: DVector<f64>,
        rollout: Rollout,
    ) {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_x = Some(x.clone());
        }
        self.steps.push(OptimizationStep {
            index,
            x,
            loss,
            gradient,
            constraints,
            sparse_jacobian,
            rollout,
        });
    }

    /// All recorded iterations, oldest first.
    #[must_use]
    pub fn steps(&self) -> &[OptimizationStep] {
        &self.steps
    }

    /// Number of recorded iterations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The best decision vector seen so far, if any iteration ran.
    #[must_use]
    pub fn best_x(&self) -> Option<&DVector<f64>> {
        self.best_x.as_ref()
    }

    /// The best objective value seen so far.
    #[must_use]
    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// Load the stored best point into `problem` and re-drive the solver,
    /// appending iterations (indexed from zero again) to this record.
    pub fn reoptimize<S: Simulator, P: Problem<S>>(
        &mut self,
        solver: &ProjectedGradientSolver,
        problem: &mut P,
        world: &mut S,
    ) -> ConvergenceOutcome {
        if let Some(best) = &self.best_x {
            problem.unflatten(best.as_slice());
        }
        solver.drive(self, problem, world)
    }
}
