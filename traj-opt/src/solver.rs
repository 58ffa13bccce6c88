//! A deterministic reference solver over the [`Problem`] contract.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use traj_types::Simulator;

use crate::problem::Problem;
use crate::record::OptimizationRecord;

/// How a solve ended. These are normal outcomes, not errors — including
/// `Invalid`, which reports that the problem could not be evaluated
/// (typically a simulator step failure mid-unroll).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceOutcome {
    /// The projected-gradient step dropped below the tolerance, or no
    /// descent direction remained.
    TolerancesReached,
    /// The iteration limit was exhausted first.
    IterationLimit,
    /// The problem has no decision variables.
    StaticProblem,
    /// The problem could not be evaluated.
    Invalid,
}

/// Reference-solver settings, validated by assertion when a drive starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of iterations per drive.
    pub iteration_limit: usize,
    /// Convergence threshold on the ∞-norm of the projected gradient step.
    pub tolerance: f64,
    /// Quadratic-penalty weight on constraint-bound violations.
    pub constraint_penalty: f64,
    /// Initial line-search step size.
    pub initial_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iteration_limit: 500,
            tolerance: 1e-9,
            constraint_penalty: 1e3,
            initial_step: 1.0,
        }
    }
}

/// A projected-gradient solver with a quadratic-penalty merit function and
/// Armijo backtracking.
///
/// This is the in-tree reference driver: it exercises the full [`Problem`]
/// contract (bounds, gradient, constraints, sparse Jacobian, rollout
/// snapshots) the way an interior-point solver would, records every
/// iteration, and is fully deterministic — on a fixed problem, serial and
/// parallel multi-shot evaluation produce identical iteration sequences.
/// It makes no convergence guarantees beyond monotone merit descent.
#[derive(Debug, Clone, Default)]
pub struct ProjectedGradientSolver {
    config: SolverConfig,
}

impl ProjectedGradientSolver {
    /// A solver with the given configuration.
    #[must_use]
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Solve `problem` against `world`, returning the iteration record and
    /// the outcome.
    pub fn optimize<S: Simulator, P: Problem<S>>(
        &self,
        problem: &mut P,
        world: &mut S,
    ) -> (OptimizationRecord, ConvergenceOutcome) {
        let mut record = OptimizationRecord::new();
        let outcome = self.drive(&mut record, problem, world);
        (record, outcome)
    }

    /// Drive the solver, appending iterations to an existing record.
    pub(crate) fn drive<S: Simulator, P: Problem<S>>(
        &self,
        record: &mut OptimizationRecord,
        problem: &mut P,
        world: &mut S,
    ) -> ConvergenceOutcome {
        let config = &self.config;
        assert!(
            config.tolerance > 0.0 && config.tolerance.is_finite(),
            "SolverConfig::tolerance must be positive and finite, got {}",
            config.tolerance
        );
        assert!(
            config.initial_step > 0.0 && config.initial_step.is_finite(),
            "SolverConfig::initial_step must be positive and finite, got {}",
            config.initial_step
        );
        assert!(
            config.constraint_penalty >= 0.0,
            "SolverConfig::constraint_penalty must be non-negative, got {}",
            config.constraint_penalty
        );

        let n = problem.flat_dim();
        if n == 0 {
            return ConvergenceOutcome::StaticProblem;
        }
        let m = problem.constraint_dim();

        let mut x = vec![0.0; n];
        problem.initial_guess(&mut x);
        let mut lower = vec![0.0; n];
        let mut upper = vec![0.0; n];
        problem.lower_bounds(world, &mut lower);
        problem.upper_bounds(world, &mut upper);
        for i in 0..n {
            x[i] = x[i].clamp(lower[i], upper[i]);
        }
        let mut c_lower = vec![0.0; m];
        let mut c_upper = vec![0.0; m];
        problem.constraint_lower_bounds(&mut c_lower);
        problem.constraint_upper_bounds(&mut c_upper);

        let mut jacobian = DMatrix::zeros(m, n);
        let mut gradient = vec![0.0; n];
        let mut constraints = vec![0.0; m];
        let mut step = config.initial_step;

        for iteration in 0..config.iteration_limit {
            problem.unflatten(&x);
            let loss = match problem.backprop_gradient(world, &mut gradient) {
                Ok(loss) => loss,
                Err(_) => return ConvergenceOutcome::Invalid,
            };
            if problem.compute_constraints(world, &mut constraints).is_err() {
                return ConvergenceOutcome::Invalid;
            }
            let mut sparse = vec![0.0; problem.jacobian_nnz()];
            if problem.sparse_jacobian(world, &mut sparse).is_err() {
                return ConvergenceOutcome::Invalid;
            }
            let mut rollout = problem.make_rollout();
            if problem.unroll(world, &mut rollout).is_err() {
                return ConvergenceOutcome::Invalid;
            }
            record.register_step(
                iteration,
                DVector::from_column_slice(&x),
                loss,
                DVector::from_column_slice(&gradient),
                DVector::from_column_slice(&constraints),
                DVector::from_column_slice(&sparse),
                rollout,
            );
            if problem.backprop_jacobian(world, &mut jacobian).is_err() {
                return ConvergenceOutcome::Invalid;
            }

            // Quadratic-penalty merit and its gradient.
            let violation: Vec<f64> = constraints
                .iter()
                .zip(c_lower.iter().zip(&c_upper))
                .map(|(&c, (&lo, &hi))| c - c.clamp(lo, hi))
                .collect();
            let merit = loss
                + config.constraint_penalty * violation.iter().map(|v| v * v).sum::<f64>();
            let mut merit_grad = gradient.clone();
            for (r, &v) in violation.iter().enumerate() {
                if v != 0.0 {
                    for (col, slot) in merit_grad.iter_mut().enumerate() {
                        *slot += 2.0 * config.constraint_penalty * v * jacobian[(r, col)];
                    }
                }
            }

            // Convergence: the projected unit gradient step collapsed.
            let projected_step = (0..n)
                .map(|i| ((x[i] - merit_grad[i]).clamp(lower[i], upper[i]) - x[i]).abs())
                .fold(0.0_f64, f64::max);
            if projected_step < config.tolerance {
                return ConvergenceOutcome::TolerancesReached;
            }

            // Armijo backtracking with step growth on success.
            let mut trial = vec![0.0; n];
            let mut accepted = false;
            while step >= 1e-16 {
                for i in 0..n {
                    trial[i] = (x[i] - step * merit_grad[i]).clamp(lower[i], upper[i]);
                }
                let trial_merit = match Self::merit_at(
                    problem,
                    world,
                    &trial,
                    &c_lower,
                    &c_upper,
                    config.constraint_penalty,
                ) {
                    Some(value) => value,
                    None => return ConvergenceOutcome::Invalid,
                };
                if trial_merit < merit {
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                // No descent direction survives projection; leave the
                // problem loaded with the incumbent point.
                problem.unflatten(&x);
                return ConvergenceOutcome::TolerancesReached;
            }
            x.copy_from_slice(&trial);
            step = (step * 2.0).min(config.initial_step * 1e6);
        }
        ConvergenceOutcome::IterationLimit
    }

    fn merit_at<S: Simulator, P: Problem<S>>(
        problem: &mut P,
        world: &mut S,
        x: &[f64],
        c_lower: &[f64],
        c_upper: &[f64],
        penalty: f64,
    ) -> Option<f64> {
        problem.unflatten(x);
        let loss = problem.compute_loss(world).ok()?;
        let mut constraints = vec![0.0; c_lower.len()];
        problem.compute_constraints(world, &mut constraints).ok()?;
        let violation_sq: f64 = constraints
            .iter()
            .zip(c_lower.iter().zip(c_upper))
            .map(|(&c, (&lo, &hi))| {
                let v = c - c.clamp(lo, hi);
                v * v
            })
            .sum();
        Some(loss + penalty * violation_sq)
    }
}
