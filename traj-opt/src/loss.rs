//! Value + gradient loss wrappers over rollouts.

use std::sync::Arc;

use crate::rollout::{Rollout, RolloutView};

/// Finite-difference step for pose and velocity entries when no analytic
/// gradient is supplied.
const FD_EPS: f64 = 1e-7;

type EvalFn = dyn Fn(&dyn RolloutView) -> f64 + Send + Sync;
type GradFn = dyn Fn(&dyn RolloutView, &mut Rollout) -> f64 + Send + Sync;

/// A scalar function of a rollout, optionally with an analytic gradient.
///
/// The gradient callable receives the evaluated rollout and a zeroed
/// gradient rollout of the same shape; it writes per-timestep gradients
/// into the representation mapping's matrices (and the mass vector) and
/// returns the loss value. When no analytic gradient is present, the
/// wrapper falls back to centered finite differences over the rollout's
/// representation entries: step `1e-7` for poses and velocities, scaled by
/// magnitude for forces and masses.
///
/// When used as a constraint the `[lower_bound, upper_bound]` range
/// defines the feasible interval of the scalar output; the default is the
/// equality range `[0, 0]`.
#[derive(Clone)]
pub struct LossFn {
    eval: Arc<EvalFn>,
    gradient: Option<Arc<GradFn>>,
    lower_bound: f64,
    upper_bound: f64,
}

impl std::fmt::Debug for LossFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LossFn")
            .field("analytic_gradient", &self.gradient.is_some())
            .field("bounds", &(self.lower_bound, self.upper_bound))
            .finish()
    }
}

impl LossFn {
    /// Wrap a value callable. The gradient falls back to finite
    /// differences until [`with_gradient`](Self::with_gradient) is called.
    pub fn new(eval: impl Fn(&dyn RolloutView) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            eval: Arc::new(eval),
            gradient: None,
            lower_bound: 0.0,
            upper_bound: 0.0,
        }
    }

    /// The constant-zero loss, used for sub-shots inside a multi-shot.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(|_| 0.0)
    }

    /// Attach an analytic gradient callable.
    #[must_use]
    pub fn with_gradient(
        mut self,
        gradient: impl Fn(&dyn RolloutView, &mut Rollout) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.gradient = Some(Arc::new(gradient));
        self
    }

    /// Set the feasible range for constraint use.
    #[must_use]
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        assert!(lower <= upper, "loss bounds inverted: [{lower}, {upper}]");
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// Lower feasible bound when used as a constraint.
    #[must_use]
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    /// Upper feasible bound when used as a constraint.
    #[must_use]
    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    /// Evaluate the loss on a rollout view.
    #[must_use]
    pub fn eval(&self, rollout: &dyn RolloutView) -> f64 {
        (self.eval.as_ref())(rollout)
    }

    /// Evaluate the loss and write per-timestep gradients into `grad`,
    /// which must share `rollout`'s shape and arrive zeroed.
    ///
    /// The rollout is mutable so the finite-difference fallback can
    /// perturb entries in place; it is always left exactly as it came in.
    pub fn eval_with_gradient(&self, rollout: &mut Rollout, grad: &mut Rollout) -> f64 {
        if let Some(gradient) = &self.gradient {
            return (gradient.as_ref())(&*rollout, grad);
        }
        self.finite_difference_gradient(rollout, grad)
    }

    fn finite_difference_gradient(&self, rollout: &mut Rollout, grad: &mut Rollout) -> f64 {
        let value = self.eval(&*rollout);
        let steps = RolloutView::steps(rollout);
        let representation = rollout.representation().to_owned();

        // Poses and velocities: fixed step.
        for select_vels in [false, true] {
            let rows = if select_vels {
                rollout.vels_matrix(&representation).nrows()
            } else {
                rollout.poses_matrix(&representation).nrows()
            };
            for t in 0..steps {
                for r in 0..rows {
                    let probe = |rollout: &mut Rollout, value: f64| {
                        let m = if select_vels {
                            rollout.vels_mut(&representation)
                        } else {
                            rollout.poses_mut(&representation)
                        };
                        m[(r, t)] = value;
                    };
                    let original = if select_vels {
                        rollout.vels_matrix(&representation)[(r, t)]
                    } else {
                        rollout.poses_matrix(&representation)[(r, t)]
                    };
                    probe(rollout, original + FD_EPS);
                    let plus = self.eval(&*rollout);
                    probe(rollout, original - FD_EPS);
                    let minus = self.eval(&*rollout);
                    probe(rollout, original);
                    let slope = (plus - minus) / (2.0 * FD_EPS);
                    let m = if select_vels {
                        grad.vels_mut(&representation)
                    } else {
                        grad.poses_mut(&representation)
                    };
                    m[(r, t)] = slope;
                }
            }
        }

        // Forces: magnitude-scaled step.
        let force_rows = rollout.forces_matrix(&representation).nrows();
        for t in 0..steps {
            for r in 0..force_rows {
                let original = rollout.forces_matrix(&representation)[(r, t)];
                let eps = FD_EPS * (1.0 + original.abs());
                rollout.forces_mut(&representation)[(r, t)] = original + eps;
                let plus = self.eval(&*rollout);
                rollout.forces_mut(&representation)[(r, t)] = original - eps;
                let minus = self.eval(&*rollout);
                rollout.forces_mut(&representation)[(r, t)] = original;
                grad.forces_mut(&representation)[(r, t)] = (plus - minus) / (2.0 * eps);
            }
        }

        // Masses: magnitude-scaled step.
        for i in 0..rollout.masses_mut().len() {
            let original = rollout.masses_mut()[i];
            let eps = FD_EPS * (1.0 + original.abs());
            rollout.masses_mut()[i] = original + eps;
            let plus = self.eval(&*rollout);
            rollout.masses_mut()[i] = original - eps;
            let minus = self.eval(&*rollout);
            rollout.masses_mut()[i] = original;
            grad.masses_mut()[i] = (plus - minus) / (2.0 * eps);
        }

        value
    }
}
