//! A single contiguous trajectory segment as an optimization problem.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use traj_types::{scoped, Mapping, Simulator, StepError, StepLinearization};

use crate::common::ProblemCommon;
use crate::loss::LossFn;
use crate::problem::Problem;
use crate::rollout::Rollout;

/// Cached result of one forward unroll: the rollout in every registered
/// mapping and the per-step linearizations in representation space.
pub(crate) struct ShotCache {
    pub rollout: Rollout,
    pub linearizations: Vec<StepLinearization>,
}

/// One contiguous trajectory from a start state driven by per-step forces.
///
/// # Flat variable layout
///
/// 1. If `tune_starting_state`: start position then start velocity, each
///    of the representation mapping's dimension.
/// 2. One force vector per timestep, `forceDim` each.
/// 3. If `tune_masses`: the mass-parameter block.
///
/// Start state and forces live in the representation mapping's
/// coordinates; switching representation rewrites them (lossily, if the
/// new mapping is smaller).
///
/// Forward unrolls are cached together with their per-step
/// linearizations; [`unflatten`](Problem::unflatten), representation
/// switches, and direct state setters invalidate the cache.
pub struct SingleShot<S: Simulator> {
    pub(crate) common: ProblemCommon<S>,
    steps: usize,
    tune_starting_state: bool,
    start_pos: DVector<f64>,
    start_vel: DVector<f64>,
    forces: DMatrix<f64>,
    force_bounds_override: Option<(DMatrix<f64>, DMatrix<f64>)>,
    cache: Option<ShotCache>,
}

impl<S: Simulator> SingleShot<S> {
    /// A shot of `steps` timesteps starting from the world's current
    /// state, with zero forces.
    pub fn new(world: &S, loss: LossFn, steps: usize, tune_starting_state: bool) -> Self {
        assert!(steps > 0, "a shot needs at least one timestep");
        let common = ProblemCommon::new(world, loss);
        let rep = common.registry.representation();
        let start_pos = rep.mapping.read_positions(world);
        let start_vel = rep.mapping.read_velocities(world);
        let forces = DMatrix::zeros(rep.force_dim, steps);
        Self {
            common,
            steps,
            tune_starting_state,
            start_pos,
            start_vel,
            forces,
            force_bounds_override: None,
            cache: None,
        }
    }

    /// Number of timesteps.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Whether the start state is part of the decision vector.
    #[must_use]
    pub fn tune_starting_state(&self) -> bool {
        self.tune_starting_state
    }

    /// Turn the trailing mass-parameter block on or off.
    pub fn set_tune_masses(&mut self, tune: bool) {
        self.common.tune_masses = tune;
        self.cache = None;
    }

    /// Append a scalar constraint with its feasible bounds.
    pub fn add_constraint(&mut self, constraint: LossFn) {
        self.common.constraints.push(constraint);
    }

    /// Attach a metadata matrix carried into every rollout this problem
    /// produces.
    pub fn set_metadata(&mut self, key: &str, value: DMatrix<f64>) {
        self.common.metadata.insert(key.to_owned(), value);
    }

    /// Register an additional named mapping.
    pub fn add_mapping(&mut self, name: &str, mapping: Arc<dyn Mapping<S>>, world: &S) {
        self.common.add_mapping(name, mapping, world);
        self.cache = None;
    }

    /// Name of the current representation mapping.
    #[must_use]
    pub fn representation_name(&self) -> &str {
        self.common.registry.representation_name()
    }

    /// Overwrite the start state (in representation coordinates).
    pub fn set_start_state(&mut self, pos: &DVector<f64>, vel: &DVector<f64>) {
        let rep = self.common.registry.representation();
        assert_eq!(pos.len(), rep.pos_dim, "start position length");
        assert_eq!(vel.len(), rep.vel_dim, "start velocity length");
        self.start_pos.copy_from(pos);
        self.start_vel.copy_from(vel);
        self.cache = None;
    }

    /// The concatenated `(start_pos, start_vel)` vector.
    #[must_use]
    pub fn start_state(&self) -> DVector<f64> {
        let rep = self.common.registry.representation();
        let mut out = DVector::zeros(rep.pos_dim + rep.vel_dim);
        out.rows_mut(0, rep.pos_dim).copy_from(&self.start_pos);
        out.rows_mut(rep.pos_dim, rep.vel_dim).copy_from(&self.start_vel);
        out
    }

    /// Overwrite the force trajectory (in representation coordinates).
    pub fn set_forces(&mut self, forces: &DMatrix<f64>) {
        assert_eq!(forces.nrows(), self.forces.nrows(), "force rows");
        assert_eq!(forces.ncols(), self.steps, "force columns");
        self.forces.copy_from(forces);
        self.cache = None;
    }

    /// Override per-entry force bounds (e.g. to pin a known force
    /// trajectory by setting `lower == upper`). Expressed in the current
    /// representation; cleared by a representation switch.
    pub fn set_force_bounds(&mut self, lower: DMatrix<f64>, upper: DMatrix<f64>) {
        assert_eq!(lower.nrows(), self.forces.nrows(), "force bound rows");
        assert_eq!(lower.ncols(), self.steps, "force bound columns");
        assert_eq!(upper.nrows(), self.forces.nrows(), "force bound rows");
        assert_eq!(upper.ncols(), self.steps, "force bound columns");
        self.force_bounds_override = Some((lower, upper));
    }

    /// Representation `(posDim, velDim, forceDim)`.
    fn rep_dims(&self) -> (usize, usize, usize) {
        let rep = self.common.registry.representation();
        (rep.pos_dim, rep.vel_dim, rep.force_dim)
    }

    /// Representation state dimension `posDim + velDim`.
    pub(crate) fn state_dim(&self) -> usize {
        let (rp, rv, _) = self.rep_dims();
        rp + rv
    }

    /// Flat width excluding the mass block: the part a parent multi-shot
    /// concatenates.
    pub(crate) fn local_flat_dim(&self) -> usize {
        let (rp, rv, rf) = self.rep_dims();
        let base = if self.tune_starting_state { rp + rv } else { 0 };
        base + rf * self.steps
    }

    fn force_col_offset(&self, t: usize) -> usize {
        let (rp, rv, rf) = self.rep_dims();
        let base = if self.tune_starting_state { rp + rv } else { 0 };
        base + rf * t
    }

    pub(crate) fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    pub(crate) fn start_pos_ref(&self) -> &DVector<f64> {
        &self.start_pos
    }

    pub(crate) fn start_vel_ref(&self) -> &DVector<f64> {
        &self.start_vel
    }

    pub(crate) fn forces_ref(&self) -> &DMatrix<f64> {
        &self.forces
    }

    /// Run the forward pass and cache rollout plus linearizations.
    fn run_unroll(&self, world: &mut S) -> Result<ShotCache, StepError> {
        let registry = &self.common.registry;
        let rep = registry.representation();
        scoped(world, |w| {
            self.common.apply_masses(w);
            rep.mapping.write_positions(w, &self.start_pos);
            rep.mapping.write_velocities(w, &self.start_vel);

            let mut rollout = self.common.make_rollout(self.steps);
            let mut linearizations = Vec::with_capacity(self.steps);
            for t in 0..self.steps {
                let frames = registry.pre_step_frames(w);
                rep.mapping.write_forces(w, &self.forces.column(t).clone_owned());
                let lin = w.step_with_linearization()?;
                linearizations.push(registry.map_linearization(w, frames, lin));
                for name in registry.names() {
                    let mapping = &registry.entry(name).mapping;
                    rollout
                        .poses_mut(name)
                        .column_mut(t)
                        .copy_from(&mapping.read_positions(w));
                    rollout
                        .vels_mut(name)
                        .column_mut(t)
                        .copy_from(&mapping.read_velocities(w));
                    rollout
                        .forces_mut(name)
                        .column_mut(t)
                        .copy_from(&mapping.read_forces(w));
                }
            }
            rollout.masses_mut().copy_from(&w.masses());
            Ok(ShotCache {
                rollout,
                linearizations,
            })
        })
    }

    pub(crate) fn ensure_unrolled(&mut self, world: &mut S) -> Result<(), StepError> {
        if self.cache.is_none() {
            let cache = self.run_unroll(world)?;
            self.cache = Some(cache);
        }
        Ok(())
    }

    pub(crate) fn cache_ref(&self) -> &ShotCache {
        match &self.cache {
            Some(cache) => cache,
            None => panic!("unroll cache queried before ensure_unrolled"),
        }
    }

    /// The `(pos, vel)` state at the end of the cached unroll.
    pub(crate) fn cached_final_state(&self) -> DVector<f64> {
        let (rp, rv, _) = self.rep_dims();
        let rep_name = self.common.registry.representation_name();
        let rollout = &self.cache_ref().rollout;
        let mut out = DVector::zeros(rp + rv);
        out.rows_mut(0, rp)
            .copy_from(&rollout.poses_matrix(rep_name).column(self.steps - 1));
        out.rows_mut(rp, rv)
            .copy_from(&rollout.vels_matrix(rep_name).column(self.steps - 1));
        out
    }

    /// Unroll (if needed) and return the final `(pos, vel)` state.
    ///
    /// # Errors
    ///
    /// Propagates simulator step failures.
    pub fn final_state(&mut self, world: &mut S) -> Result<DVector<f64>, StepError> {
        self.ensure_unrolled(world)?;
        Ok(self.cached_final_state())
    }

    /// Chain per-step linearizations backward from the last step, writing
    /// the `stateDim × local_flat_dim` Jacobian of the final state into
    /// `jac` and, when `mass_jac` has columns, accumulating the mass
    /// columns into it. Requires a filled cache.
    pub(crate) fn final_state_jacobian_into(
        &self,
        jac: &mut DMatrix<f64>,
        mass_jac: &mut DMatrix<f64>,
    ) {
        let (rp, rv, rf) = self.rep_dims();
        let sd = rp + rv;
        assert_eq!(jac.nrows(), sd, "final-state jacobian rows");
        assert_eq!(jac.ncols(), self.local_flat_dim(), "final-state jacobian cols");
        let with_mass = mass_jac.ncols() > 0;
        if with_mass {
            assert_eq!(mass_jac.nrows(), sd, "mass jacobian rows");
            assert_eq!(mass_jac.ncols(), self.common.mass_dim(), "mass jacobian cols");
        }
        let cache = self.cache_ref();

        // Running pair: ∂final/∂pos_{t+1} and ∂final/∂vel_{t+1}.
        let mut g_pos = DMatrix::zeros(sd, rp);
        g_pos.view_mut((0, 0), (rp, rp)).copy_from(&DMatrix::identity(rp, rp));
        let mut g_vel = DMatrix::zeros(sd, rv);
        g_vel.view_mut((rp, 0), (rv, rv)).copy_from(&DMatrix::identity(rv, rv));

        for t in (0..self.steps).rev() {
            let lin = &cache.linearizations[t];
            // Write the force columns for this step, then advance the
            // running pair through the step.
            let force_block = &g_pos * &lin.force_pos + &g_vel * &lin.force_vel;
            jac.view_mut((0, self.force_col_offset(t)), (sd, rf))
                .copy_from(&force_block);
            if with_mass {
                *mass_jac += &g_pos * &lin.mass_pos + &g_vel * &lin.mass_vel;
            }
            let next_pos = &g_pos * &lin.pos_pos + &g_vel * &lin.pos_vel;
            let next_vel = &g_pos * &lin.vel_pos + &g_vel * &lin.vel_vel;
            g_pos = next_pos;
            g_vel = next_vel;
        }

        if self.tune_starting_state {
            jac.view_mut((0, 0), (sd, rp)).copy_from(&g_pos);
            jac.view_mut((0, rp), (sd, rv)).copy_from(&g_vel);
        }
    }

    /// Convenience wrapper assembling the full `stateDim × flat_dim`
    /// final-state Jacobian (mass columns appended when tuned).
    ///
    /// # Errors
    ///
    /// Propagates simulator step failures.
    pub fn final_state_jacobian(&mut self, world: &mut S) -> Result<DMatrix<f64>, StepError> {
        self.ensure_unrolled(world)?;
        let sd = self.state_dim();
        let local = self.local_flat_dim();
        let mass_cols = self.common.mass_flat_dim();
        let mut jac = DMatrix::zeros(sd, local);
        let mut mass_jac = DMatrix::zeros(sd, if mass_cols > 0 { self.common.mass_dim() } else { 0 });
        self.final_state_jacobian_into(&mut jac, &mut mass_jac);
        let mut full = DMatrix::zeros(sd, local + mass_cols);
        full.view_mut((0, 0), (sd, local)).copy_from(&jac);
        if mass_cols > 0 {
            full.view_mut((0, local), (sd, mass_cols)).copy_from(&mass_jac);
        }
        Ok(full)
    }

    /// Backpropagate per-timestep loss gradients (columns
    /// `col_offset .. col_offset + steps` of the given matrices) into this
    /// shot's local flat segment, accumulating the mass gradient
    /// separately. Requires a filled cache.
    pub(crate) fn backprop_gradient_into(
        &self,
        grad_poses: &DMatrix<f64>,
        grad_vels: &DMatrix<f64>,
        grad_forces: &DMatrix<f64>,
        col_offset: usize,
        out: &mut [f64],
        mass_grad: &mut DVector<f64>,
    ) {
        let (rp, rv, rf) = self.rep_dims();
        assert_eq!(out.len(), self.local_flat_dim(), "gradient segment length");
        let cache = self.cache_ref();

        // Vector cotangent against the state after each step.
        let mut g_pos = DVector::zeros(rp);
        let mut g_vel = DVector::zeros(rv);

        for t in (0..self.steps).rev() {
            g_pos += grad_poses.column(col_offset + t);
            g_vel += grad_vels.column(col_offset + t);
            let lin = &cache.linearizations[t];

            let force_grad = lin.force_pos.transpose() * &g_pos
                + lin.force_vel.transpose() * &g_vel
                + grad_forces.column(col_offset + t);
            let offset = self.force_col_offset(t);
            out[offset..offset + rf].copy_from_slice(force_grad.as_slice());

            *mass_grad += lin.mass_pos.transpose() * &g_pos + lin.mass_vel.transpose() * &g_vel;

            let next_pos = lin.pos_pos.transpose() * &g_pos + lin.pos_vel.transpose() * &g_vel;
            let next_vel = lin.vel_pos.transpose() * &g_pos + lin.vel_vel.transpose() * &g_vel;
            g_pos = next_pos;
            g_vel = next_vel;
        }

        if self.tune_starting_state {
            out[0..rp].copy_from_slice(g_pos.as_slice());
            out[rp..rp + rv].copy_from_slice(g_vel.as_slice());
        }
    }

    /// Gradient of an arbitrary loss over this shot's rollout, written
    /// into the full flat layout (mass tail included when tuned).
    fn loss_gradient_flat(
        &mut self,
        world: &mut S,
        loss: &LossFn,
        out: &mut [f64],
    ) -> Result<f64, StepError> {
        assert_eq!(out.len(), Problem::flat_dim(self), "flat gradient length");
        self.ensure_unrolled(world)?;

        let mut rollout = self.cache_ref().rollout.clone();
        let mut grad = self.common.make_rollout(self.steps);
        let value = loss.eval_with_gradient(&mut rollout, &mut grad);

        let rep_name = self.common.registry.representation_name().to_owned();
        let mut mass_grad = DVector::zeros(self.common.mass_dim());
        let local = self.local_flat_dim();
        self.backprop_gradient_into(
            grad.poses_matrix(&rep_name),
            grad.vels_matrix(&rep_name),
            grad.forces_matrix(&rep_name),
            0,
            &mut out[..local],
            &mut mass_grad,
        );
        if self.common.tune_masses {
            let total = mass_grad + grad.masses_vector();
            out[local..].copy_from_slice(total.as_slice());
        }
        Ok(value)
    }

    /// Switch the representation mapping, rewriting the start state and
    /// forces into the new coordinates by replaying the stored trajectory
    /// so state-dependent conversions happen at the right world states.
    ///
    /// This is potentially destructive: if the new mapping has lower
    /// intrinsic dimension, information is lost and switching back will
    /// not recover the original trajectory.
    ///
    /// # Errors
    ///
    /// Propagates simulator step failures during the replay.
    pub fn switch_representation(&mut self, world: &mut S, name: &str) -> Result<(), StepError> {
        if name == self.common.registry.representation_name() {
            return Ok(());
        }
        let old = self.common.registry.representation().clone();
        let new = self.common.registry.entry(name).clone();
        if new.pos_dim < old.pos_dim || new.vel_dim < old.vel_dim {
            tracing::warn!(
                from = self.common.registry.representation_name(),
                to = name,
                "switching to a lower-dimensional representation loses information"
            );
        }

        type Converted = (DVector<f64>, DVector<f64>, DMatrix<f64>);
        let converted: Result<Converted, StepError> = scoped(world, |w| {
            self.common.apply_masses(w);
            old.mapping.write_positions(w, &self.start_pos);
            old.mapping.write_velocities(w, &self.start_vel);
            let start_pos = new.mapping.read_positions(w);
            let start_vel = new.mapping.read_velocities(w);
            let mut forces = DMatrix::zeros(new.force_dim, self.steps);
            for t in 0..self.steps {
                old.mapping.write_forces(w, &self.forces.column(t).clone_owned());
                forces.column_mut(t).copy_from(&new.mapping.read_forces(w));
                w.step()?;
            }
            Ok((start_pos, start_vel, forces))
        });
        let (start_pos, start_vel, forces) = converted?;
        self.start_pos = start_pos;
        self.start_vel = start_vel;
        self.forces = forces;
        self.force_bounds_override = None;
        self.common.registry.set_representation(name);
        self.cache = None;
        Ok(())
    }

    /// Debugging name of flat dimension `dim`.
    #[must_use]
    pub fn flat_dim_name(&self, dim: usize) -> String {
        let (rp, rv, rf) = self.rep_dims();
        let mut cursor = dim;
        if self.tune_starting_state {
            if cursor < rp {
                return format!("start_pos[{cursor}]");
            }
            cursor -= rp;
            if cursor < rv {
                return format!("start_vel[{cursor}]");
            }
            cursor -= rv;
        }
        if cursor < rf * self.steps {
            return format!("force[t={}][{}]", cursor / rf, cursor % rf);
        }
        cursor -= rf * self.steps;
        if self.common.tune_masses && cursor < self.common.mass_dim() {
            return format!("mass[{cursor}]");
        }
        format!("out-of-bounds[{dim}]")
    }
}

impl<S: Simulator> Problem<S> for SingleShot<S> {
    fn num_steps(&self) -> usize {
        self.steps
    }

    fn flat_dim(&self) -> usize {
        self.local_flat_dim() + self.common.mass_flat_dim()
    }

    fn constraint_dim(&self) -> usize {
        self.common.constraints.len()
    }

    fn flatten(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.flat_dim(), "flat vector length");
        let (rp, rv, rf) = self.rep_dims();
        let mut cursor = 0;
        if self.tune_starting_state {
            out[..rp].copy_from_slice(self.start_pos.as_slice());
            out[rp..rp + rv].copy_from_slice(self.start_vel.as_slice());
            cursor = rp + rv;
        }
        for t in 0..self.steps {
            out[cursor..cursor + rf].copy_from_slice(self.forces.column(t).clone_owned().as_slice());
            cursor += rf;
        }
        if self.common.tune_masses {
            out[cursor..].copy_from_slice(self.common.masses.as_slice());
        }
    }

    fn unflatten(&mut self, flat: &[f64]) {
        assert_eq!(flat.len(), self.flat_dim(), "flat vector length");
        let (rp, rv, rf) = self.rep_dims();
        let mut cursor = 0;
        if self.tune_starting_state {
            self.start_pos.copy_from_slice(&flat[..rp]);
            self.start_vel.copy_from_slice(&flat[rp..rp + rv]);
            cursor = rp + rv;
        }
        for t in 0..self.steps {
            self.forces
                .column_mut(t)
                .copy_from_slice(&flat[cursor..cursor + rf]);
            cursor += rf;
        }
        if self.common.tune_masses {
            self.common.masses.copy_from_slice(&flat[cursor..]);
        }
        self.cache = None;
    }

    fn initial_guess(&self, out: &mut [f64]) {
        self.flatten(out);
    }

    fn lower_bounds(&self, world: &S, out: &mut [f64]) {
        self.bounds_into(world, out, true);
    }

    fn upper_bounds(&self, world: &S, out: &mut [f64]) {
        self.bounds_into(world, out, false);
    }

    fn constraint_lower_bounds(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.constraint_dim(), "constraint bound length");
        for (slot, c) in out.iter_mut().zip(&self.common.constraints) {
            *slot = c.lower_bound();
        }
    }

    fn constraint_upper_bounds(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.constraint_dim(), "constraint bound length");
        for (slot, c) in out.iter_mut().zip(&self.common.constraints) {
            *slot = c.upper_bound();
        }
    }

    fn compute_loss(&mut self, world: &mut S) -> Result<f64, StepError> {
        self.ensure_unrolled(world)?;
        Ok(self.common.loss.eval(&self.cache_ref().rollout))
    }

    fn compute_constraints(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError> {
        assert_eq!(out.len(), self.constraint_dim(), "constraint vector length");
        self.ensure_unrolled(world)?;
        let rollout = &self.cache_ref().rollout;
        for (slot, c) in out.iter_mut().zip(&self.common.constraints) {
            *slot = c.eval(rollout);
        }
        Ok(())
    }

    fn backprop_gradient(&mut self, world: &mut S, out: &mut [f64]) -> Result<f64, StepError> {
        let loss = self.common.loss.clone();
        self.loss_gradient_flat(world, &loss, out)
    }

    fn backprop_jacobian(
        &mut self,
        world: &mut S,
        jac: &mut DMatrix<f64>,
    ) -> Result<(), StepError> {
        let n = self.flat_dim();
        assert_eq!(jac.nrows(), self.constraint_dim(), "jacobian rows");
        assert_eq!(jac.ncols(), n, "jacobian cols");
        let constraints = self.common.constraints.clone();
        let mut row = vec![0.0; n];
        for (r, c) in constraints.iter().enumerate() {
            self.loss_gradient_flat(world, c, &mut row)?;
            for (col, value) in row.iter().enumerate() {
                jac[(r, col)] = *value;
            }
        }
        Ok(())
    }

    fn jacobian_nnz(&self) -> usize {
        self.constraint_dim() * self.flat_dim()
    }

    fn jacobian_sparsity(&self, rows: &mut [usize], cols: &mut [usize]) {
        assert_eq!(rows.len(), self.jacobian_nnz(), "sparsity length");
        assert_eq!(cols.len(), self.jacobian_nnz(), "sparsity length");
        let n = self.flat_dim();
        let mut cursor = 0;
        for r in 0..self.constraint_dim() {
            for c in 0..n {
                rows[cursor] = r;
                cols[cursor] = c;
                cursor += 1;
            }
        }
    }

    fn sparse_jacobian(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError> {
        assert_eq!(out.len(), self.jacobian_nnz(), "sparse value length");
        let n = self.flat_dim();
        let constraints = self.common.constraints.clone();
        for (r, c) in constraints.iter().enumerate() {
            self.loss_gradient_flat(world, c, &mut out[r * n..(r + 1) * n])?;
        }
        Ok(())
    }

    fn make_rollout(&self) -> Rollout {
        self.common.make_rollout(self.steps)
    }

    fn unroll(&mut self, world: &mut S, out: &mut Rollout) -> Result<(), StepError> {
        self.ensure_unrolled(world)?;
        out.copy_from(&self.cache_ref().rollout);
        Ok(())
    }

    fn get_states(
        &mut self,
        world: &mut S,
        out: &mut Rollout,
        _use_knots: bool,
    ) -> Result<(), StepError> {
        // A single shot has no knot points; both reconstructions coincide.
        self.unroll(world, out)
    }
}

impl<S: Simulator> SingleShot<S> {
    pub(crate) fn bounds_into(&self, world: &S, out: &mut [f64], lower: bool) {
        assert_eq!(out.len(), Problem::flat_dim(self), "bound vector length");
        let rep = self.common.registry.representation();
        let (rp, rv, rf) = (rep.pos_dim, rep.vel_dim, rep.force_dim);
        let mut cursor = 0;
        if self.tune_starting_state {
            let pos = if lower {
                rep.mapping.position_lower_limits(world)
            } else {
                rep.mapping.position_upper_limits(world)
            };
            let vel = if lower {
                rep.mapping.velocity_lower_limits(world)
            } else {
                rep.mapping.velocity_upper_limits(world)
            };
            out[..rp].copy_from_slice(pos.as_slice());
            out[rp..rp + rv].copy_from_slice(vel.as_slice());
            cursor = rp + rv;
        }
        if let Some((lo, hi)) = &self.force_bounds_override {
            let chosen = if lower { lo } else { hi };
            for t in 0..self.steps {
                out[cursor..cursor + rf]
                    .copy_from_slice(chosen.column(t).clone_owned().as_slice());
                cursor += rf;
            }
        } else {
            let per_dof = if lower {
                rep.mapping.force_lower_limits(world)
            } else {
                rep.mapping.force_upper_limits(world)
            };
            for _ in 0..self.steps {
                out[cursor..cursor + rf].copy_from_slice(per_dof.as_slice());
                cursor += rf;
            }
        }
        if self.common.tune_masses {
            let masses = if lower {
                &self.common.mass_lower
            } else {
                &self.common.mass_upper
            };
            out[cursor..].copy_from_slice(masses.as_slice());
        }
    }
}
