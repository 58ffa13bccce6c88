//! Composition of single shots with knot-point defect constraints.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use traj_types::{scoped, Mapping, Simulator, StepError};

use crate::common::ProblemCommon;
use crate::loss::LossFn;
use crate::problem::Problem;
use crate::rollout::Rollout;
use crate::single_shot::SingleShot;

/// A trajectory of `totalSteps` split into `⌈totalSteps/shotLength⌉`
/// single shots coupled by knot-point defect constraints.
///
/// # Flat variable layout
///
/// The concatenation of every sub-shot's flat vector in order, followed by
/// one shared mass-tuning block when enabled (sub-shots never carry their
/// own). The first shot tunes its start state only if the user asked for
/// it; every later shot's start state is always a decision variable — it
/// is the knot point.
///
/// # Constraint layout
///
/// `[ user constraints | knot defects ]`, where the defect for the pair
/// `(i, i+1)` is `finalState(shot_i) − startState(shot_{i+1})`, a
/// `posDim + velDim` vector bound to zero.
///
/// # Parallel mode
///
/// With [`set_parallel_operations_enabled`] and the `parallel` feature,
/// unrolls, gradients, and Jacobian assembly fan out across shots, each on
/// a private clone of the simulator. Outputs are partitioned into
/// disjoint, statically-known index ranges per shot — no reductions, no
/// order-dependent sums — so parallel and serial runs are bit-identical.
///
/// [`set_parallel_operations_enabled`]: MultiShot::set_parallel_operations_enabled
pub struct MultiShot<S: Simulator + Clone + Send + Sync> {
    common: ProblemCommon<S>,
    shots: Vec<SingleShot<S>>,
    steps: usize,
    parallel_enabled: bool,
}

impl<S: Simulator + Clone + Send + Sync> MultiShot<S> {
    /// Split `steps` timesteps into shots of `shot_length` (remainder
    /// last), all starting at the world's current state with zero forces.
    pub fn new(
        world: &S,
        loss: LossFn,
        steps: usize,
        shot_length: usize,
        tune_starting_state: bool,
    ) -> Self {
        assert!(steps > 0, "a problem needs at least one timestep");
        assert!(shot_length > 0, "shot length must be positive");
        let common = ProblemCommon::new(world, loss);
        let mut shots = Vec::new();
        let mut remaining = steps;
        let mut first = true;
        while remaining > 0 {
            let len = shot_length.min(remaining);
            let tune = !first || tune_starting_state;
            shots.push(SingleShot::new(world, LossFn::zero(), len, tune));
            remaining -= len;
            first = false;
        }
        Self {
            common,
            shots,
            steps,
            parallel_enabled: false,
        }
    }

    /// Number of sub-shots.
    #[must_use]
    pub fn num_shots(&self) -> usize {
        self.shots.len()
    }

    /// Opt in or out of parallel shot execution. Without the `parallel`
    /// cargo feature this is recorded but every path stays serial.
    pub fn set_parallel_operations_enabled(&mut self, enabled: bool) {
        self.parallel_enabled = enabled;
    }

    /// Whether parallel shot execution is currently enabled.
    #[must_use]
    pub fn parallel_operations_enabled(&self) -> bool {
        self.parallel_enabled
    }

    /// Turn the shared trailing mass block on or off.
    pub fn set_tune_masses(&mut self, tune: bool) {
        self.common.tune_masses = tune;
        for shot in &mut self.shots {
            shot.invalidate_cache();
        }
    }

    /// Append a scalar constraint over the whole-trajectory rollout.
    pub fn add_constraint(&mut self, constraint: LossFn) {
        self.common.constraints.push(constraint);
    }

    /// Attach a metadata matrix carried into every rollout this problem
    /// produces.
    pub fn set_metadata(&mut self, key: &str, value: DMatrix<f64>) {
        self.common.metadata.insert(key.to_owned(), value);
    }

    /// Register an additional named mapping on the problem and every
    /// sub-shot.
    pub fn add_mapping(&mut self, name: &str, mapping: Arc<dyn Mapping<S>>, world: &S) {
        self.common.add_mapping(name, Arc::clone(&mapping), world);
        for shot in &mut self.shots {
            shot.add_mapping(name, Arc::clone(&mapping), world);
        }
    }

    /// Name of the current representation mapping.
    #[must_use]
    pub fn representation_name(&self) -> &str {
        self.common.registry.representation_name()
    }

    /// Switch the representation mapping on every sub-shot (rewriting
    /// their start states and forces) and on the problem itself. Lossy
    /// when the new mapping has lower intrinsic dimension.
    ///
    /// # Errors
    ///
    /// Propagates simulator step failures during the conversion replays.
    pub fn switch_representation(&mut self, world: &mut S, name: &str) -> Result<(), StepError> {
        for shot in &mut self.shots {
            shot.switch_representation(world, name)?;
        }
        self.common.registry.set_representation(name);
        Ok(())
    }

    /// The first shot's `(start_pos, start_vel)`.
    #[must_use]
    pub fn start_state(&self) -> DVector<f64> {
        self.shots[0].start_state()
    }

    /// Unroll (if needed) and return the last shot's final state.
    ///
    /// # Errors
    ///
    /// Propagates simulator step failures.
    pub fn final_state(&mut self, world: &mut S) -> Result<DVector<f64>, StepError> {
        self.prepare(world)?;
        Ok(self.shots[self.shots.len() - 1].cached_final_state())
    }

    /// Debugging name of flat dimension `dim`.
    #[must_use]
    pub fn flat_dim_name(&self, dim: usize) -> String {
        let mut cursor = dim;
        for (i, shot) in self.shots.iter().enumerate() {
            let local = shot.local_flat_dim();
            if cursor < local {
                return format!("shot {i} {}", shot.flat_dim_name(cursor));
            }
            cursor -= local;
        }
        if self.common.tune_masses && cursor < self.common.mass_dim() {
            return format!("mass[{cursor}]");
        }
        format!("out-of-bounds[{dim}]")
    }

    /// Representation state dimension `posDim + velDim`.
    fn state_dim(&self) -> usize {
        let rep = self.common.registry.representation();
        rep.pos_dim + rep.vel_dim
    }

    /// Sum of sub-shot flat widths (the flat vector minus the mass tail).
    fn total_local_dim(&self) -> usize {
        self.shots.iter().map(SingleShot::local_flat_dim).sum()
    }

    /// Column offset of each shot's window in the whole-trajectory rollout.
    fn step_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.shots.len());
        let mut cursor = 0;
        for shot in &self.shots {
            offsets.push(cursor);
            cursor += shot.steps();
        }
        offsets
    }

    /// Apply tuned masses and fill every sub-shot's unroll cache, in
    /// parallel when enabled. The world is restored afterwards.
    fn prepare(&mut self, world: &mut S) -> Result<(), StepError> {
        scoped(world, |w| {
            self.common.apply_masses(w);
            self.ensure_all_unrolled(w)
        })
    }

    fn ensure_all_unrolled(&mut self, world: &mut S) -> Result<(), StepError> {
        #[cfg(feature = "parallel")]
        if self.parallel_enabled {
            use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
            let results: Vec<Result<(), StepError>> = self
                .shots
                .par_iter_mut()
                .map(|shot| {
                    let mut private = world.clone();
                    shot.ensure_unrolled(&mut private)
                })
                .collect();
            for result in results {
                result?;
            }
            return Ok(());
        }
        for shot in &mut self.shots {
            shot.ensure_unrolled(world)?;
        }
        Ok(())
    }

    /// Concatenate cached sub-shot rollouts into `out`.
    fn assemble_rollout_into(&self, out: &mut Rollout) {
        let mut cursor = 0;
        for shot in &self.shots {
            out.copy_columns_from(&shot.cache_ref().rollout, cursor);
            cursor += shot.steps();
        }
        out.masses_mut()
            .copy_from(self.shots[0].cache_ref().rollout.masses_vector());
    }

    /// Gradient of `loss` over the assembled rollout, distributed into the
    /// full flat layout. Caches must be filled; the work is pure
    /// computation partitioned per shot.
    fn loss_gradient_assembled(&self, loss: &LossFn, out: &mut [f64]) -> f64 {
        assert_eq!(out.len(), Problem::flat_dim(self), "flat gradient length");
        let mut rollout = Problem::make_rollout(self);
        self.assemble_rollout_into(&mut rollout);
        let mut grad = Problem::make_rollout(self);
        let value = loss.eval_with_gradient(&mut rollout, &mut grad);

        let rep_name = self.common.registry.representation_name().to_owned();
        let grad_poses = grad.poses_matrix(&rep_name);
        let grad_vels = grad.vels_matrix(&rep_name);
        let grad_forces = grad.forces_matrix(&rep_name);
        let mass_dim = self.common.mass_dim();

        let total_local = self.total_local_dim();
        let (body, mass_tail) = out.split_at_mut(total_local);
        let mut segments: Vec<&mut [f64]> = Vec::with_capacity(self.shots.len());
        let mut rest = body;
        for shot in &self.shots {
            let (segment, remainder) = rest.split_at_mut(shot.local_flat_dim());
            segments.push(segment);
            rest = remainder;
        }
        let offsets = self.step_offsets();

        let per_shot = |shot: &SingleShot<S>, segment: &mut [f64], offset: usize| {
            let mut mass_grad = DVector::zeros(mass_dim);
            shot.backprop_gradient_into(
                grad_poses,
                grad_vels,
                grad_forces,
                offset,
                segment,
                &mut mass_grad,
            );
            mass_grad
        };

        let mass_contribs: Vec<DVector<f64>>;
        #[cfg(feature = "parallel")]
        {
            if self.parallel_enabled {
                use rayon::iter::{
                    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
                    ParallelIterator,
                };
                mass_contribs = self
                    .shots
                    .par_iter()
                    .zip(segments.into_par_iter())
                    .zip(offsets.into_par_iter())
                    .map(|((shot, segment), offset)| per_shot(shot, segment, offset))
                    .collect();
            } else {
                mass_contribs = self
                    .shots
                    .iter()
                    .zip(segments)
                    .zip(offsets)
                    .map(|((shot, segment), offset)| per_shot(shot, segment, offset))
                    .collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        {
            mass_contribs = self
                .shots
                .iter()
                .zip(segments)
                .zip(offsets)
                .map(|((shot, segment), offset)| per_shot(shot, segment, offset))
                .collect();
        }

        // Fixed fold order keeps parallel and serial bit-identical.
        let mut mass_total = DVector::zeros(mass_dim);
        for contribution in mass_contribs {
            mass_total += contribution;
        }
        mass_total += grad.masses_vector();
        if self.common.tune_masses {
            mass_tail.copy_from_slice(mass_total.as_slice());
        }
        value
    }

    /// Final-state Jacobian (and mass band) of every shot that ends in a
    /// knot point, in shot order.
    fn knot_jacobians(&self) -> Vec<(DMatrix<f64>, DMatrix<f64>)> {
        let sd = self.state_dim();
        let mass_cols = self.common.mass_flat_dim();
        let pairs = &self.shots[..self.shots.len() - 1];

        let per_shot = |shot: &SingleShot<S>| {
            let mut jac = DMatrix::zeros(sd, shot.local_flat_dim());
            let mut mass_jac = DMatrix::zeros(sd, mass_cols);
            shot.final_state_jacobian_into(&mut jac, &mut mass_jac);
            (jac, mass_jac)
        };

        #[cfg(feature = "parallel")]
        if self.parallel_enabled {
            use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
            return pairs.par_iter().map(per_shot).collect();
        }
        pairs.iter().map(per_shot).collect()
    }
}

impl<S: Simulator + Clone + Send + Sync> Problem<S> for MultiShot<S> {
    fn num_steps(&self) -> usize {
        self.steps
    }

    fn flat_dim(&self) -> usize {
        self.total_local_dim() + self.common.mass_flat_dim()
    }

    fn constraint_dim(&self) -> usize {
        self.common.constraints.len() + self.state_dim() * (self.shots.len() - 1)
    }

    fn flatten(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.flat_dim(), "flat vector length");
        let mut cursor = 0;
        for shot in &self.shots {
            let dim = shot.local_flat_dim();
            shot.flatten(&mut out[cursor..cursor + dim]);
            cursor += dim;
        }
        if self.common.tune_masses {
            out[cursor..].copy_from_slice(self.common.masses.as_slice());
        }
    }

    fn unflatten(&mut self, flat: &[f64]) {
        assert_eq!(flat.len(), self.flat_dim(), "flat vector length");
        let mut cursor = 0;
        for shot in &mut self.shots {
            let dim = shot.local_flat_dim();
            shot.unflatten(&flat[cursor..cursor + dim]);
            cursor += dim;
        }
        if self.common.tune_masses {
            self.common.masses.copy_from_slice(&flat[cursor..]);
        }
    }

    fn initial_guess(&self, out: &mut [f64]) {
        self.flatten(out);
    }

    fn lower_bounds(&self, world: &S, out: &mut [f64]) {
        assert_eq!(out.len(), self.flat_dim(), "bound vector length");
        let mut cursor = 0;
        for shot in &self.shots {
            let dim = shot.local_flat_dim();
            shot.bounds_into(world, &mut out[cursor..cursor + dim], true);
            cursor += dim;
        }
        if self.common.tune_masses {
            out[cursor..].copy_from_slice(self.common.mass_lower.as_slice());
        }
    }

    fn upper_bounds(&self, world: &S, out: &mut [f64]) {
        assert_eq!(out.len(), self.flat_dim(), "bound vector length");
        let mut cursor = 0;
        for shot in &self.shots {
            let dim = shot.local_flat_dim();
            shot.bounds_into(world, &mut out[cursor..cursor + dim], false);
            cursor += dim;
        }
        if self.common.tune_masses {
            out[cursor..].copy_from_slice(self.common.mass_upper.as_slice());
        }
    }

    fn constraint_lower_bounds(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.constraint_dim(), "constraint bound length");
        // Knot defects are equality constraints: bounds stay zero.
        out.fill(0.0);
        for (slot, c) in out.iter_mut().zip(&self.common.constraints) {
            *slot = c.lower_bound();
        }
    }

    fn constraint_upper_bounds(&self, out: &mut [f64]) {
        assert_eq!(out.len(), self.constraint_dim(), "constraint bound length");
        out.fill(0.0);
        for (slot, c) in out.iter_mut().zip(&self.common.constraints) {
            *slot = c.upper_bound();
        }
    }

    fn compute_loss(&mut self, world: &mut S) -> Result<f64, StepError> {
        self.prepare(world)?;
        let mut rollout = Problem::make_rollout(self);
        self.assemble_rollout_into(&mut rollout);
        Ok(self.common.loss.eval(&rollout))
    }

    fn compute_constraints(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError> {
        assert_eq!(out.len(), self.constraint_dim(), "constraint vector length");
        self.prepare(world)?;
        let num_parent = self.common.constraints.len();
        if num_parent > 0 {
            let mut rollout = Problem::make_rollout(self);
            self.assemble_rollout_into(&mut rollout);
            for (slot, c) in out[..num_parent].iter_mut().zip(&self.common.constraints) {
                *slot = c.eval(&rollout);
            }
        }
        let sd = self.state_dim();
        let mut cursor = num_parent;
        for i in 1..self.shots.len() {
            let defect = self.shots[i - 1].cached_final_state() - self.shots[i].start_state();
            out[cursor..cursor + sd].copy_from_slice(defect.as_slice());
            cursor += sd;
        }
        Ok(())
    }

    fn backprop_gradient(&mut self, world: &mut S, out: &mut [f64]) -> Result<f64, StepError> {
        self.prepare(world)?;
        let loss = self.common.loss.clone();
        Ok(self.loss_gradient_assembled(&loss, out))
    }

    fn backprop_jacobian(
        &mut self,
        world: &mut S,
        jac: &mut DMatrix<f64>,
    ) -> Result<(), StepError> {
        let n = self.flat_dim();
        assert_eq!(jac.nrows(), self.constraint_dim(), "jacobian rows");
        assert_eq!(jac.ncols(), n, "jacobian cols");
        self.prepare(world)?;
        jac.fill(0.0);

        let constraints = self.common.constraints.clone();
        let mut row_buf = vec![0.0; n];
        for (r, c) in constraints.iter().enumerate() {
            let _ = self.loss_gradient_assembled(c, &mut row_buf);
            for (col, value) in row_buf.iter().enumerate() {
                jac[(r, col)] = *value;
            }
        }

        let sd = self.state_dim();
        let mass_offset = self.total_local_dim();
        let mut row_cursor = constraints.len();
        let mut col_cursor = 0;
        for (i, (block, mass_block)) in self.knot_jacobians().iter().enumerate() {
            let dim = self.shots[i].local_flat_dim();
            jac.view_mut((row_cursor, col_cursor), (sd, dim)).copy_from(block);
            col_cursor += dim;
            for q in 0..sd {
                jac[(row_cursor + q, col_cursor + q)] = -1.0;
            }
            if self.common.tune_masses {
                jac.view_mut((row_cursor, mass_offset), (sd, self.common.mass_dim()))
                    .copy_from(mass_block);
            }
            row_cursor += sd;
        }
        Ok(())
    }

    fn jacobian_nnz(&self) -> usize {
        let n = self.flat_dim();
        let sd = self.state_dim();
        let mut nnz = self.common.constraints.len() * n;
        for shot in &self.shots[..self.shots.len() - 1] {
            nnz += shot.local_flat_dim() * sd + sd;
            if self.common.tune_masses {
                nnz += sd * self.common.mass_dim();
            }
        }
        nnz
    }

    fn jacobian_sparsity(&self, rows: &mut [usize], cols: &mut [usize]) {
        let nnz = self.jacobian_nnz();
        assert_eq!(rows.len(), nnz, "sparsity length");
        assert_eq!(cols.len(), nnz, "sparsity length");
        let n = self.flat_dim();
        let sd = self.state_dim();
        let mass_offset = self.total_local_dim();
        let mut cursor = 0;

        // User constraints: dense rows, row-major.
        for r in 0..self.common.constraints.len() {
            for c in 0..n {
                rows[cursor] = r;
                cols[cursor] = c;
                cursor += 1;
            }
        }

        // Knot defects: the dense band over shot i's columns
        // (column-major), the −I at shot i+1's start-state columns, and
        // the mass band when tuning.
        let mut row_cursor = self.common.constraints.len();
        let mut col_cursor = 0;
        for shot in &self.shots[..self.shots.len() - 1] {
            let dim = shot.local_flat_dim();
            for col in col_cursor..col_cursor + dim {
                for row in row_cursor..row_cursor + sd {
                    rows[cursor] = row;
                    cols[cursor] = col;
                    cursor += 1;
                }
            }
            col_cursor += dim;
            for q in 0..sd {
                rows[cursor] = row_cursor + q;
                cols[cursor] = col_cursor + q;
                cursor += 1;
            }
            if self.common.tune_masses {
                for col in mass_offset..mass_offset + self.common.mass_dim() {
                    for row in row_cursor..row_cursor + sd {
                        rows[cursor] = row;
                        cols[cursor] = col;
                        cursor += 1;
                    }
                }
            }
            row_cursor += sd;
        }
        assert_eq!(cursor, nnz, "sparsity cursor");
    }

    fn sparse_jacobian(&mut self, world: &mut S, out: &mut [f64]) -> Result<(), StepError> {
        let nnz = self.jacobian_nnz();
        assert_eq!(out.len(), nnz, "sparse value length");
        self.prepare(world)?;
        let n = self.flat_dim();
        let sd = self.state_dim();
        let mut cursor = 0;

        let constraints = self.common.constraints.clone();
        for c in &constraints {
            let _ = self.loss_gradient_assembled(c, &mut out[cursor..cursor + n]);
            cursor += n;
        }

        for (block, mass_block) in self.knot_jacobians() {
            for col in 0..block.ncols() {
                out[cursor..cursor + sd].copy_from_slice(block.column(col).clone_owned().as_slice());
                cursor += sd;
            }
            for _ in 0..sd {
                out[cursor] = -1.0;
                cursor += 1;
            }
            for col in 0..mass_block.ncols() {
                out[cursor..cursor + sd]
                    .copy_from_slice(mass_block.column(col).clone_owned().as_slice());
                cursor += sd;
            }
        }
        assert_eq!(cursor, nnz, "sparse value cursor");
        Ok(())
    }

    fn make_rollout(&self) -> Rollout {
        self.common.make_rollout(self.steps)
    }

    fn unroll(&mut self, world: &mut S, out: &mut Rollout) -> Result<(), StepError> {
        self.prepare(world)?;
        self.assemble_rollout_into(out);
        Ok(())
    }

    fn get_states(
        &mut self,
        world: &mut S,
        out: &mut Rollout,
        use_knots: bool,
    ) -> Result<(), StepError> {
        if use_knots {
            return self.unroll(world, out);
        }
        // Continuous replay: only the first shot's start state is
        // restored, then every stored force plays through one
        // uninterrupted simulation.
        scoped(world, |w| {
            self.common.apply_masses(w);
            let registry = &self.common.registry;
            let rep = registry.representation();
            rep.mapping.write_positions(w, self.shots[0].start_pos_ref());
            rep.mapping.write_velocities(w, self.shots[0].start_vel_ref());
            let mut cursor = 0;
            for shot in &self.shots {
                for t in 0..shot.steps() {
                    rep.mapping
                        .write_forces(w, &shot.forces_ref().column(t).clone_owned());
                    w.step()?;
                    for name in registry.names() {
                        let mapping = &registry.entry(name).mapping;
                        out.poses_mut(name)
                            .column_mut(cursor)
                            .copy_from(&mapping.read_positions(w));
                        out.vels_mut(name)
                            .column_mut(cursor)
                            .copy_from(&mapping.read_velocities(w));
                        out.forces_mut(name)
                            .column_mut(cursor)
                            .copy_from(&mapping.read_forces(w));
                    }
                    cursor += 1;
                }
            }
            out.masses_mut().copy_from(&w.masses());
            Ok(())
        })
    }
}
