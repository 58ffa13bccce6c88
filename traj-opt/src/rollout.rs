//! Trajectory rollout buffers: owning, sliced, and const-sliced.

use std::collections::HashMap;

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector, DVectorView};

/// Per-mapping matrix dimensions recorded when a rollout shape is fixed.
#[derive(Debug, Clone)]
pub(crate) struct RolloutBlueprint {
    /// `(name, pos_dim, vel_dim, force_dim)` per registered mapping,
    /// in registration order.
    pub entries: Vec<(String, usize, usize, usize)>,
    /// The representation mapping's name.
    pub representation: String,
}

/// Read access to a trajectory window.
///
/// Implemented by the owning [`Rollout`] and by both slice variants, so
/// loss functions and emitters are agnostic to where the columns live.
/// Write access is *not* part of this trait: it exists only on the owning
/// rollout and the mutable slice, which makes a write through a read-only
/// view unrepresentable rather than a runtime error.
pub trait RolloutView {
    /// Number of time columns visible through this view.
    fn steps(&self) -> usize;
    /// Name of the representation mapping.
    fn representation(&self) -> &str;
    /// Registered mapping names, in registration order.
    fn mapping_names(&self) -> &[String];
    /// Poses of mapping `mapping` over the visible window, `posDim × steps`.
    fn poses(&self, mapping: &str) -> DMatrixView<'_, f64>;
    /// Velocities over the visible window, `velDim × steps`.
    fn vels(&self, mapping: &str) -> DMatrixView<'_, f64>;
    /// Forces over the visible window, `forceDim × steps`.
    fn forces(&self, mapping: &str) -> DMatrixView<'_, f64>;
    /// Whole-rollout mass parameters (not windowed).
    fn masses(&self) -> DVectorView<'_, f64>;
    /// Metadata matrix for `key`, or a `0 × 0` zero matrix with a warning
    /// diagnostic when the key is absent.
    fn metadata(&self, key: &str) -> DMatrix<f64>;
}

/// An owning trajectory window: poses, velocities, and forces per
/// registered mapping over `steps` columns, plus a mass vector and
/// free-form metadata matrices.
///
/// All matrices for the same rollout share their column count. `Clone` is
/// a deep copy of every matrix. The `"identity"` mapping is always
/// present; problems construct rollouts through
/// [`Problem::make_rollout`](crate::problem::Problem::make_rollout) so the
/// shape always matches the problem's registry.
#[derive(Debug, Clone)]
pub struct Rollout {
    mapping_names: Vec<String>,
    representation: String,
    poses: HashMap<String, DMatrix<f64>>,
    vels: HashMap<String, DMatrix<f64>>,
    forces: HashMap<String, DMatrix<f64>>,
    masses: DVector<f64>,
    metadata: HashMap<String, DMatrix<f64>>,
    steps: usize,
}

fn lookup<'a>(
    kind: &str,
    map: &'a HashMap<String, DMatrix<f64>>,
    mapping: &str,
) -> &'a DMatrix<f64> {
    match map.get(mapping) {
        Some(matrix) => matrix,
        None => panic!("no mapping named \"{mapping}\" registered in rollout ({kind})"),
    }
}

fn lookup_mut<'a>(
    kind: &str,
    map: &'a mut HashMap<String, DMatrix<f64>>,
    mapping: &str,
) -> &'a mut DMatrix<f64> {
    match map.get_mut(mapping) {
        Some(matrix) => matrix,
        None => panic!("no mapping named \"{mapping}\" registered in rollout ({kind})"),
    }
}

impl Rollout {
    pub(crate) fn from_blueprint(
        blueprint: &RolloutBlueprint,
        steps: usize,
        mass_dim: usize,
        metadata: HashMap<String, DMatrix<f64>>,
    ) -> Self {
        let mut poses = HashMap::new();
        let mut vels = HashMap::new();
        let mut forces = HashMap::new();
        let mut mapping_names = Vec::with_capacity(blueprint.entries.len());
        for (name, pos_dim, vel_dim, force_dim) in &blueprint.entries {
            poses.insert(name.clone(), DMatrix::zeros(*pos_dim, steps));
            vels.insert(name.clone(), DMatrix::zeros(*vel_dim, steps));
            forces.insert(name.clone(), DMatrix::zeros(*force_dim, steps));
            mapping_names.push(name.clone());
        }
        Self {
            mapping_names,
            representation: blueprint.representation.clone(),
            poses,
            vels,
            forces,
            masses: DVector::zeros(mass_dim),
            metadata,
            steps,
        }
    }

    /// Full poses matrix of `mapping`.
    #[must_use]
    pub fn poses_matrix(&self, mapping: &str) -> &DMatrix<f64> {
        lookup("poses", &self.poses, mapping)
    }

    /// Full velocities matrix of `mapping`.
    #[must_use]
    pub fn vels_matrix(&self, mapping: &str) -> &DMatrix<f64> {
        lookup("vels", &self.vels, mapping)
    }

    /// Full forces matrix of `mapping`.
    #[must_use]
    pub fn forces_matrix(&self, mapping: &str) -> &DMatrix<f64> {
        lookup("forces", &self.forces, mapping)
    }

    /// Mutable poses matrix of `mapping`.
    pub fn poses_mut(&mut self, mapping: &str) -> &mut DMatrix<f64> {
        lookup_mut("poses", &mut self.poses, mapping)
    }

    /// Mutable velocities matrix of `mapping`.
    pub fn vels_mut(&mut self, mapping: &str) -> &mut DMatrix<f64> {
        lookup_mut("vels", &mut self.vels, mapping)
    }

    /// Mutable forces matrix of `mapping`.
    pub fn forces_mut(&mut self, mapping: &str) -> &mut DMatrix<f64> {
        lookup_mut("forces", &mut self.forces, mapping)
    }

    /// Mass vector.
    #[must_use]
    pub fn masses_vector(&self) -> &DVector<f64> {
        &self.masses
    }

    /// Mutable mass vector.
    pub fn masses_mut(&mut self) -> &mut DVector<f64> {
        &mut self.masses
    }

    /// Insert or replace a metadata matrix.
    pub fn set_metadata(&mut self, key: &str, value: DMatrix<f64>) {
        self.metadata.insert(key.to_owned(), value);
    }

    /// The full metadata map.
    #[must_use]
    pub fn metadata_map(&self) -> &HashMap<String, DMatrix<f64>> {
        &self.metadata
    }

    /// A mutable view of columns `[start, start + len)`.
    pub fn slice(&mut self, start: usize, len: usize) -> RolloutSlice<'_> {
        assert!(
            start + len <= self.steps,
            "slice [{start}, {}) exceeds rollout length {}",
            start + len,
            self.steps
        );
        RolloutSlice {
            base: self,
            start,
            len,
        }
    }

    /// A read-only view of columns `[start, start + len)`.
    #[must_use]
    pub fn slice_const(&self, start: usize, len: usize) -> RolloutConstSlice<'_> {
        assert!(
            start + len <= self.steps,
            "slice [{start}, {}) exceeds rollout length {}",
            start + len,
            self.steps
        );
        RolloutConstSlice {
            base: self,
            start,
            len,
        }
    }

    /// Copy every matrix of `src` into this rollout. Shapes must agree.
    pub fn copy_from(&mut self, src: &Rollout) {
        assert_eq!(self.steps, src.steps, "rollout column count");
        assert_eq!(self.mapping_names, src.mapping_names, "rollout mappings");
        for name in &src.mapping_names {
            if let Some(m) = self.poses.get_mut(name) {
                m.copy_from(&src.poses[name]);
            }
            if let Some(m) = self.vels.get_mut(name) {
                m.copy_from(&src.vels[name]);
            }
            if let Some(m) = self.forces.get_mut(name) {
                m.copy_from(&src.forces[name]);
            }
        }
        self.masses.copy_from(&src.masses);
        self.metadata = src.metadata.clone();
    }

    /// Copy all columns of `src` into this rollout starting at column
    /// `dst_start`. Mapping sets must agree.
    pub fn copy_columns_from(&mut self, src: &Rollout, dst_start: usize) {
        assert_eq!(self.mapping_names, src.mapping_names, "rollout mappings");
        assert!(
            dst_start + src.steps <= self.steps,
            "column copy [{dst_start}, {}) exceeds rollout length {}",
            dst_start + src.steps,
            self.steps
        );
        for name in &src.mapping_names {
            for (dst, matrix) in [
                (&mut self.poses, &src.poses),
                (&mut self.vels, &src.vels),
                (&mut self.forces, &src.forces),
            ] {
                if let Some(target) = dst.get_mut(name) {
                    target
                        .view_mut((0, dst_start), (matrix[name].nrows(), src.steps))
                        .copy_from(&matrix[name]);
                }
            }
        }
    }
}

fn metadata_or_zero(metadata: &HashMap<String, DMatrix<f64>>, key: &str) -> DMatrix<f64> {
    if let Some(value) = metadata.get(key) {
        value.clone()
    } else {
        let known: Vec<&str> = metadata.keys().map(String::as_str).collect();
        tracing::warn!(key, ?known, "rollout metadata key not found, returning zero matrix");
        DMatrix::zeros(0, 0)
    }
}

impl RolloutView for Rollout {
    fn steps(&self) -> usize {
        self.steps
    }

    fn representation(&self) -> &str {
        &self.representation
    }

    fn mapping_names(&self) -> &[String] {
        &self.mapping_names
    }

    fn poses(&self, mapping: &str) -> DMatrixView<'_, f64> {
        let m = self.poses_matrix(mapping);
        m.columns(0, self.steps)
    }

    fn vels(&self, mapping: &str) -> DMatrixView<'_, f64> {
        let m = self.vels_matrix(mapping);
        m.columns(0, self.steps)
    }

    fn forces(&self, mapping: &str) -> DMatrixView<'_, f64> {
        let m = self.forces_matrix(mapping);
        m.columns(0, self.steps)
    }

    fn masses(&self) -> DVectorView<'_, f64> {
        self.masses.rows(0, self.masses.len())
    }

    fn metadata(&self, key: &str) -> DMatrix<f64> {
        metadata_or_zero(&self.metadata, key)
    }
}

/// A mutable window over a backing [`Rollout`]: columns
/// `[start, start + len)`. The lifetime ties the slice to the backing
/// buffer; write access goes through the windowed views below.
pub struct RolloutSlice<'a> {
    base: &'a mut Rollout,
    start: usize,
    len: usize,
}

impl RolloutSlice<'_> {
    /// Mutable windowed poses of `mapping`.
    pub fn poses_mut(&mut self, mapping: &str) -> DMatrixViewMut<'_, f64> {
        let start = self.start;
        let len = self.len;
        lookup_mut("poses", &mut self.base.poses, mapping).columns_mut(start, len)
    }

    /// Mutable windowed velocities of `mapping`.
    pub fn vels_mut(&mut self, mapping: &str) -> DMatrixViewMut<'_, f64> {
        let start = self.start;
        let len = self.len;
        lookup_mut("vels", &mut self.base.vels, mapping).columns_mut(start, len)
    }

    /// Mutable windowed forces of `mapping`.
    pub fn forces_mut(&mut self, mapping: &str) -> DMatrixViewMut<'_, f64> {
        let start = self.start;
        let len = self.len;
        lookup_mut("forces", &mut self.base.forces, mapping).columns_mut(start, len)
    }

    /// Mutable whole-rollout mass vector (not windowed).
    pub fn masses_mut(&mut self) -> &mut DVector<f64> {
        &mut self.base.masses
    }

    /// Insert or replace a metadata matrix on the backing rollout.
    pub fn set_metadata(&mut self, key: &str, value: DMatrix<f64>) {
        self.base.set_metadata(key, value);
    }
}

impl RolloutView for RolloutSlice<'_> {
    fn steps(&self) -> usize {
        self.len
    }

    fn representation(&self) -> &str {
        self.base.representation()
    }

    fn mapping_names(&self) -> &[String] {
        self.base.mapping_names()
    }

    fn poses(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.poses_matrix(mapping).columns(self.start, self.len)
    }

    fn vels(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.vels_matrix(mapping).columns(self.start, self.len)
    }

    fn forces(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.forces_matrix(mapping).columns(self.start, self.len)
    }

    fn masses(&self) -> DVectorView<'_, f64> {
        RolloutView::masses(self.base)
    }

    fn metadata(&self, key: &str) -> DMatrix<f64> {
        RolloutView::metadata(self.base, key)
    }
}

/// A read-only window over a backing [`Rollout`].
///
/// There are no write entry points on this type at all; if a caller needs
/// mutation it must hold a [`RolloutSlice`] instead.
pub struct RolloutConstSlice<'a> {
    base: &'a Rollout,
    start: usize,
    len: usize,
}

impl RolloutView for RolloutConstSlice<'_> {
    fn steps(&self) -> usize {
        self.len
    }

    fn representation(&self) -> &str {
        self.base.representation()
    }

    fn mapping_names(&self) -> &[String] {
        self.base.mapping_names()
    }

    fn poses(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.poses_matrix(mapping).columns(self.start, self.len)
    }

    fn vels(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.vels_matrix(mapping).columns(self.start, self.len)
    }

    fn forces(&self, mapping: &str) -> DMatrixView<'_, f64> {
        self.base.forces_matrix(mapping).columns(self.start, self.len)
    }

    fn masses(&self) -> DVectorView<'_, f64> {
        RolloutView::masses(self.base)
    }

    fn metadata(&self, key: &str) -> DMatrix<f64> {
        RolloutView::metadata(self.base, key)
    }
}
