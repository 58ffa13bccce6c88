//! Inverse-kinematics mapping: body-node poses as problem coordinates.

use nalgebra::{Cholesky, DMatrix, DVector};

use traj_types::{Mapping, Simulator};

use crate::registry::pinv;

/// Which pose components of a body node an [`IkMapping`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkPart {
    /// World-frame translation, 3 rows.
    Linear,
    /// World-frame rotation as a scaled axis, 3 rows.
    Angular,
    /// Rotation then translation, 6 rows.
    Spatial,
}

impl IkPart {
    fn rows(self) -> usize {
        match self {
            IkPart::Linear | IkPart::Angular => 3,
            IkPart::Spatial => 6,
        }
    }
}

/// A mapping whose coordinates are the world-frame poses of selected body
/// nodes.
///
/// Reads go through forward kinematics and the body spatial Jacobians;
/// position writes run a damped-least-squares iteration, and velocity /
/// force transport uses the stacked Jacobian and its pseudo-inverse. When
/// the selected rows span fewer directions than the world has degrees of
/// freedom the mapping is lossy: writes solve in the least-squares sense
/// and round-trips are not guaranteed.
///
/// Angular rows use the scaled-axis parameterization, whose rate Jacobian
/// is taken to be the body's angular velocity Jacobian. This is exact for
/// rotations about a fixed axis and first-order otherwise.
#[derive(Debug, Clone)]
pub struct IkMapping {
    nodes: Vec<(usize, IkPart)>,
    max_iterations: usize,
    tolerance: f64,
    damping: f64,
}

impl IkMapping {
    /// A mapping over the given `(body, part)` selections.
    #[must_use]
    pub fn new(nodes: Vec<(usize, IkPart)>) -> Self {
        assert!(!nodes.is_empty(), "IK mapping needs at least one body node");
        Self {
            nodes,
            max_iterations: 30,
            tolerance: 1e-14,
            damping: 1e-12,
        }
    }

    /// Angular rows for every listed body.
    #[must_use]
    pub fn angular(bodies: &[usize]) -> Self {
        Self::new(bodies.iter().map(|&b| (b, IkPart::Angular)).collect())
    }

    /// Linear rows for every listed body.
    #[must_use]
    pub fn linear(bodies: &[usize]) -> Self {
        Self::new(bodies.iter().map(|&b| (b, IkPart::Linear)).collect())
    }

    /// Full spatial rows for every listed body.
    #[must_use]
    pub fn spatial(bodies: &[usize]) -> Self {
        Self::new(bodies.iter().map(|&b| (b, IkPart::Spatial)).collect())
    }

    /// Override the damped-least-squares iteration parameters.
    #[must_use]
    pub fn with_solver_settings(
        mut self,
        max_iterations: usize,
        tolerance: f64,
        damping: f64,
    ) -> Self {
        assert!(max_iterations > 0 && tolerance > 0.0 && damping >= 0.0);
        self.max_iterations = max_iterations;
        self.tolerance = tolerance;
        self.damping = damping;
        self
    }

    fn dim(&self) -> usize {
        self.nodes.iter().map(|(_, part)| part.rows()).sum()
    }

    /// Stack the selected rows of every body's spatial Jacobian,
    /// `dim × num_dofs`, at the world's current positions.
    fn selection_jacobian<S: Simulator>(&self, world: &S) -> DMatrix<f64> {
        let nv = world.num_dofs();
        let mut jac = DMatrix::zeros(self.dim(), nv);
        let mut row = 0;
        for &(body, part) in &self.nodes {
            let body_jac = world.body_world_jacobian(body);
            let (offset, rows) = match part {
                IkPart::Angular => (0, 3),
                IkPart::Linear => (3, 3),
                IkPart::Spatial => (0, 6),
            };
            jac.view_mut((row, 0), (rows, nv))
                .copy_from(&body_jac.view((offset, 0), (rows, nv)));
            row += rows;
        }
        jac
    }
}

impl<S: Simulator> Mapping<S> for IkMapping {
    fn pos_dim(&self, _world: &S) -> usize {
        self.dim()
    }

    fn vel_dim(&self, _world: &S) -> usize {
        self.dim()
    }

    fn force_dim(&self, _world: &S) -> usize {
        self.dim()
    }

    fn read_positions(&self, world: &S) -> DVector<f64> {
        let mut out = DVector::zeros(self.dim());
        let mut row = 0;
        for &(body, part) in &self.nodes {
            let transform = world.body_world_transform(body);
            if matches!(part, IkPart::Angular | IkPart::Spatial) {
                out.rows_mut(row, 3).copy_from(&transform.rotation.scaled_axis());
                row += 3;
            }
            if matches!(part, IkPart::Linear | IkPart::Spatial) {
                out.rows_mut(row, 3).copy_from(&transform.translation.vector);
                row += 3;
            }
        }
        out
    }

    fn read_velocities(&self, world: &S) -> DVector<f64> {
        self.selection_jacobian(world) * world.velocities()
    }

    fn read_forces(&self, world: &S) -> DVector<f64> {
        // Joint forces map to node wrenches through Jᵀ; reading inverts
        // that in the least-squares sense.
        pinv(&self.selection_jacobian(world).transpose()) * world.forces()
    }

    fn write_positions(&self, world: &mut S, positions: &DVector<f64>) {
        assert_eq!(positions.len(), self.dim(), "IK position length");
        for _ in 0..self.max_iterations {
            let residual = positions - self.read_positions(world);
            if residual.norm() < self.tolerance {
                break;
            }
            let jac = self.selection_jacobian(world);
            let jt = jac.transpose();
            let mut normal = &jt * &jac;
            for i in 0..normal.nrows() {
                normal[(i, i)] += self.damping;
            }
            let rhs = &jt * &residual;
            let dq = match Cholesky::new(normal.clone()) {
                Some(chol) => chol.solve(&rhs),
                None => pinv(&normal) * &rhs,
            };
            world.set_positions(&(world.positions() + dq));
        }
    }

    fn write_velocities(&self, world: &mut S, velocities: &DVector<f64>) {
        assert_eq!(velocities.len(), self.dim(), "IK velocity length");
        let jac = self.selection_jacobian(world);
        world.set_velocities(&(pinv(&jac) * velocities));
    }

    fn write_forces(&self, world: &mut S, forces: &DVector<f64>) {
        assert_eq!(forces.len(), self.dim(), "IK force length");
        let jac = self.selection_jacobian(world);
        world.set_forces(&(jac.transpose() * forces));
    }

    fn position_lower_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::NEG_INFINITY)
    }

    fn position_upper_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::INFINITY)
    }

    fn velocity_lower_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::NEG_INFINITY)
    }

    fn velocity_upper_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::INFINITY)
    }

    fn force_lower_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::NEG_INFINITY)
    }

    fn force_upper_limits(&self, _world: &S) -> DVector<f64> {
        DVector::from_element(self.dim(), f64::INFINITY)
    }

    fn jacobian_wrt_positions(&self, world: &S) -> DMatrix<f64> {
        self.selection_jacobian(world)
    }

    fn jacobian_wrt_velocities(&self, world: &S) -> DMatrix<f64> {
        self.selection_jacobian(world)
    }

    fn jacobian_wrt_forces(&self, world: &S) -> DMatrix<f64> {
        pinv(&self.selection_jacobian(world).transpose())
    }
}
