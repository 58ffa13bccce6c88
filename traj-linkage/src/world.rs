//! Dynamic world state and the semi-implicit Euler step.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Isometry3};

use traj_types::{Simulator, StepError, StepLinearization};

use crate::kinematics::{body_jacobian, body_transforms};
use crate::model::{JointKind, LinkageModel};

/// Dynamic state of a [`LinkageModel`]: positions, velocities, applied
/// forces, and the current mass parameters.
///
/// Cloning a world clones the dynamic state only; the model stays shared.
/// The step function integrates
///
/// ```text
/// v' = v + h · (f − d·v + springs(q) + gravity(q, m) + floor(q)) / I(m)
/// q' = q + h · v'
/// ```
///
/// with diagonal generalized inertia `I_i = m_i` (slide) or `m_i·lever_i²`
/// (hinge). Because every force term has a closed-form derivative, the
/// [`step_with_linearization`](Simulator::step_with_linearization)
/// Jacobians — including the mass-parameter columns — are exact.
#[derive(Debug, Clone)]
pub struct LinkageWorld {
    model: Arc<LinkageModel>,
    positions: DVector<f64>,
    velocities: DVector<f64>,
    forces: DVector<f64>,
    masses: DVector<f64>,
}

impl LinkageWorld {
    /// A world at the model's rest state: zero positions, velocities, and
    /// forces, default masses.
    #[must_use]
    pub fn new(model: Arc<LinkageModel>) -> Self {
        let nv = model.num_dofs();
        let masses = DVector::from_iterator(nv, model.joints.iter().map(|j| j.mass));
        Self {
            model,
            positions: DVector::zeros(nv),
            velocities: DVector::zeros(nv),
            forces: DVector::zeros(nv),
            masses,
        }
    }

    /// The shared model.
    #[must_use]
    pub fn model(&self) -> &LinkageModel {
        &self.model
    }

    /// Generalized inertia of DOF `i` under the current masses.
    fn inertia(&self, i: usize) -> f64 {
        match self.model.joints[i].kind {
            JointKind::Slide => self.masses[i],
            JointKind::Hinge => self.masses[i] * self.model.joints[i].lever.powi(2),
        }
    }

    /// Generalized force on DOF `i` from everything except damping:
    /// applied force, springs, gravity, floor.
    fn smooth_force(&self, i: usize) -> f64 {
        let joint = &self.model.joints[i];
        let q = &self.positions;
        let mut rhs = self.forces[i];
        for spring in &self.model.springs {
            if spring.a == i {
                rhs += spring.stiffness * (q[spring.b] - q[spring.a]);
            } else if spring.b == i {
                rhs += spring.stiffness * (q[spring.a] - q[spring.b]);
            }
        }
        rhs += match joint.kind {
            JointKind::Slide => -self.masses[i] * self.model.gravity * joint.axis.z,
            JointKind::Hinge => -self.masses[i] * self.model.gravity * joint.lever * q[i].sin(),
        };
        if let Some(floor) = self.model.floor {
            if floor.dof == i {
                rhs += floor.stiffness * softplus(-q[i], floor.sharpness);
            }
        }
        rhs
    }

    /// `∂(smooth force)/∂q`, dense `nv × nv`, at the current state.
    fn smooth_force_position_jacobian(&self) -> DMatrix<f64> {
        let nv = self.model.num_dofs();
        let mut dfdq = DMatrix::zeros(nv, nv);
        for spring in &self.model.springs {
            dfdq[(spring.a, spring.a)] -= spring.stiffness;
            dfdq[(spring.a, spring.b)] += spring.stiffness;
            dfdq[(spring.b, spring.b)] -= spring.stiffness;
            dfdq[(spring.b, spring.a)] += spring.stiffness;
        }
        for (i, joint) in self.model.joints.iter().enumerate() {
            if joint.kind == JointKind::Hinge {
                dfdq[(i, i)] -=
                    self.masses[i] * self.model.gravity * joint.lever * self.positions[i].cos();
            }
        }
        if let Some(floor) = self.model.floor {
            let d = floor.dof;
            dfdq[(d, d)] -= floor.stiffness * logistic(-self.positions[d], floor.sharpness);
        }
        dfdq
    }

    /// `∂(smooth force + gravity)/∂m_i` for DOF `i` (diagonal in this model).
    fn smooth_force_mass_partial(&self, i: usize) -> f64 {
        let joint = &self.model.joints[i];
        match joint.kind {
            JointKind::Slide => -self.model.gravity * joint.axis.z,
            JointKind::Hinge => -self.model.gravity * joint.lever * self.positions[i].sin(),
        }
    }

    fn check_inertia(&self) -> Result<(), StepError> {
        for i in 0..self.model.num_dofs() {
            let inertia = self.inertia(i);
            if !(inertia > 0.0) {
                return Err(StepError::SingularInertia { dof: i, inertia });
            }
        }
        Ok(())
    }

    fn check_finite(&self) -> Result<(), StepError> {
        for i in 0..self.model.num_dofs() {
            for value in [self.positions[i], self.velocities[i]] {
                if !value.is_finite() {
                    return Err(StepError::Diverged { dof: i, value });
                }
            }
        }
        Ok(())
    }

    fn integrate(&mut self) -> Result<(), StepError> {
        self.check_inertia()?;
        let h = self.model.timestep;
        let nv = self.model.num_dofs();
        for i in 0..nv {
            let rhs = self.smooth_force(i) - self.model.joints[i].damping * self.velocities[i];
            self.velocities[i] += h * rhs / self.inertia(i);
        }
        for i in 0..nv {
            self.positions[i] += h * self.velocities[i];
        }
        self.check_finite()
    }
}

/// `softplus(x; β) = ln(1 + e^{βx}) / β`, evaluated stably for large `|βx|`.
fn softplus(x: f64, beta: f64) -> f64 {
    let t = beta * x;
    if t > 30.0 {
        x
    } else if t < -30.0 {
        0.0
    } else {
        t.exp().ln_1p() / beta
    }
}

/// `σ(βx)`, the derivative of [`softplus`] with respect to `x`.
fn logistic(x: f64, beta: f64) -> f64 {
    let t = beta * x;
    if t > 30.0 {
        1.0
    } else if t < -30.0 {
        0.0
    } else {
        1.0 / (1.0 + (-t).exp())
    }
}

impl Simulator for LinkageWorld {
    fn num_dofs(&self) -> usize {
        self.model.num_dofs()
    }

    fn mass_dim(&self) -> usize {
        self.model.num_dofs()
    }

    fn positions(&self) -> DVector<f64> {
        self.positions.clone()
    }

    fn velocities(&self) -> DVector<f64> {
        self.velocities.clone()
    }

    fn forces(&self) -> DVector<f64> {
        self.forces.clone()
    }

    fn masses(&self) -> DVector<f64> {
        self.masses.clone()
    }

    fn set_positions(&mut self, positions: &DVector<f64>) {
        assert_eq!(positions.len(), self.model.num_dofs(), "position length");
        self.positions.copy_from(positions);
    }

    fn set_velocities(&mut self, velocities: &DVector<f64>) {
        assert_eq!(velocities.len(), self.model.num_dofs(), "velocity length");
        self.velocities.copy_from(velocities);
    }

    fn set_forces(&mut self, forces: &DVector<f64>) {
        assert_eq!(forces.len(), self.model.num_dofs(), "force length");
        self.forces.copy_from(forces);
    }

    fn set_masses(&mut self, masses: &DVector<f64>) {
        assert_eq!(masses.len(), self.model.num_dofs(), "mass length");
        self.masses.copy_from(masses);
    }

    fn position_lower_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.position_limits.0),
        )
    }

    fn position_upper_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.position_limits.1),
        )
    }

    fn velocity_lower_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.velocity_limits.0),
        )
    }

    fn velocity_upper_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.velocity_limits.1),
        )
    }

    fn force_lower_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.force_limits.0),
        )
    }

    fn force_upper_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.force_limits.1),
        )
    }

    fn mass_lower_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.mass_limits.0),
        )
    }

    fn mass_upper_limits(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.num_dofs(),
            self.model.joints.iter().map(|j| j.mass_limits.1),
        )
    }

    fn step(&mut self) -> Result<(), StepError> {
        self.integrate()
    }

    fn step_with_linearization(&mut self) -> Result<StepLinearization, StepError> {
        self.check_inertia()?;
        let h = self.model.timestep;
        let nv = self.model.num_dofs();
        let mut lin = StepLinearization::zeros(nv, nv, nv, nv);

        // All partials are taken at the pre-step state; the update is
        // explicit in (q, v, f, m) so this is exact.
        let dfdq = self.smooth_force_position_jacobian();
        for i in 0..nv {
            let inertia = self.inertia(i);
            let damping = self.model.joints[i].damping;
            let rhs = self.smooth_force(i) - damping * self.velocities[i];

            // ∂v'/∂q row i: h · dfdq[i, :] / I_i
            for j in 0..nv {
                lin.pos_vel[(i, j)] = h * dfdq[(i, j)] / inertia;
            }
            // ∂v'/∂v and ∂v'/∂f are diagonal.
            lin.vel_vel[(i, i)] = 1.0 - h * damping / inertia;
            lin.force_vel[(i, i)] = h / inertia;

            // ∂v'/∂m_i: the force term's own mass dependence, minus the
            // inertia scaling of the whole right-hand side. `∂I_i/∂m_i`
            // equals `I_i / m_i` for both joint kinds.
            let dforce_dm = self.smooth_force_mass_partial(i);
            lin.mass_vel[(i, i)] = h * (dforce_dm / inertia - rhs / (self.masses[i] * inertia));
        }

        // q' = q + h·v' chains the velocity rows.
        for i in 0..nv {
            for j in 0..nv {
                lin.pos_pos[(i, j)] = h * lin.pos_vel[(i, j)];
                lin.vel_pos[(i, j)] = h * lin.vel_vel[(i, j)];
                lin.force_pos[(i, j)] = h * lin.force_vel[(i, j)];
                lin.mass_pos[(i, j)] = h * lin.mass_vel[(i, j)];
            }
            lin.pos_pos[(i, i)] += 1.0;
        }

        self.integrate()?;
        Ok(lin)
    }

    fn num_bodies(&self) -> usize {
        self.model.joints.len()
    }

    fn body_name(&self, body: usize) -> &str {
        &self.model.joints[body].name
    }

    fn body_world_transform(&self, body: usize) -> Isometry3<f64> {
        body_transforms(&self.model, &self.positions)[body]
    }

    fn body_world_jacobian(&self, body: usize) -> DMatrix<f64> {
        body_jacobian(&self.model, &self.positions, body)
    }

    fn world_name(&self) -> &str {
        &self.model.name
    }
}
