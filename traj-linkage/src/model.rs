//! Static linkage description and named model factories.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::world::LinkageWorld;

/// The motion type of a joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    /// Prismatic: translation along the joint axis.
    Slide,
    /// Revolute: rotation about the joint axis.
    Hinge,
}

/// One joint (and the body it carries) in a serial chain.
///
/// Each joint contributes a single degree of freedom. The generalized
/// inertia is `mass` for a slide joint and `mass · lever²` for a hinge;
/// gravity acts as `−mass·g·axis_z` on slides and `−mass·g·lever·sin(q)`
/// on hinges.
#[derive(Debug, Clone)]
pub struct Joint {
    /// Body-node name, used for kinematic queries and JSON keys.
    pub name: String,
    /// Slide or hinge.
    pub kind: JointKind,
    /// Joint axis in the parent frame (unit length).
    pub axis: Vector3<f64>,
    /// Fixed translation from the parent joint frame to this joint frame.
    pub offset: Vector3<f64>,
    /// Default body mass parameter.
    pub mass: f64,
    /// Gravity lever arm; also sets hinge inertia `mass · lever²`.
    pub lever: f64,
    /// Viscous damping coefficient on the joint velocity.
    pub damping: f64,
    /// Position limits `(lower, upper)`.
    pub position_limits: (f64, f64),
    /// Velocity limits `(lower, upper)`.
    pub velocity_limits: (f64, f64),
    /// Applied-force limits `(lower, upper)`.
    pub force_limits: (f64, f64),
    /// Tunable range of the mass parameter `(lower, upper)`.
    pub mass_limits: (f64, f64),
}

impl Joint {
    /// A slide joint with unit mass and wide default limits.
    #[must_use]
    pub fn slide(name: &str, axis: Vector3<f64>) -> Self {
        Self::new(name, JointKind::Slide, axis)
    }

    /// A hinge joint with unit mass, unit lever, and wide default limits.
    #[must_use]
    pub fn hinge(name: &str, axis: Vector3<f64>) -> Self {
        Self::new(name, JointKind::Hinge, axis)
    }

    fn new(name: &str, kind: JointKind, axis: Vector3<f64>) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            axis,
            offset: Vector3::zeros(),
            mass: 1.0,
            lever: 1.0,
            damping: 0.0,
            position_limits: (f64::NEG_INFINITY, f64::INFINITY),
            velocity_limits: (f64::NEG_INFINITY, f64::INFINITY),
            force_limits: (-100.0, 100.0),
            mass_limits: (0.05, 20.0),
        }
    }
}

/// A linear spring coupling the positions of two joints:
/// `τ_a += k·(q_b − q_a)` and symmetrically for `b`.
#[derive(Debug, Clone, Copy)]
pub struct CouplingSpring {
    /// First coupled DOF.
    pub a: usize,
    /// Second coupled DOF.
    pub b: usize,
    /// Spring stiffness.
    pub stiffness: f64,
}

/// A smooth one-sided floor spring on a single DOF.
///
/// Applies `k · softplus(−q; β)` — a force that fades in smoothly as the
/// coordinate drops below zero, so the dynamics stay differentiable.
#[derive(Debug, Clone, Copy)]
pub struct FloorSpring {
    /// The DOF the floor pushes on.
    pub dof: usize,
    /// Spring stiffness `k`.
    pub stiffness: f64,
    /// Softplus sharpness `β`; larger is closer to a hard stop.
    pub sharpness: f64,
}

/// Static description of a linkage: joints, couplings, gravity, timestep.
#[derive(Debug, Clone)]
pub struct LinkageModel {
    /// World name, used to namespace body keys in emitted JSON.
    pub name: String,
    /// Serial chain of joints, root first.
    pub joints: Vec<Joint>,
    /// Coupling springs between joint positions.
    pub springs: Vec<CouplingSpring>,
    /// Optional floor spring.
    pub floor: Option<FloorSpring>,
    /// Gravity magnitude along `−Z`.
    pub gravity: f64,
    /// Integration timestep in seconds.
    pub timestep: f64,
}

impl LinkageModel {
    /// Number of degrees of freedom (one per joint).
    #[must_use]
    pub fn num_dofs(&self) -> usize {
        self.joints.len()
    }

    /// Create a world at the model's rest state (all zeros, default
    /// masses). The world holds its own shared handle to the model, so
    /// cloning the world (for workers, finite differences, etc.) shares
    /// rather than copies it.
    #[must_use]
    pub fn make_world(&self) -> LinkageWorld {
        LinkageWorld::new(Arc::new(self.clone()))
    }

    // ==================== Named factories ====================

    /// A single frictionless box sliding along X. One DOF, no gravity
    /// component along the axis, no contacts.
    #[must_use]
    pub fn sliding_box() -> Self {
        let joint = Joint::slide("box", Vector3::x());
        Self {
            name: "sliding_box".to_owned(),
            joints: vec![joint],
            springs: Vec::new(),
            floor: None,
            gravity: 9.81,
            timestep: 0.01,
        }
    }

    /// A one-DOF gravity pendulum on a hinge about Y.
    #[must_use]
    pub fn spinner() -> Self {
        let mut arm = Joint::hinge("arm", Vector3::y());
        arm.lever = 0.5;
        arm.damping = 0.05;
        arm.offset = Vector3::new(0.0, 0.0, 0.5);
        Self {
            name: "spinner".to_owned(),
            joints: vec![arm],
            springs: Vec::new(),
            floor: None,
            gravity: 9.81,
            timestep: 0.01,
        }
    }

    /// A prismatic cart along X carrying a hinged pole about Y, with an
    /// elastic cart-pole coupling.
    #[must_use]
    pub fn cartpole() -> Self {
        let mut cart = Joint::slide("cart", Vector3::x());
        cart.damping = 0.1;
        let mut pole = Joint::hinge("pole", Vector3::y());
        pole.mass = 0.5;
        pole.lever = 0.5;
        pole.damping = 0.1;
        pole.offset = Vector3::new(0.0, 0.0, 0.25);
        Self {
            name: "cartpole".to_owned(),
            joints: vec![cart, pole],
            springs: vec![CouplingSpring {
                a: 0,
                b: 1,
                stiffness: 2.0,
            }],
            floor: None,
            gravity: 9.81,
            timestep: 0.01,
        }
    }

    /// A five-DOF articulated "worm" over a smooth floor: a vertical slide
    /// root plus four hinged segments, springs chaining every adjacent pair.
    #[must_use]
    pub fn jump_worm() -> Self {
        let mut root = Joint::slide("root", Vector3::z());
        root.damping = 0.2;
        let mut joints = vec![root];
        for i in 0..4 {
            let mut seg = Joint::hinge(&format!("segment_{i}"), Vector3::y());
            seg.mass = 0.4;
            seg.lever = 0.3;
            seg.damping = 0.2;
            seg.offset = Vector3::new(0.3, 0.0, 0.0);
            joints.push(seg);
        }
        let springs = (0..4)
            .map(|i| CouplingSpring {
                a: i,
                b: i + 1,
                stiffness: 3.0,
            })
            .collect();
        Self {
            name: "jump_worm".to_owned(),
            joints,
            springs,
            floor: Some(FloorSpring {
                dof: 0,
                stiffness: 200.0,
                sharpness: 10.0,
            }),
            gravity: 9.81,
            timestep: 0.01,
        }
    }
}
