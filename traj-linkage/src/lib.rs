//! Minimal articulated-linkage simulator.
//!
//! A deliberately small rigid-body world implementing the
//! [`traj_types::Simulator`] interface: chains of slide and hinge joints
//! with diagonal generalized inertia, linear damping, adjacent-joint
//! coupling springs, sine gravity torques, and an optional smooth floor
//! spring. Integration is semi-implicit Euler, and the per-step
//! linearization is **analytic and exact** for this dynamics family —
//! which is exactly what makes it a good fixture for differentiating
//! trajectory optimizers against finite differences.
//!
//! # Model / world split
//!
//! - [`LinkageModel`] is static: joint definitions, springs, gravity,
//!   timestep. Spawn as many worlds from it as needed.
//! - [`LinkageWorld`] is dynamic: positions, velocities, applied forces,
//!   and the current mass parameters. Cloning a world clones only the
//!   dynamic state; the model stays shared behind an `Arc`.
//!
//! # Quick start
//!
//! ```
//! use traj_linkage::LinkageModel;
//! use traj_types::Simulator;
//!
//! let model = LinkageModel::cartpole();
//! let mut world = model.make_world();
//! world.set_positions(&nalgebra::dvector![0.0, 0.26]);
//! let lin = world.step_with_linearization().unwrap();
//! assert_eq!(lin.pos_dim(), 2);
//! ```
//!
//! The dynamics are defined directly on the generalized coordinates (no
//! configuration-dependent inertia, no contacts); forward kinematics is a
//! purely kinematic layer used for body-node queries and JSON emission.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
    clippy::doc_markdown
)]

pub mod kinematics;
pub mod model;
pub mod world;

pub use model::{CouplingSpring, FloorSpring, Joint, JointKind, LinkageModel};
pub use world::LinkageWorld;
