//! Shooting-method trajectory optimization over a differentiable
//! simulator.
//!
//! This crate turns a time-stepping rigid-body simulator (anything
//! implementing [`traj_types::Simulator`]) into a constrained nonlinear
//! program an off-the-shelf solver can consume:
//!
//! - [`SingleShot`] — one contiguous trajectory driven by per-step forces,
//!   with flatten/unflatten, bounds, a cached forward unroll, a chained
//!   final-state Jacobian, and gradient backpropagation across every step
//! - [`MultiShot`] — N single shots coupled by knot-point defect
//!   constraints, with a reusable sparse Jacobian layout and optional
//!   parallel execution that is bit-identical to the serial path
//! - [`Problem`] — the solver-facing contract both implement
//! - [`Rollout`] / [`RolloutSlice`] / [`RolloutConstSlice`] — materialized
//!   trajectories per named state-space mapping
//! - [`LossFn`] — value + gradient callables over rollouts, doubling as
//!   scalar constraints with bounds
//! - [`IkMapping`] — body-node poses as problem coordinates, swappable
//!   against the raw joint-space identity at runtime
//! - [`OptimizationRecord`] + [`ProjectedGradientSolver`] — per-iteration
//!   history, re-entrant optimization, and a deterministic reference
//!   driver
//!
//! # Data flow
//!
//! ```text
//! solver ──► Problem ──► MultiShot ──► SingleShot ──► Simulator
//!                            │              │    per-step linearizations
//!                            ▼              ▼
//!                     mapping registry ─► Rollout ─► LossFn
//!                            ▲                          │
//!                            └── gradients backprop ◄───┘
//! ```
//!
//! # Quick start
//!
//! ```ignore
//! use traj_opt::{LossFn, MultiShot, Problem, ProjectedGradientSolver, RolloutView};
//!
//! let loss = LossFn::new(|rollout: &dyn RolloutView| {
//!     let poses = rollout.poses("identity");
//!     poses.column(rollout.steps() - 1).norm_squared()
//! });
//! let mut problem = MultiShot::new(&world, loss, 100, 20, false);
//! let (record, outcome) = ProjectedGradientSolver::default()
//!     .optimize(&mut problem, &mut world);
//! println!("{outcome:?} after {} iterations", record.len());
//! ```
//!
//! # Parallelism
//!
//! The `parallel` feature (on by default) enables rayon-backed multi-shot
//! execution, opted into per problem at runtime. Each shot runs on a
//! private clone of the simulator and writes into disjoint output ranges,
//! so parallel results match serial ones bit for bit.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
    clippy::too_many_lines,       // Jacobian assembly routines are naturally long
    clippy::doc_markdown
)]

mod common;

pub mod ik;
pub mod json;
pub mod loss;
pub mod multi_shot;
pub mod problem;
pub mod record;
pub mod registry;
pub mod rollout;
pub mod single_shot;
pub mod solver;

pub use ik::{IkMapping, IkPart};
pub use json::rollout_to_json;
pub use loss::LossFn;
pub use multi_shot::MultiShot;
pub use problem::Problem;
pub use record::{OptimizationRecord, OptimizationStep};
pub use registry::{MappingEntry, MappingRegistry, IDENTITY};
pub use rollout::{Rollout, RolloutConstSlice, RolloutSlice, RolloutView};
pub use single_shot::SingleShot;
pub use solver::{ConvergenceOutcome, ProjectedGradientSolver, SolverConfig};
