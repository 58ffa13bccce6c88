//! Interface layer for shooting-method trajectory optimization.
//!
//! This crate defines the contract between a time-stepping rigid-body
//! simulator and the problem builders that turn it into a nonlinear program:
//!
//! - [`Simulator`] — the consumed world interface: state access, stepping,
//!   per-step linearization, body queries for kinematic views
//! - [`StepLinearization`] — the Jacobians of one simulation step, treated
//!   as a black box by everything downstream
//! - [`Mapping`] — a named, invertible view over the simulator state
//!   (the [`IdentityMapping`] raw joint-space view lives here too)
//! - [`WorldState`] / [`scoped`] — save/restore of the mutable world,
//!   guaranteed on every exit path of a scoped operation
//! - [`StepError`] — the one recoverable error class (physical/numerical
//!   step outcomes); everything else is a programmer-contract violation
//!   and panics
//!
//! # Layering
//!
//! These types are **pure interface**. They know nothing about shots,
//! rollouts, or solvers. Simulators implement the traits from below;
//! problem builders consume them from above. Either side can be swapped
//! without touching the other.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
    clippy::doc_markdown          // Not all technical terms need backticks
)]

pub mod error;
pub mod euler;
pub mod linearization;
pub mod mapping;
pub mod simulator;

pub use error::StepError;
pub use linearization::StepLinearization;
pub use mapping::{IdentityMapping, Mapping};
pub use simulator::{scoped, Simulator, WorldState};
