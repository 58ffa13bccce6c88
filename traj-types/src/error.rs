//! Error types for simulator operations.

use thiserror::Error;

/// Errors a simulator step can raise.
///
/// These are physical/numerical outcomes, not programming errors. A failed
/// step aborts the current unroll and surfaces to the caller; the scoped
/// world restoration still runs. Dimension mismatches and other contract
/// violations are bugs and panic instead of returning a variant here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// State became non-finite during integration (NaN or infinity).
    #[error("simulation diverged at dof {dof}: value {value} is not finite")]
    Diverged {
        /// The degree of freedom where non-finite state was detected.
        dof: usize,
        /// The offending value.
        value: f64,
    },

    /// Generalized inertia lost positive-definiteness, usually because a
    /// mass parameter was driven to zero or below.
    #[error("singular generalized inertia at dof {dof}: {inertia}")]
    SingularInertia {
        /// The degree of freedom with non-positive inertia.
        dof: usize,
        /// The offending inertia value.
        inertia: f64,
    },
}
