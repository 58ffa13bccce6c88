//! Name-keyed mapping registry and representation-space conjugation.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DMatrix;

use traj_types::{IdentityMapping, Mapping, Simulator, StepLinearization};

use crate::rollout::RolloutBlueprint;

/// The always-present raw joint-space mapping name.
pub const IDENTITY: &str = "identity";

/// A registered mapping plus its dimensions, recorded once at registration
/// time. Dimensions are constant for the lifetime of the owning problem.
pub struct MappingEntry<S: Simulator> {
    /// The mapping itself, shared between a problem and its sub-shots.
    pub mapping: Arc<dyn Mapping<S>>,
    /// Mapped position dimension.
    pub pos_dim: usize,
    /// Mapped velocity dimension.
    pub vel_dim: usize,
    /// Mapped force dimension.
    pub force_dim: usize,
}

impl<S: Simulator> Clone for MappingEntry<S> {
    fn clone(&self) -> Self {
        Self {
            mapping: Arc::clone(&self.mapping),
            pos_dim: self.pos_dim,
            vel_dim: self.vel_dim,
            force_dim: self.force_dim,
        }
    }
}

/// Name → mapping lookup with a designated representation.
///
/// The representation mapping dictates the vector space start states and
/// knot defects live in. Lookups of unknown names are programmer errors
/// and panic; the `"identity"` mapping is registered on construction and
/// is the initial representation.
pub struct MappingRegistry<S: Simulator> {
    names: Vec<String>,
    entries: HashMap<String, MappingEntry<S>>,
    representation: String,
}

impl<S: Simulator> Clone for MappingRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            names: self.names.clone(),
            entries: self.entries.clone(),
            representation: self.representation.clone(),
        }
    }
}

impl<S: Simulator> MappingRegistry<S> {
    /// A registry holding only the identity mapping, which is also the
    /// representation.
    pub fn new(world: &S) -> Self {
        let mut registry = Self {
            names: Vec::new(),
            entries: HashMap::new(),
            representation: IDENTITY.to_owned(),
        };
        registry.add(IDENTITY, Arc::new(IdentityMapping::new()), world);
        registry
    }

    /// Register `mapping` under `name`, recording its dimensions against
    /// the current world. Panics on duplicate names.
    pub fn add(&mut self, name: &str, mapping: Arc<dyn Mapping<S>>, world: &S) {
        assert!(
            !self.entries.contains_key(name),
            "mapping \"{name}\" is already registered"
        );
        let entry = MappingEntry {
            pos_dim: mapping.pos_dim(world),
            vel_dim: mapping.vel_dim(world),
            force_dim: mapping.force_dim(world),
            mapping,
        };
        self.names.push(name.to_owned());
        self.entries.insert(name.to_owned(), entry);
    }

    /// Registered names in registration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Entry for `name`. Panics if absent — a missing mapping is a
    /// programmer-contract violation, unlike missing rollout metadata.
    pub fn entry(&self, name: &str) -> &MappingEntry<S> {
        match self.entries.get(name) {
            Some(entry) => entry,
            None => panic!("no mapping named \"{name}\" registered"),
        }
    }

    /// Name of the representation mapping.
    pub fn representation_name(&self) -> &str {
        &self.representation
    }

    /// Entry of the representation mapping.
    pub fn representation(&self) -> &MappingEntry<S> {
        self.entry(&self.representation)
    }

    /// Point the registry at a different registered representation. Data
    /// conversion is the owning problem's job; see the problems'
    /// `switch_representation`.
    pub fn set_representation(&mut self, name: &str) {
        assert!(
            self.entries.contains_key(name),
            "no mapping named \"{name}\" registered"
        );
        self.representation = name.to_owned();
    }

    /// Shape description for rollouts built against this registry.
    pub(crate) fn blueprint(&self) -> RolloutBlueprint {
        RolloutBlueprint {
            entries: self
                .names
                .iter()
                .map(|name| {
                    let e = &self.entries[name];
                    (name.clone(), e.pos_dim, e.vel_dim, e.force_dim)
                })
                .collect(),
            representation: self.representation.clone(),
        }
    }

    /// Pseudo-inverses of the representation's read Jacobians at the
    /// current (pre-step) world state, or `None` for the identity
    /// representation.
    pub(crate) fn pre_step_frames(&self, world: &S) -> Option<RepFrames> {
        let rep = self.representation();
        if rep.mapping.is_identity() {
            return None;
        }
        Some(RepFrames {
            pinv_pos: pinv(&rep.mapping.jacobian_wrt_positions(world)),
            pinv_vel: pinv(&rep.mapping.jacobian_wrt_velocities(world)),
            pinv_force: pinv(&rep.mapping.jacobian_wrt_forces(world)),
        })
    }

    /// Conjugate a world-space step linearization into representation
    /// space: post-step read Jacobians on the left, pre-step write
    /// directions (pseudo-inverses) on the right. Mass columns only need
    /// the output side. Identity representations pass through untouched.
    pub(crate) fn map_linearization(
        &self,
        world: &S,
        frames: Option<RepFrames>,
        lin: StepLinearization,
    ) -> StepLinearization {
        let Some(frames) = frames else {
            return lin;
        };
        let rep = self.representation();
        let rp_out = rep.mapping.jacobian_wrt_positions(world);
        let rv_out = rep.mapping.jacobian_wrt_velocities(world);
        StepLinearization {
            pos_pos: &rp_out * &lin.pos_pos * &frames.pinv_pos,
            vel_pos: &rp_out * &lin.vel_pos * &frames.pinv_vel,
            force_pos: &rp_out * &lin.force_pos * &frames.pinv_force,
            pos_vel: &rv_out * &lin.pos_vel * &frames.pinv_pos,
            vel_vel: &rv_out * &lin.vel_vel * &frames.pinv_vel,
            force_vel: &rv_out * &lin.force_vel * &frames.pinv_force,
            mass_pos: &rp_out * &lin.mass_pos,
            mass_vel: &rv_out * &lin.mass_vel,
        }
    }
}

/// Pre-step conjugation frames for a non-identity representation.
pub(crate) struct RepFrames {
    pinv_pos: DMatrix<f64>,
    pinv_vel: DMatrix<f64>,
    pinv_force: DMatrix<f64>,
}

/// Moore–Penrose pseudo-inverse via SVD.
pub(crate) fn pinv(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    match matrix.clone().pseudo_inverse(1e-12) {
        Ok(inverse) => inverse,
        // pseudo_inverse only fails for a negative epsilon.
        Err(message) => panic!("pseudo-inverse failed: {message}"),
    }
}
