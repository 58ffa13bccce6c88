//! State shared by every shot problem: registry, losses, metadata, masses.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use traj_types::{Mapping, Simulator};

use crate::loss::LossFn;
use crate::registry::MappingRegistry;
use crate::rollout::Rollout;

/// The per-problem state both [`SingleShot`](crate::SingleShot) and
/// [`MultiShot`](crate::MultiShot) carry: the mapping registry, the
/// objective, user constraints, rollout metadata, and the mass-tuning
/// block.
pub(crate) struct ProblemCommon<S: Simulator> {
    pub registry: MappingRegistry<S>,
    pub loss: LossFn,
    pub constraints: Vec<LossFn>,
    pub metadata: HashMap<String, DMatrix<f64>>,
    pub tune_masses: bool,
    pub masses: DVector<f64>,
    pub mass_lower: DVector<f64>,
    pub mass_upper: DVector<f64>,
}

impl<S: Simulator> ProblemCommon<S> {
    pub fn new(world: &S, loss: LossFn) -> Self {
        Self {
            registry: MappingRegistry::new(world),
            loss,
            constraints: Vec::new(),
            metadata: HashMap::new(),
            tune_masses: false,
            masses: world.masses(),
            mass_lower: world.mass_lower_limits(),
            mass_upper: world.mass_upper_limits(),
        }
    }

    /// Mass block width in the flat vector (zero when not tuning).
    pub fn mass_flat_dim(&self) -> usize {
        if self.tune_masses {
            self.masses.len()
        } else {
            0
        }
    }

    /// World mass dimension, independent of whether it is tuned.
    pub fn mass_dim(&self) -> usize {
        self.masses.len()
    }

    /// Write the tuned masses into the world, if tuning is on.
    pub fn apply_masses(&self, world: &mut S) {
        if self.tune_masses {
            world.set_masses(&self.masses);
        }
    }

    pub fn add_mapping(&mut self, name: &str, mapping: Arc<dyn Mapping<S>>, world: &S) {
        self.registry.add(name, mapping, world);
    }

    pub fn make_rollout(&self, steps: usize) -> Rollout {
        Rollout::from_blueprint(
            &self.registry.blueprint(),
            steps,
            self.mass_dim(),
            self.metadata.clone(),
        )
    }
}
