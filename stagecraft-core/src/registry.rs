//! Name-keyed registry of step factories.

use crate::error::{Error, Result};
use crate::step::{Step, StepConfig, StepFactory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping step type names to factories.
///
/// The registry is cheaply cloneable and safe to share; registration after
/// startup (e.g. a service reload) replaces factories atomically.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn StepFactory>>>>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a step type, replacing any previous one.
    pub fn register(&self, step_type: impl Into<String>, factory: Arc<dyn StepFactory>) {
        let step_type = step_type.into();
        tracing::debug!(step_type = %step_type, "registered step factory");
        self.factories.write().insert(step_type, factory);
    }

    /// Check whether a step type is registered.
    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.read().contains_key(step_type)
    }

    /// Create a step of the given type from its configuration.
    pub fn create(&self, step_type: &str, config: &StepConfig) -> Result<Arc<dyn Step>> {
        let factory = self
            .factories
            .read()
            .get(step_type)
            .cloned()
            .ok_or_else(|| Error::UnknownStepType {
                step_type: step_type.to_string(),
            })?;
        factory.create(config)
    }

    /// All registered step type names, sorted.
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
