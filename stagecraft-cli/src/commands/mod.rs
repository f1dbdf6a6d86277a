//! CLI subcommand implementations.

pub mod run;
pub mod steps;
pub mod validate;
pub mod version;

use stagecraft_core::StepRegistry;
use stagecraft_steps::services::{register_services, ServiceRegistry};

/// Build the full step registry: built-in steps plus every loaded service.
pub fn full_registry() -> anyhow::Result<StepRegistry> {
    let registry = stagecraft_steps::builtin_registry();
    let services = ServiceRegistry::with_builtins()?;
    register_services(&registry, &services);
    Ok(registry)
}
