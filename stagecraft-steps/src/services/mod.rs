//! API service definitions compiled into HTTP-client step factories.
//!
//! Service definitions load once at startup from the built-in set and from a
//! user directory; each registered service becomes a step type named after
//! the service, configured with an `operation` key plus operation
//! parameters. Reloading rebuilds the registry atomically.

mod compiler;
mod loader;

pub use compiler::register_services;
pub use loader::{services_path, ServiceRegistry};

use stagecraft_core::{Result, StepRegistry};

/// Rebuild the service registry from disk and swap the service step types.
///
/// Factory replacement on the step registry is atomic per entry; pipelines
/// already built keep their compiled steps.
pub fn reload(steps: &StepRegistry) -> Result<ServiceRegistry> {
    let services = ServiceRegistry::with_builtins()?;
    register_services(steps, &services);
    tracing::info!(count = services.count(), "reloaded service definitions");
    Ok(services)
}
