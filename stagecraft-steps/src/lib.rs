//! Built-in steps for the stagecraft pipeline engine.
//!
//! Ten reference step implementations grouped by concern:
//!
//! - `triggers` - continuous entry points (`cron`, `webhook`)
//! - `net` - the HTTP client (`http_client`)
//! - `data` - payload manipulation (`json`, `map`, `js`, `file`)
//! - `flow` - control flow (`if`, `delay`, `foreach`)
//!
//! plus the `services` module, which loads API service definitions and
//! registers each one as a step type compiled down to `http_client`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data;
pub mod flow;
pub mod net;
pub mod services;
pub mod triggers;

use stagecraft_core::StepRegistry;
use std::sync::Arc;

/// Register every built-in step type on a registry.
pub fn register_builtins(registry: &StepRegistry) {
    registry.register("cron", Arc::new(triggers::cron::factory));
    registry.register("webhook", Arc::new(triggers::webhook::factory));
    registry.register("http_client", Arc::new(net::http_client::factory));
    registry.register("json", Arc::new(data::json::factory));
    registry.register("map", Arc::new(data::map::factory));
    registry.register("js", Arc::new(data::js::factory));
    registry.register("file", Arc::new(data::file::factory));
    registry.register("if", Arc::new(flow::conditional::factory));
    registry.register("delay", Arc::new(flow::delay::factory));
    registry.register("foreach", Arc::new(flow::foreach::factory));
}

/// A registry pre-populated with every built-in step type.
pub fn builtin_registry() -> StepRegistry {
    let registry = StepRegistry::new();
    register_builtins(&registry);
    registry
}
