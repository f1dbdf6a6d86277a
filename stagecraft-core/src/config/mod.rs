//! Configuration schemas loaded from YAML.
//!
//! Two document families exist: pipeline definitions (stages, dependencies,
//! global variables/secrets) and API service definitions (operations compiled
//! into HTTP-client steps).

mod pipeline;
mod service;
mod validator;

pub use pipeline::{DependencyRef, PipelineConfig, StageConfig};
pub use service::{
    AuthConfig, OperationDef, ParameterDef, ServiceDefaults, ServiceDefinition, ServiceInfo,
};
pub use validator::validate_service;
