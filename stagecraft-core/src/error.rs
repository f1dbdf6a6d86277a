//! Error types for stagecraft.
//!
//! Errors are grouped by when they surface: configuration errors abort
//! construction, validation errors abort before the pipeline runs, resolve
//! and I/O errors are per-event and non-fatal to the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for stagecraft operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration errors (abort construction)
    // =========================================================================
    /// YAML could not be parsed.
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No factory is registered for the requested step type.
    #[error("unknown step type: {step_type}")]
    UnknownStepType {
        /// The step type that was requested.
        step_type: String,
    },

    /// A required configuration key is absent.
    #[error("missing required configuration key: {key}")]
    MissingConfig {
        /// The absent key.
        key: String,
    },

    /// A configuration key holds an unusable value.
    #[error("invalid configuration for '{key}': {cause}")]
    InvalidConfig {
        /// The offending key.
        key: String,
        /// Why the value is unusable.
        cause: String,
    },

    /// An operation name does not exist in a service definition.
    #[error("operation '{operation}' not found in service '{service}'")]
    UnknownOperation {
        /// The service that was queried.
        service: String,
        /// The operation that was requested.
        operation: String,
    },

    /// A service definition failed validation.
    #[error("invalid service definition '{service}': {cause}")]
    InvalidService {
        /// The service name (or filename when the name is absent).
        service: String,
        /// Why the definition is invalid.
        cause: String,
    },

    /// A required operation parameter was not provided by the user.
    #[error("required parameter '{name}' not provided")]
    MissingParameter {
        /// The parameter name.
        name: String,
    },

    /// A `$param` reference points at a parameter the operation never defines.
    #[error("parameter '{name}' not found")]
    UnknownParameter {
        /// The referenced parameter name.
        name: String,
    },

    // =========================================================================
    // Validation errors (abort before Running)
    // =========================================================================
    /// A stage names a dependency that does not exist in the pipeline.
    #[error("stage '{stage}' depends on non-existent stage '{dependency}'")]
    UnknownDependency {
        /// The stage declaring the dependency.
        stage: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// A stage id was registered twice.
    #[error("duplicate stage id '{stage}'")]
    DuplicateStage {
        /// The duplicated id.
        stage: String,
    },

    /// The dependency graph contains a cycle.
    #[error("circular dependency detected in pipeline")]
    CircularDependency,

    // =========================================================================
    // Resolve errors (per event)
    // =========================================================================
    /// A `$var:` reference names an undefined global variable.
    #[error("variable '{name}' not found in global variables")]
    UnknownVariable {
        /// The variable name.
        name: String,
    },

    /// A `$secret:` reference names an undefined global secret.
    #[error("secret '{name}' not found in global secrets")]
    UnknownSecret {
        /// The secret name.
        name: String,
    },

    /// A `$env:` reference names an unset environment variable.
    #[error("environment variable '{name}' is not set or is empty")]
    UnknownEnv {
        /// The environment variable name.
        name: String,
    },

    /// A dynamic value uses an expression language this build cannot evaluate.
    #[error("unsupported expression language: {language}")]
    UnsupportedLanguage {
        /// The requested language.
        language: String,
    },

    /// An embedded expression failed to parse or evaluate.
    #[error("failed to evaluate expression '{expression}': {cause}")]
    Expression {
        /// The expression source text.
        expression: String,
        /// The parse or runtime failure.
        cause: String,
    },

    /// A value had an unexpected runtime type.
    #[error("{context}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// What was being coerced (e.g. "condition", "delay").
        context: String,
        /// The expected type.
        expected: String,
        /// The actual type encountered.
        actual: String,
    },

    /// A template string could not be rendered.
    #[error("failed to render template '{template}': {cause}")]
    Template {
        /// The template source text.
        template: String,
        /// Why rendering failed.
        cause: String,
    },

    // =========================================================================
    // I/O errors (per event, non-fatal to the pipeline)
    // =========================================================================
    /// An HTTP response carried a non-success status.
    #[error("HTTP request failed with status {status}: {body}")]
    HttpStatus {
        /// The response status code.
        status: u16,
        /// The response body, for context.
        body: String,
    },

    /// An HTTP request could not be completed.
    #[error("HTTP request failed: {cause}")]
    Http {
        /// The transport-level failure.
        cause: String,
    },

    /// JSON could not be serialized or deserialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A step-specific failure that fits no other variant.
    #[error("{0}")]
    Step(String),

    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// `start` was called while the pipeline was already running.
    #[error("pipeline already running")]
    AlreadyRunning,

    /// `stop` was called while the pipeline was not running.
    #[error("pipeline not running")]
    NotRunning,

    /// The pipeline did not drain within the stop watchdog window.
    #[error("pipeline stop timeout")]
    StopTimeout,

    /// The operation was interrupted by pipeline cancellation.
    #[error("step cancelled")]
    Cancelled,
}

impl Error {
    /// Create an I/O error carrying the path that failed.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a step-specific error from a message.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }

    /// Whether this error represents cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
