//! Service definition - an API descriptor compiled into HTTP-client steps.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// The complete definition of an API service.
///
/// # Example
///
/// ```yaml
/// service:
///   name: example
///   description: Example REST API
///   version: "1.0"
///
/// defaults:
///   base_url: "https://api.example.com"
///   auth:
///     type: bearer
///     header: Authorization
///     value: "Bearer {{.api_token}}"
///
/// global_params:
///   api_token:
///     $required: true
///     $type: string
///
/// operations:
///   get_item:
///     method: GET
///     path: "/items/{{.item_id}}"
///     params:
///       item_id:
///         $required: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service metadata.
    #[serde(default)]
    pub service: ServiceInfo,
    /// Defaults applied to every operation.
    #[serde(default)]
    pub defaults: ServiceDefaults,
    /// Parameters with defaults shared by all operations.
    #[serde(default)]
    pub global_params: HashMap<String, ParameterDef>,
    /// The operations this service exposes, keyed by name.
    #[serde(default)]
    pub operations: HashMap<String, OperationDef>,
}

impl ServiceDefinition {
    /// Parse a service definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Basic structural validation: name present, at least one operation,
    /// every operation carries a known method and a path.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() {
            return Err(Error::InvalidService {
                service: "<unnamed>".to_string(),
                cause: "service name is required".to_string(),
            });
        }

        if self.operations.is_empty() {
            return Err(Error::InvalidService {
                service: self.service.name.clone(),
                cause: "service must have at least one operation".to_string(),
            });
        }

        for (op_name, op) in &self.operations {
            if op.method.is_empty() {
                return Err(self.invalid_operation(op_name, "method is required"));
            }
            if !VALID_METHODS.contains(&op.method.as_str()) {
                return Err(
                    self.invalid_operation(op_name, format!("invalid method {}", op.method))
                );
            }
            if op.path.is_empty() {
                return Err(self.invalid_operation(op_name, "path is required"));
            }
        }

        Ok(())
    }

    /// Get an operation by name.
    pub fn get_operation(&self, name: &str) -> Result<&OperationDef> {
        self.operations
            .get(name)
            .ok_or_else(|| Error::UnknownOperation {
                service: self.service.name.clone(),
                operation: name.to_string(),
            })
    }

    /// The content type for an operation: operation over service default
    /// over `application/json`.
    pub fn content_type_for(&self, op: &OperationDef) -> String {
        if !op.content_type.is_empty() {
            op.content_type.clone()
        } else if !self.defaults.content_type.is_empty() {
            self.defaults.content_type.clone()
        } else {
            "application/json".to_string()
        }
    }

    fn invalid_operation(&self, op_name: &str, cause: impl Into<String>) -> Error {
        Error::InvalidService {
            service: self.service.name.clone(),
            cause: format!("operation '{}': {}", op_name, cause.into()),
        }
    }
}

/// Basic service metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name; doubles as the registered step type.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Definition version.
    #[serde(default)]
    pub version: String,
}

/// Default configuration shared by all operations of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDefaults {
    /// Base URL prepended to every operation path.
    #[serde(default)]
    pub base_url: String,
    /// Headers added to every request (templated).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Request timeout in seconds (0 means the built-in default).
    #[serde(default)]
    pub timeout: u64,
    /// Default content type for request bodies.
    #[serde(default)]
    pub content_type: String,
}

/// Authentication configuration for a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// One of `bearer`, `basic`, `api_key`, `custom`, `none`.
    #[serde(default, rename = "type")]
    pub auth_type: String,
    /// Header name carrying the credential (e.g. "Authorization").
    #[serde(default)]
    pub header: String,
    /// Value template (e.g. "Bearer {{.api_token}}").
    #[serde(default)]
    pub value: String,
    /// Username template, for basic auth.
    #[serde(default)]
    pub username: String,
    /// Password template, for basic auth.
    #[serde(default)]
    pub password: String,
}

/// A parameter declaration for an operation.
///
/// `required` and a non-null `default` are mutually exclusive; the deep
/// validator rejects that combination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterDef {
    /// The parameter must be provided by the user.
    #[serde(default, rename = "$required")]
    pub required: bool,
    /// The parameter is optional (equivalent to `required: false`).
    #[serde(default, rename = "$optional")]
    pub optional: bool,
    /// Default value applied when the user provides none.
    #[serde(default, rename = "$default")]
    pub default: Option<JsonValue>,
    /// Expected type: string, int, float, bool, object, array.
    #[serde(default, rename = "$type")]
    pub param_type: String,
    /// Parameter documentation.
    #[serde(default, rename = "$description")]
    pub description: String,
}

impl ParameterDef {
    /// Whether the parameter must be provided.
    pub fn is_required(&self) -> bool {
        self.required && !self.optional
    }

    /// Whether the parameter may be omitted.
    pub fn is_optional(&self) -> bool {
        self.optional || !self.required
    }
}

/// One API operation of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationDef {
    /// Operation documentation.
    #[serde(default)]
    pub description: String,
    /// HTTP method: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS.
    #[serde(default)]
    pub method: String,
    /// Path template (e.g. "/items/{{.item_id}}").
    #[serde(default)]
    pub path: String,
    /// Operation-specific headers, overriding service defaults (templated).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Operation parameters.
    #[serde(default)]
    pub params: HashMap<String, ParameterDef>,
    /// Request body skeleton: a tree of maps/arrays/scalars optionally
    /// containing `$param`, `$if`/`$then`/`$else`, `$for_each`/`$template`.
    #[serde(default)]
    pub body: Option<JsonValue>,
    /// Content type for this operation, overriding the service default.
    #[serde(default)]
    pub content_type: String,
    /// Expected response type: json, text, raw.
    #[serde(default)]
    pub response_type: String,
    /// Query parameter templates.
    #[serde(default)]
    pub query_params: HashMap<String, String>,
}

impl OperationDef {
    /// The response type, defaulting to `json`.
    pub fn effective_response_type(&self) -> &str {
        if self.response_type.is_empty() {
            "json"
        } else {
            &self.response_type
        }
    }
}
