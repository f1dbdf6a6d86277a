//! Loading and registration of service definitions.

use stagecraft_core::config::{validate_service, ServiceDefinition};
use stagecraft_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Service definitions bundled into the binary.
const BUILTIN_SERVICES: &[(&str, &str)] =
    &[("httpbin", include_str!("../../services/httpbin.yaml"))];

/// Environment variable overriding the user services directory.
const SERVICES_PATH_ENV: &str = "STAGECRAFT_SERVICES_PATH";

/// Holds every loaded service definition, keyed by service name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceDefinition>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in services plus whatever the
    /// user services directory provides.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.load_builtins()?;
        registry.load_from_directory(&services_path())?;
        Ok(registry)
    }

    /// Load the service definitions bundled into the binary.
    pub fn load_builtins(&mut self) -> Result<()> {
        for (name, yaml) in BUILTIN_SERVICES {
            self.load_from_str(yaml, name)?;
        }
        Ok(())
    }

    /// Register a definition after deep validation.
    pub fn register(&mut self, definition: ServiceDefinition) -> Result<()> {
        validate_service(&definition)?;
        self.services
            .insert(definition.service.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Load one definition from YAML text. A missing `service.name` falls
    /// back to the given file stem.
    pub fn load_from_str(&mut self, yaml: &str, filename: &str) -> Result<()> {
        let mut definition = ServiceDefinition::from_yaml(yaml)?;
        if definition.service.name.is_empty() {
            let stem = Path::new(filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(filename);
            definition.service.name = stem.to_string();
        }
        self.register(definition)
    }

    /// Load every `.yaml` / `.yml` file in a directory.
    ///
    /// A missing directory is not an error (there are simply no custom
    /// services); an unloadable file is logged and skipped.
    pub fn load_from_directory(&mut self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }

        let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read service file");
                    continue;
                }
            };

            if let Err(e) = self.load_from_str(&content, &filename) {
                tracing::warn!(path = %path.display(), error = %e, "failed to load service");
                continue;
            }
            tracing::info!(path = %path.display(), "loaded service definition");
        }

        Ok(())
    }

    /// Get a service definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.services.get(name).cloned()
    }

    /// All registered service names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered services.
    pub fn count(&self) -> usize {
        self.services.len()
    }
}

/// The user services directory: `$STAGECRAFT_SERVICES_PATH`, falling back to
/// `~/.stagecraft/services`, falling back to `./services`.
pub fn services_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SERVICES_PATH_ENV) {
        return PathBuf::from(path);
    }

    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".stagecraft").join("services"),
        None => PathBuf::from("./services"),
    }
}
