//! Configuration for the RBAC engine.
//!
//! Values are layered, later sources winning:
//! 1. Defaults
//! 2. Configuration file (YAML)
//! 3. Environment variables
//!
//! # Example
//!
//! ```ignore
//! use rbac_server::config::RbacConfig;
//!
//! let config = RbacConfig::load("rbac.yaml")?;
//! // or
//! let config = RbacConfig::from_env()?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use rbac_domain::resolver::DEFAULT_MAX_DEPTH;
use rbac_domain::{GrantScope, PolicyCatalog};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `RBAC_RESOLVER__MAX_DEPTH=10`.
pub const ENV_PREFIX: &str = "RBAC";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RbacConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(default)]
    pub authorization: AuthorizationSettings,

    #[serde(default)]
    pub catalog: CatalogSettings,
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type. Only "memory" ships with the engine.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Policy resolver settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolverSettings {
    /// Maximum number of parent edges followed from an input role.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

/// Authorization check settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AuthorizationSettings {
    /// Which of an actor's policies count: "direct" or "effective".
    #[serde(default)]
    pub scope: GrantScope,

    /// Reject privileged mutations that arrive without an actor. When
    /// false, such mutations skip the permission check.
    #[serde(default)]
    pub require_actor: bool,
}

/// Known resources and their operations.
///
/// ```yaml
/// catalog:
///   enforce: true
///   resources:
///     order: [read, update, "*"]
///     product: [read]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CatalogSettings {
    /// Reject policies whose resource or operation is not listed.
    #[serde(default)]
    pub enforce: bool,

    #[serde(default)]
    pub resources: BTreeMap<String, Vec<String>>,
}

impl CatalogSettings {
    /// The catalog to enforce on policy writes, if enforcement is on.
    pub fn to_catalog(&self) -> Option<PolicyCatalog> {
        if !self.enforce {
            return None;
        }
        Some(PolicyCatalog::from_map(self.resources.clone()))
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl RbacConfig {
    /// Loads configuration from a YAML file with environment overrides.
    ///
    /// Environment variables use the `RBAC_` prefix and `__` between nested
    /// keys, so `RBAC_AUTHORIZATION__SCOPE=effective` overrides
    /// `authorization.scope`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&RbacConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let rbac_config: RbacConfig = config.try_deserialize()?;
        rbac_config.validate()?;

        Ok(rbac_config)
    }

    /// Loads defaults with environment overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&RbacConfig::default())?)
            .add_source(environment())
            .build()?;

        let rbac_config: RbacConfig = config.try_deserialize()?;
        rbac_config.validate()?;

        Ok(rbac_config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        if self.resolver.max_depth == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "resolver.max_depth must be greater than 0".to_string(),
            });
        }

        if self.catalog.enforce && self.catalog.resources.is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "catalog.resources must not be empty when catalog.enforce is set"
                    .to_string(),
            });
        }

        for (resource, operations) in &self.catalog.resources {
            if resource.trim().is_empty() {
                return Err(ConfigLoadError::Invalid {
                    message: "catalog resource names must not be empty".to_string(),
                });
            }
            if operations.iter().any(|op| op.trim().is_empty()) {
                return Err(ConfigLoadError::Invalid {
                    message: format!("catalog.resources.{resource} has an empty operation"),
                });
            }
        }

        Ok(())
    }
}
