//! Configuration System
//!
//! Layered kernel configuration: XDG user file, then the workspace file, then
//! `SCHEMAFORGE__SECTION__KEY` environment variables. Every section has defaults so an
//! empty configuration is valid. Validation runs once at startup; the governor and loop
//! controller assume validated limits.

use crate::budget::ContextBudget;
use crate::error::KernelError;
use crate::governor::RateGovernorConfig;
use crate::logging::LoggingConfig;
use crate::refinement::LoopConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Workspace-level configuration file name
pub const WORKSPACE_CONFIG_FILE: &str = "schemaforge.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SCHEMAFORGE";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Refinement loop bounds
    #[serde(default)]
    pub refinement: LoopConfig,

    /// External model rate and concurrency limits
    #[serde(default)]
    pub rate_governor: RateGovernorConfig,

    /// Context token budget
    #[serde(default)]
    pub context: ContextBudget,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Refinement: {0}")]
    Refinement(String),

    #[error("Rate governor: {0}")]
    RateGovernor(String),

    #[error("Context: {0}")]
    Context(String),

    #[error("Logging: {0}")]
    Logging(String),
}

impl KernelConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.refinement.validate() {
            errors.push(ValidationError::Refinement(e));
        }
        if let Err(e) = self.rate_governor.validate() {
            errors.push(ValidationError::RateGovernor(e));
        }
        if let Err(e) = self.context.validate() {
            errors.push(ValidationError::Context(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold all errors into one `KernelError`
    pub fn validated(self) -> Result<Self, KernelError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            KernelError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}

/// Loads `KernelConfig` from files and environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// `$XDG_CONFIG_HOME/schemaforge/config.toml`, if a home directory is known
    pub fn xdg_config_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("schemaforge").join("config.toml"))
    }

    /// Load configuration for a workspace.
    ///
    /// Precedence (highest first): environment, workspace file, XDG file, defaults.
    /// Missing files are skipped.
    pub fn load(workspace_root: &Path) -> Result<KernelConfig, KernelError> {
        let mut builder = Config::builder();

        if let Some(xdg_path) = Self::xdg_config_path() {
            if xdg_path.exists() {
                debug!(path = %xdg_path.display(), "Loading XDG configuration");
                builder = builder.add_source(File::from(xdg_path).required(false));
            }
        }

        let workspace_path = workspace_root.join(WORKSPACE_CONFIG_FILE);
        if workspace_path.exists() {
            debug!(path = %workspace_path.display(), "Loading workspace configuration");
        }
        builder = builder
            .add_source(File::from(workspace_path).required(false))
            .add_source(Self::environment());

        let config: KernelConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load a single file plus environment overrides
    pub fn load_from_file(path: &Path) -> Result<KernelConfig, KernelError> {
        let config: KernelConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }
}
