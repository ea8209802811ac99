//! CLI Tooling
//!
//! Inspection commands for the kernel: effective configuration, canonical state hashes,
//! budget allocation tables, and a dry run of context fitting over JSON files.

use crate::budget::{ContextBudgeter, ContextLayers};
use crate::config::{ConfigLoader, KernelConfig};
use crate::error::KernelError;
use crate::refinement::Canonicalizer;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// SchemaForge - governance kernel for iterative schema generation
#[derive(Parser)]
#[command(name = "schemaforge")]
#[command(about = "Inspect refinement, rate governing and context budgeting settings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and print the effective configuration
    Config,
    /// Print the canonical state hash of a JSON document
    Hash {
        /// JSON file
        file: PathBuf,
        /// Also print the canonical form
        #[arg(long)]
        canonical: bool,
    },
    /// Show how a token budget is split into slices
    Budget {
        /// Total token limit (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
        /// Widen the current-step slice
        #[arg(long)]
        enhanced: bool,
    },
    /// Fit JSON context layers into the configured budget
    Fit {
        #[arg(long)]
        current: Option<PathBuf>,
        #[arg(long)]
        recent: Option<PathBuf>,
        #[arg(long)]
        earlier: Option<PathBuf>,
        #[arg(long)]
        external: Option<PathBuf>,
        /// Total token limit (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        enhanced: bool,
    },
}

/// Loaded configuration plus command dispatch
pub struct RunContext {
    config: KernelConfig,
}

impl RunContext {
    pub fn new(workspace: &Path, config_path: Option<&Path>) -> Result<Self, KernelError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(workspace)?,
        };
        Ok(Self {
            config: config.validated()?,
        })
    }

    pub fn from_config(config: KernelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, KernelError> {
        match command {
            Commands::Config => toml::to_string_pretty(&self.config)
                .map_err(|e| KernelError::ConfigError(format!("Failed to render config: {}", e))),
            Commands::Hash { file, canonical } => {
                let value = read_json(file)?;
                let canonicalizer = Canonicalizer::default();
                let hash = hex::encode(canonicalizer.hash_value(&value));
                if *canonical {
                    Ok(format!("{}\n{}", hash, canonicalizer.canonical_string(&value)))
                } else {
                    Ok(hash)
                }
            }
            Commands::Budget { limit, enhanced } => {
                let mut budget = self.config.context.clone();
                if let Some(limit) = limit {
                    budget.total_limit = *limit;
                }
                budget.validate().map_err(KernelError::InvalidInput)?;
                Ok(render_allocation(&budget.allocate(*enhanced), budget.total_limit))
            }
            Commands::Fit {
                current,
                recent,
                earlier,
                external,
                limit,
                enhanced,
            } => {
                let mut budget = self.config.context.clone();
                if let Some(limit) = limit {
                    budget.total_limit = *limit;
                }
                budget.validate().map_err(KernelError::InvalidInput)?;

                let layers = ContextLayers {
                    current: read_optional_json(current.as_deref())?,
                    recent: read_optional_json(recent.as_deref())?,
                    earlier: read_optional_json(earlier.as_deref())?,
                    external: read_optional_json(external.as_deref())?,
                };
                let budgeter = ContextBudgeter::new(budget);
                let prepared = budgeter.prepare_layers(layers, *enhanced);
                info!(
                    used = prepared.usage.total(),
                    allocated = prepared.allocation.allocated(),
                    "Context fitted"
                );
                Ok(serde_json::to_string_pretty(&prepared)?)
            }
        }
    }
}

fn read_json(path: &Path) -> Result<Value, KernelError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        KernelError::InvalidInput(format!("{} is not valid JSON: {}", path.display(), e))
    })
}

fn read_optional_json(path: Option<&Path>) -> Result<Value, KernelError> {
    path.map(read_json).transpose().map(Option::unwrap_or_default)
}

fn render_allocation(allocation: &crate::budget::SliceAllocation, total: usize) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Slice", "Tokens"]);
    for (name, tokens) in [
        ("current", allocation.current),
        ("recent", allocation.recent),
        ("earlier", allocation.earlier),
        ("external", allocation.external),
        ("reserve", allocation.reserve),
    ] {
        table.add_row(vec![Cell::new(name), Cell::new(tokens)]);
    }
    table.add_row(vec![Cell::new("total"), Cell::new(total)]);
    table.to_string()
}

/// User-facing message for an error
pub fn map_error(err: &KernelError) -> String {
    match err {
        KernelError::ConfigError(msg) => format!("Configuration problem: {}", msg),
        KernelError::InvalidInput(msg) => format!("Invalid input: {}", msg),
        other => other.to_string(),
    }
}
