//! Configuration system for the deobfuscation engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::common::errors::ConfigError;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeobfuscatorConfig {
    /// Pass pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Opaque-predicate solver configuration
    #[serde(default)]
    pub solver: SolverConfig,

    /// VM devirtualiser configuration
    #[serde(default)]
    pub devirt: DevirtConfig,

    /// Bytecode lifter configuration
    #[serde(default)]
    pub lifters: LifterConfig,
}

impl DeobfuscatorConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        ConfigLoader::load_from_file(path)
    }
}

impl Default for DeobfuscatorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            solver: SolverConfig::default(),
            devirt: DevirtConfig::default(),
            lifters: LifterConfig::default(),
        }
    }
}

/// Pass pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum fixed-point iterations over the pass list
    pub max_iterations: u32,

    /// Dataflow worklist iteration cap inside a single pass
    pub max_dataflow_iterations: u32,

    /// Minimum confidence for rewriting an expression to a literal
    pub rewrite_confidence_threshold: f64,

    /// Minimum confidence for collapsing an opaque predicate
    pub predicate_confidence_threshold: f64,

    /// Wall-clock budget for a whole pipeline run, milliseconds (0 = none)
    pub wall_clock_budget_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_dataflow_iterations: 100,
            rewrite_confidence_threshold: 0.9,
            predicate_confidence_threshold: 0.7,
            wall_clock_budget_ms: 0,
        }
    }
}

/// SMT solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Enable the SMT tier; the pattern oracle always runs
    pub enabled: bool,

    /// Per-query timeout in milliseconds
    pub timeout_ms: u64,

    /// Syntactic complexity budget in operator nodes
    pub complexity_budget: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5000,
            complexity_budget: 100,
        }
    }
}

/// VM devirtualiser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevirtConfig {
    /// Hard cap on micro-emulation steps
    pub step_limit: u32,

    /// Detection confidence below which devirtualisation is refused
    pub refuse_below: f64,

    /// Detection confidence at which devirtualisation proceeds eagerly
    pub eager_above: f64,

    /// Minimum length for a numeric array to qualify as a virtual program
    pub min_bytecode_length: usize,
}

impl Default for DevirtConfig {
    fn default() -> Self {
        Self {
            step_limit: 10_000,
            refuse_below: 0.3,
            eager_above: 0.6,
            min_bytecode_length: 4,
        }
    }
}

/// Bytecode lifter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifterConfig {
    /// Reject modules with unsupported versions instead of warning
    pub strict_versions: bool,

    /// Fraction of decodable instructions below which a register-engine
    /// function body is skipped rather than fabricated
    pub min_decode_confidence: f64,
}

impl Default for LifterConfig {
    fn default() -> Self {
        Self {
            strict_versions: false,
            min_decode_confidence: 0.5,
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<DeobfuscatorConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn load_from_str(content: &str) -> Result<DeobfuscatorConfig, ConfigError> {
        let config: DeobfuscatorConfig = toml::from_str(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(config: &DeobfuscatorConfig) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&config.pipeline.rewrite_confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.rewrite_confidence_threshold".into(),
                value: config.pipeline.rewrite_confidence_threshold.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&config.pipeline.predicate_confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.predicate_confidence_threshold".into(),
                value: config.pipeline.predicate_confidence_threshold.to_string(),
            });
        }
        if config.pipeline.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_iterations".into(),
                value: "0".into(),
            });
        }
        if config.devirt.refuse_below > config.devirt.eager_above {
            return Err(ConfigError::InvalidValue {
                key: "devirt.refuse_below".into(),
                value: config.devirt.refuse_below.to_string(),
            });
        }
        Ok(())
    }
}
