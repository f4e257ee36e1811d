//! Configuration Management Module
//!
//! File-based configuration for the simulator with environment variable
//! overrides and validation. Files are TOML; every section is optional and
//! falls back to its defaults.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostRunConfig {
    pub engine: EngineSettings,
    pub lifecycle: LifecycleSettings,
    pub connectors: ConnectorSettings,
    pub logging: LoggingConfig,
}

/// Simulation engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Base step time when a step declares no timeout
    pub default_step_time_ms: u64,
    /// Number of slowest steps reported as the critical path
    pub critical_path_len: usize,
    /// Steps slower than this trigger a performance recommendation
    pub slow_step_threshold_ms: u64,
    /// Share of a flow's total time above which a step is a bottleneck
    pub bottleneck_ratio: f64,
    pub cpu_millicores_per_step: u64,
    pub memory_mib_per_step: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_step_time_ms: 1000,
            critical_path_len: 3,
            slow_step_threshold_ms: 5000,
            bottleneck_ratio: 0.5,
            cpu_millicores_per_step: 100,
            memory_mib_per_step: 128,
        }
    }
}

/// Run lifecycle tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Pause between progress phases
    pub phase_delay_ms: u64,
    /// Completed runs older than this are eligible for cleanup
    pub completed_retention_hours: i64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            phase_delay_ms: 100,
            completed_retention_hours: 24,
        }
    }
}

/// Mock connector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Pins mock outcomes when set
    pub seed: Option<u64>,
    /// Fractional latency spread around each tool's typical latency
    pub latency_jitter: f64,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            seed: None,
            latency_jitter: 0.3,
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GhostRunConfig {
    /// Load from a TOML file, then apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))
    }

    /// Apply `GHOSTRUN_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("GHOSTRUN_LOG_LEVEL") {
            self.logging.level = level;
            debug!("Applied env override for log level");
        }

        if let Ok(json) = std::env::var("GHOSTRUN_LOG_JSON") {
            self.logging.json = json.to_lowercase() == "true";
            debug!("Applied env override for JSON logging");
        }

        if let Ok(seed) = std::env::var("GHOSTRUN_SEED") {
            let seed = seed
                .parse::<u64>()
                .map_err(|e| anyhow!("Invalid GHOSTRUN_SEED '{}': {}", seed, e))?;
            self.connectors.seed = Some(seed);
            debug!("Applied env override for connector seed");
        }

        if let Ok(delay) = std::env::var("GHOSTRUN_PHASE_DELAY_MS") {
            self.lifecycle.phase_delay_ms = delay
                .parse::<u64>()
                .map_err(|e| anyhow!("Invalid GHOSTRUN_PHASE_DELAY_MS '{}': {}", delay, e))?;
            debug!("Applied env override for phase delay");
        }

        Ok(())
    }

    /// Check that values are within sensible ranges
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.critical_path_len == 0 || engine.critical_path_len > 3 {
            return Err(anyhow!(
                "critical_path_len ({}) must be between 1 and 3",
                engine.critical_path_len
            ));
        }
        if !(engine.bottleneck_ratio > 0.0 && engine.bottleneck_ratio <= 1.0) {
            return Err(anyhow!(
                "bottleneck_ratio ({}) must be in (0, 1]",
                engine.bottleneck_ratio
            ));
        }
        if engine.default_step_time_ms == 0 {
            return Err(anyhow!("default_step_time_ms must be > 0"));
        }
        if !(0.0..1.0).contains(&self.connectors.latency_jitter) {
            return Err(anyhow!(
                "latency_jitter ({}) must be in [0, 1)",
                self.connectors.latency_jitter
            ));
        }
        if self.lifecycle.completed_retention_hours < 0 {
            return Err(anyhow!(
                "completed_retention_hours ({}) must not be negative",
                self.lifecycle.completed_retention_hours
            ));
        }
        Ok(())
    }
}
