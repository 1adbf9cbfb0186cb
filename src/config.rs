use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PacerError, Result};
use crate::scheduler::ServicePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    pub log_level: Option<String>,
    /// How long an idle scheduler sleeps between rounds, in seconds
    pub naptime_secs: f64,
    pub service: ServicePolicy,
    pub simulation: SimulationConfig,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            naptime_secs: 10.0,
            service: ServicePolicy::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub jobs: usize,
    /// Budget of the simulated endpoint per window
    pub capacity: u64,
    pub batch_size: usize,
    /// Job costs are drawn from 1..=max_cost
    pub max_cost: u64,
    /// Fraction of calls failing with a transient error
    pub failure_rate: f64,
    pub seed: u64,
    /// Stop after this many pool ticks even if the backlog is not drained.
    /// Ticks where the scheduler is still waiting count too.
    pub max_ticks: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            jobs: 100,
            capacity: 60,
            batch_size: 25,
            max_cost: 3,
            failure_rate: 0.0,
            seed: 0,
            max_ticks: 1000,
        }
    }
}

impl PacerConfig {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.naptime_secs.is_finite() || self.naptime_secs < 0.0 {
            return Err(PacerError::InvalidConfig(format!(
                "naptime_secs must be a non-negative number of seconds, got {}",
                self.naptime_secs
            )));
        }

        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            return Err(PacerError::InvalidConfig(format!(
                "simulation.failure_rate must be between 0 and 1, got {}",
                self.simulation.failure_rate
            )));
        }

        self.service.validate()
    }

    /// Get the naptime as a Duration
    pub fn naptime(&self) -> Duration {
        Duration::try_from_secs_f64(self.naptime_secs).unwrap_or(Duration::from_secs(10))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
