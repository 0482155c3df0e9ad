//! Engine configuration file support.
//!
//! Every section is optional; missing sections and keys take their
//! defaults.
//!
//! ```toml
//! seed = 42
//!
//! [detector]
//! slot_step_min = 15
//! max_alternatives = 3
//!
//! [hybrid]
//! time_budget_ms = 2000
//!
//! [retry]
//! max_attempts = 3
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bulk::BulkConfig;
use crate::conflict::DetectorConfig;
use crate::error::{Error, Result};
use crate::optimizer::{AnnealingConfig, CspConfig, GeneticConfig, HybridConfig};
use crate::retry::RetryPolicy;

/// Tuning for every engine component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default seed of the stochastic searches.
    pub seed: u64,
    pub detector: DetectorConfig,
    pub genetic: GeneticConfig,
    pub annealing: AnnealingConfig,
    pub csp: CspConfig,
    pub hybrid: HybridConfig,
    pub bulk: BulkConfig,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            detector: DetectorConfig::default(),
            genetic: GeneticConfig::default(),
            annealing: AnnealingConfig::default(),
            csp: CspConfig::default(),
            hybrid: HybridConfig::default(),
            bulk: BulkConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.detector.slot_step_min <= 0 {
            problems.push("detector.slot_step_min must be positive");
        }
        if self.genetic.population_size < 2 {
            problems.push("genetic.population_size must be at least 2");
        }
        if self.genetic.elite_count >= self.genetic.population_size {
            problems.push("genetic.elite_count must be below population_size");
        }
        if !(0.0..=1.0).contains(&self.genetic.crossover_rate)
            || !(0.0..=1.0).contains(&self.genetic.mutation_rate)
        {
            problems.push("genetic rates must lie in [0, 1]");
        }
        if !(self.annealing.cooling_rate > 0.0 && self.annealing.cooling_rate < 1.0) {
            problems.push("annealing.cooling_rate must lie in (0, 1)");
        }
        if self.annealing.initial_temperature <= self.annealing.min_temperature {
            problems.push("annealing.initial_temperature must exceed min_temperature");
        }
        if self.bulk.max_day_offset > 3_660 {
            problems.push("bulk.max_day_offset must not exceed 3660");
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            problems.push("retry.backoff_multiplier must be at least 1");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}
