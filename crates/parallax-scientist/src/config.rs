//! Sampling configuration
//!
//! Deserializable from any serde format. Rates are probabilities in `[0, 1]`;
//! a per-experiment rate overrides the global one.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decides whether an experiment runs its candidates
pub type Sampler = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A sample rate outside `[0, 1]`
    #[error("invalid sample rate for {scope}: {rate} (expected 0.0..=1.0)")]
    InvalidSampleRate {
        /// `default` or the experiment name
        scope: String,
        /// Offending rate
        rate: f64,
    },

    /// JSON input could not be parsed
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Process-wide sampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScientistConfig {
    /// Run candidates at all
    pub enabled: bool,
    /// Probability that an experiment runs its candidates
    pub sample_rate: f64,
    /// Per-experiment overrides of `sample_rate`
    pub experiments: BTreeMap<String, f64>,
}

impl ScientistConfig {
    /// Create config with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON and validate
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed input, or
    /// [`ConfigError::InvalidSampleRate`] on an out-of-range rate.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// With enabled flag
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// With global sample rate
    #[inline]
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// With a rate for one experiment
    #[must_use]
    pub fn with_experiment_rate(mut self, name: impl Into<String>, rate: f64) -> Self {
        self.experiments.insert(name.into(), rate);
        self
    }

    /// Rate that applies to `name`
    #[must_use]
    pub fn rate_for(&self, name: &str) -> f64 {
        self.experiments.get(name).copied().unwrap_or(self.sample_rate)
    }

    /// Check every rate is a probability
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSampleRate`] naming the first bad scope.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("default", self.sample_rate)?;
        for (name, &rate) in &self.experiments {
            check_rate(name, rate)?;
        }
        Ok(())
    }

    /// Build a sampler from validated settings
    ///
    /// # Errors
    ///
    /// See [`ScientistConfig::validate`].
    pub fn sampler(&self) -> Result<Sampler, ConfigError> {
        self.validate()?;
        let config = self.clone();

        Ok(Arc::new(move |name: &str| {
            config.enabled && rand::rng().random_bool(config.rate_for(name))
        }))
    }
}

impl Default for ScientistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            experiments: BTreeMap::new(),
        }
    }
}

fn check_rate(scope: &str, rate: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate {
            scope: scope.to_string(),
            rate,
        })
    }
}
