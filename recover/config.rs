use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MAX_PASSES: usize = 10_000;
pub const DEFAULT_MAX_SWEEPS: usize = 10_000;
pub const DEFAULT_DERIV_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_DERIV_MAX_ITERATIONS: usize = 10_000;

/// Iteration caps for the recoverers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Cap on outer passes (reference batches). The bipartite recoverer
    /// introduces one reference per pass.
    pub max_passes: usize,
    /// Cap on propagation sweeps inside one pass of the general recoverer.
    pub max_sweeps: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            max_sweeps: DEFAULT_MAX_SWEEPS,
        }
    }
}

/// Convergence settings for the cluster-derivative fixed-point solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedPointConfig {
    /// A sweep converges when no per-category update exceeds this in absolute value.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FixedPointConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_DERIV_TOLERANCE,
            max_iterations: DEFAULT_DERIV_MAX_ITERATIONS,
        }
    }
}

/// Everything that can be set from a TOML settings file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recovery: RecoveryConfig,
    pub fixed_point: FixedPointConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write settings file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML settings file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize settings to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid setting '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&toml_string)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()?;
        self.fixed_point.validate()
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::InvalidValue {
                name: "recovery.max_passes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_sweeps == 0 {
            return Err(ConfigError::InvalidValue {
                name: "recovery.max_sweeps",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl FixedPointConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "fixed_point.tolerance",
                reason: format!("must be positive and finite, got {}", self.tolerance),
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                name: "fixed_point.max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let settings: Settings = toml::from_str("[fixed_point]\ntolerance = 1e-8\n").unwrap();
        assert_eq!(settings.fixed_point.tolerance, 1e-8);
        assert_eq!(settings.fixed_point.max_iterations, DEFAULT_DERIV_MAX_ITERATIONS);
        assert_eq!(settings.recovery, RecoveryConfig::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let file = NamedTempFile::new().unwrap();
        let settings = Settings {
            recovery: RecoveryConfig {
                max_passes: 12,
                max_sweeps: 34,
            },
            fixed_point: FixedPointConfig {
                tolerance: 1e-6,
                max_iterations: 56,
            },
        };
        settings.save(file.path()).unwrap();
        assert_eq!(Settings::load(file.path()).unwrap(), settings);
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let settings: Settings = toml::from_str("[fixed_point]\ntolerance = 0.0\n").unwrap();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue {
                name: "fixed_point.tolerance",
                ..
            })
        ));
    }
}
