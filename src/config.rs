//! Hyperparameters and layered configuration for the learning engine
//!
//! Configuration is resolved in layers:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. Environment variables prefixed with `PERSONA_`
//!    (e.g. `PERSONA_HYPERPARAMETERS__LEARNING_RATE=0.05`)
//!
//! Every loaded configuration is validated before use.

use crate::error::{LearnerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Clip bound used when diagnostics re-enable a disabled clipper
pub const DEFAULT_GRADIENT_CLIP_MAX: f64 = 5.0;

/// Highest momentum beta a remediation may set
pub const MAX_MOMENTUM_BETA: f64 = 0.99;

/// Highest L2 strength a remediation may set
pub const MAX_L2_LAMBDA: f64 = 0.1;

/// Tunable knobs of the learning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Step size applied to every raw feature signal
    pub learning_rate: f64,
    pub min_learning_rate: f64,
    pub max_learning_rate: f64,

    /// Pull-to-center strength
    pub l2_lambda: f64,
    /// EMA coefficient for per-parameter momentum
    pub momentum_beta: f64,
    /// Clip bound on a single computed delta; <= 0 disables clipping
    pub gradient_clip_max: f64,
    pub max_change_per_update: f64,
    pub max_change_per_epoch: f64,

    /// Events required before any learning is applied
    pub min_feedback_samples: usize,
    /// History length required before validation scores are computed
    pub min_validation_samples: usize,
    /// Trailing fraction of history used as the validation window
    pub validation_split_ratio: f64,
    pub improvement_epsilon: f64,
    pub patience: usize,

    pub checkpoint_interval: u64,
    pub buffer_size: usize,
    pub replay_samples_per_update: usize,
    /// Fraction of the current learning rate used for replayed feedback
    pub replay_lr_scale: f64,

    /// Weight of the very-verbose length signal
    pub very_verbose_weight: f64,
    /// Weight of the formality/friendliness coupling to humor and emoji
    pub cross_coupling_weight: f64,

    /// Changes at or below this magnitude are not recorded
    pub dead_zone: f64,
    pub max_history: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_learning_rate: 0.001,
            max_learning_rate: 0.5,
            l2_lambda: 0.01,
            momentum_beta: 0.9,
            gradient_clip_max: DEFAULT_GRADIENT_CLIP_MAX,
            max_change_per_update: 5.0,
            max_change_per_epoch: 15.0,
            min_feedback_samples: 5,
            min_validation_samples: 10,
            validation_split_ratio: 0.2,
            improvement_epsilon: 0.01,
            patience: 20,
            checkpoint_interval: 10,
            buffer_size: 500,
            replay_samples_per_update: 3,
            replay_lr_scale: 0.5,
            very_verbose_weight: 1.5,
            cross_coupling_weight: 0.5,
            dead_zone: 0.01,
            max_history: 1000,
        }
    }
}

impl Hyperparameters {
    /// Load hyperparameters from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let hyper: Hyperparameters = toml::from_str(toml_str)?;
        hyper.validate()?;
        Ok(hyper)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LearnerError::Other(e.to_string()))
    }

    /// Validate every value range and cross-field constraint
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("min_learning_rate", self.min_learning_rate)?;
        check_unit_interval("max_learning_rate", self.max_learning_rate)?;
        check_unit_interval("learning_rate", self.learning_rate)?;
        if self.min_learning_rate > self.max_learning_rate {
            return Err(invalid("min_learning_rate must not exceed max_learning_rate"));
        }
        if self.learning_rate < self.min_learning_rate || self.learning_rate > self.max_learning_rate {
            return Err(invalid(format!(
                "learning_rate {} outside [{}, {}]",
                self.learning_rate, self.min_learning_rate, self.max_learning_rate
            )));
        }

        if !(0.0..=MAX_L2_LAMBDA).contains(&self.l2_lambda) {
            return Err(invalid(format!("l2_lambda must be in [0, {}]", MAX_L2_LAMBDA)));
        }
        if !(0.0..1.0).contains(&self.momentum_beta) {
            return Err(invalid("momentum_beta must be in [0, 1)"));
        }
        if !self.gradient_clip_max.is_finite() {
            return Err(invalid("gradient_clip_max must be finite"));
        }

        check_positive("max_change_per_update", self.max_change_per_update)?;
        check_positive("max_change_per_epoch", self.max_change_per_epoch)?;
        if self.max_change_per_update > self.max_change_per_epoch {
            return Err(invalid("max_change_per_update must not exceed max_change_per_epoch"));
        }

        check_unit_interval("validation_split_ratio", self.validation_split_ratio)?;
        check_unit_interval("replay_lr_scale", self.replay_lr_scale)?;
        if !(0.0..1.0).contains(&self.improvement_epsilon) {
            return Err(invalid("improvement_epsilon must be in [0, 1)"));
        }
        check_positive("very_verbose_weight", self.very_verbose_weight)?;
        check_positive("cross_coupling_weight", self.cross_coupling_weight)?;
        if !(0.0..1.0).contains(&self.dead_zone) {
            return Err(invalid("dead_zone must be in [0, 1)"));
        }

        if self.patience == 0 {
            return Err(invalid("patience must be at least 1"));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval must be at least 1"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size must be at least 1"));
        }
        if self.replay_samples_per_update > self.buffer_size {
            return Err(invalid("replay_samples_per_update must not exceed buffer_size"));
        }
        if self.max_history < self.min_validation_samples.max(1) {
            return Err(invalid("max_history must hold at least min_validation_samples events"));
        }

        Ok(())
    }

    /// Clamp a proposed learning rate into the configured range
    pub fn clamp_learning_rate(&self, rate: f64) -> f64 {
        if !rate.is_finite() {
            return self.learning_rate;
        }
        rate.clamp(self.min_learning_rate, self.max_learning_rate)
    }

    /// Set the learning rate, clamped to [min_learning_rate, max_learning_rate].
    ///
    /// Returns the rate that was actually applied.
    pub fn set_learning_rate(&mut self, rate: f64) -> f64 {
        self.learning_rate = self.clamp_learning_rate(rate);
        self.learning_rate
    }

    pub fn set_momentum_beta(&mut self, beta: f64) -> Result<()> {
        if !(0.0..1.0).contains(&beta) {
            return Err(invalid(format!("momentum_beta {} must be in [0, 1)", beta)));
        }
        self.momentum_beta = beta;
        Ok(())
    }

    pub fn set_l2_lambda(&mut self, lambda: f64) -> Result<()> {
        if !(0.0..=MAX_L2_LAMBDA).contains(&lambda) {
            return Err(invalid(format!("l2_lambda {} must be in [0, {}]", lambda, MAX_L2_LAMBDA)));
        }
        self.l2_lambda = lambda;
        Ok(())
    }

    pub fn set_gradient_clip_max(&mut self, max: f64) -> Result<()> {
        if !max.is_finite() {
            return Err(invalid("gradient_clip_max must be finite"));
        }
        self.gradient_clip_max = max;
        Ok(())
    }

    pub fn clipping_enabled(&self) -> bool {
        self.gradient_clip_max > 0.0
    }
}

fn invalid(msg: impl Into<String>) -> LearnerError {
    LearnerError::InvalidHyperparameter(msg.into())
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be in (0, 1], got {}", name, value)))
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive, got {}", name, value)))
    }
}

/// Top-level configuration for the binary and embedding hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Where persona, checkpoints and the learning log live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Apply hyperparameter remediations from periodic diagnostics
    pub auto_remediate: bool,
    pub log_level: String,
    pub hyperparameters: Hyperparameters,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            auto_remediate: true,
            log_level: "info".to_string(),
            hyperparameters: Hyperparameters::default(),
        }
    }
}

impl LearnerConfig {
    /// Resolve configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PERSONA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: LearnerConfig = builder.build()?.try_deserialize()?;
        config.hyperparameters.validate()?;
        Ok(config)
    }

    /// Data directory, falling back to the platform data dir
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Default data directory following the XDG_DATA_HOME convention
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("persona-learner")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Hyperparameters::default().validate().is_ok());
    }

    #[test]
    fn test_learning_rate_is_clamped() {
        let mut hyper = Hyperparameters::default();

        assert_eq!(hyper.set_learning_rate(5.0), hyper.max_learning_rate);
        assert_eq!(hyper.set_learning_rate(0.0), hyper.min_learning_rate);
        assert_eq!(hyper.set_learning_rate(0.05), 0.05);

        let before = hyper.learning_rate;
        hyper.set_learning_rate(f64::NAN);
        assert_eq!(hyper.learning_rate, before);
    }

    #[test]
    fn test_invalid_beta_rejected() {
        let mut hyper = Hyperparameters::default();
        assert!(hyper.set_momentum_beta(1.0).is_err());
        assert!(hyper.set_momentum_beta(-0.1).is_err());
        assert!(hyper.set_momentum_beta(0.95).is_ok());
        assert_eq!(hyper.momentum_beta, 0.95);
    }

    #[test]
    fn test_update_cap_must_fit_epoch_cap() {
        let hyper = Hyperparameters {
            max_change_per_update: 20.0,
            max_change_per_epoch: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            hyper.validate(),
            Err(LearnerError::InvalidHyperparameter(_))
        ));
    }

    #[test]
    fn test_replay_samples_bounded_by_buffer() {
        let hyper = Hyperparameters {
            buffer_size: 2,
            replay_samples_per_update: 3,
            ..Default::default()
        };
        assert!(hyper.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let hyper = Hyperparameters::from_toml(
            r#"
            learning_rate = 0.05
            patience = 8
            "#,
        )
        .unwrap();

        assert_eq!(hyper.learning_rate, 0.05);
        assert_eq!(hyper.patience, 8);
        assert_eq!(hyper.buffer_size, 500);
    }

    #[test]
    fn test_toml_round_trip() {
        let hyper = Hyperparameters::default();
        let text = hyper.to_toml().unwrap();
        assert_eq!(Hyperparameters::from_toml(&text).unwrap(), hyper);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("persona.toml");
        std::fs::write(
            &path,
            r#"
            auto_remediate = false

            [hyperparameters]
            momentum_beta = 0.8
            "#,
        )
        .unwrap();

        let config = LearnerConfig::load(Some(&path)).unwrap();
        assert!(!config.auto_remediate);
        assert_eq!(config.hyperparameters.momentum_beta, 0.8);
        assert_eq!(config.hyperparameters.learning_rate, 0.1);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[hyperparameters]\npatience = 0\n").unwrap();

        assert!(LearnerConfig::load(Some(&path)).is_err());
    }
}
