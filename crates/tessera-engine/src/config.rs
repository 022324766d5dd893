//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data so it can be loaded from a JSON
//! document; every field has a default, so a partial document (or `{}`) is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// 60 Hz.
const DEFAULT_FIXED_STEP_SECS: f64 = 1.0 / 60.0;

/// Scheduler and clock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one fixed step in seconds. Must be positive and finite.
    pub fixed_step_secs: f64,
    /// Multiplier applied to each frame delta before it feeds the fixed-step
    /// accumulator. Must be finite and non-negative.
    pub time_scale: f64,
    /// Hardware threads left free for the main thread and the OS when sizing
    /// the worker pool.
    pub reserved_threads: usize,
    /// Explicit worker count, overriding the hardware-derived size.
    pub worker_threads: Option<usize>,
    /// Upper bound on fixed steps per frame. `None` runs every accumulated step.
    pub max_fixed_steps: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_step_secs: DEFAULT_FIXED_STEP_SECS,
            time_scale: 1.0,
            reserved_threads: 1,
            worker_threads: None,
            max_fixed_steps: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Report the first field holding an unusable value.
    pub fn validate(&self) -> Result<(), EngineError> {
        // try_from_secs_f64 rejects NaN, negative and overflowing values.
        let step_ok = Duration::try_from_secs_f64(self.fixed_step_secs).is_ok_and(|d| !d.is_zero());
        if !step_ok {
            return Err(EngineError::InvalidConfig {
                field: "fixed_step_secs",
                reason: format!("must be positive and finite, got {}", self.fixed_step_secs),
            });
        }
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return Err(EngineError::InvalidConfig {
                field: "time_scale",
                reason: format!("must be finite and non-negative, got {}", self.time_scale),
            });
        }
        if self.worker_threads == Some(0) {
            return Err(EngineError::InvalidConfig {
                field: "worker_threads",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.max_fixed_steps == Some(0) {
            return Err(EngineError::InvalidConfig {
                field: "max_fixed_steps",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// The fixed step as a `Duration`.
    pub fn fixed_step(&self) -> Duration {
        Duration::try_from_secs_f64(self.fixed_step_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_nanos(16_666_667))
    }

    /// Worker pool size: the explicit override, or hardware concurrency minus
    /// the reserved threads. Never less than one.
    pub fn pool_size(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    .saturating_sub(self.reserved_threads)
            })
            .max(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_60hz() {
        let config = EngineConfig::default();
        assert!((config.fixed_step_secs - 1.0 / 60.0).abs() < f64::EPSILON);
        assert_eq!(config.time_scale, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config =
            EngineConfig::from_json(r#"{ "fixed_step_secs": 0.01, "worker_threads": 3 }"#).unwrap();
        assert_eq!(config.fixed_step_secs, 0.01);
        assert_eq!(config.pool_size(), 3);
        assert_eq!(config.reserved_threads, 1);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json("{ fixed_step_secs: }"),
            Err(EngineError::ConfigParse(_))
        ));
    }

    #[test]
    fn invalid_fields_are_reported() {
        for (json, expected) in [
            (r#"{ "fixed_step_secs": 0.0 }"#, "fixed_step_secs"),
            (r#"{ "fixed_step_secs": -1.0 }"#, "fixed_step_secs"),
            (r#"{ "time_scale": -0.5 }"#, "time_scale"),
            (r#"{ "worker_threads": 0 }"#, "worker_threads"),
            (r#"{ "max_fixed_steps": 0 }"#, "max_fixed_steps"),
        ] {
            match EngineConfig::from_json(json) {
                Err(EngineError::InvalidConfig { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected invalid {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_finite_step_rejected() {
        let config = EngineConfig {
            fixed_step_secs: f64::INFINITY,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = EngineConfig {
            fixed_step_secs: f64::NAN,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_size_is_at_least_one() {
        let config = EngineConfig {
            reserved_threads: usize::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(config.pool_size(), 1);
    }
}
