//! Calibration configuration.
//!
//! [`CalibrationConfig`] carries every knob of the offline pipeline. All fields
//! have defaults matching the reference experiments, so a partial JSON document
//! only needs the values it changes:
//!
//! ```json
//! { "k": 10, "alpha": 0.05, "schedule": { "start": 1, "end": 513, "step": 16 } }
//! ```
//!
//! # Environment Variable Overrides
//!
//! | Variable         | Field   | Default |
//! |------------------|---------|---------|
//! | `RISKANN_K`      | `k`     | `10`    |
//! | `RISKANN_ALPHA`  | `alpha` | `0.1`   |
//! | `RISKANN_GAMMA`  | `gamma` | `0.01`  |
//! | `RISKANN_C_REG`  | `c_reg` | `2`     |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{LambdaGrid, Regularization, RiskControl};
use crate::schedule::EffortSchedule;
use crate::{Result, RetrieveError};

/// Arithmetic effort schedule `start, start + step, ...` up to `end` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub start: usize,
    pub end: usize,
    pub step: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start: 1,
            end: 1024,
            step: 20,
        }
    }
}

impl ScheduleConfig {
    /// Materialize the schedule.
    pub fn build(&self) -> Result<EffortSchedule> {
        EffortSchedule::linear(self.start, self.end, self.step)
    }
}

/// Settings for [`crate::calibration::calibrate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Neighbors per query. Default: 10.
    pub k: usize,
    /// Target expected FNR, in (0, 1]. Default: 0.1.
    pub alpha: f32,
    /// Upper bound on the per-query loss. Default: 1.0 (FNR).
    pub risk_bound: f32,
    /// Penalty per schedule position past `c_reg`. Default: 0.01.
    pub gamma: f32,
    /// Last penalty-free schedule position. Default: 2.
    pub c_reg: usize,
    /// Threshold candidates. Default: 0.0 to 1.5 step 0.005.
    pub lambda_grid: LambdaGrid,
    /// Effort levels. Default: 1 to 1024 step 20.
    pub schedule: ScheduleConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let regularization = Regularization::default();
        let control = RiskControl::default();
        Self {
            k: 10,
            alpha: control.alpha,
            risk_bound: control.risk_bound,
            gamma: regularization.gamma,
            c_reg: regularization.c_reg,
            lambda_grid: control.grid,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RetrieveError::Config(format!("invalid calibration config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RetrieveError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded calibration config");
        Ok(config)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RetrieveError::Config(e.to_string()))
    }

    /// Apply `RISKANN_*` environment overrides.
    ///
    /// Only fields whose variable is set and parses are changed. Call
    /// [`CalibrationConfig::validate`] afterwards.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(k) = lookup("RISKANN_K").and_then(|v| v.trim().parse().ok()) {
            self.k = k;
        }
        if let Some(alpha) = lookup("RISKANN_ALPHA").and_then(|v| v.trim().parse().ok()) {
            self.alpha = alpha;
        }
        if let Some(gamma) = lookup("RISKANN_GAMMA").and_then(|v| v.trim().parse().ok()) {
            self.gamma = gamma;
        }
        if let Some(c_reg) = lookup("RISKANN_C_REG").and_then(|v| v.trim().parse().ok()) {
            self.c_reg = c_reg;
        }
        self
    }

    /// Range-check every field.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(RetrieveError::Config("k must be positive".into()));
        }
        let wrap = |e: RetrieveError| RetrieveError::Config(e.to_string());
        self.regularization().validate().map_err(wrap)?;
        self.risk_control().validate().map_err(wrap)?;
        self.effort_schedule().map_err(wrap)?;
        Ok(())
    }

    /// Position penalty.
    pub fn regularization(&self) -> Regularization {
        Regularization {
            gamma: self.gamma,
            c_reg: self.c_reg,
        }
    }

    /// Target and threshold grid.
    pub fn risk_control(&self) -> RiskControl {
        RiskControl {
            alpha: self.alpha,
            risk_bound: self.risk_bound,
            grid: self.lambda_grid,
        }
    }

    /// Effort schedule.
    pub fn effort_schedule(&self) -> Result<EffortSchedule> {
        self.schedule.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_reference_experiments() {
        let config = CalibrationConfig::default();
        assert_eq!(config.k, 10);
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.gamma, 0.01);
        assert_eq!(config.c_reg, 2);
        assert_eq!(config.lambda_grid.len(), 301);
        assert_eq!(config.effort_schedule().unwrap().max_effort(), 1021);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = CalibrationConfig::from_json_str(
            r#"{ "alpha": 0.05, "schedule": { "end": 101 } }"#,
        )
        .unwrap();
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.k, 10);
        assert_eq!(config.effort_schedule().unwrap().efforts(), &[1, 21, 41, 61, 81, 101]);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        assert!(matches!(
            CalibrationConfig::from_json_str(r#"{ "alhpa": 0.1 }"#),
            Err(RetrieveError::Config(_))
        ));
        assert!(matches!(
            CalibrationConfig::from_json_str(r#"{ "alpha": 0.0 }"#),
            Err(RetrieveError::Config(_))
        ));
        assert!(matches!(
            CalibrationConfig::from_json_str(r#"{ "k": 0 }"#),
            Err(RetrieveError::Config(_))
        ));
        assert!(matches!(
            CalibrationConfig::from_json_str(r#"{ "schedule": { "step": 0 } }"#),
            Err(RetrieveError::Config(_))
        ));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let config = CalibrationConfig {
            alpha: 0.2,
            k: 5,
            ..Default::default()
        };
        std::fs::write(&path, config.to_json_string().unwrap()).unwrap();
        assert_eq!(CalibrationConfig::from_json_file(&path).unwrap(), config);

        assert!(matches!(
            CalibrationConfig::from_json_file(dir.path().join("nope.json")),
            Err(RetrieveError::Config(_))
        ));
    }

    #[test]
    fn overrides_apply_only_parseable_values() {
        let vars: HashMap<&str, &str> =
            [("RISKANN_ALPHA", "0.25"), ("RISKANN_K", "many"), ("RISKANN_C_REG", " 4 ")]
                .into_iter()
                .collect();
        let config = CalibrationConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.alpha, 0.25);
        assert_eq!(config.k, 10);
        assert_eq!(config.c_reg, 4);
        assert_eq!(config.gamma, 0.01);
    }
}
