//! `problem.json`: what the rule file does not describe.
//!
//! ```json
//! {
//!   "experiments": {
//!     "Phosphorylated_MEKc": {
//!       "timepoints": [0, 5, 15, 30],
//!       "conditions": { "EGF": [0.0, 0.8, 1.0, 0.6] }
//!     }
//!   },
//!   "normalization": { "Phosphorylated_MEKc": { "timepoint": null, "condition": [] } },
//!   "error_function": "rss",
//!   "bounds": { "kf1": [1e-3, 1e1] },
//!   "excluded_initials": ["EGF"]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observable::Normalization;
use crate::ode::SolverOptions;
use crate::search::BoundsOverrides;

pub const PROBLEM_FILE: &str = "problem.json";

/// Measurements of one observable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experiment {
    /// Sampling times; each must be a point of the simulation grid.
    pub timepoints: Vec<f64>,
    /// Values per condition, aligned with `timepoints`. `null` marks a
    /// missing measurement.
    pub conditions: BTreeMap<String, Vec<Option<f64>>>,
    /// Standard errors per condition; residuals are divided by them.
    pub stdev: BTreeMap<String, Vec<Option<f64>>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFunction {
    #[default]
    Rss,
    Cosine,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemConfig {
    pub experiments: BTreeMap<String, Experiment>,
    pub normalization: BTreeMap<String, Normalization>,
    pub error_function: ErrorFunction,
    pub bounds: BoundsOverrides,
    pub excluded_initials: Vec<String>,
    pub solver: SolverOptions,
}

impl ProblemConfig {
    /// Reads `<dir>/problem.json`; a missing file yields the defaults.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(PROBLEM_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, exp) in &self.experiments {
            let n = exp.timepoints.len();
            for (condition, values) in exp.conditions.iter().chain(&exp.stdev) {
                if values.len() != n {
                    return Err(Error::InvalidArgument(format!(
                        "experiment '{name}' condition '{condition}' has {} values for {n} timepoints",
                        values.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ProblemConfig::load(dir.path()).unwrap();
        assert_eq!(config, ProblemConfig::default());
        assert_eq!(config.solver.rtol, 1e-8);
    }

    #[test]
    fn parses_experiments_and_options() {
        let dir = TempDir::new().unwrap();
        let json = r#"{
            "experiments": {
                "pERK": {
                    "timepoints": [0, 10],
                    "conditions": { "EGF": [0.0, 1.0], "HRG": [0.0, null] }
                }
            },
            "normalization": { "pERK": { "timepoint": 1 } },
            "error_function": "cosine",
            "bounds": { "kf1": [0.1, 10] },
            "solver": { "rtol": 1e-6 }
        }"#;
        fs::write(dir.path().join(PROBLEM_FILE), json).unwrap();
        let config = ProblemConfig::load(dir.path()).unwrap();
        assert_eq!(config.error_function, ErrorFunction::Cosine);
        assert_eq!(config.experiments["pERK"].conditions["HRG"], vec![Some(0.0), None]);
        assert_eq!(config.normalization["pERK"].timepoint, Some(1));
        assert_eq!(config.solver.rtol, 1e-6);
        assert_eq!(config.solver.atol, 1e-8);
    }

    #[test]
    fn misaligned_values_are_rejected() {
        let mut config = ProblemConfig::default();
        config.experiments.insert(
            "pERK".into(),
            Experiment {
                timepoints: vec![0.0, 1.0],
                conditions: BTreeMap::from([("EGF".to_string(), vec![Some(1.0)])]),
                stdev: BTreeMap::new(),
            },
        );
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
