//! Observable trajectories and their normalization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How an observable is scaled before it is compared with data.
///
/// `timepoint` indexes the output grid. Without it the trace is divided by
/// its maximum over time; with it, by the value at that grid point. Either
/// maximum is taken over `condition` (every condition when empty).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub timepoint: Option<usize>,
    pub condition: Vec<String>,
}

/// Simulated observables laid out as `[observable × time × condition]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectories {
    pub observables: Vec<String>,
    pub t: Vec<f64>,
    pub conditions: Vec<String>,
    values: Vec<f64>,
}

impl Trajectories {
    pub fn zeros(observables: Vec<String>, t: Vec<f64>, conditions: Vec<String>) -> Self {
        let len = observables.len() * t.len() * conditions.len();
        Self {
            observables,
            t,
            conditions,
            values: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.observables.len(), self.t.len(), self.conditions.len()]
    }

    fn offset(&self, obs: usize, t: usize, cond: usize) -> usize {
        (obs * self.t.len() + t) * self.conditions.len() + cond
    }

    pub fn get(&self, obs: usize, t: usize, cond: usize) -> f64 {
        self.values[self.offset(obs, t, cond)]
    }

    pub fn set(&mut self, obs: usize, t: usize, cond: usize, value: f64) {
        let idx = self.offset(obs, t, cond);
        self.values[idx] = value;
    }

    /// Row-major `[observable][time][condition]` values.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn observable_index(&self, name: &str) -> Option<usize> {
        self.observables.iter().position(|o| o == name)
    }

    pub fn condition_index(&self, name: &str) -> Option<usize> {
        self.conditions.iter().position(|c| c == name)
    }

    pub fn trace(&self, obs: usize, cond: usize) -> Vec<f64> {
        (0..self.t.len()).map(|t| self.get(obs, t, cond)).collect()
    }

    /// Divides observable `obs` by its normalization denominator. A zero or
    /// non-finite denominator leaves the trace unchanged.
    pub fn normalize(&mut self, obs: usize, norm: &Normalization) -> Result<()> {
        let scope = if norm.condition.is_empty() {
            (0..self.conditions.len()).collect::<Vec<_>>()
        } else {
            norm.condition
                .iter()
                .map(|name| {
                    self.condition_index(name).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "normalization of '{}' names unknown condition '{name}'",
                            self.observables[obs]
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let times: Vec<usize> = match norm.timepoint {
            Some(tau) if tau >= self.t.len() => {
                return Err(Error::InvalidArgument(format!(
                    "normalization timepoint {tau} is outside the grid of {} points",
                    self.t.len()
                )));
            }
            Some(tau) => vec![tau],
            None => (0..self.t.len()).collect(),
        };
        let denominator = scope
            .iter()
            .flat_map(|&c| times.iter().map(move |&t| (t, c)))
            .map(|(t, c)| self.get(obs, t, c))
            .fold(f64::NEG_INFINITY, f64::max);
        if denominator == 0.0 || !denominator.is_finite() {
            tracing::debug!(
                observable = %self.observables[obs],
                denominator,
                "trace left unnormalized"
            );
            return Ok(());
        }
        for t in 0..self.t.len() {
            for c in 0..self.conditions.len() {
                let idx = self.offset(obs, t, c);
                self.values[idx] /= denominator;
            }
        }
        Ok(())
    }

    /// Copy with every observable that has a descriptor normalized.
    pub fn normalized(&self, norms: &BTreeMap<String, Normalization>) -> Result<Self> {
        let mut out = self.clone();
        for (name, norm) in norms {
            if let Some(obs) = out.observable_index(name) {
                out.normalize(obs, norm)?;
            }
        }
        Ok(out)
    }

    /// Elementwise mean of several trajectories of the same shape.
    pub fn mean(all: &[Self]) -> Option<Self> {
        let (first, rest) = all.split_first()?;
        let mut out = first.clone();
        for other in rest {
            if other.shape() != out.shape() {
                return None;
            }
            for (acc, v) in out.values.iter_mut().zip(&other.values) {
                *acc += v;
            }
        }
        let n = all.len() as f64;
        out.values.iter_mut().for_each(|v| *v /= n);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Trajectories {
        let mut traj = Trajectories::zeros(
            vec!["pERK".into(), "zero".into()],
            vec![0.0, 1.0, 2.0],
            vec!["EGF".into(), "HRG".into()],
        );
        for (t, (egf, hrg)) in [(0.0, 0.0), (4.0, 2.0), (2.0, 8.0)].into_iter().enumerate() {
            traj.set(0, t, 0, egf);
            traj.set(0, t, 1, hrg);
        }
        traj
    }

    #[test]
    fn maximum_over_time_and_conditions_becomes_one() {
        let mut traj = sample();
        traj.normalize(0, &Normalization::default()).unwrap();
        let max = traj.trace(0, 0).into_iter().chain(traj.trace(0, 1)).fold(0.0, f64::max);
        assert_eq!(max, 1.0);
        assert_eq!(traj.get(0, 1, 0), 0.5);
    }

    #[test]
    fn timepoint_value_becomes_one() {
        let mut traj = sample();
        let norm = Normalization {
            timepoint: Some(1),
            condition: vec!["EGF".into()],
        };
        traj.normalize(0, &norm).unwrap();
        assert_eq!(traj.get(0, 1, 0), 1.0);
        assert_eq!(traj.get(0, 2, 1), 2.0);
    }

    #[test]
    fn zero_trace_is_left_unchanged() {
        let mut traj = sample();
        traj.normalize(1, &Normalization::default()).unwrap();
        assert!(traj.trace(1, 0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn unknown_condition_or_timepoint_is_rejected() {
        let mut traj = sample();
        let bad = Normalization {
            timepoint: None,
            condition: vec!["TNF".into()],
        };
        assert!(traj.normalize(0, &bad).is_err());
        let bad = Normalization {
            timepoint: Some(3),
            condition: Vec::new(),
        };
        assert!(traj.normalize(0, &bad).is_err());
    }

    #[test]
    fn mean_averages_elementwise() {
        let a = sample();
        let mut b = sample();
        b.set(0, 1, 0, 8.0);
        let mean = Trajectories::mean(&[a, b]).unwrap();
        assert_eq!(mean.get(0, 1, 0), 6.0);
        assert!(Trajectories::mean(&[]).is_none());
    }
}
