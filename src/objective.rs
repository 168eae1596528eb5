//! Distance between normalized simulations and experimental data.

use crate::config::ErrorFunction;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::observable::Trajectories;
use crate::simulation::Simulator;

/// Objective value of a failed or non-finite evaluation. Also the default
/// rejection threshold of the initial population.
pub const SENTINEL: f64 = 1e12;

/// Measurements of one observable under one condition.
struct Series {
    cond: usize,
    points: Vec<Point>,
}

struct Point {
    time: usize,
    value: f64,
    weight: f64,
}

struct ObservableData {
    obs: usize,
    series: Vec<Series>,
}

pub struct Objective<'m> {
    model: &'m Model,
    simulator: Simulator<'m>,
    data: Vec<ObservableData>,
    error_function: ErrorFunction,
}

impl<'m> Objective<'m> {
    /// Resolves experiment names and timepoints against the model once.
    pub fn new(model: &'m Model) -> Result<Self> {
        let compiled = model.compiled();
        let simulator = model.simulator();
        let grid = simulator.grid();
        let mut data = Vec::new();
        for (name, exp) in &model.problem().experiments {
            let obs = compiled
                .observables
                .iter()
                .position(|o| &o.name == name)
                .ok_or_else(|| Error::InvalidArgument(format!("experiment for unknown observable '{name}'")))?;
            let times = exp
                .timepoints
                .iter()
                .map(|&tp| {
                    grid.iter()
                        .position(|&t| (t - tp).abs() <= 1e-9 * tp.abs().max(1.0))
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "experiment '{name}': timepoint {tp} is not on the simulation grid"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let mut series = Vec::new();
            for (condition, values) in &exp.conditions {
                let cond = compiled
                    .conditions
                    .iter()
                    .position(|c| &c.name == condition)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "experiment '{name}' refers to unknown condition '{condition}'"
                        ))
                    })?;
                let stdev = exp.stdev.get(condition);
                let points = times
                    .iter()
                    .zip(values)
                    .enumerate()
                    .filter_map(|(k, (&time, value))| {
                        let value = (*value)?;
                        let sd = stdev.and_then(|s| s.get(k).copied().flatten());
                        let weight = match sd {
                            Some(sd) if sd > 0.0 => 1.0 / sd,
                            _ => 1.0,
                        };
                        Some(Point {
                            time,
                            value,
                            weight,
                        })
                    })
                    .collect();
                series.push(Series { cond, points });
            }
            data.push(ObservableData { obs, series });
        }
        Ok(Self {
            model,
            simulator,
            data,
            error_function: model.problem().error_function,
        })
    }

    pub fn model(&self) -> &Model {
        self.model
    }

    pub fn has_data(&self) -> bool {
        self.data.iter().any(|d| d.series.iter().any(|s| !s.points.is_empty()))
    }

    /// Objective at search-space values. Simulation failures yield
    /// [`SENTINEL`].
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        let (x, y0) = self.model.search_space().update(values);
        let traj = match self.simulator.simulate(&x, &y0, None) {
            Ok(traj) => traj,
            Err(failure) => {
                tracing::debug!(%failure, "simulation rejected");
                return SENTINEL;
            }
        };
        let normalized = match traj.normalized(&self.model.problem().normalization) {
            Ok(traj) => traj,
            Err(err) => {
                tracing::warn!(%err, "normalization failed");
                return SENTINEL;
            }
        };
        let value = self.error(&normalized);
        if value.is_finite() { value } else { SENTINEL }
    }

    pub fn evaluate_gene(&self, gene: &[f64]) -> f64 {
        self.evaluate(&self.model.search_space().gene_to_val(gene))
    }

    /// Sum over observables of the configured distance.
    pub fn error(&self, traj: &Trajectories) -> f64 {
        self.data
            .iter()
            .map(|d| {
                let pairs = d.series.iter().flat_map(|s| {
                    s.points
                        .iter()
                        .map(move |p| (traj.get(d.obs, p.time, s.cond), p.value, p.weight))
                });
                match self.error_function {
                    ErrorFunction::Rss => pairs.map(|(sim, exp, w)| ((sim - exp) * w).powi(2)).sum(),
                    ErrorFunction::Cosine => cosine_distance(pairs.map(|(sim, exp, _)| (sim, exp))),
                }
            })
            .sum()
    }
}

fn cosine_distance(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (mut dot, mut ss, mut ee) = (0.0, 0.0, 0.0);
    for (s, e) in pairs {
        dot += s * e;
        ss += s * s;
        ee += e * e;
    }
    let norm = (ss * ee).sqrt();
    if norm == 0.0 { 1.0 } else { 1.0 - dot / norm }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_relative_eq;

    use super::*;
    use crate::compiler::CompileOptions;
    use crate::config::{Experiment, ProblemConfig};

    const DECAY: &str = "A is degraded | kf=0.5 | A=1\n@obs A_obs: u[A]\n@sim tspan: [0, 4]\n";

    fn decay_model(error_function: ErrorFunction) -> Model {
        let values: Vec<Option<f64>> = [0.0, 2.0, 4.0].iter().map(|t: &f64| Some((-0.5 * t).exp())).collect();
        let problem = ProblemConfig {
            experiments: BTreeMap::from([(
                "A_obs".to_string(),
                Experiment {
                    timepoints: vec![0.0, 2.0, 4.0],
                    conditions: BTreeMap::from([("control".to_string(), values)]),
                    stdev: BTreeMap::new(),
                },
            )]),
            error_function,
            ..ProblemConfig::default()
        };
        Model::from_text(".", DECAY, problem, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn true_parameters_give_zero_rss() {
        let model = decay_model(ErrorFunction::Rss);
        let objective = Objective::new(&model).unwrap();
        assert!(objective.has_data());
        assert!(objective.evaluate(&[0.5]) < 1e-10);
        assert!(objective.evaluate(&[1.0]) > 1e-3);
    }

    #[test]
    fn cosine_distance_ignores_scale() {
        assert_relative_eq!(cosine_distance([(1.0, 2.0), (2.0, 4.0)].into_iter()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(cosine_distance([(1.0, 0.0), (0.0, 1.0)].into_iter()), 1.0);
        assert_eq!(cosine_distance([(0.0, 1.0)].into_iter()), 1.0);
        let model = decay_model(ErrorFunction::Cosine);
        let objective = Objective::new(&model).unwrap();
        assert!(objective.evaluate(&[0.5]) < 1e-10);
    }

    #[test]
    fn off_grid_timepoint_is_rejected() {
        let mut model = decay_model(ErrorFunction::Rss);
        let mut problem = model.problem().clone();
        if let Some(exp) = problem.experiments.get_mut("A_obs") {
            exp.timepoints[1] = 2.5;
        }
        model.set_problem(problem).unwrap();
        assert!(matches!(Objective::new(&model), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn failed_simulation_gives_sentinel() {
        let text = "@rxn A --> B: p[k] * sqrt(u[A] - 2) | k=1 | A=1\n@sim tspan: [0, 2]\n";
        let problem = ProblemConfig {
            experiments: BTreeMap::from([(
                "A".to_string(),
                Experiment {
                    timepoints: vec![2.0],
                    conditions: BTreeMap::from([("control".to_string(), vec![Some(0.0)])]),
                    stdev: BTreeMap::new(),
                },
            )]),
            ..ProblemConfig::default()
        };
        let model = Model::from_text(".", text, problem, &CompileOptions::default()).unwrap();
        let objective = Objective::new(&model).unwrap();
        assert_eq!(objective.evaluate(&[1.0]), SENTINEL);
    }
}
