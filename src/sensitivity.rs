//! Logarithmic sensitivity of signaling metrics to reactions, parameters
//! and initial conditions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Model;
use crate::observable::Trajectories;
use crate::reaction::Perturbation;
use crate::store::{self, RunStore};

pub const SENSITIVITY_DIR: &str = "sensitivity_coefficients";

/// Last entry of the perturbed axis: the unperturbed simulation itself.
pub const REFERENCE: &str = "reference";

/// Scalar summary of one observable trace.
pub trait SignalingMetric: Sync {
    /// Cache key of the metric.
    fn name(&self) -> &str;
    fn compute(&self, t: &[f64], trace: &[f64]) -> f64;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Maximum,
    Minimum,
    Integral,
}

impl SignalingMetric for Metric {
    fn name(&self) -> &str {
        match self {
            Metric::Maximum => "maximum",
            Metric::Minimum => "minimum",
            Metric::Integral => "integral",
        }
    }

    fn compute(&self, t: &[f64], trace: &[f64]) -> f64 {
        match self {
            Metric::Maximum => trace.iter().copied().fold(f64::NAN, f64::max),
            Metric::Minimum => trace.iter().copied().fold(f64::NAN, f64::min),
            Metric::Integral => simpson(t, trace),
        }
    }
}

/// Composite Simpson rule on a possibly uneven grid; a trailing odd
/// interval is integrated with the trapezoid rule.
pub fn simpson(t: &[f64], y: &[f64]) -> f64 {
    let n = t.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut i = 0;
    while i + 2 < n {
        let h0 = t[i + 1] - t[i];
        let h1 = t[i + 2] - t[i + 1];
        let hs = h0 + h1;
        total += hs / 6.0
            * ((2.0 - h1 / h0) * y[i] + hs * hs / (h0 * h1) * y[i + 1] + (2.0 - h0 / h1) * y[i + 2]);
        i += 2;
    }
    if i + 1 < n {
        total += 0.5 * (t[i + 1] - t[i]) * (y[i] + y[i + 1]);
    }
    total
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Reaction,
    Parameter,
    Initial,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Reaction => "reaction",
            Target::Parameter => "parameter",
            Target::Initial => "initial_condition",
        }
    }
}

/// Presentation requested by the caller, recorded on the [`Sensitivity`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStyle {
    #[default]
    Barplot,
    Heatmap,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityOptions {
    pub rate: f64,
    pub metric: Metric,
    pub target: Target,
    /// Species never perturbed, on top of the problem's list.
    pub excluded_initials: Vec<String>,
    pub use_cache: bool,
}

impl Default for SensitivityOptions {
    fn default() -> Self {
        Self {
            rate: 1.01,
            metric: Metric::Maximum,
            target: Target::Reaction,
            excluded_initials: Vec::new(),
            use_cache: true,
        }
    }
}

/// `S[run][perturbed][observable][condition]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    pub target: Target,
    pub metric: String,
    pub rate: f64,
    #[serde(default)]
    pub style: AnalysisStyle,
    /// Run ids; `None` stands for the model defaults.
    pub runs: Vec<Option<u32>>,
    /// Perturbed names followed by [`REFERENCE`].
    pub perturbed: Vec<String>,
    pub observables: Vec<String>,
    pub conditions: Vec<String>,
    values: Vec<f64>,
}

impl Sensitivity {
    pub fn shape(&self) -> [usize; 4] {
        [
            self.runs.len(),
            self.perturbed.len(),
            self.observables.len(),
            self.conditions.len(),
        ]
    }

    pub fn get(&self, run: usize, perturbed: usize, obs: usize, cond: usize) -> f64 {
        let [_, p, o, c] = self.shape();
        self.values[((run * p + perturbed) * o + obs) * c + cond]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// `log(perturbed / reference) / log(rate)` with NaN kept, and zero for
/// a vanishing reference, a vanishing change or a non-positive ratio.
pub fn coefficient(perturbed: f64, reference: f64, rate: f64) -> f64 {
    if perturbed.is_nan() {
        return f64::NAN;
    }
    if reference.abs() < f64::EPSILON || (perturbed - reference).abs() < f64::EPSILON {
        return 0.0;
    }
    let ratio = perturbed / reference;
    if ratio <= 0.0 {
        return 0.0;
    }
    let s = ratio.ln() / rate.ln();
    if s.abs() < f64::EPSILON { 0.0 } else { s }
}

/// What gets multiplied by `rate` for one entry of the perturbed axis.
#[derive(Clone, Copy, Debug)]
enum Knob {
    Reaction(usize),
    Parameter(usize),
    Initial(usize),
}

fn knobs(model: &Model, target: Target, y0: &[f64], excluded: &[String]) -> Result<Vec<(Knob, String)>> {
    let compiled = model.compiled();
    for name in excluded {
        if !compiled.species.contains(name) {
            return Err(Error::InvalidArgument(format!(
                "excluded initial '{name}' is not a species"
            )));
        }
    }
    Ok(match target {
        Target::Reaction => compiled
            .network
            .reactions()
            .iter()
            .enumerate()
            .map(|(i, r)| (Knob::Reaction(i), format!("v{}", r.number())))
            .collect(),
        Target::Parameter => compiled
            .parameters
            .iter()
            .map(|(i, name)| (Knob::Parameter(i), name.to_string()))
            .collect(),
        Target::Initial => compiled
            .species
            .iter()
            .filter(|&(i, name)| y0[i] != 0.0 && !excluded.iter().any(|e| e == name))
            .map(|(i, name)| (Knob::Initial(i), name.to_string()))
            .collect(),
    })
}

fn cache_path(model_dir: &Path, target: Target, metric: &str) -> PathBuf {
    model_dir.join(SENSITIVITY_DIR).join(target.as_str()).join(metric)
}

fn metrics(traj: Option<&Trajectories>, metric: &dyn SignalingMetric, n_obs: usize, n_cond: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n_obs * n_cond);
    for obs in 0..n_obs {
        for cond in 0..n_cond {
            out.push(match traj {
                Some(traj) => metric.compute(&traj.t, &traj.trace(obs, cond)),
                None => f64::NAN,
            });
        }
    }
    out
}

/// Sensitivity coefficients of every executable run (the model defaults
/// when there is none), served from the cache when its axes still match.
pub fn analyze(
    model: &Model,
    options: &SensitivityOptions,
    metric: &dyn SignalingMetric,
) -> Result<Sensitivity> {
    if !(options.rate > 0.0 && options.rate != 1.0 && options.rate.is_finite()) {
        return Err(Error::InvalidArgument(format!("invalid perturbation rate {}", options.rate)));
    }
    let store = RunStore::new(model.path());
    let runs: Vec<Option<u32>> = match store.executable_runs()? {
        ids if ids.is_empty() => {
            tracing::info!("no executable runs; analyzing the default parameter set");
            vec![None]
        }
        ids => ids.into_iter().map(Some).collect(),
    };
    let mut excluded = model.problem().excluded_initials.clone();
    excluded.extend(options.excluded_initials.iter().cloned());

    let mut sets = Vec::with_capacity(runs.len());
    for run in &runs {
        sets.push(match run {
            Some(id) => store::load_param(model, *id)?,
            None => (model.pval(), model.ival()),
        });
    }
    // The perturbed axis follows the first parameter set.
    let knobs = knobs(model, options.target, &sets[0].1, &excluded)?;
    let perturbed: Vec<String> = knobs
        .iter()
        .map(|(_, name)| name.clone())
        .chain([REFERENCE.to_string()])
        .collect();
    let observables: Vec<String> = model.observables().iter().map(|s| s.to_string()).collect();
    let conditions: Vec<String> = model.conditions().iter().map(|s| s.to_string()).collect();

    let path = cache_path(model.path(), options.target, metric.name());
    if options.use_cache && path.exists() {
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        match serde_json::from_str::<Sensitivity>(&text) {
            Ok(cached)
                if cached.runs == runs
                    && cached.perturbed == perturbed
                    && cached.observables == observables
                    && cached.conditions == conditions
                    && cached.rate == options.rate =>
            {
                tracing::info!(path = %path.display(), "sensitivity coefficients loaded from cache");
                return Ok(cached);
            }
            Ok(_) => tracing::info!(path = %path.display(), "cached coefficients are stale; recomputing"),
            Err(err) => tracing::warn!(path = %path.display(), %err, "unreadable cache; recomputing"),
        }
    }

    let (n_obs, n_cond) = (observables.len(), conditions.len());
    let total = runs.len() * knobs.len();
    let mut values = Vec::with_capacity(runs.len() * perturbed.len() * n_obs * n_cond);
    let mut done = 0;
    for (run, (x, y0)) in runs.iter().zip(&sets) {
        let reference = match model.simulate(x, y0, None) {
            Ok(traj) => Some(traj),
            Err(failure) => {
                tracing::warn!(?run, %failure, "reference simulation failed");
                None
            }
        };
        let reference = metrics(reference.as_ref(), metric, n_obs, n_cond);
        for (knob, name) in &knobs {
            let mut x = x.clone();
            let mut y0 = y0.clone();
            let mut scales = Perturbation::new();
            match *knob {
                Knob::Reaction(j) => {
                    scales.insert(j, options.rate);
                }
                Knob::Parameter(j) => x[j] *= options.rate,
                Knob::Initial(j) => y0[j] *= options.rate,
            }
            let perturbation = (!scales.is_empty()).then_some(&scales);
            let traj = match model.simulate(&x, &y0, perturbation) {
                Ok(traj) => Some(traj),
                Err(failure) => {
                    tracing::warn!(?run, perturbed = %name, %failure, "perturbed simulation failed");
                    None
                }
            };
            let m = metrics(traj.as_ref(), metric, n_obs, n_cond);
            values.extend(m.iter().zip(&reference).map(|(&p, &r)| coefficient(p, r, options.rate)));
            done += 1;
            tracing::info!("{done}/{total}");
        }
        values.extend(reference.iter().map(|&r| coefficient(r, r, options.rate)));
    }

    let result = Sensitivity {
        target: options.target,
        metric: metric.name().to_string(),
        rate: options.rate,
        style: AnalysisStyle::default(),
        runs,
        perturbed,
        observables,
        conditions,
        values,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    store::write_atomic(&path, &serde_json::to_string(&result)?)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::compiler::CompileOptions;
    use crate::config::ProblemConfig;

    const TWO_DECAYS: &str = "\
A is degraded | kf=0.5 | A=1
B is degraded | kf=1 | B=0
@obs A_obs: u[A]
@obs B_obs: u[B]
@sim tspan: [0, 4]
";

    fn model(dir: &TempDir) -> Model {
        Model::from_text(dir.path(), TWO_DECAYS, ProblemConfig::default(), &CompileOptions::default()).unwrap()
    }

    #[test]
    fn coefficient_edge_cases() {
        assert!(coefficient(f64::NAN, 1.0, 1.01).is_nan());
        assert_eq!(coefficient(1.0, 0.0, 1.01), 0.0);
        assert_eq!(coefficient(2.0, 2.0, 1.01), 0.0);
        assert_eq!(coefficient(-1.0, 1.0, 1.01), 0.0);
        assert_relative_eq!(coefficient(1.01, 1.0, 1.01), 1.0, max_relative = 1e-12);
        assert_relative_eq!(coefficient(1.0 / 1.01, 1.0, 1.01), -1.0, max_relative = 1e-12);
    }

    #[test]
    fn simpson_is_exact_for_cubics() {
        let t: Vec<f64> = (0..=4).map(f64::from).collect();
        let y: Vec<f64> = t.iter().map(|t| t * t * t).collect();
        assert_relative_eq!(simpson(&t, &y), 64.0, max_relative = 1e-12);
        let uneven = [0.0, 1.0, 3.0];
        let y: Vec<f64> = uneven.iter().map(|t| t * t).collect();
        assert_relative_eq!(simpson(&uneven, &y), 9.0, max_relative = 1e-12);
        assert_relative_eq!(simpson(&[0.0, 2.0], &[1.0, 1.0]), 2.0);
    }

    #[test]
    fn reaction_sensitivities() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let options = SensitivityOptions {
            metric: Metric::Integral,
            ..SensitivityOptions::default()
        };
        let s = analyze(&model, &options, &options.metric).unwrap();
        assert_eq!(s.shape(), [1, 3, 2, 1]);
        assert_eq!(s.perturbed, vec!["v1", "v2", REFERENCE]);
        assert_eq!(s.runs, vec![None]);
        // A decays faster when v1 is scaled up.
        assert!(s.get(0, 0, 0, 0) < 0.0);
        // v2 carries no flux and B stays at zero.
        assert_eq!(s.get(0, 1, 0, 0), 0.0);
        assert_eq!(s.get(0, 0, 1, 0), 0.0);
        assert_eq!(s.get(0, 1, 1, 0), 0.0);
        assert_eq!(s.get(0, 2, 0, 0), 0.0);
        assert_eq!(s.get(0, 2, 1, 0), 0.0);
        assert!(cache_path(dir.path(), Target::Reaction, "integral").exists());
    }

    #[test]
    fn initial_targets_skip_zero_and_excluded_species() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let options = SensitivityOptions {
            target: Target::Initial,
            ..SensitivityOptions::default()
        };
        let s = analyze(&model, &options, &options.metric).unwrap();
        assert_eq!(s.perturbed, vec!["A", REFERENCE]);
        assert_relative_eq!(s.get(0, 0, 0, 0), 1.0, max_relative = 1e-6);

        let excluded = SensitivityOptions {
            excluded_initials: vec!["A".into()],
            use_cache: false,
            ..options
        };
        let s = analyze(&model, &excluded, &excluded.metric).unwrap();
        assert_eq!(s.perturbed, vec![REFERENCE]);
        assert_eq!(s.as_slice(), &[0.0, 0.0]);
    }

    struct Final;

    impl SignalingMetric for Final {
        fn name(&self) -> &str {
            "final"
        }

        fn compute(&self, _t: &[f64], trace: &[f64]) -> f64 {
            trace.last().copied().unwrap_or(f64::NAN)
        }
    }

    #[test]
    fn stale_cache_is_recomputed() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let options = SensitivityOptions {
            target: Target::Parameter,
            ..SensitivityOptions::default()
        };
        let first = analyze(&model, &options, &Final).unwrap();
        assert_eq!(first.perturbed, vec!["kf1", "kf2", REFERENCE]);
        let path = cache_path(dir.path(), Target::Parameter, "final");
        let mut stale = first.clone();
        stale.perturbed.pop();
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        let again = analyze(&model, &options, &Final).unwrap();
        assert_eq!(again, first);
        // kf1 multiplies the decay exponent of A at t = 4.
        assert_relative_eq!(first.get(0, 0, 0, 0), -0.5 * 4.0 * 1.01f64.ln().recip() * 0.01, max_relative = 1e-3);
    }
}
