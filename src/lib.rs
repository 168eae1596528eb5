//! Rule-based modeling of intracellular signaling networks: a kinetic
//! rule compiler, a stiff ODE simulator, a real-coded genetic algorithm for
//! parameter estimation and a logarithmic sensitivity engine.
//!
//! ```no_run
//! use biomass::{create_model, optimize, run_simulation, CompileOptions, OptimizeOptions, VizType};
//!
//! # fn main() -> biomass::Result<()> {
//! let model = create_model("models/mapk", &CompileOptions::default())?;
//! optimize(&model, 1, &OptimizeOptions::default())?;
//! run_simulation(&model, VizType::Best)?;
//! # Ok(())
//! # }
//! ```

pub mod adaptor;
pub mod compiler;
pub mod config;
pub mod error;
pub mod expr;
pub mod ga;
pub mod model;
pub mod names;
pub mod objective;
pub mod observable;
pub mod ode;
pub mod reaction;
pub mod search;
pub mod sensitivity;
pub mod simulation;
pub mod store;
pub mod thermo;

#[cfg(feature = "python")]
mod python;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use adaptor::ExternalOptimizer;
pub use compiler::{CompileOptions, CompiledModel};
pub use config::{ErrorFunction, Experiment, ProblemConfig};
pub use error::{CompileError, Error, Result, SimulationFailure};
pub use ga::{continue_optimization, optimize, optimize_runs, LocalSearch, OptimizationResult, OptimizeOptions, Variant};
pub use model::Model;
pub use observable::{Normalization, Trajectories};
pub use ode::SolverOptions;
pub use reaction::Perturbation;
pub use sensitivity::{AnalysisStyle, Metric, Sensitivity, SensitivityOptions, SignalingMetric, Target};
pub use store::RunStore;

/// Compiles the model at `path` (a directory with `model.txt`, or a rule
/// file) together with its `problem.json`.
pub fn create_model(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Model> {
    Model::load(path, options)
}

/// Which parameter set `run_simulation` uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VizType {
    Original,
    Best,
    /// Mean over every executable run, stored under the tag `all`.
    Average,
    /// Experimental data only.
    Experiment,
    Run(u32),
}

impl VizType {
    pub fn tag(&self) -> String {
        match self {
            VizType::Original => "original".into(),
            VizType::Best => "best".into(),
            VizType::Average => "all".into(),
            VizType::Experiment => "experiment".into(),
            VizType::Run(id) => id.to_string(),
        }
    }
}

impl fmt::Display for VizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VizType::Average => f.write_str("average"),
            other => f.write_str(&other.tag()),
        }
    }
}

impl FromStr for VizType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(VizType::Original),
            "best" => Ok(VizType::Best),
            "average" => Ok(VizType::Average),
            "experiment" => Ok(VizType::Experiment),
            other => other.parse().map(VizType::Run).map_err(|_| {
                Error::InvalidArgument(format!(
                    "viz_type must be original, best, average, experiment or a run id, got '{other}'"
                ))
            }),
        }
    }
}

fn simulate_normalized(model: &Model, x: &[f64], y0: &[f64]) -> Result<Trajectories> {
    let traj = model.simulate(x, y0, None)?;
    traj.normalized(&model.problem().normalization)
}

/// Simulates the model with the requested parameter set and writes
/// `simulation_data/simulations_<tag>.json`. Trajectories are normalized
/// the way the objective sees them.
pub fn run_simulation(model: &Model, viz_type: VizType) -> Result<PathBuf> {
    let store = RunStore::new(model.path());
    let traj = match viz_type {
        VizType::Original => simulate_normalized(model, &model.pval(), &model.ival())?,
        VizType::Best => {
            let (run_id, fitness) = store
                .best_run()?
                .ok_or_else(|| Error::storage(store.out_dir(), "no executable runs"))?;
            tracing::info!(run_id, best_fitness = fitness, "simulating best run");
            let (x, y0) = store::load_param(model, run_id)?;
            simulate_normalized(model, &x, &y0)?
        }
        VizType::Run(run_id) => {
            let (x, y0) = store::load_param(model, run_id)?;
            simulate_normalized(model, &x, &y0)?
        }
        VizType::Average => {
            let runs = store.executable_runs()?;
            let mut all = Vec::with_capacity(runs.len());
            for run_id in runs {
                let (x, y0) = store::load_param(model, run_id)?;
                match simulate_normalized(model, &x, &y0) {
                    Ok(traj) => all.push(traj),
                    Err(err) => tracing::warn!(run_id, %err, "run left out of the average"),
                }
            }
            Trajectories::mean(&all).ok_or_else(|| Error::storage(store.out_dir(), "no run could be simulated"))?
        }
        VizType::Experiment => {
            let path = store::simulation_path(model.path(), &viz_type.tag());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            store::write_atomic(&path, &serde_json::to_string(&model.problem().experiments)?)?;
            return Ok(path);
        }
    };
    let path = store::save_simulation(model.path(), &viz_type.tag(), &traj)?;
    tracing::info!(path = %path.display(), "simulation saved");
    Ok(path)
}

/// Sensitivity analysis with one of the built-in metrics.
pub fn run_analysis(model: &Model, style: AnalysisStyle, options: &SensitivityOptions) -> Result<Sensitivity> {
    tracing::info!(
        perturbed = options.target.as_str(),
        metric = options.metric.name(),
        ?style,
        "sensitivity analysis"
    );
    let mut s = sensitivity::analyze(model, options, &options.metric)?;
    s.style = style;
    Ok(s)
}

#[cfg(test)]
mod tests;
