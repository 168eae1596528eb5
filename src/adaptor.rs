//! Storage for results of minimizers other than the built-in GA.

use crate::error::{Error, Result};
use crate::ga::run::{finish, Staging};
use crate::ga::OptimizationResult;
use crate::model::Model;
use crate::objective::Objective;
use crate::store::{CheckpointWriter, RunStore};

/// Objective, bounds and progress log of one externally optimized run.
/// The staging directory is discarded unless a solution is imported.
pub struct ExternalOptimizer<'m> {
    model: &'m Model,
    objective: Objective<'m>,
    run_id: u32,
    staging: Staging,
    writer: CheckpointWriter,
}

impl<'m> ExternalOptimizer<'m> {
    pub fn new(model: &'m Model, run_id: u32, overwrite: bool) -> Result<Self> {
        let store = RunStore::new(model.path());
        let final_dir = store.run_dir(run_id);
        if final_dir.exists() && !overwrite {
            return Err(Error::storage(
                &final_dir,
                "run directory already exists; pass overwrite to replace it",
            ));
        }
        let objective = model.objective()?;
        let staging = Staging::create(store.staging_dir(run_id), overwrite)?;
        let writer = CheckpointWriter::new(&staging.path);
        Ok(Self {
            model,
            objective,
            run_id,
            staging,
            writer,
        })
    }

    /// Objective at linear-scale search values.
    pub fn objective(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Linear-scale bounds of the search coordinates.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.model.search_space().bounds()
    }

    /// Records one iteration of the external minimizer.
    pub fn callback(&self, values: &[f64]) -> Result<()> {
        let iteration = self.writer.log_lines()? + 1;
        let line = format!(
            "Generation{iteration}: Best Fitness = {:.6e}",
            self.objective(values)
        );
        self.writer.log(&line)?;
        tracing::info!(run_id = self.run_id, "{line}");
        Ok(())
    }

    /// Stores `values` as the best vector of the run; the iteration count is
    /// the number of logged callbacks.
    pub fn import_solution(self, values: &[f64]) -> Result<OptimizationResult> {
        let n = self.model.search_space().len();
        if values.len() != n {
            return Err(Error::InvalidArgument(format!(
                "solution has {} values, the search space has {n}",
                values.len()
            )));
        }
        let best_fitness = self.objective(values);
        let n_iter = self.writer.log_lines()? as u64;
        self.writer.improvement(n_iter, best_fitness, values)?;
        self.writer.count(n_iter)?;
        let final_dir = RunStore::new(self.model.path()).run_dir(self.run_id);
        finish(self.run_id, self.staging, &final_dir)
    }

    /// Runs `minimizer` against this adaptor and imports what it returns.
    pub fn minimize<F>(self, minimizer: F) -> Result<OptimizationResult>
    where
        F: FnOnce(&Self) -> Result<Vec<f64>>,
    {
        let solution = minimizer(&self)?;
        self.import_solution(&solution)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::compiler::CompileOptions;
    use crate::config::{Experiment, ProblemConfig};
    use crate::store;

    fn model(dir: &TempDir) -> Model {
        let timepoints = vec![0.0, 2.0, 4.0];
        let values = timepoints.iter().map(|t: &f64| Some((-0.3 * t).exp())).collect();
        let problem = ProblemConfig {
            experiments: BTreeMap::from([(
                "A_obs".to_string(),
                Experiment {
                    timepoints,
                    conditions: BTreeMap::from([("control".to_string(), values)]),
                    stdev: BTreeMap::new(),
                },
            )]),
            ..ProblemConfig::default()
        };
        let text = "A is degraded | kf=0.5 | A=1\n@obs A_obs: u[A]\n@sim tspan: [0, 4]\n";
        Model::from_text(dir.path(), text, problem, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn grid_search_is_stored_like_a_ga_run() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let result = ExternalOptimizer::new(&model, 4, false)
            .unwrap()
            .minimize(|opt| {
                let (lo, hi) = opt.bounds()[0];
                let mut best = (f64::INFINITY, vec![lo]);
                for k in 0..=20 {
                    let v = vec![lo * (hi / lo).powf(f64::from(k) / 20.0)];
                    let f = opt.objective(&v);
                    if f < best.0 {
                        best = (f, v.clone());
                    }
                    opt.callback(&best.1)?;
                }
                Ok(best.1)
            })
            .unwrap();
        assert_eq!(result.count_num, 21);
        assert_eq!(result.generation, 21);
        let store = RunStore::new(dir.path());
        assert_eq!(store.executable_runs().unwrap(), vec![4]);
        assert!(!store.staging_dir(4).exists());
        assert_relative_eq!(store::get_individual(&model, 4).unwrap()[0], result.best[0]);
        assert!((result.best[0] - 0.3).abs() < 0.05);
    }

    #[test]
    fn imported_defaults_reproduce_the_default_simulation() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let t1 = model.simulate(&model.pval(), &model.ival(), None).unwrap();
        let adaptor = ExternalOptimizer::new(&model, 1, false).unwrap();
        adaptor.import_solution(&model.search_space().default_values()).unwrap();
        let (x, y0) = store::load_param(&model, 1).unwrap();
        let t2 = model.simulate(&x, &y0, None).unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn abandoned_adaptor_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let model = model(&dir);
        let adaptor = ExternalOptimizer::new(&model, 2, false).unwrap();
        adaptor.callback(&[0.5]).unwrap();
        drop(adaptor);
        let store = RunStore::new(dir.path());
        assert!(!store.staging_dir(2).exists());
        assert!(!store.run_dir(2).exists());
    }
}
