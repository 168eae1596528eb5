//! A compiled model bundled with its problem description and search space.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compiler::{self, CompileOptions, CompiledModel};
use crate::config::ProblemConfig;
use crate::error::{Error, Result, SimulationFailure};
use crate::names::NameTable;
use crate::objective::Objective;
use crate::observable::Trajectories;
use crate::reaction::Perturbation;
use crate::search::SearchSpace;
use crate::simulation::Simulator;

pub const MODEL_FILE: &str = "model.txt";

#[derive(Clone, Debug)]
pub struct Model {
    path: PathBuf,
    compiled: CompiledModel,
    problem: ProblemConfig,
    space: SearchSpace,
}

impl Model {
    /// Opens a model directory holding `model.txt` (and optionally
    /// `problem.json`), or a rule file `dir/name.txt` whose results live
    /// in `dir/name/`.
    pub fn load(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Self> {
        let path = path.as_ref();
        let (rules, dir) = if path.is_dir() {
            (path.join(MODEL_FILE), path.to_path_buf())
        } else {
            let stem = path
                .file_stem()
                .ok_or_else(|| Error::InvalidArgument(format!("{} is not a rule file", path.display())))?;
            (path.to_path_buf(), path.with_file_name(stem))
        };
        let text = fs::read_to_string(&rules).map_err(|e| Error::io(&rules, e))?;
        let problem = ProblemConfig::load(&dir)?;
        let model = Self::from_text(dir, &text, problem, options)?;
        tracing::info!(
            path = %model.path.display(),
            species = model.compiled.species.len(),
            parameters = model.compiled.parameters.len(),
            reactions = model.compiled.network.n_reactions(),
            "model compiled"
        );
        Ok(model)
    }

    pub fn from_text(
        dir: impl Into<PathBuf>,
        text: &str,
        problem: ProblemConfig,
        options: &CompileOptions,
    ) -> Result<Self> {
        let compiled = compiler::compile_str(text, options)?;
        problem.validate()?;
        let space = SearchSpace::from_model(&compiled, &problem.bounds)?;
        Ok(Self {
            path: dir.into(),
            compiled,
            problem,
            space,
        })
    }

    /// Model directory; everything the library writes lives below it.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compiled(&self) -> &CompiledModel {
        &self.compiled
    }

    pub fn problem(&self) -> &ProblemConfig {
        &self.problem
    }

    /// Replaces the problem description and rebuilds the search space.
    pub fn set_problem(&mut self, problem: ProblemConfig) -> Result<()> {
        problem.validate()?;
        self.space = SearchSpace::from_model(&self.compiled, &problem.bounds)?;
        self.problem = problem;
        Ok(())
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn parameters(&self) -> &NameTable {
        &self.compiled.parameters
    }

    pub fn species(&self) -> &NameTable {
        &self.compiled.species
    }

    pub fn observables(&self) -> Vec<&str> {
        self.compiled.observables.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn conditions(&self) -> Vec<&str> {
        self.compiled.conditions.iter().map(|c| c.name.as_str()).collect()
    }

    /// Default parameter values.
    pub fn pval(&self) -> Vec<f64> {
        self.compiled.x.clone()
    }

    /// Default initial values.
    pub fn ival(&self) -> Vec<f64> {
        self.compiled.y0.clone()
    }

    pub fn simulator(&self) -> Simulator<'_> {
        Simulator::new(&self.compiled, self.problem.solver.clone())
    }

    pub fn simulate(
        &self,
        x: &[f64],
        y0: &[f64],
        perturbation: Option<&Perturbation>,
    ) -> std::result::Result<Trajectories, SimulationFailure> {
        self.simulator().simulate(x, y0, perturbation)
    }

    pub fn objective(&self) -> Result<Objective<'_>> {
        Objective::new(self)
    }

    /// Human-readable listing of fluxes, parameters and species.
    pub fn summary(&self) -> String {
        let c = &self.compiled;
        let mut out = String::new();
        let _ = writeln!(out, "Reactions ({}):", c.network.n_reactions());
        for reaction in c.network.reactions() {
            let _ = writeln!(
                out,
                "  v[{}] = {}    # {}: {}",
                reaction.number(),
                reaction.rate.render(&c.species, &c.parameters),
                reaction.kind.as_str(),
                reaction.text
            );
        }
        let _ = writeln!(out, "Parameters ({}):", c.parameters.len());
        for (idx, name) in c.parameters.iter() {
            let tag = match c.constraints.iter().find(|(d, _)| *d == idx) {
                Some(&(_, src)) => format!("  (= {})", &c.parameters[src]),
                None if c.constant[idx] => " const".to_string(),
                None => String::new(),
            };
            let _ = writeln!(out, "  {name} = {}{tag}", c.x[idx]);
        }
        let _ = writeln!(out, "Species ({}):", c.species.len());
        for (idx, name) in c.species.iter() {
            let tag = if c.network.is_fixed(idx) { " fixed" } else { "" };
            let _ = writeln!(out, "  {name}(0) = {}{tag}", c.y0[idx]);
        }
        let _ = writeln!(out, "Observables: {}", self.observables().join(", "));
        let _ = writeln!(out, "Conditions: {}", self.conditions().join(", "));
        if !c.restrictions.is_empty() {
            let _ = writeln!(out, "Thermodynamic restrictions:");
            for cycle in &c.restrictions {
                let ids: Vec<String> = cycle.iter().map(|r| r.to_string()).collect();
                let _ = writeln!(out, "  reactions {}", ids.join(", "));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const TEXT: &str = "\
E binds S <--> ES | kf=0.003, kr=0.001 | E=100, S=50
ES dissociates to E and P | kf=0.002, const kr=0
";

    #[test]
    fn loads_directory_with_model_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MODEL_FILE), TEXT).unwrap();
        let model = Model::load(dir.path(), &CompileOptions::default()).unwrap();
        assert_eq!(model.path(), dir.path());
        assert_eq!(model.pval(), vec![0.003, 0.001, 0.002, 0.0]);
        assert_eq!(model.ival(), vec![100.0, 50.0, 0.0, 0.0]);
        assert_eq!(model.search_space().len(), 3);
    }

    #[test]
    fn rule_file_path_maps_to_sibling_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("mm.txt");
        fs::write(&file, TEXT).unwrap();
        let model = Model::load(&file, &CompileOptions::default()).unwrap();
        assert_eq!(model.path(), dir.path().join("mm"));
    }

    #[test]
    fn missing_rule_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = Model::load(dir.path(), &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn summary_lists_everything() {
        let model = Model::from_text(".", TEXT, ProblemConfig::default(), &CompileOptions::default()).unwrap();
        let summary = model.summary();
        assert!(summary.contains("Reactions (2):"));
        assert!(summary.contains("kr2 = 0 const"));
        assert!(summary.contains("E(0) = 100"));
        assert!(summary.contains("binding"));
    }
}
