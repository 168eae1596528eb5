//! On-disk layout of optimization runs and exported results.
//!
//! ```text
//! <model>/out/<run_id>/{generation, count_num, best_fitness, fit_param{k}, optimization.log}
//! <model>/out/_tmp<run_id>/              staging while a run is in progress
//! <model>/simulation_data/simulations_<tag>.json
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Model;
use crate::observable::Trajectories;

pub const OUT_DIR: &str = "out";
pub const SIMULATION_DIR: &str = "simulation_data";
pub const LOG_FILE: &str = "optimization.log";
const GENERATION: &str = "generation";
const COUNT_NUM: &str = "count_num";
const BEST_FITNESS: &str = "best_fitness";

/// Persisted best-so-far state of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Generation of the last improvement.
    pub generation: u64,
    /// Generations executed so far.
    pub count_num: u64,
    pub best_fitness: f64,
    /// Decoded best values (`fit_param{generation}`).
    pub best: Vec<f64>,
}

pub fn fit_param_name(generation: u64) -> String {
    format!("fit_param{generation}")
}

/// Writes through a sibling temporary file and renames it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::storage(path, "not a file path"))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, contents).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

fn read_value<T: std::str::FromStr>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    text.trim()
        .parse()
        .map_err(|_| Error::storage(&path, format!("cannot parse '{}'", text.trim())))
}

/// Writer for the checkpoint files of one run directory.
pub struct CheckpointWriter {
    dir: PathBuf,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn count(&self, count_num: u64) -> Result<()> {
        write_atomic(&self.dir.join(COUNT_NUM), &format!("{count_num}\n"))
    }

    pub fn improvement(&self, generation: u64, best_fitness: f64, best: &[f64]) -> Result<()> {
        write_atomic(
            &self.dir.join(fit_param_name(generation)),
            &serde_json::to_string(best)?,
        )?;
        write_atomic(&self.dir.join(BEST_FITNESS), &format!("{best_fitness:e}\n"))?;
        write_atomic(&self.dir.join(GENERATION), &format!("{generation}\n"))
    }

    /// Appends one line to the optimization log.
    pub fn log(&self, line: &str) -> Result<()> {
        let path = self.dir.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        writeln!(file, "{line}").map_err(|e| Error::io(&path, e))
    }

    pub fn log_lines(&self) -> Result<usize> {
        let path = self.dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
    }

    pub fn read(&self) -> Result<Checkpoint> {
        let generation: u64 = read_value(&self.dir, GENERATION)?;
        let count_num: u64 = read_value(&self.dir, COUNT_NUM)?;
        let best_fitness: f64 = read_value(&self.dir, BEST_FITNESS)?;
        let path = self.dir.join(fit_param_name(generation));
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let best = serde_json::from_str(&text)?;
        Ok(Checkpoint {
            generation,
            count_num,
            best_fitness,
            best,
        })
    }
}

/// Run directories below `<model>/out`.
pub struct RunStore {
    model_dir: PathBuf,
}

impl RunStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.model_dir.join(OUT_DIR)
    }

    pub fn run_dir(&self, run_id: u32) -> PathBuf {
        self.out_dir().join(run_id.to_string())
    }

    pub fn staging_dir(&self, run_id: u32) -> PathBuf {
        self.out_dir().join(format!("_tmp{run_id}"))
    }

    pub fn checkpoint(&self, run_id: u32) -> Result<Checkpoint> {
        CheckpointWriter::new(self.run_dir(run_id)).read()
    }

    /// Runs with a readable checkpoint and a finite best fitness, sorted.
    pub fn executable_runs(&self) -> Result<Vec<u32>> {
        let out = self.out_dir();
        if !out.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&out).map_err(|e| Error::io(&out, e))? {
            let entry = entry.map_err(|e| Error::io(&out, e))?;
            let Some(run_id) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            match self.checkpoint(run_id) {
                Ok(cp) if cp.best_fitness.is_finite() => runs.push(run_id),
                Ok(_) => {}
                Err(err) => tracing::debug!(run_id, %err, "run is not executable"),
            }
        }
        runs.sort_unstable();
        Ok(runs)
    }

    /// Executable run with the lowest best fitness.
    pub fn best_run(&self) -> Result<Option<(u32, f64)>> {
        let mut best: Option<(u32, f64)> = None;
        for run_id in self.executable_runs()? {
            let fitness = self.checkpoint(run_id)?.best_fitness;
            if best.is_none_or(|(_, f)| fitness < f) {
                best = Some((run_id, fitness));
            }
        }
        Ok(best)
    }
}

/// Decoded best values of a run, in search-space order.
pub fn get_individual(model: &Model, run_id: u32) -> Result<Vec<f64>> {
    let checkpoint = RunStore::new(model.path()).checkpoint(run_id)?;
    let expected = model.search_space().len();
    if checkpoint.best.len() != expected {
        return Err(Error::storage(
            RunStore::new(model.path()).run_dir(run_id),
            format!(
                "stored vector has {} values, the search space has {expected}",
                checkpoint.best.len()
            ),
        ));
    }
    Ok(checkpoint.best)
}

/// Best `(x, y0)` of a run.
pub fn load_param(model: &Model, run_id: u32) -> Result<(Vec<f64>, Vec<f64>)> {
    let values = get_individual(model, run_id)?;
    Ok(model.search_space().update(&values))
}

pub fn simulation_path(model_dir: &Path, tag: &str) -> PathBuf {
    model_dir
        .join(SIMULATION_DIR)
        .join(format!("simulations_{tag}.json"))
}

pub fn save_simulation(model_dir: &Path, tag: &str, traj: &Trajectories) -> Result<PathBuf> {
    let path = simulation_path(model_dir, tag);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    write_atomic(&path, &serde_json::to_string(traj)?)?;
    Ok(path)
}

pub fn load_simulation(model_dir: &Path, tag: &str) -> Result<Trajectories> {
    let path = simulation_path(model_dir, tag);
    let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes `optimized_params.csv` and `optimized_initials.csv` with one row
/// per searched coordinate and executable run. Returns the written paths.
pub fn export_results(model: &Model) -> Result<Vec<PathBuf>> {
    let store = RunStore::new(model.path());
    let runs = store.executable_runs()?;
    if runs.is_empty() {
        return Err(Error::storage(store.out_dir(), "no executable runs to export"));
    }
    let space = model.search_space();
    let n_params = space.idx_params().len();
    let mut params = String::from("name,run_id,error,value\n");
    let mut initials = params.clone();
    for &run_id in &runs {
        let error = store.checkpoint(run_id)?.best_fitness;
        let (x, y0) = load_param(model, run_id)?;
        for &idx in space.idx_params() {
            params.push_str(&format!("{},{run_id},{error:e},{}\n", &model.parameters()[idx], x[idx]));
        }
        for &idx in space.idx_initials() {
            initials.push_str(&format!("{},{run_id},{error:e},{}\n", &model.species()[idx], y0[idx]));
        }
    }
    tracing::debug!(runs = runs.len(), n_params, "exporting optimized values");
    let mut written = Vec::new();
    for (name, table) in [("optimized_params.csv", params), ("optimized_initials.csv", initials)] {
        let path = model.path().join(name);
        write_atomic(&path, &table)?;
        written.push(path);
    }
    Ok(written)
}
