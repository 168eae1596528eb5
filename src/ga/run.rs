//! Run directories: staging, checkpoints and the final rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use super::{Engine, OptimizeOptions};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::store::{CheckpointWriter, RunStore};

/// Outcome of one run, read back from its final checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: u32,
    /// Generation of the last improvement.
    pub generation: u64,
    pub count_num: u64,
    pub best_fitness: f64,
    /// Best search-space values.
    pub best: Vec<f64>,
}

/// Staging directory removed on drop unless committed.
pub(crate) struct Staging {
    pub(crate) path: PathBuf,
    committed: bool,
}

impl Staging {
    fn adopt(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    pub(crate) fn create(path: PathBuf, discard_existing: bool) -> Result<Self> {
        if path.exists() {
            if !discard_existing {
                return Err(Error::storage(
                    &path,
                    "a partial run is staged here; pass overwrite to discard it",
                ));
            }
            fs::remove_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        }
        fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self::adopt(path))
    }

    fn commit(mut self, target: &Path) -> Result<()> {
        if target.exists() {
            fs::remove_dir_all(target).map_err(|e| Error::io(target, e))?;
        }
        fs::rename(&self.path, target).map_err(|e| Error::io(target, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), %err, "could not remove staging directory");
            }
        }
    }
}

fn copy_files(from: &Path, to: &Path) -> Result<()> {
    for entry in fs::read_dir(from).map_err(|e| Error::io(from, e))? {
        let entry = entry.map_err(|e| Error::io(from, e))?;
        let source = entry.path();
        if source.is_file() {
            let dest = to.join(entry.file_name());
            fs::copy(&source, &dest).map_err(|e| Error::io(&dest, e))?;
        }
    }
    Ok(())
}

fn resolve_seed(options: &OptimizeOptions, run_id: u32) -> u64 {
    options.seed.unwrap_or_else(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        u64::from(run_id) ^ nanos
    })
}

pub(crate) fn finish(run_id: u32, staging: Staging, final_dir: &Path) -> Result<OptimizationResult> {
    let checkpoint = CheckpointWriter::new(&staging.path).read()?;
    staging.commit(final_dir)?;
    tracing::info!(
        run_id,
        generation = checkpoint.generation,
        count_num = checkpoint.count_num,
        best_fitness = checkpoint.best_fitness,
        "run finished"
    );
    Ok(OptimizationResult {
        run_id,
        generation: checkpoint.generation,
        count_num: checkpoint.count_num,
        best_fitness: checkpoint.best_fitness,
        best: checkpoint.best,
    })
}

/// Fresh run `run_id`: uniform initial population, evolution in
/// `out/_tmp{run_id}`, then a rename to `out/{run_id}`.
pub fn optimize(model: &Model, run_id: u32, options: &OptimizeOptions) -> Result<OptimizationResult> {
    let n = model.search_space().len();
    options.validate(n)?;
    let objective = model.objective()?;
    if !objective.has_data() {
        tracing::warn!(run_id, "no experimental data; every candidate scores zero");
    }
    let store = RunStore::new(model.path());
    let final_dir = store.run_dir(run_id);
    if final_dir.exists() && !options.overwrite {
        return Err(Error::storage(
            &final_dir,
            "run directory already exists; pass overwrite to replace it",
        ));
    }
    let staging = Staging::create(store.staging_dir(run_id), options.overwrite)?;
    let writer = CheckpointWriter::new(&staging.path);

    let seed = resolve_seed(options, run_id);
    tracing::info!(run_id, seed, n, "optimization started");
    let mut engine = Engine::new(&objective, options, run_id, seed)?;
    let mut population = engine.initial_population()?;
    let best = &population[0];
    writer.improvement(0, best.fitness, &model.search_space().gene_to_val(&best.gene))?;
    writer.count(0)?;
    let recorded = best.fitness;
    engine.evolve(&mut population, 0, recorded, &writer)?;
    finish(run_id, staging, &final_dir)
}

/// Extends run `run_id` to `options.max_generation` generations in total,
/// seeding the population around its stored best vector. A staging
/// directory left by an interrupted run is resumed only with
/// `recover_partial`.
pub fn continue_optimization(
    model: &Model,
    run_id: u32,
    options: &OptimizeOptions,
) -> Result<OptimizationResult> {
    let n = model.search_space().len();
    options.validate(n)?;
    let objective = model.objective()?;
    let store = RunStore::new(model.path());
    let final_dir = store.run_dir(run_id);
    let staging_dir = store.staging_dir(run_id);
    let resume = staging_dir.exists();
    if resume && !options.recover_partial {
        return Err(Error::storage(
            &staging_dir,
            "a partial run is staged here; pass recover_partial to resume it",
        ));
    }
    let source = if resume { &staging_dir } else { &final_dir };
    if !source.exists() {
        return Err(Error::storage(source, "no run to continue"));
    }
    let checkpoint = CheckpointWriter::new(source).read()?;
    if options.max_generation <= checkpoint.count_num {
        return Err(Error::InvalidArgument(format!(
            "max_generation {} does not extend the {} generations already executed",
            options.max_generation, checkpoint.count_num
        )));
    }
    if checkpoint.best.len() != n {
        return Err(Error::storage(
            source,
            format!("stored vector has {} values, the search space has {n}", checkpoint.best.len()),
        ));
    }
    let staging = if resume {
        Staging::adopt(staging_dir)
    } else {
        let staging = Staging::create(staging_dir, false)?;
        copy_files(&final_dir, &staging.path)?;
        staging
    };
    let writer = CheckpointWriter::new(&staging.path);

    let seed = resolve_seed(options, run_id);
    tracing::info!(run_id, seed, from = checkpoint.count_num, "optimization continued");
    let mut engine = Engine::new(&objective, options, run_id, seed)?;
    let mut population = engine.perturbed_population(&checkpoint.best)?;
    engine.evolve(&mut population, checkpoint.count_num, checkpoint.best_fitness, &writer)?;
    finish(run_id, staging, &final_dir)
}

/// Independent runs over a thread pool of `n_threads` (rayon's default
/// when `None`). Inner DE workers are refused when more than one run is
/// requested.
pub fn optimize_runs(
    model: &Model,
    run_ids: &[u32],
    options: &OptimizeOptions,
    n_threads: Option<usize>,
) -> Result<Vec<OptimizationResult>> {
    if run_ids.len() > 1 && options.workers > 1 {
        return Err(Error::InvalidArgument(
            "workers > 1 cannot be combined with parallel runs".into(),
        ));
    }
    let run = || -> Result<Vec<OptimizationResult>> {
        run_ids.par_iter().map(|&id| optimize(model, id, options)).collect()
    };
    match n_threads {
        Some(n) => ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?
            .install(run),
        None => run(),
    }
}
