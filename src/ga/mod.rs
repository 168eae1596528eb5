//! Real-coded genetic algorithm (minimal generation gap with UNDX, or
//! distance-independent diversity control with ENDX and local search).

pub mod crossover;
pub mod local;
pub(crate) mod run;

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::objective::Objective;
use crate::store::CheckpointWriter;

pub use run::{continue_optimization, optimize, optimize_runs, OptimizationResult};

/// Children of one converging step.
pub const CONVERGING_CHILDREN: usize = 10;
/// Sampling attempts per initial member before giving up.
const INIT_ATTEMPTS: usize = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalSearch {
    #[default]
    Mutation,
    Powell,
    De,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    V1,
    #[default]
    V2,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    /// Population size per search dimension.
    pub popsize: usize,
    /// Total generations of the run, continuation included.
    pub max_generation: u64,
    pub allowable_error: f64,
    /// Initial candidates scoring above this are resampled.
    pub initial_threshold: f64,
    pub local_search: LocalSearch,
    pub variant: Variant,
    pub n_children: usize,
    /// Multiplicative range for seeding a continued run.
    pub p0_bounds: [f64; 2],
    pub overwrite: bool,
    pub seed: Option<u64>,
    /// Inner workers for DE local search.
    pub workers: usize,
    pub recover_partial: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            popsize: 5,
            max_generation: 10_000,
            allowable_error: 0.0,
            initial_threshold: 1e12,
            local_search: LocalSearch::Mutation,
            variant: Variant::V2,
            n_children: 50,
            p0_bounds: [0.1, 10.0],
            overwrite: false,
            seed: None,
            workers: 1,
            recover_partial: false,
        }
    }
}

impl OptimizeOptions {
    pub fn validate(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidArgument("the search space is empty".into()));
        }
        if self.popsize * n < n + 2 {
            return Err(Error::InvalidArgument(format!(
                "population of {} is too small for {n} search coordinates (need {})",
                self.popsize * n,
                n + 2
            )));
        }
        if self.n_children == 0 {
            return Err(Error::InvalidArgument("n_children must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidArgument("workers must be positive".into()));
        }
        let [lo, hi] = self.p0_bounds;
        if !(lo > 0.0 && hi > lo && hi.is_finite()) {
            return Err(Error::InvalidArgument(format!("invalid p0_bounds [{lo}, {hi}]")));
        }
        if !(self.initial_threshold > 0.0) {
            return Err(Error::InvalidArgument("initial_threshold must be positive".into()));
        }
        Ok(())
    }
}

/// A gene together with its objective value.
#[derive(Clone, Debug, PartialEq)]
pub struct Individual {
    pub gene: Vec<f64>,
    pub fitness: f64,
}

fn sort(population: &mut [Individual]) {
    population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
}

/// SplitMix64 mix of a base seed and a run id.
pub(crate) fn derive_seed(seed: u64, run_id: u32) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let mut z = seed ^ u64::from(run_id).wrapping_mul(GOLDEN_GAMMA);
    z = z.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Generational state of one run.
pub(crate) struct Engine<'a, 'm> {
    objective: &'a Objective<'m>,
    options: &'a OptimizeOptions,
    run_id: u32,
    n: usize,
    rng: ChaCha8Rng,
    pool: Option<ThreadPool>,
    n_iter: usize,
}

impl<'a, 'm> Engine<'a, 'm> {
    pub(crate) fn new(
        objective: &'a Objective<'m>,
        options: &'a OptimizeOptions,
        run_id: u32,
        seed: u64,
    ) -> Result<Self> {
        let n = objective.model().search_space().len();
        let pool = if options.workers > 1 && options.local_search == LocalSearch::De {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(options.workers)
                    .build()
                    .map_err(|e| Error::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self {
            objective,
            options,
            run_id,
            n,
            rng: ChaCha8Rng::seed_from_u64(derive_seed(seed, run_id)),
            pool,
            n_iter: 1,
        })
    }

    fn population_size(&self) -> usize {
        self.options.popsize * self.n
    }

    fn evaluate(&self, gene: &[f64]) -> f64 {
        let value = self.objective.evaluate_gene(gene);
        if value.is_finite() { value } else { f64::INFINITY }
    }

    fn evaluate_batch(&self, genes: &[Vec<f64>]) -> Vec<f64> {
        match &self.pool {
            Some(pool) => pool.install(|| genes.par_iter().map(|g| self.evaluate(g)).collect()),
            None => genes.iter().map(|g| self.evaluate(g)).collect(),
        }
    }

    fn accept(&self, fitness: f64) -> bool {
        fitness < self.options.initial_threshold
    }

    /// Uniform samples in `[0, 1]^n` scoring below the initial threshold.
    /// Failed simulations score the sentinel and are never accepted at
    /// the default threshold.
    pub(crate) fn initial_population(&mut self) -> Result<Vec<Individual>> {
        let size = self.population_size();
        let mut population = Vec::with_capacity(size);
        let mut attempts = 0;
        while population.len() < size {
            if attempts >= INIT_ATTEMPTS * size {
                return Err(Error::InvalidArgument(format!(
                    "only {} of {size} initial candidates scored below {:e} after {attempts} attempts",
                    population.len(),
                    self.options.initial_threshold
                )));
            }
            attempts += 1;
            let gene: Vec<f64> = (0..self.n).map(|_| self.rng.r#gen::<f64>()).collect();
            let fitness = self.evaluate(&gene);
            if self.accept(fitness) {
                population.push(Individual { gene, fitness });
                tracing::debug!(run_id = self.run_id, "{}/{size} initial individuals", population.len());
            }
        }
        sort(&mut population);
        Ok(population)
    }

    /// Population around `best` (search-space values), each coordinate
    /// scaled by a log-uniform factor within `p0_bounds`. The first member
    /// is `best` itself.
    pub(crate) fn perturbed_population(&mut self, best: &[f64]) -> Result<Vec<Individual>> {
        let objective = self.objective;
        let space = objective.model().search_space();
        let size = self.population_size();
        let [lo, hi] = self.options.p0_bounds;
        let (lo, hi) = (lo.log10(), hi.log10());
        let origin: Vec<f64> = space.val_to_gene(best).into_iter().map(|g| g.clamp(0.0, 1.0)).collect();
        let fitness = self.evaluate(&origin);
        let mut population = vec![Individual { gene: origin, fitness }];
        let mut attempts = 0;
        while population.len() < size {
            if attempts >= INIT_ATTEMPTS * size {
                return Err(Error::InvalidArgument(format!(
                    "only {} of {size} perturbed candidates scored below {:e}",
                    population.len(),
                    self.options.initial_threshold
                )));
            }
            attempts += 1;
            let values: Vec<f64> = best
                .iter()
                .map(|v| v * 10f64.powf(self.rng.gen_range(lo..hi)))
                .collect();
            let gene: Vec<f64> = space.val_to_gene(&values).into_iter().map(|g| g.clamp(0.0, 1.0)).collect();
            let fitness = self.evaluate(&gene);
            if self.accept(fitness) {
                population.push(Individual { gene, fitness });
            }
        }
        sort(&mut population);
        Ok(population)
    }

    fn select(&mut self, population: usize, k: usize) -> Vec<usize> {
        sample(&mut self.rng, population, k).into_vec()
    }

    /// Converging step: ENDX children stamped unevaluated, family-best and
    /// one random family member replace the first two parents.
    fn converge(&mut self, population: &mut Vec<Individual>, ip: &[usize]) {
        let mut family: Vec<Individual> = Vec::with_capacity(CONVERGING_CHILDREN + 2);
        {
            let p1 = &population[ip[0]].gene;
            let p2 = &population[ip[1]].gene;
            let others: Vec<&[f64]> = ip[2..].iter().map(|&i| population[i].gene.as_slice()).collect();
            for _ in 0..CONVERGING_CHILDREN {
                family.push(Individual {
                    gene: crossover::endx(p1, p2, &others, &mut self.rng),
                    fitness: f64::INFINITY,
                });
            }
        }
        family.push(population[ip[0]].clone());
        family.push(population[ip[1]].clone());
        sort(&mut family);
        let pick = self.rng.gen_range(1..family.len());
        let mut second = family.swap_remove(pick);
        if second.fitness == f64::INFINITY {
            second.fitness = self.evaluate(&second.gene);
        }
        population[ip[0]] = family.swap_remove(0);
        population[ip[1]] = second;
        sort(population);
    }

    fn local_search(&mut self, population: &mut Vec<Individual>, ip: &[usize]) {
        let candidate = match self.options.local_search {
            LocalSearch::Mutation => {
                let children: Vec<Vec<f64>> = {
                    let p1 = &population[ip[0]].gene;
                    let others: Vec<&[f64]> =
                        ip[1..].iter().map(|&i| population[i].gene.as_slice()).collect();
                    (0..self.options.n_children)
                        .map(|_| crossover::ndm(p1, &others, &mut self.rng))
                        .collect()
                };
                let scores: Vec<f64> = children.iter().map(|c| self.evaluate(c)).collect();
                children
                    .into_iter()
                    .zip(scores)
                    .map(|(gene, fitness)| Individual { gene, fitness })
                    .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
            }
            LocalSearch::Powell => {
                let members: Vec<&[f64]> = ip.iter().map(|&i| population[i].gene.as_slice()).collect();
                let (lo, hi) = local::envelope(&members);
                let start = local::Point {
                    x: population[ip[0]].gene.clone(),
                    f: population[ip[0]].fitness,
                };
                let found = local::powell(|x| self.evaluate(x), start, &lo, &hi);
                Some(Individual {
                    gene: found.x,
                    fitness: found.f,
                })
            }
            LocalSearch::De => {
                let members: Vec<Vec<f64>> = ip.iter().map(|&i| population[i].gene.clone()).collect();
                let refs: Vec<&[f64]> = members.iter().map(Vec::as_slice).collect();
                let (lo, hi) = local::envelope(&refs);
                let mut rng = ChaCha8Rng::seed_from_u64(self.rng.r#gen());
                let found = local::differential_evolution(
                    |batch| self.evaluate_batch(batch),
                    members,
                    &lo,
                    &hi,
                    &mut rng,
                );
                Some(Individual {
                    gene: found.x,
                    fitness: found.f,
                })
            }
        };
        if let Some(candidate) = candidate
            && candidate.fitness < population[ip[0]].fitness
        {
            population[ip[0]] = candidate;
            sort(population);
        }
    }

    /// Minimal generation gap with UNDX children and rank-roulette
    /// selection of the second survivor.
    fn generation_v1(&mut self, population: &mut Vec<Individual>) {
        let size = population.len();
        let pair = self.select(size, 2);
        let children: Vec<Vec<f64>> = (0..self.options.n_children)
            .map(|_| {
                let third = loop {
                    let c = self.rng.gen_range(0..size);
                    if !pair.contains(&c) {
                        break c;
                    }
                };
                crossover::undx(
                    &population[pair[0]].gene,
                    &population[pair[1]].gene,
                    &population[third].gene,
                    &mut self.rng,
                )
            })
            .collect();
        let mut family: Vec<Individual> = children
            .into_iter()
            .map(|gene| {
                let fitness = self.evaluate(&gene);
                Individual { gene, fitness }
            })
            .collect();
        family.push(population[pair[0]].clone());
        family.push(population[pair[1]].clone());
        sort(&mut family);
        let pick = crossover::rank_roulette(family.len(), &mut self.rng);
        population[pair[1]] = family.swap_remove(pick);
        population[pair[0]] = family.swap_remove(0);
        sort(population);
    }

    fn generation_v2(&mut self, population: &mut Vec<Individual>) {
        let size = population.len();
        let ip = self.select(size, self.n + 2);
        self.converge(population, &ip);
        self.local_search(population, &ip);
        for _ in 1..self.n_iter {
            let ip = self.select(size, self.n + 2);
            self.converge(population, &ip);
        }
    }

    /// Advances from `generation` (already executed) until the best value
    /// reaches `allowable_error` or `max_generation` is executed. Every
    /// generation appends a log line and updates `count_num`; improvements
    /// over `recorded_best` also write the best vector.
    pub(crate) fn evolve(
        &mut self,
        population: &mut Vec<Individual>,
        mut generation: u64,
        mut recorded_best: f64,
        writer: &CheckpointWriter,
    ) -> Result<()> {
        let objective = self.objective;
        let space = objective.model().search_space();
        let window = (3 * self.population_size()) as u64;
        let mut window_best = population[0].fitness;
        while generation < self.options.max_generation
            && population[0].fitness > self.options.allowable_error
        {
            generation += 1;
            match self.options.variant {
                Variant::V1 => self.generation_v1(population),
                Variant::V2 => self.generation_v2(population),
            }
            let best = &population[0];
            if best.fitness < recorded_best {
                recorded_best = best.fitness;
                writer.improvement(generation, best.fitness, &space.gene_to_val(&best.gene))?;
            }
            let line = format!("Generation{generation}: Best Fitness = {:.6e}", best.fitness);
            writer.log(&line)?;
            writer.count(generation)?;
            tracing::info!(run_id = self.run_id, "{line}");

            if generation % window == 0 {
                if population[0].fitness < window_best {
                    self.n_iter = 1;
                } else {
                    self.n_iter = (self.n_iter * 2).min(self.population_size());
                }
                window_best = population[0].fitness;
                tracing::debug!(run_id = self.run_id, n_iter = self.n_iter, "converging steps adapted");
            }
        }
        Ok(())
    }
}
