// BioMASS command-line front end
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use biomass::{
    continue_optimization, create_model, optimize_runs, run_analysis, run_simulation, store,
    AnalysisStyle, CompileOptions, LocalSearch, Metric, OptimizeOptions, SensitivityOptions,
    Target, Variant, VizType,
};

#[derive(Parser)]
#[command(name = "biomass-cli")]
#[command(version)]
#[command(about = "Build, simulate, fit and analyze signaling network models", long_about = None)]
struct Cli {
    /// Similarity threshold for rule suggestions
    #[arg(long, global = true, default_value = "0.7")]
    threshold: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LocalSearchArg {
    Mutation,
    Powell,
    De,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    V1,
    V2,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Reaction,
    Parameter,
    Initial,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Maximum,
    Minimum,
    Integral,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Barplot,
    Heatmap,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model and print its reactions, parameters and species
    Check {
        /// Model directory or rule file
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },

    /// Simulate and store trajectories under simulation_data/
    Simulate {
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// original, best, average, experiment or a run id
        #[arg(short, long, default_value = "original")]
        viz_type: String,
    },

    /// Estimate parameters with the genetic algorithm
    Optimize {
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// First run id
        #[arg(long, default_value = "1")]
        start: u32,

        /// Last run id (defaults to --start)
        #[arg(long)]
        end: Option<u32>,

        #[arg(long, default_value = "5")]
        popsize: usize,

        #[arg(long, default_value = "10000")]
        max_generation: u64,

        #[arg(long, default_value = "0")]
        allowable_error: f64,

        #[arg(long, value_enum, default_value = "mutation")]
        local_search: LocalSearchArg,

        #[arg(long, value_enum, default_value = "v2")]
        variant: VariantArg,

        #[arg(long, default_value = "50")]
        n_children: usize,

        /// Continue existing runs up to --max-generation generations
        #[arg(long)]
        continuation: bool,

        /// Resume a staging directory left by an interrupted run
        #[arg(long)]
        recover_partial: bool,

        /// Replace existing run directories
        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// Inner workers for DE local search (single run only)
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Threads running independent runs
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },

    /// Sensitivity analysis over every executable run
    Analyze {
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        #[arg(long, value_enum, default_value = "reaction")]
        target: TargetArg,

        #[arg(long, value_enum, default_value = "maximum")]
        metric: MetricArg,

        #[arg(long, value_enum, default_value = "barplot")]
        style: StyleArg,

        /// Species excluded from initial-condition sensitivity
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Ignore cached coefficients
        #[arg(long)]
        no_cache: bool,
    },

    /// Write optimized_params.csv and optimized_initials.csv
    Export {
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let compile = CompileOptions {
        similarity_threshold: cli.threshold,
    };
    let load = |path: &PathBuf| {
        create_model(path, &compile).with_context(|| format!("failed to load model {}", path.display()))
    };

    match cli.command {
        Commands::Check { model } => {
            let model = load(&model)?;
            print!("{}", model.summary());
        }
        Commands::Simulate { model, viz_type } => {
            let model = load(&model)?;
            let viz_type: VizType = viz_type.parse()?;
            let path = run_simulation(&model, viz_type)?;
            println!("{}", path.display());
        }
        Commands::Optimize {
            model,
            start,
            end,
            popsize,
            max_generation,
            allowable_error,
            local_search,
            variant,
            n_children,
            continuation,
            recover_partial,
            overwrite,
            seed,
            workers,
            threads,
        } => {
            let model = load(&model)?;
            let end = end.unwrap_or(start);
            if end < start {
                bail!("--end {end} is before --start {start}");
            }
            let options = OptimizeOptions {
                popsize,
                max_generation,
                allowable_error,
                local_search: match local_search {
                    LocalSearchArg::Mutation => LocalSearch::Mutation,
                    LocalSearchArg::Powell => LocalSearch::Powell,
                    LocalSearchArg::De => LocalSearch::De,
                },
                variant: match variant {
                    VariantArg::V1 => Variant::V1,
                    VariantArg::V2 => Variant::V2,
                },
                n_children,
                overwrite,
                seed,
                workers,
                recover_partial,
                ..OptimizeOptions::default()
            };
            let run_ids: Vec<u32> = (start..=end).collect();
            let results = if continuation {
                run_ids
                    .iter()
                    .map(|&id| continue_optimization(&model, id, &options))
                    .collect::<biomass::Result<Vec<_>>>()?
            } else {
                optimize_runs(&model, &run_ids, &options, threads)?
            };
            for result in results {
                println!(
                    "run {}: best fitness {:e} at generation {} ({} generations)",
                    result.run_id, result.best_fitness, result.generation, result.count_num
                );
            }
        }
        Commands::Analyze {
            model,
            target,
            metric,
            style,
            exclude,
            no_cache,
        } => {
            let model = load(&model)?;
            let options = SensitivityOptions {
                target: match target {
                    TargetArg::Reaction => Target::Reaction,
                    TargetArg::Parameter => Target::Parameter,
                    TargetArg::Initial => Target::Initial,
                },
                metric: match metric {
                    MetricArg::Maximum => Metric::Maximum,
                    MetricArg::Minimum => Metric::Minimum,
                    MetricArg::Integral => Metric::Integral,
                },
                excluded_initials: exclude,
                use_cache: !no_cache,
                ..SensitivityOptions::default()
            };
            let style = match style {
                StyleArg::Barplot => AnalysisStyle::Barplot,
                StyleArg::Heatmap => AnalysisStyle::Heatmap,
            };
            let s = run_analysis(&model, style, &options)?;
            println!("{}", serde_json::to_string_pretty(&s)?);
        }
        Commands::Export { model } => {
            let model = load(&model)?;
            for path in store::export_results(&model)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}
