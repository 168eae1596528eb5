use std::collections::BTreeMap;
use std::fs;

use approx::assert_relative_eq;
use tempfile::TempDir;

use super::*;
use crate::sensitivity::REFERENCE;
use crate::store::{LOG_FILE, RunStore};

const MAPK: &str = "\
Ras phosphorylates MKKK --> MKKK_P | V=2.5, K=10 | Ras=1, MKKK=100
MKKK_P is dephosphorylated --> MKKK | V=0.25, K=8
MKKK_P phosphorylates MKK --> MKK_P | V=0.025, K=15 | MKK=300
MKK_P is dephosphorylated --> MKK | V=0.75, K=15
MKK_P phosphorylates MAPK --> MAPK_P | V=0.025, K=15 | MAPK=300
MAPK_P is dephosphorylated --> MAPK | V=0.5, K=15
@obs MKKK_active: u[MKKK_P]
@obs MKK_active: u[MKK_P]
@obs MAPK_active: u[MAPK_P]
@obs MKKK_total: u[MKKK] + u[MKKK_P]
@obs MAPK_total: u[MAPK] + u[MAPK_P]
@sim tspan: [0, 100]
";

const GOODWIN: &str = "\
@add species X=0.1
@add species Y=0.2
@add species Z=2.5
@rxn --> X: p[V]*p[K]^p[n]/(p[K]^p[n]+u[Z]^p[n]) | V=1, K=1, n=10
X is degraded | kf=0.2
@rxn X --> X + Y: p[kx]*u[X] | kx=1
Y is degraded | kf=0.2
@rxn Y --> Y + Z: p[ky]*u[Y] | ky=1
Z is degraded | kf=0.2
@obs X_level: u[X]
@obs Y_level: u[Y]
@obs Z_level: u[Z]
@sim condition DD: init[X] = 0.1
@sim tspan: [0, 72]
";

const MICHAELIS_MENTEN: &str = "\
E binds S <--> ES | kf=0.003, kr=0.001 | E=100, S=50
ES dissociates to E and P | kf=0.002, const kr=0
@obs Product: u[P]
@sim tspan: [0, 100]
";

fn from_text(dir: &TempDir, text: &str, problem: ProblemConfig) -> Model {
    Model::from_text(dir.path(), text, problem, &CompileOptions::default()).unwrap()
}

fn product_data() -> ProblemConfig {
    let timepoints = vec![0.0, 10.0, 30.0, 60.0, 100.0];
    let values = timepoints.iter().map(|t: &f64| Some(1.0 - (-0.03 * t).exp())).collect();
    ProblemConfig {
        experiments: BTreeMap::from([(
            "Product".to_string(),
            Experiment {
                timepoints,
                conditions: BTreeMap::from([("control".to_string(), values)]),
                stdev: BTreeMap::new(),
            },
        )]),
        ..ProblemConfig::default()
    }
}

fn log_values(path: &std::path::Path) -> Vec<(String, f64)> {
    fs::read_to_string(path.join(LOG_FILE))
        .unwrap()
        .lines()
        .map(|line| {
            let (head, value) = line.split_once(": Best Fitness = ").unwrap();
            (head.to_string(), value.parse().unwrap())
        })
        .collect()
}

fn has_interior_max(v: &[f64]) -> bool {
    v.windows(3).any(|w| w[1] > w[0] && w[1] > w[2])
}

fn has_interior_min(v: &[f64]) -> bool {
    v.windows(3).any(|w| w[1] < w[0] && w[1] < w[2])
}

#[test]
fn phosphorylation_cascade_conserves_totals() {
    let dir = TempDir::new().unwrap();
    let model = from_text(&dir, MAPK, ProblemConfig::default());
    let traj = model.simulate(&model.pval(), &model.ival(), None).unwrap();
    assert_eq!(traj.shape(), [5, 101, 1]);
    assert!(traj.as_slice().iter().all(|v| v.is_finite() && *v >= -1e-6));

    let mkkk = traj.observable_index("MKKK_total").unwrap();
    let mapk = traj.observable_index("MAPK_total").unwrap();
    for t in 0..traj.t.len() {
        assert_relative_eq!(traj.get(mkkk, t, 0), 100.0, max_relative = 1e-4);
        assert_relative_eq!(traj.get(mapk, t, 0), 300.0, max_relative = 1e-4);
    }
    let active = traj.observable_index("MAPK_active").unwrap();
    assert!(traj.get(active, 100, 0) > traj.get(active, 0, 0));
}

#[test]
fn negative_feedback_loop_oscillates() {
    let dir = TempDir::new().unwrap();
    let model = from_text(&dir, GOODWIN, ProblemConfig::default());
    assert_eq!(model.conditions(), vec!["DD"]);
    let traj = model.simulate(&model.pval(), &model.ival(), None).unwrap();
    assert_eq!(traj.t.len(), 73);
    for name in ["X_level", "Y_level", "Z_level"] {
        let trace = traj.trace(traj.observable_index(name).unwrap(), 0);
        assert!(trace.iter().all(|v| v.is_finite()), "{name}");
        assert!(has_interior_max(&trace), "{name} has no peak");
        assert!(has_interior_min(&trace), "{name} has no trough");
    }
}

#[test]
fn short_optimization_never_gets_worse() {
    let dir = TempDir::new().unwrap();
    let model = from_text(&dir, MICHAELIS_MENTEN, product_data());
    let options = OptimizeOptions {
        popsize: 3,
        max_generation: 3,
        n_children: 10,
        seed: Some(7),
        ..OptimizeOptions::default()
    };
    let result = optimize(&model, 1, &options).unwrap();
    let log = log_values(&RunStore::new(dir.path()).run_dir(1));
    assert_eq!(log.len(), 3);
    assert!(log[2].1 <= log[0].1);
    assert_eq!(result.best_fitness, store::RunStore::new(dir.path()).checkpoint(1).unwrap().best_fitness);
}

#[test]
fn continued_run_logs_up_to_the_new_limit() {
    let dir = TempDir::new().unwrap();
    let model = from_text(&dir, MICHAELIS_MENTEN, product_data());
    let options = OptimizeOptions {
        max_generation: 3,
        n_children: 10,
        seed: Some(11),
        ..OptimizeOptions::default()
    };
    optimize(&model, 1, &options).unwrap();
    let more = OptimizeOptions {
        max_generation: 9,
        ..options
    };
    let result = continue_optimization(&model, 1, &more).unwrap();
    assert_eq!(result.count_num, 9);
    let log = log_values(&RunStore::new(dir.path()).run_dir(1));
    assert_eq!(log.len(), 9);
    assert_eq!(log.last().unwrap().0, "Generation9");
    assert!(log.windows(2).all(|w| w[1].1 <= w[0].1));
}

#[test]
fn unaffected_observables_have_zero_sensitivity() {
    let dir = TempDir::new().unwrap();
    let text = "\
A is degraded | kf=0.5 | A=1
C is degraded | kf=0.3
@obs A_obs: u[A]
@obs C_obs: u[C]
@sim tspan: [0, 100]
";
    let model = from_text(&dir, text, ProblemConfig::default());
    let options = SensitivityOptions {
        metric: Metric::Integral,
        use_cache: false,
        ..SensitivityOptions::default()
    };
    let s = run_analysis(&model, AnalysisStyle::Heatmap, &options).unwrap();
    assert_eq!(s.runs, vec![None]);
    assert_eq!(s.style, AnalysisStyle::Heatmap);
    assert_eq!(s.shape(), [1, 3, 2, 1]);
    assert_eq!(s.perturbed.last().map(String::as_str), Some(REFERENCE));
    let a = s.observables.iter().position(|o| o == "A_obs").unwrap();
    let c = s.observables.iter().position(|o| o == "C_obs").unwrap();
    assert_relative_eq!(s.get(0, 0, a, 0), -1.0, epsilon = 0.05);
    assert!(s.get(0, 1, a, 0).abs() < 1e-2);
    assert_eq!(s.get(0, 0, c, 0), 0.0);
    assert_eq!(s.get(0, 1, c, 0), 0.0);
    assert_eq!(s.get(0, 2, a, 0), 0.0);
    assert_eq!(s.get(0, 2, c, 0), 0.0);
}

#[test]
fn saved_simulations_are_normalized() {
    let dir = TempDir::new().unwrap();
    let problem = ProblemConfig {
        normalization: BTreeMap::from([(
            "Product".to_string(),
            Normalization {
                timepoint: Some(50),
                condition: Vec::new(),
            },
        )]),
        ..ProblemConfig::default()
    };
    let model = from_text(&dir, MICHAELIS_MENTEN, problem);
    let path = run_simulation(&model, VizType::Original).unwrap();
    assert!(path.ends_with("simulations_original.json"));
    let saved = store::load_simulation(dir.path(), "original").unwrap();
    assert_relative_eq!(saved.get(0, 50, 0), 1.0, epsilon = 1e-12);
    assert!(saved.get(0, 100, 0) > 1.0);

    let raw = model.simulate(&model.pval(), &model.ival(), None).unwrap();
    assert_relative_eq!(
        saved.get(0, 100, 0),
        raw.get(0, 100, 0) / raw.get(0, 50, 0),
        max_relative = 1e-12
    );
}

#[test]
fn viz_types_parse_and_resolve() {
    assert_eq!("best".parse::<VizType>().unwrap(), VizType::Best);
    assert_eq!("average".parse::<VizType>().unwrap(), VizType::Average);
    assert_eq!("3".parse::<VizType>().unwrap(), VizType::Run(3));
    assert_eq!(VizType::Average.tag(), "all");
    assert!(matches!("latest".parse::<VizType>(), Err(Error::InvalidArgument(_))));

    let dir = TempDir::new().unwrap();
    let model = from_text(&dir, MICHAELIS_MENTEN, product_data());
    assert!(matches!(run_simulation(&model, VizType::Best), Err(Error::Storage { .. })));

    let options = OptimizeOptions {
        max_generation: 2,
        n_children: 10,
        seed: Some(3),
        ..OptimizeOptions::default()
    };
    optimize_runs(&model, &[1, 2], &options, Some(2)).unwrap();
    for viz in [VizType::Best, VizType::Average, VizType::Run(2), VizType::Experiment] {
        let path = run_simulation(&model, viz).unwrap();
        assert!(path.exists(), "{viz}");
    }
    let average = store::load_simulation(dir.path(), "all").unwrap();
    assert_eq!(average.shape(), [1, 101, 1]);
}
