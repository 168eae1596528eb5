use approx::assert_relative_eq;

use super::*;

struct Decay {
    k: f64,
}

impl OdeSystem for Decay {
    fn ndim(&self) -> usize {
        1
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        dydt[0] = -self.k * y[0];
    }
}

/// Robertson's chemical kinetics problem, the classic stiff benchmark.
struct Robertson;

impl OdeSystem for Robertson {
    fn ndim(&self) -> usize {
        3
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        dydt[0] = -0.04 * y[0] + 1e4 * y[1] * y[2];
        dydt[2] = 3e7 * y[1] * y[1];
        dydt[1] = -dydt[0] - dydt[2];
    }
}

struct Relaxation;

impl OdeSystem for Relaxation {
    fn ndim(&self) -> usize {
        2
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        dydt[0] = 1.0 - y[0];
        dydt[1] = 2.0 * (y[0] - y[1]);
    }
}

/// Rate law that stops being defined after `t = 0.5`.
struct Undefined;

impl OdeSystem for Undefined {
    fn ndim(&self) -> usize {
        1
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        dydt[0] = if t > 0.5 { f64::NAN } else { -y[0] };
    }
}

struct Oscillator;

impl OdeSystem for Oscillator {
    fn ndim(&self) -> usize {
        2
    }

    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        dydt[0] = y[1];
        dydt[1] = -y[0];
    }
}

#[test]
fn exponential_decay_matches_closed_form() {
    let grid: Vec<f64> = (0..=10).map(f64::from).collect();
    let states = solve_on_grid(&Decay { k: 1.0 }, &[1.0], &grid, &SolverOptions::default()).unwrap();
    assert_eq!(states.len(), grid.len());
    for (t, y) in grid.iter().zip(&states) {
        assert!((y[0] - (-t).exp()).abs() < 1e-6, "t={t} y={}", y[0]);
    }
}

#[test]
fn solver_lands_exactly_on_grid_points() {
    let sys = Decay { k: 0.3 };
    let opts = SolverOptions::default();
    let mut solver = Bdf::new(&sys, 0.0, &[1.0], 0.37, &opts).unwrap();
    for t in [0.37, 1.0, 2.5, 7.125] {
        solver.advance_to(t).unwrap();
        assert_eq!(solver.t(), t);
    }
    assert!(solver.order() >= 1);
}

#[test]
fn robertson_stiff_problem() {
    let grid = [0.0, 0.4, 4.0, 40.0];
    let states = solve_on_grid(&Robertson, &[1.0, 0.0, 0.0], &grid, &SolverOptions::default()).unwrap();
    let last = &states[3];
    assert_relative_eq!(last[0], 0.715_827_068_7, max_relative = 1e-5);
    assert_relative_eq!(last[2], 0.284_163_745_7, max_relative = 1e-4);
    assert_relative_eq!(last.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
}

#[test]
fn harmonic_oscillator_keeps_phase() {
    let grid: Vec<f64> = (0..=20).map(|i| f64::from(i) * 0.5).collect();
    let states = solve_on_grid(&Oscillator, &[1.0, 0.0], &grid, &SolverOptions::default()).unwrap();
    for (t, y) in grid.iter().zip(&states) {
        assert!((y[0] - t.cos()).abs() < 1e-5, "t={t}");
    }
}

#[test]
fn steady_state_of_relaxation() {
    let y = steady_state(&Relaxation, &[0.0, 0.0], &SolverOptions::default()).unwrap();
    assert!((y[0] - 1.0).abs() < 1e-4);
    assert!((y[1] - 1.0).abs() < 1e-4);
}

#[test]
fn steady_state_gives_up_after_timeout() {
    let opts = SolverOptions {
        steady_state_timeout: 0.0,
        ..SolverOptions::default()
    };
    let err = steady_state(&Oscillator, &[1.0, 0.0], &opts).unwrap_err();
    assert!(matches!(err, SimulationFailure::SteadyState { .. }));
}

#[test]
fn undefined_rate_is_an_integration_failure() {
    let grid = [0.0, 0.5, 2.0];
    let err = solve_on_grid(&Undefined, &[1.0], &grid, &SolverOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        SimulationFailure::Integration { .. } | SimulationFailure::Incomplete { .. }
    ));
}

#[test]
fn step_budget_is_enforced() {
    let opts = SolverOptions {
        max_steps: 3,
        ..SolverOptions::default()
    };
    let err = solve_on_grid(&Decay { k: 1.0 }, &[1.0], &[0.0, 100.0], &opts).unwrap_err();
    assert!(matches!(err, SimulationFailure::Incomplete { .. }));
}

#[test]
fn degenerate_grids() {
    let opts = SolverOptions::default();
    assert!(solve_on_grid(&Decay { k: 1.0 }, &[1.0], &[], &opts).unwrap().is_empty());
    let single = solve_on_grid(&Decay { k: 1.0 }, &[2.0], &[5.0], &opts).unwrap();
    assert_eq!(single, vec![vec![2.0]]);
}
