//! Stiff integration of the reaction network.
//!
//! [`OdeSystem`] is the seam between the model and the integrator. The
//! solver is a variable-order (1 to 5), variable-step backward
//! differentiation formula in Nordsieck-like difference form that lands
//! exactly on every requested output time.

mod bdf;

use std::time::Instant;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::SimulationFailure;

pub use bdf::Bdf;

/// Right-hand side of `dy/dt = f(t, y)`.
pub trait OdeSystem {
    fn ndim(&self) -> usize;

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);

    /// Forward-difference Jacobian `∂f/∂y`. Override for analytical forms.
    fn jacobian(&self, t: f64, y: &[f64], jac: &mut DMatrix<f64>) {
        let n = self.ndim();
        let mut f0 = vec![0.0; n];
        self.rhs(t, y, &mut f0);
        let mut yp = y.to_vec();
        let mut fp = vec![0.0; n];
        let root_eps = f64::EPSILON.sqrt();
        for j in 0..n {
            let orig = yp[j];
            let h = (orig + root_eps * orig.abs().max(1e-3)) - orig;
            yp[j] = orig + h;
            self.rhs(t, &yp, &mut fp);
            yp[j] = orig;
            for i in 0..n {
                jac[(i, j)] = (fp[i] - f0[i]) / h;
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Step budget for each output interval.
    pub max_steps: usize,
    pub steady_state_eps: f64,
    /// Wall-clock cap of the steady-state search, in seconds.
    pub steady_state_timeout: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-8,
            max_steps: 100_000,
            steady_state_eps: 1e-6,
            steady_state_timeout: 60.0,
        }
    }
}

/// Integrates from `grid[0]` and returns the state at every grid point.
/// `grid` must be strictly increasing.
pub fn solve_on_grid<S: OdeSystem>(
    sys: &S,
    y0: &[f64],
    grid: &[f64],
    opts: &SolverOptions,
) -> Result<Vec<Vec<f64>>, SimulationFailure> {
    let mut out = Vec::with_capacity(grid.len());
    let Some((&t0, rest)) = grid.split_first() else {
        return Ok(out);
    };
    out.push(y0.to_vec());
    let Some(&first) = rest.first() else {
        return Ok(out);
    };
    let mut solver = Bdf::new(sys, t0, y0, first, opts)?;
    for &t in rest {
        solver.advance_to(t)?;
        out.push(solver.y().to_vec());
    }
    Ok(out)
}

/// Integrates in one-time-unit windows until the regularized relative
/// change of every component drops below `opts.steady_state_eps`.
pub fn steady_state<S: OdeSystem>(
    sys: &S,
    y0: &[f64],
    opts: &SolverOptions,
) -> Result<Vec<f64>, SimulationFailure> {
    let started = Instant::now();
    let mut solver = Bdf::new(sys, 0.0, y0, 1.0, opts)?;
    let mut previous = y0.to_vec();
    let mut t = 0.0;
    let mut windows = 0usize;
    loop {
        t += 1.0;
        solver.advance_to(t)?;
        windows += 1;
        let current = solver.y();
        if current.iter().any(|v| !v.is_finite()) {
            return Err(SimulationFailure::NonFinite("steady state".into()));
        }
        let change = current
            .iter()
            .zip(&previous)
            .map(|(new, old)| ((new - old) / (old.abs() + f64::EPSILON)).abs())
            .fold(0.0, f64::max);
        if change < opts.steady_state_eps {
            tracing::debug!(windows, "steady state reached");
            return Ok(current.to_vec());
        }
        if started.elapsed().as_secs_f64() > opts.steady_state_timeout {
            return Err(SimulationFailure::SteadyState {
                seconds: opts.steady_state_timeout,
            });
        }
        previous.copy_from_slice(current);
    }
}

#[cfg(test)]
mod tests;
