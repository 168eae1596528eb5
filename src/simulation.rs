//! Condition loop: steady-state prelude, per-condition statements,
//! integration on the output grid and observable evaluation.

use std::cell::RefCell;

use crate::compiler::CompiledModel;
use crate::error::SimulationFailure;
use crate::expr::{Assignment, ValueContext};
use crate::observable::Trajectories;
use crate::ode::{self, OdeSystem, SolverOptions};
use crate::reaction::{Perturbation, ReactionNetwork};

/// The reaction network bound to one parameter vector.
struct NetworkOde<'a> {
    network: &'a ReactionNetwork,
    x: &'a [f64],
    scales: Option<&'a [f64]>,
    flux: RefCell<Vec<f64>>,
}

impl<'a> NetworkOde<'a> {
    fn new(network: &'a ReactionNetwork, x: &'a [f64], scales: Option<&'a [f64]>) -> Self {
        Self {
            network,
            x,
            scales,
            flux: RefCell::new(vec![0.0; network.n_reactions()]),
        }
    }
}

impl OdeSystem for NetworkOde<'_> {
    fn ndim(&self) -> usize {
        self.network.n_species()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        let mut flux = self.flux.borrow_mut();
        self.network.rhs(t, y, self.x, self.scales, &mut flux, dydt);
    }
}

/// Species states per condition, `[condition][time][species]`.
pub type SpeciesTrajectories = Vec<Vec<Vec<f64>>>;

pub struct Simulator<'m> {
    model: &'m CompiledModel,
    options: SolverOptions,
    grid: Vec<f64>,
}

impl<'m> Simulator<'m> {
    pub fn new(model: &'m CompiledModel, options: SolverOptions) -> Self {
        Self {
            model,
            grid: model.tspan.grid(),
            options,
        }
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Integrates every condition and returns the raw species states.
    pub fn simulate_species(
        &self,
        x: &[f64],
        y0: &[f64],
        perturbation: Option<&Perturbation>,
    ) -> Result<SpeciesTrajectories, SimulationFailure> {
        let (base_x, base_y0) = self.prepare(x, y0, perturbation)?;
        let scales = perturbation.map(|p| self.model.network.dense_scales(p));
        let mut out = Vec::with_capacity(self.model.conditions.len());
        for condition in &self.model.conditions {
            let (cx, cy0) = apply(&condition.statements, &base_x, &base_y0);
            let sys = NetworkOde::new(&self.model.network, &cx, scales.as_deref());
            let states = ode::solve_on_grid(&sys, &cy0, &self.grid, &self.options)?;
            out.push(states);
        }
        Ok(out)
    }

    /// Integrates every condition and evaluates the observables.
    pub fn simulate(
        &self,
        x: &[f64],
        y0: &[f64],
        perturbation: Option<&Perturbation>,
    ) -> Result<Trajectories, SimulationFailure> {
        let (base_x, base_y0) = self.prepare(x, y0, perturbation)?;
        let scales = perturbation.map(|p| self.model.network.dense_scales(p));
        let mut traj = Trajectories::zeros(
            self.model.observables.iter().map(|o| o.name.clone()).collect(),
            self.grid.clone(),
            self.model.conditions.iter().map(|c| c.name.clone()).collect(),
        );
        for (ci, condition) in self.model.conditions.iter().enumerate() {
            let (cx, cy0) = apply(&condition.statements, &base_x, &base_y0);
            let sys = NetworkOde::new(&self.model.network, &cx, scales.as_deref());
            let states = ode::solve_on_grid(&sys, &cy0, &self.grid, &self.options)?;
            for (oi, observable) in self.model.observables.iter().enumerate() {
                for (ti, (&t, y)) in self.grid.iter().zip(&states).enumerate() {
                    let value = observable.expr.eval(&ValueContext {
                        t,
                        y,
                        x: &cx,
                        y0: &cy0,
                    });
                    if !value.is_finite() {
                        return Err(SimulationFailure::NonFinite(format!(
                            "observable '{}' at t={t} under '{}'",
                            observable.name, condition.name
                        )));
                    }
                    traj.set(oi, ti, ci, value);
                }
            }
        }
        Ok(traj)
    }

    /// Runs the steady-state prelude when one is declared. The prelude's
    /// parameter writes stay in effect for the conditions.
    fn prepare(
        &self,
        x: &[f64],
        y0: &[f64],
        perturbation: Option<&Perturbation>,
    ) -> Result<(Vec<f64>, Vec<f64>), SimulationFailure> {
        let Some(statements) = &self.model.unperturbed else {
            return Ok((x.to_vec(), y0.to_vec()));
        };
        let (px, py0) = apply(statements, x, y0);
        let scales = perturbation.map(|p| self.model.network.dense_scales(p));
        let sys = NetworkOde::new(&self.model.network, &px, scales.as_deref());
        let steady = ode::steady_state(&sys, &py0, &self.options)?;
        Ok((px, steady))
    }
}

fn apply(statements: &[Assignment], x: &[f64], y0: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut x = x.to_vec();
    let mut y0 = y0.to_vec();
    Assignment::apply_all(statements, &mut x, &mut y0);
    (x, y0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::compiler::{compile_str, CompileOptions};

    fn model(text: &str) -> CompiledModel {
        compile_str(text, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn degradation_follows_exponential() {
        let model = model("A is degraded | kf=0.5 | A=2\n@sim tspan: [0, 4]\n");
        let sim = Simulator::new(&model, SolverOptions::default());
        let traj = sim.simulate(&model.x, &model.y0, None).unwrap();
        assert_eq!(traj.shape(), [1, 5, 1]);
        for (ti, &t) in traj.t.iter().enumerate() {
            assert_relative_eq!(traj.get(0, ti, 0), 2.0 * (-0.5 * t).exp(), max_relative = 1e-6);
        }
    }

    #[test]
    fn conditions_do_not_leak_into_each_other() {
        let text = "\
A is degraded | kf=1 | A=1
@sim condition high: init[A] = 10
@sim condition base: p[kf1] = 1
@sim tspan: [0, 1]
";
        let model = model(text);
        let sim = Simulator::new(&model, SolverOptions::default());
        let traj = sim.simulate(&model.x, &model.y0, None).unwrap();
        assert_relative_eq!(traj.get(0, 0, 0), 10.0);
        assert_relative_eq!(traj.get(0, 0, 1), 1.0);
    }

    #[test]
    fn steady_state_prelude_seeds_conditions() {
        let text = "\
A is synthesized | kf=2
A is degraded | kf=1
@sim unperturbed: p[kf1] = 2
@sim tspan: [0, 2]
";
        let model = model(text);
        let sim = Simulator::new(&model, SolverOptions::default());
        let traj = sim.simulate(&model.x, &model.y0, None).unwrap();
        for ti in 0..3 {
            assert_relative_eq!(traj.get(0, ti, 0), 2.0, max_relative = 1e-4);
        }
    }

    #[test]
    fn flux_perturbation_rescales_the_rate() {
        let model = model("A is degraded | kf=1 | A=1\n@sim tspan: [0, 1]\n");
        let sim = Simulator::new(&model, SolverOptions::default());
        let perturbation = Perturbation::from([(0, 2.0)]);
        let traj = sim.simulate(&model.x, &model.y0, Some(&perturbation)).unwrap();
        assert_relative_eq!(traj.get(0, 1, 0), (-2.0f64).exp(), max_relative = 1e-6);
    }

    #[test]
    fn species_trajectories_are_available() {
        let model = model("A binds B <--> AB | kf=1, kr=0.1 | A=1, B=1\n@obs total: u[A] + u[AB]\n");
        let sim = Simulator::new(&model, SolverOptions::default());
        let states = sim.simulate_species(&model.x, &model.y0, None).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].len(), sim.grid().len());
        let last = states[0].last().unwrap();
        assert_relative_eq!(last[0] + last[2], 1.0, max_relative = 1e-6);
    }

    #[test]
    fn undefined_observable_is_a_failure() {
        let model = model("A is degraded | A=1\n@obs bad: 1 / (u[A] - u[A])\n@sim tspan: [0, 1]\n");
        let sim = Simulator::new(&model, SolverOptions::default());
        assert!(matches!(
            sim.simulate(&model.x, &model.y0, None),
            Err(SimulationFailure::NonFinite(_))
        ));
    }
}
