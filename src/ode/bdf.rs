use nalgebra::{DMatrix, DVector, Dyn, LU};

use super::{OdeSystem, SolverOptions};
use crate::error::SimulationFailure;

const MAX_ORDER: usize = 5;
const NEWTON_MAXITER: usize = 4;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
/// Numerical differentiation formula corrections (Shampine & Reichelt).
const KAPPA: [f64; MAX_ORDER + 1] = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];

struct Coefficients {
    gamma: [f64; MAX_ORDER + 1],
    alpha: [f64; MAX_ORDER + 1],
    error_const: [f64; MAX_ORDER + 1],
}

impl Coefficients {
    fn new() -> Self {
        let mut gamma = [0.0; MAX_ORDER + 1];
        for k in 1..=MAX_ORDER {
            gamma[k] = gamma[k - 1] + 1.0 / k as f64;
        }
        let mut alpha = [0.0; MAX_ORDER + 1];
        let mut error_const = [0.0; MAX_ORDER + 1];
        for k in 0..=MAX_ORDER {
            alpha[k] = (1.0 - KAPPA[k]) * gamma[k];
            error_const[k] = KAPPA[k] * gamma[k] + 1.0 / (k + 1) as f64;
        }
        Self {
            gamma,
            alpha,
            error_const,
        }
    }
}

/// Variable-order BDF stepper. Holds the backward-difference table `d`
/// (`d[0]` is the current state) and the iteration matrix.
pub struct Bdf<'s, S: OdeSystem> {
    sys: &'s S,
    n: usize,
    t: f64,
    rtol: f64,
    atol: f64,
    newton_tol: f64,
    max_steps: usize,
    order: usize,
    h_abs: f64,
    d: Vec<Vec<f64>>,
    n_equal_steps: usize,
    jac: DMatrix<f64>,
    lu: Option<LU<f64, Dyn, Dyn>>,
    coef: Coefficients,
    f: Vec<f64>,
}

impl<'s, S: OdeSystem> Bdf<'s, S> {
    /// `first_bound` only serves to size the initial step.
    pub fn new(
        sys: &'s S,
        t0: f64,
        y0: &[f64],
        first_bound: f64,
        opts: &SolverOptions,
    ) -> Result<Self, SimulationFailure> {
        let n = sys.ndim();
        let mut f0 = vec![0.0; n];
        sys.rhs(t0, y0, &mut f0);
        if f0.iter().any(|v| !v.is_finite()) {
            return Err(SimulationFailure::NonFinite("initial derivative".into()));
        }
        let h_abs = select_initial_step(sys, t0, y0, &f0, first_bound - t0, opts.rtol, opts.atol);
        let mut d = vec![vec![0.0; n]; MAX_ORDER + 3];
        d[0].copy_from_slice(y0);
        for (dst, f) in d[1].iter_mut().zip(&f0) {
            *dst = f * h_abs;
        }
        let mut jac = DMatrix::zeros(n, n);
        sys.jacobian(t0, y0, &mut jac);
        Ok(Self {
            sys,
            n,
            t: t0,
            rtol: opts.rtol,
            atol: opts.atol,
            newton_tol: (10.0 * f64::EPSILON / opts.rtol).max(0.03f64.min(opts.rtol.sqrt())),
            max_steps: opts.max_steps,
            order: 1,
            h_abs,
            d,
            n_equal_steps: 0,
            jac,
            lu: None,
            coef: Coefficients::new(),
            f: f0,
        })
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn y(&self) -> &[f64] {
        &self.d[0]
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Steps until `t == t_bound` exactly.
    pub fn advance_to(&mut self, t_bound: f64) -> Result<(), SimulationFailure> {
        if self.n == 0 {
            self.t = t_bound;
            return Ok(());
        }
        let mut steps = 0;
        while self.t < t_bound {
            if steps == self.max_steps {
                return Err(SimulationFailure::Incomplete {
                    reached: self.t,
                    target: t_bound,
                });
            }
            self.step(t_bound)?;
            steps += 1;
        }
        Ok(())
    }

    fn step(&mut self, t_bound: f64) -> Result<(), SimulationFailure> {
        let t = self.t;
        let min_step = 10.0 * ulp(t);
        let mut h_abs = self.h_abs;
        if h_abs < min_step {
            change_d(&mut self.d, self.order, min_step / h_abs);
            h_abs = min_step;
            self.n_equal_steps = 0;
        }
        let natural_h = h_abs;
        let order = self.order;
        let mut clamped = false;

        let (t_new, y_new, correction, n_iter) = loop {
            if h_abs < min_step {
                return Err(SimulationFailure::Integration {
                    t,
                    reason: "step size became too small".into(),
                });
            }
            let mut t_new = t + h_abs;
            if t_new != t_bound && (t_new > t_bound || t_bound - t_new < min_step) {
                t_new = t_bound;
                change_d(&mut self.d, order, (t_new - t) / h_abs);
                self.n_equal_steps = 0;
                self.lu = None;
                clamped = true;
            }
            let h = t_new - t;
            h_abs = h;

            let mut y_predict = vec![0.0; self.n];
            for row in &self.d[..=order] {
                for (acc, v) in y_predict.iter_mut().zip(row) {
                    *acc += v;
                }
            }
            let scale: Vec<f64> = y_predict
                .iter()
                .map(|y| self.atol + self.rtol * y.abs())
                .collect();
            let mut psi = vec![0.0; self.n];
            for (k, row) in self.d[1..=order].iter().enumerate() {
                let g = self.coef.gamma[k + 1];
                for (acc, v) in psi.iter_mut().zip(row) {
                    *acc += v * g;
                }
            }
            let alpha = self.coef.alpha[order];
            for v in psi.iter_mut() {
                *v /= alpha;
            }
            let c = h / alpha;

            let mut current_jac = false;
            let solved = loop {
                if self.lu.is_none() {
                    let iteration = DMatrix::identity(self.n, self.n) - &self.jac * c;
                    self.lu = Some(iteration.lu());
                }
                match self.solve_system(t_new, &y_predict, c, &psi, &scale) {
                    Some(result) => break Some(result),
                    None if !current_jac => {
                        self.sys.jacobian(t_new, &y_predict, &mut self.jac);
                        self.lu = None;
                        current_jac = true;
                    }
                    None => break None,
                }
            };

            let Some((n_iter, y_new, correction)) = solved else {
                h_abs *= 0.5;
                change_d(&mut self.d, order, 0.5);
                self.n_equal_steps = 0;
                self.lu = None;
                continue;
            };

            let safety = 0.9 * (2 * NEWTON_MAXITER + 1) as f64 / (2 * NEWTON_MAXITER + n_iter) as f64;
            let error_norm = self.weighted_norm(&correction, &y_new, self.coef.error_const[order]);
            if error_norm > 1.0 {
                let factor = MIN_FACTOR.max(safety * error_norm.powf(-1.0 / (order as f64 + 1.0)));
                h_abs *= factor;
                change_d(&mut self.d, order, factor);
                self.n_equal_steps = 0;
                continue;
            }
            break (t_new, y_new, correction, n_iter);
        };

        self.n_equal_steps += 1;
        self.t = t_new;
        self.h_abs = h_abs;
        for (j, &dj) in correction.iter().enumerate() {
            self.d[order + 2][j] = dj - self.d[order + 1][j];
            self.d[order + 1][j] = dj;
        }
        for i in (0..=order).rev() {
            let (head, tail) = self.d.split_at_mut(i + 1);
            for (acc, v) in head[i].iter_mut().zip(&tail[0]) {
                *acc += v;
            }
        }

        if self.n_equal_steps < order + 1 {
            if clamped && natural_h > self.h_abs {
                let factor = (natural_h / self.h_abs).min(MAX_FACTOR);
                change_d(&mut self.d, order, factor);
                self.h_abs *= factor;
                self.n_equal_steps = 0;
                self.lu = None;
            }
            return Ok(());
        }

        let safety = 0.9 * (2 * NEWTON_MAXITER + 1) as f64 / (2 * NEWTON_MAXITER + n_iter) as f64;
        let error_m_norm = if order > 1 {
            self.weighted_norm(&self.d[order], &y_new, self.coef.error_const[order - 1])
        } else {
            f64::INFINITY
        };
        let error_norm = self.weighted_norm(&correction, &y_new, self.coef.error_const[order]);
        let error_p_norm = if order < MAX_ORDER {
            self.weighted_norm(&self.d[order + 2], &y_new, self.coef.error_const[order + 1])
        } else {
            f64::INFINITY
        };
        let factors = [error_m_norm, error_norm, error_p_norm]
            .iter()
            .enumerate()
            .map(|(k, e)| e.powf(-1.0 / (order + k) as f64))
            .collect::<Vec<_>>();
        let (best, max_factor) = factors
            .iter()
            .enumerate()
            .fold((1, f64::NEG_INFINITY), |acc, (k, &f)| if f > acc.1 { (k, f) } else { acc });
        let new_order = (order + best).saturating_sub(1).clamp(1, MAX_ORDER);
        self.order = new_order;
        let factor = MAX_FACTOR.min(safety * max_factor);
        self.h_abs *= factor;
        change_d(&mut self.d, new_order, factor);
        self.n_equal_steps = 0;
        self.lu = None;
        Ok(())
    }

    /// Simplified Newton iteration on the BDF corrector equation.
    fn solve_system(
        &mut self,
        t_new: f64,
        y_predict: &[f64],
        c: f64,
        psi: &[f64],
        scale: &[f64],
    ) -> Option<(usize, Vec<f64>, Vec<f64>)> {
        let lu = self.lu.as_ref()?;
        let n = self.n;
        let mut y = y_predict.to_vec();
        let mut d = vec![0.0; n];
        let mut dy_norm_old: Option<f64> = None;
        for k in 0..NEWTON_MAXITER {
            self.sys.rhs(t_new, &y, &mut self.f);
            if self.f.iter().any(|v| !v.is_finite()) {
                return None;
            }
            let rhs = DVector::from_iterator(n, (0..n).map(|i| c * self.f[i] - psi[i] - d[i]));
            let dy = lu.solve(&rhs)?;
            let dy_norm = rms(dy.iter().zip(scale).map(|(v, s)| v / s));
            let rate = dy_norm_old.map(|old| dy_norm / old);
            if let Some(rate) = rate {
                let projected = rate.powi((NEWTON_MAXITER - k) as i32) / (1.0 - rate) * dy_norm;
                if rate >= 1.0 || projected > self.newton_tol {
                    return None;
                }
            }
            for i in 0..n {
                y[i] += dy[i];
                d[i] += dy[i];
            }
            if dy_norm == 0.0 || rate.is_some_and(|r| r / (1.0 - r) * dy_norm < self.newton_tol) {
                return Some((k + 1, y, d));
            }
            dy_norm_old = Some(dy_norm);
        }
        None
    }

    fn weighted_norm(&self, v: &[f64], y: &[f64], factor: f64) -> f64 {
        rms(v
            .iter()
            .zip(y)
            .map(|(vi, yi)| factor * vi / (self.atol + self.rtol * yi.abs())))
    }
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v * v, c + 1));
    if count == 0 { 0.0 } else { (sum / count as f64).sqrt() }
}

/// Distance from `t` to the next representable value above it.
fn ulp(t: f64) -> f64 {
    if t == 0.0 {
        return f64::from_bits(1);
    }
    let next = if t > 0.0 {
        f64::from_bits(t.to_bits() + 1)
    } else {
        f64::from_bits(t.to_bits() - 1)
    };
    (next - t).abs()
}

/// `R(order, factor)` of the step-size change for the difference table.
fn compute_r(order: usize, factor: f64) -> DMatrix<f64> {
    let size = order + 1;
    let mut m = DMatrix::zeros(size, size);
    for j in 0..size {
        m[(0, j)] = 1.0;
    }
    for i in 1..size {
        for j in 1..size {
            m[(i, j)] = (i as f64 - 1.0 - factor * j as f64) / i as f64;
        }
    }
    for i in 1..size {
        for j in 0..size {
            m[(i, j)] *= m[(i - 1, j)];
        }
    }
    m
}

/// Rescales the first `order + 1` differences for a step multiplied by `factor`.
fn change_d(d: &mut [Vec<f64>], order: usize, factor: f64) {
    let r = compute_r(order, factor);
    let u = compute_r(order, 1.0);
    let ru = r * u;
    let n = d[0].len();
    let mut updated = vec![vec![0.0; n]; order + 1];
    for (i, row) in updated.iter_mut().enumerate() {
        for k in 0..=order {
            let w = ru[(k, i)];
            if w != 0.0 {
                for (acc, v) in row.iter_mut().zip(&d[k]) {
                    *acc += w * v;
                }
            }
        }
    }
    for (dst, src) in d.iter_mut().zip(updated) {
        *dst = src;
    }
}

fn select_initial_step<S: OdeSystem>(
    sys: &S,
    t0: f64,
    y0: &[f64],
    f0: &[f64],
    interval: f64,
    rtol: f64,
    atol: f64,
) -> f64 {
    if y0.is_empty() {
        return f64::INFINITY;
    }
    let scale: Vec<f64> = y0.iter().map(|y| atol + y.abs() * rtol).collect();
    let d0 = rms(y0.iter().zip(&scale).map(|(y, s)| y / s));
    let d1 = rms(f0.iter().zip(&scale).map(|(f, s)| f / s));
    let h0 = (if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 }).min(interval);
    let y1: Vec<f64> = y0.iter().zip(f0).map(|(y, f)| y + h0 * f).collect();
    let mut f1 = vec![0.0; y0.len()];
    sys.rhs(t0 + h0, &y1, &mut f1);
    let d2 = rms(f1.iter().zip(f0).zip(&scale).map(|((a, b), s)| (a - b) / s)) / h0;
    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).sqrt()
    };
    let h = (100.0 * h0).min(h1).min(interval);
    if h.is_finite() && h > 0.0 { h } else { interval.min(1e-6) }
}
