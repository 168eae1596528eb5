//! Local search around the first selected parent: bounded Powell and
//! differential evolution. Both work in gene space inside a box.

use rand::Rng;

/// Generations of the differential evolution search.
pub const DE_MAXITER: usize = 10;
const DE_CROSSOVER: f64 = 0.7;
const GOLDEN_ITERS: usize = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub x: Vec<f64>,
    pub f: f64,
}

/// Envelope of a set of genes.
pub fn envelope(members: &[&[f64]]) -> (Vec<f64>, Vec<f64>) {
    let n = members.first().map_or(0, |m| m.len());
    let mut lo = vec![f64::INFINITY; n];
    let mut hi = vec![f64::NEG_INFINITY; n];
    for m in members {
        for j in 0..n {
            lo[j] = lo[j].min(m[j]);
            hi[j] = hi[j].max(m[j]);
        }
    }
    (lo, hi)
}

fn golden<F: FnMut(f64) -> f64>(mut phi: F, mut a: f64, mut b: f64) -> (f64, f64) {
    let r = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = b - r * (b - a);
    let mut d = a + r * (b - a);
    let mut fc = phi(c);
    let mut fd = phi(d);
    for _ in 0..GOLDEN_ITERS {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - r * (b - a);
            fc = phi(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + r * (b - a);
            fd = phi(d);
        }
    }
    if fc < fd { (c, fc) } else { (d, fd) }
}

/// Step range `[tmin, tmax]` keeping `x + t * dir` inside `[lo, hi]`.
fn feasible_range(x: &[f64], dir: &[f64], lo: &[f64], hi: &[f64]) -> (f64, f64) {
    let (mut tmin, mut tmax) = (f64::NEG_INFINITY, f64::INFINITY);
    for j in 0..x.len() {
        if dir[j].abs() < 1e-15 {
            continue;
        }
        let a = (lo[j] - x[j]) / dir[j];
        let b = (hi[j] - x[j]) / dir[j];
        tmin = tmin.max(a.min(b));
        tmax = tmax.min(a.max(b));
    }
    if tmin.is_finite() && tmax.is_finite() && tmin <= tmax {
        (tmin.min(0.0), tmax.max(0.0))
    } else {
        (0.0, 0.0)
    }
}

fn along(x: &[f64], dir: &[f64], t: f64, lo: &[f64], hi: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(dir)
        .enumerate()
        .map(|(j, (xi, di))| (xi + t * di).clamp(lo[j], hi[j]))
        .collect()
}

/// Modified Powell search from `start` inside `[lo, hi]`. Returns as
/// soon as a point better than `start` is found, or the best point after
/// `n` sweeps.
pub fn powell<F: FnMut(&[f64]) -> f64>(
    mut f: F,
    start: Point,
    lo: &[f64],
    hi: &[f64],
) -> Point {
    let n = start.x.len();
    let f0 = start.f;
    let mut best = start;
    let mut dirs: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    for _ in 0..n.max(1) {
        let origin = best.clone();
        let mut largest = (0, 0.0);
        for (k, dir) in dirs.iter().enumerate() {
            let (a, b) = feasible_range(&best.x, dir, lo, hi);
            if b - a < 1e-12 {
                continue;
            }
            let (t, ft) = golden(|t| f(&along(&best.x, dir, t, lo, hi)), a, b);
            if ft < best.f {
                if best.f - ft > largest.1 {
                    largest = (k, best.f - ft);
                }
                best = Point {
                    x: along(&best.x, dir, t, lo, hi),
                    f: ft,
                };
                if best.f < f0 {
                    return best;
                }
            }
        }
        let shift: Vec<f64> = best.x.iter().zip(&origin.x).map(|(a, b)| a - b).collect();
        if shift.iter().all(|s| s.abs() < 1e-12) {
            break;
        }
        dirs[largest.0] = shift;
    }
    best
}

/// Differential evolution, strategy best/2/bin, over `members` (padded to
/// five with uniform samples in the box). `evaluate` scores a batch.
pub fn differential_evolution<R, F>(
    mut evaluate: F,
    members: Vec<Vec<f64>>,
    lo: &[f64],
    hi: &[f64],
    rng: &mut R,
) -> Point
where
    R: Rng + ?Sized,
    F: FnMut(&[Vec<f64>]) -> Vec<f64>,
{
    let n = lo.len();
    let mut pop = members;
    while pop.len() < 5 {
        pop.push((0..n).map(|j| sample_in(rng, lo[j], hi[j])).collect());
    }
    let m = pop.len();
    let mut fit = evaluate(&pop);
    for _ in 0..DE_MAXITER {
        let best = argmin(&fit);
        let scale = rng.gen_range(0.5..1.0);
        let trials: Vec<Vec<f64>> = (0..m)
            .map(|i| {
                let r = distinct(rng, m, i);
                let jrand = rng.gen_range(0..n);
                (0..n)
                    .map(|j| {
                        if j == jrand || rng.r#gen::<f64>() < DE_CROSSOVER {
                            let v = pop[best][j] + scale * (pop[r[0]][j] - pop[r[1]][j] + pop[r[2]][j] - pop[r[3]][j]);
                            v.clamp(lo[j], hi[j])
                        } else {
                            pop[i][j]
                        }
                    })
                    .collect()
            })
            .collect();
        let scores = evaluate(&trials);
        for (i, (trial, score)) in trials.into_iter().zip(scores).enumerate() {
            if score <= fit[i] {
                pop[i] = trial;
                fit[i] = score;
            }
        }
    }
    let best = argmin(&fit);
    Point {
        x: pop.swap_remove(best),
        f: fit[best],
    }
}

fn sample_in<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}

/// Four distinct indices in `0..m`, all different from `skip`.
fn distinct<R: Rng + ?Sized>(rng: &mut R, m: usize, skip: usize) -> [usize; 4] {
    let mut picked = [usize::MAX; 4];
    let mut k = 0;
    while k < 4 {
        let c = rng.gen_range(0..m);
        if c != skip && !picked[..k].contains(&c) {
            picked[k] = c;
            k += 1;
        }
    }
    picked
}
