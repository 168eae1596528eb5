//! Real-coded crossover operators on genes in `[0, 1]^n`.

use rand::Rng;
use rand_distr::StandardNormal;

fn normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample::<f64, _>(StandardNormal)
}

fn clip(gene: &mut [f64]) {
    for g in gene {
        *g = g.clamp(0.0, 1.0);
    }
}

fn centroid(members: &[&[f64]], n: usize) -> Vec<f64> {
    let mut c = vec![0.0; n];
    for m in members {
        for (ci, mi) in c.iter_mut().zip(m.iter()) {
            *ci += mi;
        }
    }
    let k = members.len().max(1) as f64;
    c.iter_mut().for_each(|ci| *ci /= k);
    c
}

/// Extended normal distribution crossover. `others` are the `n` parents
/// beyond the primary pair.
pub fn endx<R: Rng + ?Sized>(p1: &[f64], p2: &[f64], others: &[&[f64]], rng: &mut R) -> Vec<f64> {
    let n = p1.len();
    let alpha = (1.0 - 2.0 * 0.35f64.powi(2)).sqrt();
    let beta = if others.len() > 1 {
        0.35 / ((others.len() - 1) as f64).sqrt()
    } else {
        0.35
    };
    let g = centroid(others, n);
    let xi = alpha * normal(rng);
    let mut child: Vec<f64> = p1
        .iter()
        .zip(p2)
        .map(|(a, b)| 0.5 * (a + b) + xi * (b - a))
        .collect();
    for other in others {
        let eta = beta * normal(rng);
        for ((c, o), gj) in child.iter_mut().zip(other.iter()).zip(&g) {
            *c += eta * (o - gj);
        }
    }
    clip(&mut child);
    child
}

/// Unimodal normal distribution crossover around the pair `p1`, `p2`,
/// with the orthogonal spread taken from the distance of `p3` to their
/// axis.
pub fn undx<R: Rng + ?Sized>(p1: &[f64], p2: &[f64], p3: &[f64], rng: &mut R) -> Vec<f64> {
    let n = p1.len();
    let alpha = 0.5;
    let beta = 0.35 / (n as f64).sqrt();
    let d1: Vec<f64> = p2.iter().zip(p1).map(|(b, a)| b - a).collect();
    let norm = d1.iter().map(|d| d * d).sum::<f64>().sqrt();
    let e1: Option<Vec<f64>> = (norm > 0.0).then(|| d1.iter().map(|d| d / norm).collect());

    let mut v3: Vec<f64> = p3.iter().zip(p1).map(|(c, a)| c - a).collect();
    if let Some(e1) = &e1 {
        project_out(&mut v3, e1);
    }
    let d2 = v3.iter().map(|v| v * v).sum::<f64>().sqrt();

    let mut t: Vec<f64> = (0..n).map(|_| beta * d2 * normal(rng)).collect();
    if let Some(e1) = &e1 {
        project_out(&mut t, e1);
    }
    let xi = alpha * normal(rng);
    let mut child: Vec<f64> = p1
        .iter()
        .zip(p2)
        .zip(&d1)
        .zip(&t)
        .map(|(((a, b), d), ti)| 0.5 * (a + b) + xi * d + ti)
        .collect();
    clip(&mut child);
    child
}

fn project_out(v: &mut [f64], unit: &[f64]) {
    let dot: f64 = v.iter().zip(unit).map(|(a, b)| a * b).sum();
    for (vi, ui) in v.iter_mut().zip(unit) {
        *vi -= dot * ui;
    }
}

/// Normal distribution mutation of `p1` along the spread of `others`
/// around their centroid.
pub fn ndm<R: Rng + ?Sized>(p1: &[f64], others: &[&[f64]], rng: &mut R) -> Vec<f64> {
    let n = p1.len();
    let gamma = 0.35 / (n as f64).sqrt();
    let g = centroid(others, n);
    let mut child = p1.to_vec();
    for other in others {
        let eta = gamma * normal(rng);
        for ((c, o), gj) in child.iter_mut().zip(other.iter()).zip(&g) {
            *c += eta * (o - gj);
        }
    }
    clip(&mut child);
    child
}

/// Index in `1..len` drawn with weight proportional to rank, the best
/// non-elite member being the most likely.
pub fn rank_roulette<R: Rng + ?Sized>(len: usize, rng: &mut R) -> usize {
    if len < 2 {
        return 0;
    }
    let total: usize = (1..len).map(|i| len - i).sum();
    let mut target = rng.gen_range(0..total);
    for i in 1..len {
        let w = len - i;
        if target < w {
            return i;
        }
        target -= w;
    }
    len - 1
}
