//! Reaction table and the right-hand-side program built from it.

use std::collections::BTreeMap;
use std::fmt;

use crate::expr::{CompiledExpr, ValueContext};
use crate::names::NameTable;

/// Multiplicative scaling of individual fluxes, keyed by flux index.
pub type Perturbation = BTreeMap<usize, f64>;

/// Which rule of the rule language produced a reaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKind {
    Dimerization,
    Binding,
    Dissociation,
    Phosphorylation,
    Autophosphorylation,
    Dephosphorylation,
    Transcription,
    Synthesis,
    Degradation,
    Translocation,
    UserDefined,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dimerization => "dimerization",
            Self::Binding => "binding",
            Self::Dissociation => "dissociation",
            Self::Phosphorylation => "phosphorylation",
            Self::Autophosphorylation => "autophosphorylation",
            Self::Dephosphorylation => "dephosphorylation",
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
            Self::Degradation => "degradation",
            Self::Translocation => "translocation",
            Self::UserDefined => "user-defined",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Repressor {
    pub species: usize,
    pub kf: usize,
    pub nf: usize,
}

/// Rate law of a single flux. Indices point into the parameter vector
/// (`kf`, `v`, ...) or the state vector (species lists).
#[derive(Clone, Debug)]
pub enum RateLaw {
    /// `kf * Π forward - kr * reverse_scale * Π reverse`.
    MassAction {
        kf: usize,
        kr: Option<usize>,
        forward: Vec<usize>,
        reverse: Vec<usize>,
        reverse_scale: f64,
    },
    /// `V * [E] * S / (K + S)`; without an enzyme `V * S / (K + S)`.
    MichaelisMenten {
        v: usize,
        k: usize,
        enzyme: Option<usize>,
        substrate: usize,
    },
    /// `V * a^n / (K^n + a^n + (R / KF)^nF)` with `a` the product of activators.
    Hill {
        v: usize,
        k: usize,
        n: usize,
        activators: Vec<usize>,
        repressor: Option<Repressor>,
    },
    Expression(CompiledExpr),
}

impl RateLaw {
    #[inline]
    pub fn evaluate(&self, t: f64, y: &[f64], x: &[f64]) -> f64 {
        match self {
            Self::MassAction {
                kf,
                kr,
                forward,
                reverse,
                reverse_scale,
            } => {
                let mut fwd = x[*kf];
                for &s in forward {
                    fwd *= y[s];
                }
                match kr {
                    Some(kr) => {
                        let mut rev = x[*kr] * reverse_scale;
                        for &s in reverse {
                            rev *= y[s];
                        }
                        fwd - rev
                    }
                    None => fwd,
                }
            }
            Self::MichaelisMenten {
                v,
                k,
                enzyme,
                substrate,
            } => {
                let s = y[*substrate];
                let e = enzyme.map_or(1.0, |e| y[e]);
                x[*v] * e * s / (x[*k] + s)
            }
            Self::Hill {
                v,
                k,
                n,
                activators,
                repressor,
            } => {
                let hill_n = x[*n];
                let activity = activators
                    .iter()
                    .fold(1.0, |acc, &s| acc * y[s])
                    .max(0.0)
                    .powf(hill_n);
                let mut denom = x[*k].powf(hill_n) + activity;
                if let Some(rep) = repressor {
                    denom += (y[rep.species].max(0.0) / x[rep.kf]).powf(x[rep.nf]);
                }
                if denom == 0.0 {
                    0.0
                } else {
                    x[*v] * activity / denom
                }
            }
            Self::Expression(expr) => expr.eval(&ValueContext::new(t, y, x)),
        }
    }

    /// Parameters the law reads.
    pub fn parameters(&self) -> Vec<usize> {
        match self {
            Self::MassAction { kf, kr, .. } => std::iter::once(*kf).chain(*kr).collect(),
            Self::MichaelisMenten { v, k, .. } => vec![*v, *k],
            Self::Hill { v, k, n, repressor, .. } => {
                let mut out = vec![*v, *k, *n];
                if let Some(rep) = repressor {
                    out.extend([rep.kf, rep.nf]);
                }
                out
            }
            Self::Expression(expr) => expr.parameters().to_vec(),
        }
    }

    /// Renders the law with model names substituted for indices.
    pub fn render(&self, species: &NameTable, params: &NameTable) -> String {
        let prod = |items: &[usize]| -> String {
            items
                .iter()
                .map(|&s| species[s].to_string())
                .collect::<Vec<_>>()
                .join(" * ")
        };
        match self {
            Self::MassAction {
                kf,
                kr,
                forward,
                reverse,
                reverse_scale,
            } => {
                let mut out = params[*kf].to_string();
                if !forward.is_empty() {
                    out.push_str(" * ");
                    out.push_str(&prod(forward));
                }
                if let Some(kr) = kr {
                    out.push_str(" - ");
                    out.push_str(&params[*kr]);
                    if *reverse_scale != 1.0 {
                        out.push_str(&format!(" * {reverse_scale}"));
                    }
                    if !reverse.is_empty() {
                        out.push_str(" * ");
                        out.push_str(&prod(reverse));
                    }
                }
                out
            }
            Self::MichaelisMenten {
                v,
                k,
                enzyme,
                substrate,
            } => {
                let s = &species[*substrate];
                match enzyme {
                    Some(e) => format!("{} * {} * {s} / ({} + {s})", &params[*v], &species[*e], &params[*k]),
                    None => format!("{} * {s} / ({} + {s})", &params[*v], &params[*k]),
                }
            }
            Self::Hill {
                v,
                k,
                n,
                activators,
                repressor,
            } => {
                let a = if activators.len() == 1 {
                    species[activators[0]].to_string()
                } else {
                    format!("({})", prod(activators))
                };
                let (v, k, n) = (&params[*v], &params[*k], &params[*n]);
                let mut denom = format!("{k}^{n} + {a}^{n}");
                if let Some(rep) = repressor {
                    denom.push_str(&format!(
                        " + ({} / {})^{}",
                        &species[rep.species], &params[rep.kf], &params[rep.nf]
                    ));
                }
                format!("{v} * {a}^{n} / ({denom})")
            }
            Self::Expression(expr) => expr.source().to_string(),
        }
    }
}

/// One compiled rule: a flux and its stoichiometric footprint.
#[derive(Clone, Debug)]
pub struct Reaction {
    /// Flux index, `0..n_reactions`.
    pub id: usize,
    /// 1-based line of the rule file.
    pub line: usize,
    pub kind: RuleKind,
    pub text: String,
    pub reactants: Vec<usize>,
    pub products: Vec<usize>,
    pub modifiers: Vec<usize>,
    /// Sparse column of the stoichiometry matrix.
    pub stoichiometry: Vec<(usize, f64)>,
    pub rate: RateLaw,
}

impl Reaction {
    /// 1-based reaction number used in generated parameter names.
    pub fn number(&self) -> usize {
        self.id + 1
    }

    pub fn coefficient(&self, species: usize) -> f64 {
        self.stoichiometry
            .iter()
            .filter(|(s, _)| *s == species)
            .map(|(_, c)| c)
            .sum()
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v[{}] ({}): {}", self.id, self.kind.as_str(), self.text)
    }
}

/// Adds `coefficient` for `species` into a sparse stoichiometry column.
pub(crate) fn accumulate(column: &mut Vec<(usize, f64)>, species: usize, coefficient: f64) {
    match column.iter_mut().find(|(s, _)| *s == species) {
        Some(entry) => entry.1 += coefficient,
        None => column.push((species, coefficient)),
    }
}

/// The executable ODE program: `dy/dt = S · (scale ⊙ v(t, y, x))`.
#[derive(Clone, Debug, Default)]
pub struct ReactionNetwork {
    pub(crate) n_species: usize,
    pub(crate) reactions: Vec<Reaction>,
    pub(crate) fixed: Vec<bool>,
}

impl ReactionNetwork {
    pub(crate) fn new(n_species: usize, reactions: Vec<Reaction>, fixed: Vec<bool>) -> Self {
        debug_assert_eq!(fixed.len(), n_species);
        Self {
            n_species,
            reactions,
            fixed,
        }
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn n_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn is_fixed(&self, species: usize) -> bool {
        self.fixed.get(species).copied().unwrap_or(false)
    }

    /// Evaluates every flux into `v`.
    pub fn flux(&self, t: f64, y: &[f64], x: &[f64], v: &mut [f64]) {
        debug_assert_eq!(v.len(), self.reactions.len());
        for (dst, reaction) in v.iter_mut().zip(&self.reactions) {
            *dst = reaction.rate.evaluate(t, y, x);
        }
    }

    /// Right-hand side. `scales`, when given, is a dense per-flux factor
    /// applied after evaluation and before accumulation.
    pub fn rhs(
        &self,
        t: f64,
        y: &[f64],
        x: &[f64],
        scales: Option<&[f64]>,
        v: &mut [f64],
        dydt: &mut [f64],
    ) {
        self.flux(t, y, x, v);
        if let Some(scales) = scales {
            for (vi, s) in v.iter_mut().zip(scales) {
                *vi *= s;
            }
        }
        dydt.fill(0.0);
        for (reaction, &vi) in self.reactions.iter().zip(v.iter()) {
            for &(species, coefficient) in &reaction.stoichiometry {
                if !self.fixed[species] {
                    dydt[species] += coefficient * vi;
                }
            }
        }
    }

    /// Expands a sparse perturbation map into dense per-flux factors.
    pub fn dense_scales(&self, perturbation: &Perturbation) -> Vec<f64> {
        let mut scales = vec![1.0; self.reactions.len()];
        for (&idx, &scale) in perturbation {
            if let Some(slot) = scales.get_mut(idx) {
                *slot = scale;
            }
        }
        scales
    }

    /// Dense `S[species][reaction]`; rows of fixed species are zero.
    pub fn stoichiometry_matrix(&self) -> Vec<Vec<f64>> {
        let mut matrix = vec![vec![0.0; self.reactions.len()]; self.n_species];
        for (j, reaction) in self.reactions.iter().enumerate() {
            for &(species, coefficient) in &reaction.stoichiometry {
                if !self.fixed[species] {
                    matrix[species][j] += coefficient;
                }
            }
        }
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(id: usize, a: usize, b: usize, ab: usize, kf: usize, kr: usize) -> Reaction {
        let mut stoichiometry = Vec::new();
        accumulate(&mut stoichiometry, a, -1.0);
        accumulate(&mut stoichiometry, b, -1.0);
        accumulate(&mut stoichiometry, ab, 1.0);
        Reaction {
            id,
            line: id + 1,
            kind: RuleKind::Binding,
            text: "A binds B <--> AB".into(),
            reactants: vec![a, b],
            products: vec![ab],
            modifiers: Vec::new(),
            stoichiometry,
            rate: RateLaw::MassAction {
                kf,
                kr: Some(kr),
                forward: vec![a, b],
                reverse: vec![ab],
                reverse_scale: 1.0,
            },
        }
    }

    #[test]
    fn mass_action_binding_rhs() {
        let network = ReactionNetwork::new(3, vec![binding(0, 0, 1, 2, 0, 1)], vec![false; 3]);
        let y = [2.0, 3.0, 1.0];
        let x = [0.5, 2.0];
        let mut v = [0.0];
        let mut dydt = [0.0; 3];
        network.rhs(0.0, &y, &x, None, &mut v, &mut dydt);
        assert_eq!(v[0], 0.5 * 6.0 - 2.0);
        assert_eq!(dydt, [-1.0, -1.0, 1.0]);
    }

    #[test]
    fn homodimer_accumulates_coefficient() {
        let mut column = Vec::new();
        accumulate(&mut column, 0, -1.0);
        accumulate(&mut column, 0, -1.0);
        accumulate(&mut column, 1, 1.0);
        assert_eq!(column, vec![(0, -2.0), (1, 1.0)]);
    }

    #[test]
    fn fixed_species_rows_are_zero() {
        let network = ReactionNetwork::new(3, vec![binding(0, 0, 1, 2, 0, 1)], vec![false, true, false]);
        let matrix = network.stoichiometry_matrix();
        assert_eq!(matrix[1], vec![0.0]);
        let mut v = [0.0];
        let mut dydt = [0.0; 3];
        network.rhs(0.0, &[1.0, 1.0, 0.0], &[1.0, 0.0], None, &mut v, &mut dydt);
        assert_eq!(dydt[1], 0.0);
        assert_eq!(dydt[0], -1.0);
    }

    #[test]
    fn perturbation_scales_flux_before_accumulation() {
        let network = ReactionNetwork::new(3, vec![binding(0, 0, 1, 2, 0, 1)], vec![false; 3]);
        let mut perturbation = Perturbation::new();
        perturbation.insert(0, 1.01);
        let scales = network.dense_scales(&perturbation);
        let mut v = [0.0];
        let mut dydt = [0.0; 3];
        network.rhs(0.0, &[1.0, 1.0, 0.0], &[1.0, 0.0], Some(&scales), &mut v, &mut dydt);
        assert!((dydt[2] - 1.01).abs() < 1e-15);
    }

    #[test]
    fn michaelis_menten_and_hill_laws() {
        let mm = RateLaw::MichaelisMenten {
            v: 0,
            k: 1,
            enzyme: Some(0),
            substrate: 1,
        };
        let value = mm.evaluate(0.0, &[2.0, 4.0], &[3.0, 4.0]);
        assert!((value - 3.0 * 2.0 * 4.0 / 8.0).abs() < 1e-12);

        let hill = RateLaw::Hill {
            v: 0,
            k: 1,
            n: 2,
            activators: vec![0],
            repressor: Some(Repressor {
                species: 1,
                kf: 3,
                nf: 4,
            }),
        };
        let x = [10.0, 1.0, 2.0, 2.0, 1.0];
        let value = hill.evaluate(0.0, &[1.0, 2.0], &x);
        assert!((value - 10.0 * 1.0 / (1.0 + 1.0 + 1.0)).abs() < 1e-12);
    }
}
