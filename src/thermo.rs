//! Detection of closed complex-formation cycles.
//!
//! Every binding, dimerization or dissociation rule is a formation event
//! `X + Y <-> XY`. Walking producers back to monomers gives, for each
//! complex, the set of reaction-id sets ("formation trees") that build
//! it. Two different trees for the same complex close a cycle along which
//! the product of equilibrium constants must be one.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CompileError;

const MAX_TREES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Association,
    Dissociation,
}

/// One complex-formation event taken from the reaction table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Formation {
    /// Flux index of the reaction.
    pub reaction: usize,
    pub line: usize,
    pub components: [usize; 2],
    pub complex: usize,
    pub direction: Direction,
}

impl Formation {
    pub fn new(
        reaction: usize,
        line: usize,
        a: usize,
        b: usize,
        complex: usize,
        direction: Direction,
    ) -> Self {
        Self {
            reaction,
            line,
            components: [a.min(b), a.max(b)],
            complex,
            direction,
        }
    }
}

type Tree = BTreeSet<usize>;

/// Monomer counts of a complex.
pub type Composition = BTreeMap<usize, u32>;

pub struct ThermoChecker<'a> {
    formations: &'a [Formation],
    producers: BTreeMap<usize, Vec<usize>>,
}

impl<'a> ThermoChecker<'a> {
    pub fn new(formations: &'a [Formation]) -> Self {
        let mut producers: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, f) in formations.iter().enumerate() {
            producers.entry(f.complex).or_default().push(idx);
        }
        Self {
            formations,
            producers,
        }
    }

    /// Fails when two events describe the same components and complex.
    pub fn check_duplicates(&self) -> Result<(), CompileError> {
        let mut seen: BTreeMap<([usize; 2], usize), Vec<&Formation>> = BTreeMap::new();
        for f in self.formations {
            seen.entry((f.components, f.complex)).or_default().push(f);
        }
        for events in seen.values() {
            if events.len() > 1 {
                let both = events.iter().any(|f| f.direction == Direction::Association)
                    && events.iter().any(|f| f.direction == Direction::Dissociation);
                let message = if both {
                    "binding and dissociation describe the same equilibrium"
                } else {
                    "complex formation is declared more than once"
                };
                return Err(CompileError::Duplicate {
                    lines: events.iter().map(|f| f.line).collect(),
                    message: message.into(),
                });
            }
        }
        Ok(())
    }

    /// Restriction sets as sorted 1-based reaction numbers. Only trees
    /// that assemble the same monomers close a cycle. A set that contains
    /// an already reported one is dropped.
    pub fn restrictions(&self) -> Vec<Vec<usize>> {
        let mut candidates: Vec<Tree> = Vec::new();
        for &complex in self.producers.keys() {
            let trees = self.trees(complex, &mut Vec::new());
            for (i, (a, ca)) in trees.iter().enumerate() {
                for (b, _) in trees[i + 1..].iter().filter(|(_, cb)| cb == ca) {
                    let cycle: Tree = a.symmetric_difference(b).copied().collect();
                    if !cycle.is_empty() && !candidates.contains(&cycle) {
                        candidates.push(cycle);
                    }
                }
            }
        }
        candidates.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        let mut kept: Vec<Tree> = Vec::new();
        for cycle in candidates {
            if !kept.iter().any(|k| k.is_subset(&cycle)) {
                kept.push(cycle);
            }
        }
        kept.into_iter()
            .map(|set| {
                set.into_iter()
                    .map(|f| self.formations[f].reaction + 1)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect()
    }

    /// Formation trees of `species` with the monomers each one assembles.
    fn trees(&self, species: usize, visiting: &mut Vec<usize>) -> Vec<(Tree, Composition)> {
        let Some(producers) = self.producers.get(&species) else {
            return vec![(Tree::new(), Composition::from([(species, 1)]))];
        };
        if visiting.contains(&species) {
            return Vec::new();
        }
        visiting.push(species);
        let mut out: Vec<(Tree, Composition)> = Vec::new();
        'producers: for &idx in producers {
            let [a, b] = self.formations[idx].components;
            let left = self.trees(a, visiting);
            let right = self.trees(b, visiting);
            for (lt, lc) in &left {
                for (rt, rc) in &right {
                    let mut tree: Tree = lt.union(rt).copied().collect();
                    tree.insert(idx);
                    if out.iter().any(|(t, _)| *t == tree) {
                        continue;
                    }
                    let mut composition = lc.clone();
                    for (&monomer, &n) in rc {
                        *composition.entry(monomer).or_insert(0) += n;
                    }
                    out.push((tree, composition));
                    if out.len() >= MAX_TREES {
                        break 'producers;
                    }
                }
            }
        }
        visiting.pop();
        out
    }

    /// Monomer content of `species`, following its first formation tree.
    pub fn composition(&self, species: usize) -> Composition {
        self.trees(species, &mut Vec::new())
            .into_iter()
            .next()
            .map(|(_, composition)| composition)
            .unwrap_or_else(|| Composition::from([(species, 1)]))
    }
}
