//! Search space: the coordinates of `x` and `y0` the optimizer may move,
//! and the log-linear map between genes in `[0, 1]^n` and values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::compiler::CompiledModel;
use crate::error::{Error, Result};

/// Linear-scale bounds keyed by parameter or species name.
pub type BoundsOverrides = BTreeMap<String, [f64; 2]>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    idx_params: Vec<usize>,
    idx_initials: Vec<usize>,
    /// `log10` of the lower bounds, parameters first.
    lower: Vec<f64>,
    upper: Vec<f64>,
    default_x: Vec<f64>,
    default_y0: Vec<f64>,
    constraints: Vec<(usize, usize)>,
}

impl SearchSpace {
    /// Selects every parameter that is neither `const` nor constrained,
    /// plus every species with explicit bounds. Parameters without
    /// explicit bounds search one decade around their default.
    pub fn from_model(model: &CompiledModel, overrides: &BoundsOverrides) -> Result<Self> {
        for name in overrides.keys() {
            if !model.parameters.contains(name) && !model.species.contains(name) {
                return Err(Error::InvalidArgument(format!(
                    "bounds given for unknown name '{name}'"
                )));
            }
        }
        let dependent: BTreeSet<usize> = model.constraints.iter().map(|&(d, _)| d).collect();
        let mut idx_params = Vec::new();
        let mut bounds = Vec::new();
        for (idx, name) in model.parameters.iter() {
            if model.constant[idx] || dependent.contains(&idx) {
                continue;
            }
            let explicit = overrides
                .get(name)
                .map(|&[lo, hi]| (lo, hi))
                .or(model.param_bounds[idx]);
            let default = model.x[idx];
            let range = match explicit {
                Some(range) => range,
                None if default > 0.0 => (default * 0.1, default * 10.0),
                None => continue,
            };
            idx_params.push(idx);
            bounds.push(range);
        }
        let mut idx_initials = Vec::new();
        for (idx, name) in model.species.iter() {
            let explicit = overrides
                .get(name)
                .map(|&[lo, hi]| (lo, hi))
                .or(model.initial_bounds[idx]);
            if let Some(range) = explicit {
                idx_initials.push(idx);
                bounds.push(range);
            }
        }
        let mut space = Self::new(
            idx_params,
            idx_initials,
            bounds,
            model.x.clone(),
            model.y0.clone(),
        )?;
        space.constraints = model.constraints.clone();
        Ok(space)
    }

    /// Builds a space from explicit index lists. `bounds` lists parameters
    /// first, then initials.
    pub fn new(
        idx_params: Vec<usize>,
        idx_initials: Vec<usize>,
        bounds: Vec<(f64, f64)>,
        default_x: Vec<f64>,
        default_y0: Vec<f64>,
    ) -> Result<Self> {
        check_unique(&idx_params, "idx_params")?;
        check_unique(&idx_initials, "idx_initials")?;
        if bounds.len() != idx_params.len() + idx_initials.len() {
            return Err(Error::Structure(format!(
                "{} bounds for {} search coordinates",
                bounds.len(),
                idx_params.len() + idx_initials.len()
            )));
        }
        let defaults = idx_params
            .iter()
            .map(|&i| ("parameter", i, default_x.get(i)))
            .chain(idx_initials.iter().map(|&i| ("initial", i, default_y0.get(i))));
        for (kind, idx, default) in defaults {
            match default {
                None => {
                    return Err(Error::Structure(format!("{kind} index {idx} is out of range")));
                }
                Some(&v) if v <= 0.0 => {
                    return Err(Error::Structure(format!(
                        "{kind} {idx} has default value {v}; searched values must be positive"
                    )));
                }
                Some(_) => {}
            }
        }
        let mut lower = Vec::with_capacity(bounds.len());
        let mut upper = Vec::with_capacity(bounds.len());
        for (lo, hi) in bounds {
            if !(lo > 0.0 && hi > lo && hi.is_finite()) {
                return Err(Error::Structure(format!("invalid search bounds [{lo}, {hi}]")));
            }
            lower.push(lo.log10());
            upper.push(hi.log10());
        }
        Ok(Self {
            idx_params,
            idx_initials,
            lower,
            upper,
            default_x,
            default_y0,
            constraints: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn idx_params(&self) -> &[usize] {
        &self.idx_params
    }

    pub fn idx_initials(&self) -> &[usize] {
        &self.idx_initials
    }

    /// Linear-scale bounds, parameters first.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(l, u)| (10f64.powf(*l), 10f64.powf(*u)))
            .collect()
    }

    pub fn gene_to_val(&self, gene: &[f64]) -> Vec<f64> {
        gene.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(g, (l, u))| 10f64.powf(g * (u - l) + l))
            .collect()
    }

    pub fn val_to_gene(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(v, (l, u))| (v.log10() - l) / (u - l))
            .collect()
    }

    /// Selected coordinates of the default vectors.
    pub fn default_values(&self) -> Vec<f64> {
        self.idx_params
            .iter()
            .map(|&i| self.default_x[i])
            .chain(self.idx_initials.iter().map(|&i| self.default_y0[i]))
            .collect()
    }

    /// Writes `values` into copies of the defaults and applies the
    /// parameter equalities.
    pub fn update(&self, values: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut x = self.default_x.clone();
        let mut y0 = self.default_y0.clone();
        let (params, initials) = values.split_at(self.idx_params.len().min(values.len()));
        for (&i, &v) in self.idx_params.iter().zip(params) {
            x[i] = v;
        }
        for (&i, &v) in self.idx_initials.iter().zip(initials) {
            y0[i] = v;
        }
        for &(dependent, source) in &self.constraints {
            x[dependent] = x[source];
        }
        (x, y0)
    }
}

fn check_unique(indices: &[usize], what: &str) -> Result<()> {
    let mut seen = BTreeSet::new();
    for &idx in indices {
        if !seen.insert(idx) {
            return Err(Error::Structure(format!("duplicate index {idx} in {what}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::compiler::{compile_str, CompileOptions};

    fn space() -> SearchSpace {
        SearchSpace::new(
            vec![0, 2],
            vec![1],
            vec![(1e-3, 1e1), (0.5, 2.0), (10.0, 1000.0)],
            vec![0.1, 0.0, 1.0],
            vec![0.0, 100.0],
        )
        .unwrap()
    }

    #[test]
    fn gene_value_round_trip() {
        let space = space();
        for gene in [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [0.25, 0.5, 0.75], [0.9, 0.1, 0.33]] {
            let back = space.val_to_gene(&space.gene_to_val(&gene));
            for (g, b) in gene.iter().zip(&back) {
                assert!((g - b).abs() < 1e-12);
            }
        }
        let values = space.gene_to_val(&[0.0, 1.0, 0.5]);
        assert_relative_eq!(values[0], 1e-3, max_relative = 1e-12);
        assert_relative_eq!(values[1], 2.0, max_relative = 1e-12);
        assert_relative_eq!(values[2], 100.0, max_relative = 1e-12);
    }

    #[test]
    fn update_writes_selected_coordinates() {
        let space = space();
        let (x, y0) = space.update(&[0.2, 3.0, 50.0]);
        assert_eq!(x, vec![0.2, 0.0, 3.0]);
        assert_eq!(y0, vec![0.0, 50.0]);
        assert_eq!(space.default_values(), vec![0.1, 1.0, 100.0]);
    }

    #[test]
    fn structural_errors() {
        let dup = SearchSpace::new(vec![0, 0], vec![], vec![(1.0, 2.0); 2], vec![1.0], vec![]);
        assert!(matches!(dup, Err(Error::Structure(_))));
        let zero = SearchSpace::new(vec![1], vec![], vec![(1.0, 2.0)], vec![1.0, 0.0], vec![]);
        assert!(matches!(zero, Err(Error::Structure(_))));
        let inverted = SearchSpace::new(vec![0], vec![], vec![(2.0, 1.0)], vec![1.0], vec![]);
        assert!(matches!(inverted, Err(Error::Structure(_))));
        let short = SearchSpace::new(vec![0], vec![], vec![], vec![1.0], vec![]);
        assert!(matches!(short, Err(Error::Structure(_))));
    }

    #[test]
    fn model_selection_skips_const_and_constrained() {
        let text = "\
A binds B <--> AB | kf=4, const kr=2 | A=1[0.1, 10], B=1
C binds B <--> CB | kf=@1, kr=0.5[0.01, 1]
";
        let model = compile_str(text, &CompileOptions::default()).unwrap();
        let space = SearchSpace::from_model(&model, &BoundsOverrides::new()).unwrap();
        let names: Vec<&str> = space.idx_params().iter().map(|&i| &model.parameters[i]).collect();
        assert_eq!(names, vec!["kf1", "kr2"]);
        assert_eq!(space.idx_initials(), &[model.species.index_of("A").unwrap()]);
        let bounds = space.bounds();
        assert_relative_eq!(bounds[0].0, 0.4, max_relative = 1e-12);
        assert_relative_eq!(bounds[0].1, 40.0, max_relative = 1e-12);
        assert_relative_eq!(bounds[1].1, 1.0, max_relative = 1e-12);

        let (x, _) = space.update(&[7.0, 0.2, 3.0]);
        assert_eq!(x[model.parameters.index_of("kf2").unwrap()], 7.0);
    }

    #[test]
    fn overrides_replace_bounds_and_add_initials() {
        let model = compile_str("A is degraded | kf=1 | A=5", &CompileOptions::default()).unwrap();
        let overrides = BoundsOverrides::from([
            ("kf1".to_string(), [0.5, 2.0]),
            ("A".to_string(), [1.0, 10.0]),
        ]);
        let space = SearchSpace::from_model(&model, &overrides).unwrap();
        assert_eq!(space.len(), 2);
        let unknown = BoundsOverrides::from([("nope".to_string(), [1.0, 2.0])]);
        assert!(SearchSpace::from_model(&model, &unknown).is_err());
    }
}
