//! Text-to-model compiler.
//!
//! One directive per line: a reaction rule in stylized English, `@rxn`,
//! `@obs`, `@sim` or `@add`. Rules and `@add` run in file order and fix
//! the species and parameter indices (order of first appearance); `@obs`
//! and `@sim` are resolved afterwards against the complete name tables.

pub mod rules;
pub mod similarity;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Error, Result};
use crate::expr::{Assignment, CompiledExpr, Scope};
use crate::names::NameTable;
use crate::reaction::{accumulate, RateLaw, Reaction, ReactionNetwork, Repressor};
use crate::thermo::{Direction, Formation, ThermoChecker};

use rules::{ParamValue, Rule, RuleForm, Setting};

const DIRECTIVES: &[&str] = &["@rxn", "@obs", "@sim", "@add"];
const SIM_KEYS: &[&str] = &["tspan", "unperturbed", "condition"];
const DEFAULT_PARAMETER: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Similarity above which an unknown line gets a suggestion.
    pub similarity_threshold: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
        }
    }
}

impl CompileOptions {
    pub fn validate(&self) -> Result<()> {
        let th = self.similarity_threshold;
        if !(th > 0.0 && th < 1.0) {
            return Err(Error::InvalidArgument(format!(
                "similarity threshold must lie in (0, 1), got {th}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Observable {
    pub name: String,
    pub expr: CompiledExpr,
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub name: String,
    pub statements: Vec<Assignment>,
}

/// Output time grid `t0, t0 + dt, ..., tf`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub t0: f64,
    pub tf: f64,
    pub dt: f64,
}

impl Default for TimeSpan {
    fn default() -> Self {
        Self {
            t0: 0.0,
            tf: 100.0,
            dt: 1.0,
        }
    }
}

impl TimeSpan {
    pub fn grid(&self) -> Vec<f64> {
        let steps = ((self.tf - self.t0) / self.dt + 1e-9).floor() as usize;
        let mut grid: Vec<f64> = (0..=steps).map(|i| self.t0 + i as f64 * self.dt).collect();
        if grid.last().is_some_and(|&t| self.tf - t > 1e-9 * self.dt) {
            grid.push(self.tf);
        }
        grid
    }
}

/// Everything the rule file declares, resolved to indices.
#[derive(Clone, Debug)]
pub struct CompiledModel {
    pub parameters: NameTable,
    pub species: NameTable,
    pub network: ReactionNetwork,
    /// Default parameter values.
    pub x: Vec<f64>,
    /// Default initial values.
    pub y0: Vec<f64>,
    pub constant: Vec<bool>,
    /// `(dependent, source)`: `x[dependent] = x[source]` after every update.
    pub constraints: Vec<(usize, usize)>,
    pub param_bounds: Vec<Option<(f64, f64)>>,
    pub initial_bounds: Vec<Option<(f64, f64)>>,
    pub observables: Vec<Observable>,
    pub tspan: TimeSpan,
    pub conditions: Vec<Condition>,
    pub unperturbed: Option<Vec<Assignment>>,
    pub formations: Vec<Formation>,
    /// Thermodynamic restriction sets (1-based reaction numbers).
    pub restrictions: Vec<Vec<usize>>,
}

impl CompiledModel {
    /// Copies every constrained parameter from its source.
    pub fn apply_constraints(&self, x: &mut [f64]) {
        for &(dependent, source) in &self.constraints {
            x[dependent] = x[source];
        }
    }
}

pub fn compile_file(path: impl AsRef<Path>, options: &CompileOptions) -> Result<CompiledModel> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    compile_str(&text, options)
}

pub fn compile_str(text: &str, options: &CompileOptions) -> Result<CompiledModel> {
    options.validate()?;
    let lines = significant_lines(text);
    check_duplicate_lines(&lines)?;
    let mut compiler = Compiler::new(options.similarity_threshold);
    let mut deferred = Vec::new();
    for &(line, content) in &lines {
        if matches!(first_word(content), "@obs" | "@sim") {
            deferred.push((line, content));
        } else {
            compiler.statement(line, content)?;
        }
    }
    for (line, content) in deferred {
        compiler.directive(line, content)?;
    }
    Ok(compiler.finish()?)
}

/// Non-blank lines with comments removed, paired with 1-based numbers.
fn significant_lines(text: &str) -> Vec<(usize, &str)> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let content = raw.split_once('#').map_or(raw, |(head, _)| head).trim();
            (!content.is_empty()).then_some((idx + 1, content))
        })
        .collect()
}

fn first_word(content: &str) -> &str {
    content.split_whitespace().next().unwrap_or_default()
}

fn check_duplicate_lines(lines: &[(usize, &str)]) -> std::result::Result<(), CompileError> {
    let mut seen: HashMap<String, Vec<usize>> = HashMap::new();
    let mut order = Vec::new();
    for &(line, content) in lines {
        let key = content.split_whitespace().collect::<Vec<_>>().join(" ");
        let entry = seen.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(line);
    }
    for key in order {
        if let Some(lines) = seen.get(&key).filter(|l| l.len() > 1) {
            return Err(CompileError::Duplicate {
                lines: lines.clone(),
                message: format!("duplicate line '{key}'"),
            });
        }
    }
    Ok(())
}

struct Compiler {
    threshold: f64,
    species: NameTable,
    parameters: NameTable,
    x: Vec<f64>,
    y0: Vec<f64>,
    fixed: Vec<bool>,
    constant: Vec<bool>,
    param_bounds: Vec<Option<(f64, f64)>>,
    initial_bounds: Vec<Option<(f64, f64)>>,
    constraints: Vec<(usize, usize)>,
    reactions: Vec<Reaction>,
    formations: Vec<Formation>,
    observables: Vec<Observable>,
    tspan: Option<TimeSpan>,
    conditions: Vec<Condition>,
    /// Prelude statements with their line.
    unperturbed: Option<(usize, Vec<Assignment>)>,
}

type Compiled<T> = std::result::Result<T, CompileError>;

impl Compiler {
    fn new(threshold: f64) -> Self {
        Self {
            threshold,
            species: NameTable::new(),
            parameters: NameTable::new(),
            x: Vec::new(),
            y0: Vec::new(),
            fixed: Vec::new(),
            constant: Vec::new(),
            param_bounds: Vec::new(),
            initial_bounds: Vec::new(),
            constraints: Vec::new(),
            reactions: Vec::new(),
            formations: Vec::new(),
            observables: Vec::new(),
            tspan: None,
            conditions: Vec::new(),
            unperturbed: None,
        }
    }

    fn declare_species(&mut self, name: &str, line: usize) -> Compiled<usize> {
        if self.parameters.contains(name) {
            return Err(CompileError::Name {
                line,
                name: name.to_string(),
                message: "is already declared as a parameter".into(),
            });
        }
        let idx = self.species.insert(name).map_err(|e| CompileError::Value {
            line,
            message: e.to_string(),
        })?;
        if idx == self.y0.len() {
            self.y0.push(0.0);
            self.fixed.push(false);
            self.initial_bounds.push(None);
        }
        Ok(idx)
    }

    fn declare_parameter(&mut self, name: &str, line: usize) -> Compiled<usize> {
        if self.species.contains(name) {
            return Err(CompileError::Name {
                line,
                name: name.to_string(),
                message: "is already declared as a species".into(),
            });
        }
        let idx = self.parameters.insert(name).map_err(|e| CompileError::Value {
            line,
            message: e.to_string(),
        })?;
        self.sync_parameters();
        Ok(idx)
    }

    /// Grows the per-parameter vectors after new names were registered.
    fn sync_parameters(&mut self) {
        let n = self.parameters.len();
        self.x.resize(n, DEFAULT_PARAMETER);
        self.constant.resize(n, false);
        self.param_bounds.resize(n, None);
    }

    /// Rules, `@rxn` and `@add`.
    fn statement(&mut self, line: usize, content: &str) -> Compiled<()> {
        let head = first_word(content);
        if head == "@add" {
            return self.add(line, content[head.len()..].trim());
        }
        if head.starts_with('@') && head != "@rxn" {
            return Err(CompileError::Detection {
                line,
                text: content.to_string(),
                suggestion: similarity::suggest(head, DIRECTIVES, self.threshold)
                    .map(str::to_string),
            });
        }
        let mut sections = content.split('|');
        let body = sections.next().unwrap_or_default().trim();
        let mut settings = Vec::new();
        for section in sections {
            settings.extend(rules::parse_settings(section, line)?);
        }
        let rule = if head == "@rxn" {
            rules::parse_user_defined(&body[head.len()..], line)?
        } else {
            rules::parse_rule(body, line, self.threshold)?
        };
        self.emit(line, body, &rule, &settings)
    }

    fn add(&mut self, line: usize, rest: &str) -> Compiled<()> {
        let (what, declaration) = rest
            .split_once(char::is_whitespace)
            .ok_or_else(|| CompileError::Value {
                line,
                message: "expected '@add species NAME' or '@add param NAME'".into(),
            })?;
        let declaration = declaration.trim();
        let (name, setting) = if declaration.contains('=') {
            let mut settings = rules::parse_settings(declaration, line)?;
            if settings.len() != 1 {
                return Err(CompileError::Value {
                    line,
                    message: "@add declares exactly one name".into(),
                });
            }
            let setting = settings.remove(0);
            (setting.key.clone(), Some(setting))
        } else {
            (rules::validate_name(declaration, line)?, None)
        };
        match what {
            "species" => {
                if self.species.contains(&name) {
                    return Err(CompileError::Name {
                        line,
                        name,
                        message: "is already declared".into(),
                    });
                }
                let idx = self.declare_species(&name, line)?;
                if let Some(setting) = setting {
                    self.apply_initial(idx, &setting, line)?;
                }
            }
            "param" | "parameter" => {
                if self.parameters.contains(&name) {
                    return Err(CompileError::Name {
                        line,
                        name,
                        message: "is already declared".into(),
                    });
                }
                let idx = self.declare_parameter(&name, line)?;
                if let Some(setting) = setting {
                    self.apply_parameter(idx, &setting, None, line)?;
                }
            }
            other => {
                return Err(CompileError::Value {
                    line,
                    message: format!("cannot add '{other}'; use species or param"),
                });
            }
        }
        Ok(())
    }

    fn emit(&mut self, line: usize, body: &str, rule: &Rule, settings: &[Setting]) -> Compiled<()> {
        let id = self.reactions.len();
        let number = id + 1;
        let mut species = HashMap::new();
        for name in rule.species() {
            let idx = self.declare_species(name, line)?;
            species.insert(name.to_string(), idx);
        }
        let s = |name: &String| species[name.as_str()];

        let mut generic = HashMap::new();
        for key in rule.param_keys() {
            let idx = self.declare_parameter(&format!("{key}{number}"), line)?;
            generic.insert(key, idx);
        }
        let p = |key: &str| generic[key];
        let kr = || rule.is_reversible().then(|| generic["kr"]);

        let mut stoichiometry = Vec::new();
        let mut modifiers = Vec::new();
        let mut reactants = Vec::new();
        let mut products = Vec::new();
        let mut user_params = Vec::new();
        let rate = match &rule.form {
            RuleForm::Dimerization { monomer, dimer } => {
                let (a, aa) = (s(monomer), s(dimer));
                accumulate(&mut stoichiometry, a, -2.0);
                accumulate(&mut stoichiometry, aa, 1.0);
                reactants.push(a);
                products.push(aa);
                self.formations
                    .push(Formation::new(id, line, a, a, aa, Direction::Association));
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: kr(),
                    forward: vec![a, a],
                    reverse: vec![aa],
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Binding {
                first,
                second,
                complex,
            } => {
                let (a, b, ab) = (s(first), s(second), s(complex));
                accumulate(&mut stoichiometry, a, -1.0);
                accumulate(&mut stoichiometry, b, -1.0);
                accumulate(&mut stoichiometry, ab, 1.0);
                reactants.extend([a, b]);
                products.push(ab);
                self.formations
                    .push(Formation::new(id, line, a, b, ab, Direction::Association));
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: kr(),
                    forward: vec![a, b],
                    reverse: vec![ab],
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Dissociation {
                complex,
                first,
                second,
            } => {
                let (ab, a, b) = (s(complex), s(first), s(second));
                accumulate(&mut stoichiometry, ab, -1.0);
                accumulate(&mut stoichiometry, a, 1.0);
                accumulate(&mut stoichiometry, b, 1.0);
                reactants.push(ab);
                products.extend([a, b]);
                self.formations
                    .push(Formation::new(id, line, a, b, ab, Direction::Dissociation));
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: kr(),
                    forward: vec![ab],
                    reverse: vec![a, b],
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Phosphorylation {
                kinase,
                substrate,
                product,
            } => {
                let (e, sub, prod) = (s(kinase), s(substrate), s(product));
                accumulate(&mut stoichiometry, sub, -1.0);
                accumulate(&mut stoichiometry, prod, 1.0);
                reactants.push(sub);
                products.push(prod);
                modifiers.push(e);
                RateLaw::MichaelisMenten {
                    v: p("V"),
                    k: p("K"),
                    enzyme: Some(e),
                    substrate: sub,
                }
            }
            RuleForm::Autophosphorylation { substrate, product } => {
                let (sub, prod) = (s(substrate), s(product));
                accumulate(&mut stoichiometry, sub, -1.0);
                accumulate(&mut stoichiometry, prod, 1.0);
                reactants.push(sub);
                products.push(prod);
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: kr(),
                    forward: vec![sub],
                    reverse: vec![prod],
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Dephosphorylation {
                phosphatase,
                substrate,
                product,
            } => {
                let (sub, prod) = (s(substrate), s(product));
                let enzyme = phosphatase.as_ref().map(s);
                accumulate(&mut stoichiometry, sub, -1.0);
                accumulate(&mut stoichiometry, prod, 1.0);
                reactants.push(sub);
                products.push(prod);
                modifiers.extend(enzyme);
                RateLaw::MichaelisMenten {
                    v: p("V"),
                    k: p("K"),
                    enzyme,
                    substrate: sub,
                }
            }
            RuleForm::Transcription {
                activators,
                repressor,
                product,
            } => {
                let prod = s(product);
                accumulate(&mut stoichiometry, prod, 1.0);
                products.push(prod);
                let activators: Vec<usize> = activators.iter().map(s).collect();
                modifiers.extend(activators.iter().copied());
                let repressor = repressor.as_ref().map(|r| {
                    modifiers.push(s(r));
                    Repressor {
                        species: s(r),
                        kf: p("KF"),
                        nf: p("nF"),
                    }
                });
                RateLaw::Hill {
                    v: p("V"),
                    k: p("K"),
                    n: p("n"),
                    activators,
                    repressor,
                }
            }
            RuleForm::Translation { template, product } => {
                let (m, prod) = (s(template), s(product));
                accumulate(&mut stoichiometry, prod, 1.0);
                products.push(prod);
                modifiers.push(m);
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: None,
                    forward: vec![m],
                    reverse: Vec::new(),
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Synthesis { catalyst, product } => {
                let prod = s(product);
                accumulate(&mut stoichiometry, prod, 1.0);
                products.push(prod);
                let catalyst: Vec<usize> = catalyst.iter().map(s).collect();
                modifiers.extend(catalyst.iter().copied());
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: None,
                    forward: catalyst,
                    reverse: Vec::new(),
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Degradation {
                catalyst,
                substrate,
            } => {
                let sub = s(substrate);
                accumulate(&mut stoichiometry, sub, -1.0);
                reactants.push(sub);
                let mut forward: Vec<usize> = catalyst.iter().map(s).collect();
                modifiers.extend(forward.iter().copied());
                forward.push(sub);
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: None,
                    forward,
                    reverse: Vec::new(),
                    reverse_scale: 1.0,
                }
            }
            RuleForm::Translocation {
                species: from,
                product,
                volumes: (v1, v2),
            } => {
                let (a, an) = (s(from), s(product));
                accumulate(&mut stoichiometry, a, -1.0);
                accumulate(&mut stoichiometry, an, v1 / v2);
                reactants.push(a);
                products.push(an);
                RateLaw::MassAction {
                    kf: p("kf"),
                    kr: kr(),
                    forward: vec![a],
                    reverse: vec![an],
                    reverse_scale: v2 / v1,
                }
            }
            RuleForm::UserDefined {
                reactants: lhs,
                products: rhs,
                rate,
            } => {
                for (name, coefficient) in lhs {
                    accumulate(&mut stoichiometry, s(name), -coefficient);
                    reactants.push(s(name));
                }
                for (name, coefficient) in rhs {
                    accumulate(&mut stoichiometry, s(name), *coefficient);
                    products.push(s(name));
                }
                let before = self.parameters.len();
                let expr = CompiledExpr::compile(
                    rate,
                    line,
                    &self.species,
                    &mut self.parameters,
                    Scope {
                        allow_initials: false,
                        declare_parameters: true,
                    },
                )?;
                if self.parameters.len() > before {
                    self.sync_parameters();
                }
                user_params = expr.parameters().to_vec();
                modifiers.extend(
                    expr.species()
                        .iter()
                        .copied()
                        .filter(|sp| !reactants.contains(sp) && !products.contains(sp)),
                );
                RateLaw::Expression(expr)
            }
        };

        for setting in settings {
            let generic_idx = generic.get(setting.key.as_str()).copied();
            let user_idx = self
                .parameters
                .index_of(&setting.key)
                .filter(|idx| user_params.contains(idx));
            let species_idx = species.get(&setting.key).copied();
            match (generic_idx.or(user_idx), species_idx) {
                (Some(idx), _) if !setting.fixed => {
                    let reference = generic_idx.map(|_| setting.key.as_str());
                    self.apply_parameter(idx, setting, reference, line)?;
                }
                (_, Some(idx)) => self.apply_initial(idx, setting, line)?,
                _ => {
                    let mut expected: Vec<String> = rule.param_keys().iter().map(|k| k.to_string()).collect();
                    expected.extend(user_params.iter().map(|&i| self.parameters[i].to_string()));
                    return Err(CompileError::Value {
                        line,
                        message: format!(
                            "'{}' is neither a parameter of this rule ({}) nor a species in the reaction",
                            setting.key,
                            expected.join(", ")
                        ),
                    });
                }
            }
        }

        self.reactions.push(Reaction {
            id,
            line,
            kind: rule.kind(),
            text: body.to_string(),
            reactants,
            products,
            modifiers,
            stoichiometry,
            rate,
        });
        Ok(())
    }

    /// `generic_key` is set for generated parameters so that `@N`
    /// references can be resolved to `{key}{N}`.
    fn apply_parameter(
        &mut self,
        idx: usize,
        setting: &Setting,
        generic_key: Option<&str>,
        line: usize,
    ) -> Compiled<()> {
        match setting.value {
            ParamValue::Number(value) => self.x[idx] = value,
            ParamValue::SameAs(number) => {
                let key = generic_key.ok_or_else(|| CompileError::Value {
                    line,
                    message: format!("'{}' cannot reference another reaction", setting.key),
                })?;
                let target = format!("{key}{number}");
                let source = self
                    .parameters
                    .index_of(&target)
                    .filter(|&src| src != idx)
                    .ok_or_else(|| CompileError::Name {
                        line,
                        name: target.clone(),
                        message: format!("is not defined by reaction {number}"),
                    })?;
                self.x[idx] = self.x[source];
                self.constraints.push((idx, source));
            }
        }
        if setting.constant {
            self.constant[idx] = true;
        }
        if let Some(bounds) = setting.bounds {
            self.param_bounds[idx] = Some(bounds);
        }
        Ok(())
    }

    fn apply_initial(&mut self, idx: usize, setting: &Setting, line: usize) -> Compiled<()> {
        let ParamValue::Number(value) = setting.value else {
            return Err(CompileError::Value {
                line,
                message: format!("initial value of '{}' must be a number", setting.key),
            });
        };
        if setting.constant {
            return Err(CompileError::Value {
                line,
                message: format!("'const' applies to parameters, not to species '{}'", setting.key),
            });
        }
        self.y0[idx] = value;
        if setting.fixed {
            self.fixed[idx] = true;
        }
        if let Some(bounds) = setting.bounds {
            self.initial_bounds[idx] = Some(bounds);
        }
        Ok(())
    }

    /// `@obs` and `@sim`.
    fn directive(&mut self, line: usize, content: &str) -> Compiled<()> {
        let head = first_word(content);
        let rest = content[head.len()..].trim();
        if head == "@obs" {
            let (name, expr) = rest.split_once(':').ok_or_else(|| CompileError::Value {
                line,
                message: "expected '@obs NAME: expression'".into(),
            })?;
            let name = rules::validate_name(name, line)?;
            if self.observables.iter().any(|o| o.name == name) {
                return Err(CompileError::Value {
                    line,
                    message: format!("observable '{name}' is already defined"),
                });
            }
            let expr = CompiledExpr::compile(
                expr,
                line,
                &self.species,
                &mut self.parameters,
                Scope {
                    allow_initials: false,
                    declare_parameters: false,
                },
            )?;
            self.observables.push(Observable { name, expr });
            return Ok(());
        }
        let (head, value) = rest.split_once(':').ok_or_else(|| CompileError::Value {
            line,
            message: "expected '@sim key: value'".into(),
        })?;
        let mut head_words = head.split_whitespace();
        match head_words.next() {
            Some("tspan") => {
                if self.tspan.is_some() {
                    return Err(CompileError::Value {
                        line,
                        message: "tspan is declared twice".into(),
                    });
                }
                self.tspan = Some(parse_tspan(value, line)?);
            }
            Some("unperturbed") => {
                if let Some((first, _)) = &self.unperturbed {
                    return Err(CompileError::Duplicate {
                        lines: vec![*first, line],
                        message: "the unperturbed prelude is declared twice".into(),
                    });
                }
                let statements =
                    Assignment::parse_statements(value, line, &self.species, &self.parameters)?;
                self.unperturbed = Some((line, statements));
            }
            Some("condition") => {
                let name = head_words.next().ok_or_else(|| CompileError::Value {
                    line,
                    message: "condition needs a name".into(),
                })?;
                let name = rules::validate_name(name, line)?;
                if self.conditions.iter().any(|c| c.name == name) {
                    return Err(CompileError::Value {
                        line,
                        message: format!("condition '{name}' is already defined"),
                    });
                }
                let statements =
                    Assignment::parse_statements(value, line, &self.species, &self.parameters)?;
                self.conditions.push(Condition { name, statements });
            }
            other => {
                return Err(CompileError::Detection {
                    line,
                    text: content.to_string(),
                    suggestion: other
                        .and_then(|word| similarity::suggest(word, SIM_KEYS, self.threshold))
                        .map(str::to_string),
                });
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Compiled<CompiledModel> {
        let checker = ThermoChecker::new(&self.formations);
        checker.check_duplicates()?;
        let restrictions = checker.restrictions();
        for cycle in &restrictions {
            tracing::debug!(?cycle, "thermodynamic restriction");
        }

        if self.observables.is_empty() {
            for (_, name) in self.species.iter() {
                let expr = CompiledExpr::compile(
                    &format!("u[{name}]"),
                    0,
                    &self.species,
                    &mut self.parameters,
                    Scope {
                        allow_initials: false,
                        declare_parameters: false,
                    },
                )?;
                self.observables.push(Observable {
                    name: name.to_string(),
                    expr,
                });
            }
        }
        if self.conditions.is_empty() {
            self.conditions.push(Condition {
                name: "control".into(),
                statements: Vec::new(),
            });
        }
        for (dependent, source) in self.constraints.clone() {
            self.x[dependent] = self.x[source];
        }
        let network = ReactionNetwork::new(self.species.len(), self.reactions, self.fixed);
        Ok(CompiledModel {
            parameters: self.parameters,
            species: self.species,
            network,
            x: self.x,
            y0: self.y0,
            constant: self.constant,
            constraints: self.constraints,
            param_bounds: self.param_bounds,
            initial_bounds: self.initial_bounds,
            observables: self.observables,
            tspan: self.tspan.unwrap_or_default(),
            conditions: self.conditions,
            unperturbed: self.unperturbed.map(|(_, statements)| statements),
            formations: self.formations,
            restrictions,
        })
    }
}

fn parse_tspan(value: &str, line: usize) -> Compiled<TimeSpan> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| CompileError::Value {
            line,
            message: format!("tspan must look like [t0, tf], found '{}'", value.trim()),
        })?;
    let values = inner
        .split(',')
        .map(|v| rules::parse_number(v, line))
        .collect::<Compiled<Vec<_>>>()?;
    let span = match values.as_slice() {
        [t0, tf] => TimeSpan {
            t0: *t0,
            tf: *tf,
            dt: 1.0,
        },
        [t0, tf, dt] => TimeSpan {
            t0: *t0,
            tf: *tf,
            dt: *dt,
        },
        _ => {
            return Err(CompileError::Value {
                line,
                message: "tspan takes two or three values".into(),
            });
        }
    };
    if span.tf <= span.t0 || span.dt <= 0.0 {
        return Err(CompileError::Value {
            line,
            message: format!("invalid tspan [{}, {}] with step {}", span.t0, span.tf, span.dt),
        });
    }
    Ok(span)
}
