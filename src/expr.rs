//! Restricted expression language shared by user-defined rate laws,
//! observables, simulation statements and parameter constraints.
//!
//! Source text refers to model quantities through placeholders:
//! `u[name]` (species value), `p[name]` (parameter), `init[name]`
//! (initial value, only inside `@sim` statements) and the bare variable
//! `t`. Placeholders are resolved to indices once and rewritten into plain
//! identifiers (`u_3`, `p_0`, ...) that `meval` evaluates through
//! [`ValueContext`].

use std::fmt;
use std::str::FromStr;

use meval::{Context, ContextProvider, Expr};

use crate::error::CompileError;
use crate::names::NameTable;

thread_local! {
    static BUILTINS: Context<'static> = Context::new();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderKind {
    Species,
    Parameter,
    Initial,
}

impl PlaceholderKind {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "u" => Some(Self::Species),
            "p" => Some(Self::Parameter),
            "init" => Some(Self::Initial),
            _ => None,
        }
    }

    fn ident_prefix(self) -> &'static str {
        match self {
            Self::Species => "u_",
            Self::Parameter => "p_",
            Self::Initial => "init_",
        }
    }
}

/// Which placeholders an expression may use and how unknown names are handled.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scope {
    pub allow_initials: bool,
    /// Unknown `p[...]` names are registered as new parameters (`@rxn`).
    pub declare_parameters: bool,
}

/// An expression whose placeholders have been resolved to indices.
#[derive(Clone, Debug)]
pub struct CompiledExpr {
    source: String,
    expr: Expr,
    species: Vec<usize>,
    parameters: Vec<usize>,
    initials: Vec<usize>,
}

impl CompiledExpr {
    pub(crate) fn compile(
        source: &str,
        line: usize,
        species: &NameTable,
        parameters: &mut NameTable,
        scope: Scope,
    ) -> Result<Self, CompileError> {
        let mut rewritten = String::with_capacity(source.len());
        let mut used_species = Vec::new();
        let mut used_params = Vec::new();
        let mut used_initials = Vec::new();
        let mut rest = source;
        while let Some((before, kind, name, after)) = next_placeholder(rest) {
            rewritten.push_str(before);
            let name = name.trim();
            let idx = match kind {
                PlaceholderKind::Species | PlaceholderKind::Initial => {
                    if kind == PlaceholderKind::Initial && !scope.allow_initials {
                        return Err(CompileError::Name {
                            line,
                            name: format!("init[{name}]"),
                            message: "is only allowed in @sim statements".into(),
                        });
                    }
                    species.index_of(name).ok_or_else(|| CompileError::Name {
                        line,
                        name: name.to_string(),
                        message: "is not a declared species".into(),
                    })?
                }
                PlaceholderKind::Parameter => match parameters.index_of(name) {
                    Some(idx) => idx,
                    None if scope.declare_parameters => {
                        if species.contains(name) {
                            return Err(CompileError::Name {
                                line,
                                name: name.to_string(),
                                message: "is already used as a species name".into(),
                            });
                        }
                        parameters.insert(name).map_err(|err| CompileError::Value {
                            line,
                            message: err.to_string(),
                        })?
                    }
                    None => {
                        return Err(CompileError::Name {
                            line,
                            name: name.to_string(),
                            message: "is not a declared parameter".into(),
                        });
                    }
                },
            };
            let bucket = match kind {
                PlaceholderKind::Species => &mut used_species,
                PlaceholderKind::Parameter => &mut used_params,
                PlaceholderKind::Initial => &mut used_initials,
            };
            if !bucket.contains(&idx) {
                bucket.push(idx);
            }
            rewritten.push_str(kind.ident_prefix());
            rewritten.push_str(&idx.to_string());
            rest = after;
        }
        rewritten.push_str(rest);

        let expr = Expr::from_str(&rewritten).map_err(|err| CompileError::Value {
            line,
            message: format!("cannot parse expression '{source}': {err}"),
        })?;
        let compiled = Self {
            source: source.trim().to_string(),
            expr,
            species: used_species,
            parameters: used_params,
            initials: used_initials,
        };
        compiled.check_identifiers(line)?;
        Ok(compiled)
    }

    /// Evaluates once with unit values so that bare identifiers which are
    /// neither placeholders nor builtins are reported at compile time.
    fn check_identifiers(&self, line: usize) -> Result<(), CompileError> {
        let probe = ProbeContext;
        let result = BUILTINS.with(|builtins| self.expr.eval_with_context((probe, builtins)));
        match result {
            Err(meval::Error::UnknownVariable(name)) => Err(CompileError::Name {
                line,
                name,
                message: "is not a placeholder; use u[...] or p[...]".into(),
            }),
            Err(meval::Error::Function(name, err)) => Err(CompileError::Value {
                line,
                message: format!("function '{name}': {err}"),
            }),
            _ => Ok(()),
        }
    }

    pub fn eval(&self, values: &ValueContext<'_>) -> f64 {
        BUILTINS
            .with(|builtins| self.expr.eval_with_context((values, builtins)))
            .unwrap_or(f64::NAN)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn species(&self) -> &[usize] {
        &self.species
    }

    pub fn parameters(&self) -> &[usize] {
        &self.parameters
    }

    pub fn initials(&self) -> &[usize] {
        &self.initials
    }
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Splits `text` at the first `u[..]`, `p[..]` or `init[..]` placeholder.
fn next_placeholder(text: &str) -> Option<(&str, PlaceholderKind, &str, &str)> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'[' {
            let mut start = idx;
            while start > 0 && bytes[start - 1].is_ascii_alphabetic() {
                start -= 1;
            }
            let boundary = start == 0 || !is_ident_byte(bytes[start - 1]);
            if let (true, Some(kind)) = (boundary, PlaceholderKind::from_prefix(&text[start..idx])) {
                if let Some(close) = text[idx + 1..].find(']') {
                    let name = &text[idx + 1..idx + 1 + close];
                    return Some((&text[..start], kind, name, &text[idx + 2 + close..]));
                }
            }
        }
        idx += 1;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn parse_placeholder_ident(name: &str) -> Option<(PlaceholderKind, usize)> {
    let (kind, digits) = if let Some(d) = name.strip_prefix("init_") {
        (PlaceholderKind::Initial, d)
    } else if let Some(d) = name.strip_prefix("u_") {
        (PlaceholderKind::Species, d)
    } else if let Some(d) = name.strip_prefix("p_") {
        (PlaceholderKind::Parameter, d)
    } else {
        return None;
    };
    digits.parse::<usize>().ok().map(|idx| (kind, idx))
}

/// Values visible to an expression during evaluation.
pub struct ValueContext<'a> {
    pub t: f64,
    pub y: &'a [f64],
    pub x: &'a [f64],
    pub y0: &'a [f64],
}

impl<'a> ValueContext<'a> {
    pub fn new(t: f64, y: &'a [f64], x: &'a [f64]) -> Self {
        Self { t, y, x, y0: y }
    }
}

impl ContextProvider for ValueContext<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        if name == "t" {
            return Some(self.t);
        }
        let (kind, idx) = parse_placeholder_ident(name)?;
        match kind {
            PlaceholderKind::Species => self.y.get(idx).copied(),
            PlaceholderKind::Parameter => self.x.get(idx).copied(),
            PlaceholderKind::Initial => self.y0.get(idx).copied(),
        }
    }
}

struct ProbeContext;

impl ContextProvider for ProbeContext {
    fn get_var(&self, name: &str) -> Option<f64> {
        if name == "t" {
            return Some(1.0);
        }
        parse_placeholder_ident(name).map(|_| 1.0)
    }
}

/// Target of a `@sim` assignment statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Parameter(usize),
    Initial(usize),
}

/// `p[name] = expr` or `init[name] = expr`.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub target: Target,
    pub value: CompiledExpr,
}

impl Assignment {
    pub(crate) fn parse_statements(
        text: &str,
        line: usize,
        species: &NameTable,
        parameters: &NameTable,
    ) -> Result<Vec<Self>, CompileError> {
        let mut out = Vec::new();
        for stmt in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (lhs, rhs) = stmt.split_once('=').ok_or_else(|| CompileError::Value {
                line,
                message: format!("statement '{stmt}' is not an assignment"),
            })?;
            let target = match next_placeholder(lhs.trim()) {
                Some(("", PlaceholderKind::Parameter, name, "")) => {
                    let name = name.trim();
                    Target::Parameter(parameters.index_of(name).ok_or_else(|| {
                        CompileError::Name {
                            line,
                            name: name.to_string(),
                            message: "is not a declared parameter".into(),
                        }
                    })?)
                }
                Some(("", PlaceholderKind::Initial | PlaceholderKind::Species, name, "")) => {
                    let name = name.trim();
                    Target::Initial(species.index_of(name).ok_or_else(|| CompileError::Name {
                        line,
                        name: name.to_string(),
                        message: "is not a declared species".into(),
                    })?)
                }
                _ => {
                    return Err(CompileError::Value {
                        line,
                        message: format!(
                            "left-hand side '{}' must be p[name] or init[name]",
                            lhs.trim()
                        ),
                    });
                }
            };
            let mut params = parameters.clone();
            let value = CompiledExpr::compile(
                rhs,
                line,
                species,
                &mut params,
                Scope {
                    allow_initials: true,
                    declare_parameters: false,
                },
            )?;
            out.push(Self { target, value });
        }
        Ok(out)
    }

    /// Applies the statements in order; later statements see earlier writes.
    pub fn apply_all(statements: &[Self], x: &mut [f64], y0: &mut [f64]) {
        for stmt in statements {
            let value = {
                let ctx = ValueContext {
                    t: 0.0,
                    y: &*y0,
                    x: &*x,
                    y0: &*y0,
                };
                stmt.value.eval(&ctx)
            };
            match stmt.target {
                Target::Parameter(idx) => x[idx] = value,
                Target::Initial(idx) => y0[idx] = value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> (NameTable, NameTable) {
        (
            NameTable::from_names(["A", "B", "AB"]).unwrap(),
            NameTable::from_names(["kf1", "kr1"]).unwrap(),
        )
    }

    const RATE: Scope = Scope {
        allow_initials: false,
        declare_parameters: true,
    };
    const OBSERVABLE: Scope = Scope {
        allow_initials: false,
        declare_parameters: false,
    };

    #[test]
    fn placeholders_resolve_to_indices() {
        let (species, mut params) = tables();
        let expr =
            CompiledExpr::compile("p[kf1] * u[A] * u[B] - p[kr1] * u[AB]", 1, &species, &mut params, RATE)
                .unwrap();
        assert_eq!(expr.species(), &[0, 1, 2]);
        assert_eq!(expr.parameters(), &[0, 1]);
        let y = [2.0, 3.0, 1.0];
        let x = [0.5, 4.0];
        let value = expr.eval(&ValueContext::new(0.0, &y, &x));
        assert!((value - (0.5 * 6.0 - 4.0)).abs() < 1e-12);
    }

    #[test]
    fn rate_expressions_declare_new_parameters() {
        let (species, mut params) = tables();
        let expr = CompiledExpr::compile("p[Vmax] * u[A] / (p[Km] + u[A])", 3, &species, &mut params, RATE)
            .unwrap();
        assert_eq!(params.index_of("Vmax"), Some(2));
        assert_eq!(params.index_of("Km"), Some(3));
        assert_eq!(expr.parameters(), &[2, 3]);
    }

    #[test]
    fn observables_reject_unknown_names() {
        let (species, mut params) = tables();
        let err = CompiledExpr::compile("u[C]", 7, &species, &mut params, OBSERVABLE).unwrap_err();
        assert!(matches!(err, CompileError::Name { line: 7, ref name, .. } if name == "C"));
        let err = CompiledExpr::compile("p[k9]", 7, &species, &mut params, OBSERVABLE).unwrap_err();
        assert!(matches!(err, CompileError::Name { .. }));
    }

    #[test]
    fn bare_identifiers_are_name_errors() {
        let (species, mut params) = tables();
        let err = CompiledExpr::compile("kf1 * u[A]", 2, &species, &mut params, OBSERVABLE).unwrap_err();
        assert!(matches!(err, CompileError::Name { ref name, .. } if name == "kf1"));
    }

    #[test]
    fn builtins_and_time_are_available() {
        let (species, mut params) = tables();
        let expr = CompiledExpr::compile("exp(-t) * max(u[A], 1)", 1, &species, &mut params, OBSERVABLE)
            .unwrap();
        let y = [0.5, 0.0, 0.0];
        let value = expr.eval(&ValueContext::new(0.0, &y, &[1.0, 1.0]));
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn placeholder_scan_ignores_longer_identifiers() {
        assert!(next_placeholder("cup[A]").is_none());
        let (before, kind, name, after) = next_placeholder("2*init[A]+1").unwrap();
        assert_eq!(before, "2*");
        assert_eq!(kind, PlaceholderKind::Initial);
        assert_eq!(name, "A");
        assert_eq!(after, "+1");
    }

    #[test]
    fn statements_update_parameters_and_initials() {
        let (species, params) = tables();
        let stmts =
            Assignment::parse_statements("init[A] = 10; p[kf1] = 2 * init[A]", 5, &species, &params)
                .unwrap();
        let mut x = vec![1.0, 1.0];
        let mut y0 = vec![0.0, 0.0, 0.0];
        Assignment::apply_all(&stmts, &mut x, &mut y0);
        assert_eq!(y0[0], 10.0);
        assert_eq!(x[0], 20.0);
    }

    #[test]
    fn statements_require_assignment_targets() {
        let (species, params) = tables();
        assert!(Assignment::parse_statements("u[A] + 1", 1, &species, &params).is_err());
        assert!(Assignment::parse_statements("q[A] = 1", 1, &species, &params).is_err());
        assert!(Assignment::parse_statements("p[nope] = 1", 1, &species, &params).is_err());
    }
}
