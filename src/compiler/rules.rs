//! Detection of reaction rules written in stylized English and parsing of
//! the `| key=value, ...` suffix.

use crate::error::CompileError;
use crate::reaction::RuleKind;

use super::similarity;

pub const FORWARD_ARROWS: &[&str] = &["-->", "→", "⟶", "⇒", "↣", "↦"];
pub const REVERSIBLE_ARROWS: &[&str] = &["<-->", "↔", "⟷", "⇄", "⇆", "⇌", "⇔"];

/// Registered rule phrases, also used for similarity suggestions.
pub const RULE_TOKENS: &[&str] = &[
    "dimerizes",
    "is dimerized",
    "binds",
    "forms a complex with",
    "dissociates to",
    "dissociates into",
    "phosphorylates",
    "is phosphorylated",
    "dephosphorylates",
    "is dephosphorylated",
    "transcribes",
    "transcribe",
    "is translated into",
    "synthesizes",
    "is synthesized",
    "degrades",
    "is degraded",
    "translocates from",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arrow {
    Absent,
    Forward,
    Reversible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrowPolicy {
    Either,
    ForwardOnly,
    NoArrow,
}

/// Splits `text` around the first arrow token. Reversible tokens are
/// looked up first since `<-->` contains `-->`.
pub fn split_arrow(text: &str) -> (&str, Arrow, &str) {
    for (tokens, arrow) in [
        (REVERSIBLE_ARROWS, Arrow::Reversible),
        (FORWARD_ARROWS, Arrow::Forward),
    ] {
        let hit = tokens
            .iter()
            .filter_map(|tok| text.find(tok).map(|pos| (pos, tok.len())))
            .min_by_key(|(pos, _)| *pos);
        if let Some((pos, len)) = hit {
            return (&text[..pos], arrow, &text[pos + len..]);
        }
    }
    (text, Arrow::Absent, "")
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleForm {
    Dimerization {
        monomer: String,
        dimer: String,
    },
    Binding {
        first: String,
        second: String,
        complex: String,
    },
    Dissociation {
        complex: String,
        first: String,
        second: String,
    },
    Phosphorylation {
        kinase: String,
        substrate: String,
        product: String,
    },
    Autophosphorylation {
        substrate: String,
        product: String,
    },
    Dephosphorylation {
        phosphatase: Option<String>,
        substrate: String,
        product: String,
    },
    Transcription {
        activators: Vec<String>,
        repressor: Option<String>,
        product: String,
    },
    Translation {
        template: String,
        product: String,
    },
    Synthesis {
        catalyst: Option<String>,
        product: String,
    },
    Degradation {
        catalyst: Option<String>,
        substrate: String,
    },
    Translocation {
        species: String,
        product: String,
        volumes: (f64, f64),
    },
    UserDefined {
        reactants: Vec<(String, f64)>,
        products: Vec<(String, f64)>,
        rate: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub form: RuleForm,
    pub arrow: Arrow,
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match &self.form {
            RuleForm::Dimerization { .. } => RuleKind::Dimerization,
            RuleForm::Binding { .. } => RuleKind::Binding,
            RuleForm::Dissociation { .. } => RuleKind::Dissociation,
            RuleForm::Phosphorylation { .. } => RuleKind::Phosphorylation,
            RuleForm::Autophosphorylation { .. } => RuleKind::Autophosphorylation,
            RuleForm::Dephosphorylation { .. } => RuleKind::Dephosphorylation,
            RuleForm::Transcription { .. } => RuleKind::Transcription,
            RuleForm::Translation { .. } | RuleForm::Synthesis { .. } => RuleKind::Synthesis,
            RuleForm::Degradation { .. } => RuleKind::Degradation,
            RuleForm::Translocation { .. } => RuleKind::Translocation,
            RuleForm::UserDefined { .. } => RuleKind::UserDefined,
        }
    }

    /// Whether the rule carries a reverse rate constant.
    pub fn is_reversible(&self) -> bool {
        match self.form {
            RuleForm::Dissociation { .. } => true,
            _ => self.arrow == Arrow::Reversible,
        }
    }

    /// Generic parameter keys; the compiler appends the reaction number.
    pub fn param_keys(&self) -> Vec<&'static str> {
        match &self.form {
            RuleForm::Phosphorylation { .. } | RuleForm::Dephosphorylation { .. } => vec!["V", "K"],
            RuleForm::Transcription { repressor, .. } => {
                let mut keys = vec!["V", "K", "n"];
                if repressor.is_some() {
                    keys.extend(["KF", "nF"]);
                }
                keys
            }
            RuleForm::UserDefined { .. } => Vec::new(),
            _ if self.is_reversible() => vec!["kf", "kr"],
            _ => vec!["kf"],
        }
    }

    /// Species named by the rule, in order of appearance.
    pub fn species(&self) -> Vec<&str> {
        let names: Vec<&str> = match &self.form {
            RuleForm::Dimerization { monomer, dimer } => vec![monomer.as_str(), dimer.as_str()],
            RuleForm::Binding {
                first,
                second,
                complex,
            } => vec![first.as_str(), second.as_str(), complex.as_str()],
            RuleForm::Dissociation {
                complex,
                first,
                second,
            } => vec![complex.as_str(), first.as_str(), second.as_str()],
            RuleForm::Phosphorylation {
                kinase,
                substrate,
                product,
            } => vec![kinase.as_str(), substrate.as_str(), product.as_str()],
            RuleForm::Autophosphorylation { substrate, product } => {
                vec![substrate.as_str(), product.as_str()]
            }
            RuleForm::Dephosphorylation {
                phosphatase,
                substrate,
                product,
            } => phosphatase
                .iter()
                .map(String::as_str)
                .chain([substrate.as_str(), product.as_str()])
                .collect(),
            RuleForm::Transcription {
                activators,
                repressor,
                product,
            } => activators
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(product.as_str()))
                .chain(repressor.iter().map(String::as_str))
                .collect(),
            RuleForm::Translation { template, product } => vec![template.as_str(), product.as_str()],
            RuleForm::Synthesis { catalyst, product } => catalyst
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(product.as_str()))
                .collect(),
            RuleForm::Degradation {
                catalyst,
                substrate,
            } => catalyst
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(substrate.as_str()))
                .collect(),
            RuleForm::Translocation {
                species, product, ..
            } => vec![species.as_str(), product.as_str()],
            RuleForm::UserDefined {
                reactants,
                products,
                ..
            } => reactants
                .iter()
                .chain(products)
                .map(|(name, _)| name.as_str())
                .collect(),
        };
        let mut unique = Vec::with_capacity(names.len());
        for name in names {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        unique
    }
}

/// Detects the rule written on one line (suffix already removed).
pub fn parse_rule(body: &str, line: usize, threshold: f64) -> Result<Rule, CompileError> {
    let (lhs, arrow, rhs) = split_arrow(body);
    let words: Vec<&str> = lhs.split_whitespace().collect();
    let Some((phrase, before, after)) = find_phrase(&words) else {
        return Err(CompileError::Detection {
            line,
            text: body.trim().to_string(),
            suggestion: similarity::suggest(body, RULE_TOKENS, threshold).map(str::to_string),
        });
    };
    let rhs = rhs.trim();
    let single = |items: &[&str], role: &str| -> Result<String, CompileError> {
        match items {
            [name] => validate_name(name, line),
            _ => Err(CompileError::Value {
                line,
                message: format!("expected one species {role} '{phrase}', found '{}'", items.join(" ")),
            }),
        }
    };
    let nothing = |items: &[&str]| -> Result<(), CompileError> {
        if items.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Value {
                line,
                message: format!("unexpected '{}' after '{phrase}'", items.join(" ")),
            })
        }
    };
    let product = || -> Result<String, CompileError> {
        let names: Vec<&str> = rhs.split_whitespace().collect();
        match names.as_slice() {
            [name] => validate_name(name, line),
            _ => Err(CompileError::Value {
                line,
                message: format!("'{phrase}' needs exactly one product after the arrow"),
            }),
        }
    };

    let form = match phrase {
        "dimerizes" | "is dimerized" => {
            check_arrow(arrow, ArrowPolicy::Either, phrase, line)?;
            nothing(after)?;
            RuleForm::Dimerization {
                monomer: single(before, "before")?,
                dimer: product()?,
            }
        }
        "binds" | "forms a complex with" => {
            check_arrow(arrow, ArrowPolicy::Either, phrase, line)?;
            RuleForm::Binding {
                first: single(before, "before")?,
                second: single(after, "after")?,
                complex: product()?,
            }
        }
        "dissociates to" | "dissociates into" => {
            check_arrow(arrow, ArrowPolicy::NoArrow, phrase, line)?;
            let (first, second) = split_pair(after, line, phrase)?;
            RuleForm::Dissociation {
                complex: single(before, "before")?,
                first,
                second,
            }
        }
        "phosphorylates" => {
            check_arrow(arrow, ArrowPolicy::ForwardOnly, phrase, line)?;
            RuleForm::Phosphorylation {
                kinase: single(before, "before")?,
                substrate: single(after, "after")?,
                product: product()?,
            }
        }
        "is phosphorylated" => {
            check_arrow(arrow, ArrowPolicy::Either, phrase, line)?;
            nothing(after)?;
            RuleForm::Autophosphorylation {
                substrate: single(before, "before")?,
                product: product()?,
            }
        }
        "dephosphorylates" => {
            check_arrow(arrow, ArrowPolicy::ForwardOnly, phrase, line)?;
            RuleForm::Dephosphorylation {
                phosphatase: Some(single(before, "before")?),
                substrate: single(after, "after")?,
                product: product()?,
            }
        }
        "is dephosphorylated" => {
            check_arrow(arrow, ArrowPolicy::ForwardOnly, phrase, line)?;
            nothing(after)?;
            RuleForm::Dephosphorylation {
                phosphatase: None,
                substrate: single(before, "before")?,
                product: product()?,
            }
        }
        "transcribes" | "transcribe" => {
            check_arrow(arrow, ArrowPolicy::NoArrow, phrase, line)?;
            let activators = before
                .iter()
                .flat_map(|w| w.split('&'))
                .map(str::trim)
                .filter(|w| !w.is_empty() && *w != "and")
                .map(|w| validate_name(w, line))
                .collect::<Result<Vec<_>, _>>()?;
            if activators.is_empty() {
                return Err(CompileError::Value {
                    line,
                    message: format!("'{phrase}' needs at least one activator"),
                });
            }
            let tail = after.join(" ");
            let (product, repressor) = match tail.split_once("repressed by") {
                Some((product, repressor)) => (product, Some(repressor)),
                None => (tail.as_str(), None),
            };
            let product = product.trim().trim_end_matches(',').trim();
            RuleForm::Transcription {
                activators,
                product: validate_name(product, line)?,
                repressor: repressor.map(|r| validate_name(r.trim(), line)).transpose()?,
            }
        }
        "is translated into" => {
            check_arrow(arrow, ArrowPolicy::NoArrow, phrase, line)?;
            RuleForm::Translation {
                template: single(before, "before")?,
                product: single(after, "after")?,
            }
        }
        "synthesizes" | "is synthesized" => {
            check_arrow(arrow, ArrowPolicy::NoArrow, phrase, line)?;
            if phrase == "synthesizes" {
                RuleForm::Synthesis {
                    catalyst: Some(single(before, "before")?),
                    product: single(after, "after")?,
                }
            } else {
                nothing(after)?;
                RuleForm::Synthesis {
                    catalyst: None,
                    product: single(before, "before")?,
                }
            }
        }
        "degrades" | "is degraded" => {
            check_arrow(arrow, ArrowPolicy::NoArrow, phrase, line)?;
            if phrase == "degrades" {
                RuleForm::Degradation {
                    catalyst: Some(single(before, "before")?),
                    substrate: single(after, "after")?,
                }
            } else {
                nothing(after)?;
                RuleForm::Degradation {
                    catalyst: None,
                    substrate: single(before, "before")?,
                }
            }
        }
        "translocates from" => {
            check_arrow(arrow, ArrowPolicy::Either, phrase, line)?;
            RuleForm::Translocation {
                species: single(before, "before")?,
                volumes: parse_compartments(&after.join(" "), line)?,
                product: product()?,
            }
        }
        other => {
            return Err(CompileError::Detection {
                line,
                text: other.to_string(),
                suggestion: None,
            });
        }
    };
    Ok(Rule { form, arrow })
}

/// Parses the body of an `@rxn` line: `lhs <arrow> rhs: rate`.
pub fn parse_user_defined(body: &str, line: usize) -> Result<Rule, CompileError> {
    let (equation, rate) = body.split_once(':').ok_or_else(|| CompileError::Value {
        line,
        message: "@rxn needs a rate after ':'".into(),
    })?;
    let (lhs, arrow, rhs) = split_arrow(equation);
    check_arrow(arrow, ArrowPolicy::Either, "@rxn", line)?;
    let rate = rate.trim();
    if rate.is_empty() {
        return Err(CompileError::Value {
            line,
            message: "@rxn rate expression is empty".into(),
        });
    }
    Ok(Rule {
        form: RuleForm::UserDefined {
            reactants: parse_side(lhs, line)?,
            products: parse_side(rhs, line)?,
            rate: rate.to_string(),
        },
        arrow,
    })
}

fn parse_side(side: &str, line: usize) -> Result<Vec<(String, f64)>, CompileError> {
    let side = side.trim();
    if side.is_empty() || side == "∅" {
        return Ok(Vec::new());
    }
    let mut out: Vec<(String, f64)> = Vec::new();
    for term in side.split('+').map(str::trim) {
        let (coefficient, name) = match term.split_once(|c: char| c == '*' || c.is_whitespace()) {
            Some((coefficient, name)) => {
                let value: u32 = coefficient.trim().parse().map_err(|_| CompileError::Value {
                    line,
                    message: format!("invalid stoichiometric coefficient in '{term}'"),
                })?;
                if value == 0 {
                    return Err(CompileError::Value {
                        line,
                        message: format!("zero stoichiometric coefficient in '{term}'"),
                    });
                }
                (f64::from(value), name.trim())
            }
            None => (1.0, term),
        };
        let name = validate_name(name, line)?;
        match out.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 += coefficient,
            None => out.push((name, coefficient)),
        }
    }
    Ok(out)
}

fn check_arrow(
    arrow: Arrow,
    policy: ArrowPolicy,
    phrase: &str,
    line: usize,
) -> Result<(), CompileError> {
    let all = || -> Vec<String> {
        FORWARD_ARROWS
            .iter()
            .chain(REVERSIBLE_ARROWS)
            .map(|s| s.to_string())
            .collect()
    };
    let forward = || -> Vec<String> { FORWARD_ARROWS.iter().map(|s| s.to_string()).collect() };
    let error = |message: String, allowed: Vec<String>| -> Result<(), CompileError> {
        Err(CompileError::Arrow {
            line,
            message,
            allowed,
        })
    };
    match (policy, arrow) {
        (ArrowPolicy::Either, Arrow::Absent) => error(format!("'{phrase}' requires an arrow"), all()),
        (ArrowPolicy::ForwardOnly, Arrow::Absent) => {
            error(format!("'{phrase}' requires a unidirectional arrow"), forward())
        }
        (ArrowPolicy::ForwardOnly, Arrow::Reversible) => {
            error(format!("'{phrase}' is irreversible"), forward())
        }
        (ArrowPolicy::NoArrow, Arrow::Forward | Arrow::Reversible) => {
            error(format!("'{phrase}' does not take an arrow"), Vec::new())
        }
        _ => Ok(()),
    }
}

fn find_phrase<'w, 'a>(words: &'w [&'a str]) -> Option<(&'static str, &'w [&'a str], &'w [&'a str])> {
    let mut best: Option<(usize, &'static str)> = None;
    for &token in RULE_TOKENS {
        let pattern: Vec<&str> = token.split_whitespace().collect();
        let hit = words
            .windows(pattern.len())
            .position(|w| w.iter().map(|s| s.trim_end_matches(',')).eq(pattern.iter().copied()));
        if let Some(pos) = hit {
            if best.is_none_or(|(p, t)| pos < p || (pos == p && token.len() > t.len())) {
                best = Some((pos, token));
            }
        }
    }
    best.map(|(pos, token)| {
        let width = token.split_whitespace().count();
        (token, &words[..pos], &words[pos + width..])
    })
}

fn split_pair(after: &[&str], line: usize, phrase: &str) -> Result<(String, String), CompileError> {
    match after {
        [first, "and", second] => Ok((validate_name(first, line)?, validate_name(second, line)?)),
        _ => Err(CompileError::Value {
            line,
            message: format!("expected 'X and Y' after '{phrase}'"),
        }),
    }
}

/// `C1 to C2 (V1, V2)`; volumes default to 1 when omitted.
fn parse_compartments(text: &str, line: usize) -> Result<(f64, f64), CompileError> {
    let Some(open) = text.find('(') else {
        return Ok((1.0, 1.0));
    };
    let close = text.rfind(')').filter(|&c| c > open).ok_or_else(|| CompileError::Value {
        line,
        message: format!("unbalanced parentheses in '{text}'"),
    })?;
    let values = text[open + 1..close]
        .split(',')
        .map(|v| parse_number(v, line))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [v1, v2] if *v1 > 0.0 && *v2 > 0.0 => Ok((*v1, *v2)),
        [_, _] => Err(CompileError::Value {
            line,
            message: "compartment volumes must be positive".into(),
        }),
        _ => Err(CompileError::Value {
            line,
            message: format!("expected two compartment volumes in '{text}'"),
        }),
    }
}

pub fn validate_name(name: &str, line: usize) -> Result<String, CompileError> {
    let name = name.trim();
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(CompileError::Value {
            line,
            message: format!("'{name}' is not a valid name"),
        })
    }
}

pub fn parse_number(text: &str, line: usize) -> Result<f64, CompileError> {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CompileError::Value {
            line,
            message: format!("invalid numeric literal '{text}'"),
        }),
    }
}

/// Value of one `key=value` suffix entry for a parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Number(f64),
    /// Same-named parameter of another reaction (1-based number).
    SameAs(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: ParamValue,
    pub constant: bool,
    pub fixed: bool,
    pub bounds: Option<(f64, f64)>,
}

/// Splits on `sep` outside of brackets and parentheses.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Parses one suffix section: `[const] key=[const] value[lo, hi]`,
/// `key=@N`, or `[fixed] Name=value[lo, hi]`.
pub fn parse_settings(section: &str, line: usize) -> Result<Vec<Setting>, CompileError> {
    let mut out = Vec::new();
    for entry in split_top_level(section, ',').into_iter().map(str::trim) {
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry.split_once('=').ok_or_else(|| CompileError::Value {
            line,
            message: format!("expected 'name=value', found '{entry}'"),
        })?;
        let mut constant = false;
        let mut fixed = false;
        let mut key = key.trim();
        loop {
            if let Some(rest) = key.strip_prefix("const ") {
                constant = true;
                key = rest.trim();
            } else if let Some(rest) = key.strip_prefix("fixed ") {
                fixed = true;
                key = rest.trim();
            } else {
                break;
            }
        }
        let mut value = value.trim();
        if let Some(rest) = value.strip_prefix("const ") {
            constant = true;
            value = rest.trim();
        }
        let (value, bounds) = match value.find('[') {
            Some(open) => {
                let inner = value[open + 1..].strip_suffix(']').ok_or_else(|| CompileError::Value {
                    line,
                    message: format!("unterminated bounds in '{entry}'"),
                })?;
                (value[..open].trim(), Some(parse_bounds(inner, line)?))
            }
            None => (value, None),
        };
        let value = match value.strip_prefix('@') {
            Some(number) => {
                let target: usize = number.trim().parse().map_err(|_| CompileError::Value {
                    line,
                    message: format!("invalid reaction reference '{value}'"),
                })?;
                if target == 0 {
                    return Err(CompileError::Value {
                        line,
                        message: "reaction references are 1-based".into(),
                    });
                }
                ParamValue::SameAs(target)
            }
            None => {
                let number = parse_number(value, line)?;
                if number < 0.0 {
                    return Err(CompileError::Value {
                        line,
                        message: format!("'{key}' must not be negative"),
                    });
                }
                ParamValue::Number(number)
            }
        };
        out.push(Setting {
            key: validate_name(key, line)?,
            value,
            constant,
            fixed,
            bounds,
        });
    }
    Ok(out)
}

fn parse_bounds(inner: &str, line: usize) -> Result<(f64, f64), CompileError> {
    let values = inner
        .split(',')
        .map(|v| parse_number(v, line))
        .collect::<Result<Vec<_>, _>>()?;
    let [lower, upper] = values.as_slice() else {
        return Err(CompileError::Value {
            line,
            message: format!("bounds need two values, found '[{inner}]'"),
        });
    };
    check_bounds(*lower, *upper, line)?;
    Ok((*lower, *upper))
}

pub fn check_bounds(lower: f64, upper: f64, line: usize) -> Result<(), CompileError> {
    if lower <= 0.0 || upper <= 0.0 {
        return Err(CompileError::Value {
            line,
            message: format!("search bounds must be positive, found [{lower}, {upper}]"),
        });
    }
    if lower >= upper {
        return Err(CompileError::Value {
            line,
            message: format!("inverted search bounds [{lower}, {upper}]"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(text: &str) -> Rule {
        parse_rule(text, 1, 0.7).unwrap()
    }

    #[test]
    fn binding_with_reversible_arrow() {
        let r = rule("E binds S <--> ES");
        assert_eq!(r.arrow, Arrow::Reversible);
        assert_eq!(r.param_keys(), vec!["kf", "kr"]);
        assert_eq!(r.species(), vec!["E", "S", "ES"]);
        assert_eq!(r.kind(), RuleKind::Binding);
    }

    #[test]
    fn synonyms_detect_the_same_rule() {
        let a = rule("A binds B --> AB");
        let b = rule("A forms a complex with B --> AB");
        assert_eq!(a.form, b.form);
        let c = rule("AB dissociates into A and B");
        let d = rule("AB dissociates to A and B");
        assert_eq!(c.form, d.form);
        assert!(c.is_reversible());
    }

    #[test]
    fn phosphorylation_is_unidirectional_only() {
        let err = parse_rule("Raf phosphorylates MEK <--> MEKp", 3, 0.7).unwrap_err();
        match err {
            CompileError::Arrow { line, allowed, .. } => {
                assert_eq!(line, 3);
                assert!(allowed.contains(&"-->".to_string()));
                assert!(!allowed.contains(&"<-->".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
        let r = rule("Raf phosphorylates MEK --> MEKp");
        assert_eq!(r.param_keys(), vec!["V", "K"]);
    }

    #[test]
    fn missing_arrow_is_an_arrow_error() {
        assert!(matches!(
            parse_rule("A binds B", 1, 0.7),
            Err(CompileError::Arrow { .. })
        ));
        assert!(matches!(
            parse_rule("A is degraded --> B", 1, 0.7),
            Err(CompileError::Arrow { .. })
        ));
    }

    #[test]
    fn transcription_with_and_gate_and_repressor() {
        let r = rule("CLOCK & BMAL1 transcribe Per, repressed by PER_CRY");
        match &r.form {
            RuleForm::Transcription {
                activators,
                repressor,
                product,
            } => {
                assert_eq!(activators, &["CLOCK", "BMAL1"]);
                assert_eq!(repressor.as_deref(), Some("PER_CRY"));
                assert_eq!(product, "Per");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.param_keys(), vec!["V", "K", "n", "KF", "nF"]);
    }

    #[test]
    fn dephosphorylation_with_and_without_enzyme() {
        let r = rule("PP2A dephosphorylates ERKp --> ERK");
        assert_eq!(r.species(), vec!["PP2A", "ERKp", "ERK"]);
        let r = rule("ERKp is dephosphorylated --> ERK");
        assert_eq!(r.species(), vec!["ERKp", "ERK"]);
    }

    #[test]
    fn translocation_reads_volumes() {
        let r = rule("ERK translocates from cytoplasm to nucleus (0.94, 0.22) <--> ERKn");
        match r.form {
            RuleForm::Translocation { volumes, .. } => assert_eq!(volumes, (0.94, 0.22)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_rule_suggests_the_nearest_token() {
        let err = parse_rule("Raf phosphorylats MEK --> MEKp", 9, 0.7).unwrap_err();
        match err {
            CompileError::Detection { line, suggestion, .. } => {
                assert_eq!(line, 9);
                assert_eq!(suggestion.as_deref(), Some("phosphorylates"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn user_defined_sides_and_coefficients() {
        let r = parse_user_defined("2*A + B --> C: p[k] * u[A]^2 * u[B]", 1).unwrap();
        match r.form {
            RuleForm::UserDefined {
                reactants,
                products,
                rate,
            } => {
                assert_eq!(reactants, vec![("A".to_string(), 2.0), ("B".to_string(), 1.0)]);
                assert_eq!(products, vec![("C".to_string(), 1.0)]);
                assert_eq!(rate, "p[k] * u[A]^2 * u[B]");
            }
            other => panic!("unexpected {other:?}"),
        }
        let r = parse_user_defined(" --> A: p[ks]", 1).unwrap();
        assert!(r.species() == vec!["A"]);
    }

    #[test]
    fn settings_cover_const_constraints_and_bounds() {
        let settings = parse_settings("kf=1e-3[1e-5, 1e-1], const kr=2, V=@3, fixed A=10", 4).unwrap();
        assert_eq!(settings.len(), 4);
        assert_eq!(settings[0].bounds, Some((1e-5, 1e-1)));
        assert!(settings[1].constant);
        assert_eq!(settings[2].value, ParamValue::SameAs(3));
        assert!(settings[3].fixed);
        assert_eq!(settings[3].key, "A");
        let settings = parse_settings("kf=const 4", 1).unwrap();
        assert!(settings[0].constant);
    }

    #[test]
    fn bad_literals_and_bounds_are_value_errors() {
        for text in ["kf=abc", "kf=-1", "kf=1[10, 1]", "kf=1[-1, 1]", "kf"] {
            assert!(
                matches!(parse_settings(text, 2), Err(CompileError::Value { line: 2, .. })),
                "{text}"
            );
        }
    }
}
