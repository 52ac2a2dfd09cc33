//! Model formulas of the form `~ a + b + a:c`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SplineDeError};

/// A parsed right-hand-side model formula.
///
/// Terms are stored in R order: main effects first, then interactions by
/// increasing order, each group keeping the written order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    intercept: bool,
    terms: Vec<Vec<String>>,
}

impl Formula {
    pub fn new(intercept: bool, terms: Vec<Vec<String>>) -> Result<Self> {
        let mut ordered: Vec<Vec<String>> = Vec::with_capacity(terms.len());
        for term in terms {
            if term.is_empty() {
                continue;
            }
            if let Some(name) = term.iter().find(|v| !is_variable_name(v)) {
                return Err(SplineDeError::InvalidFormula {
                    formula: render(intercept, &[term.clone()]),
                    reason: format!("'{}' is not a valid variable name", name),
                });
            }
            if ordered.iter().any(|t| same_term(t, &term)) {
                log::debug!("Dropping repeated formula term {}", term.join(":"));
                continue;
            }
            ordered.push(term);
        }
        if ordered.is_empty() && !intercept {
            return Err(SplineDeError::InvalidFormula {
                formula: "~0".to_string(),
                reason: "formula has no terms".to_string(),
            });
        }
        // Stable: keeps written order within the same interaction order
        ordered.sort_by_key(|t| t.len());
        Ok(Self {
            intercept,
            terms: ordered,
        })
    }

    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    pub fn terms(&self) -> &[Vec<String>] {
        &self.terms
    }

    /// Whether the formula contains `term` (variable order ignored).
    /// The empty term stands for the intercept.
    pub fn contains_term(&self, term: &[String]) -> bool {
        if term.is_empty() {
            return self.intercept;
        }
        self.terms.iter().any(|t| same_term(t, term))
    }

    /// All variables referenced by the formula, in first-use order
    pub fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for term in &self.terms {
            for v in term {
                if !vars.contains(v) {
                    vars.push(v.clone());
                }
            }
        }
        vars
    }

    /// `~ group + group:b1 + ... + group:bK`: group-specific basis trends
    pub fn group_trends(group: &str, basis: &[String]) -> Result<Self> {
        let mut terms = vec![vec![group.to_string()]];
        terms.extend(basis.iter().map(|b| vec![group.to_string(), b.clone()]));
        Self::new(true, terms)
    }

    /// `~ group + b1 + ... + bK`: group offsets with one shared basis trend
    pub fn shared_trend(group: &str, basis: &[String]) -> Result<Self> {
        let mut terms = vec![vec![group.to_string()]];
        terms.extend(basis.iter().map(|b| vec![b.clone()]));
        Self::new(true, terms)
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '.' || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

fn same_term(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v))
}

fn render(intercept: bool, terms: &[Vec<String>]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !intercept {
        parts.push("0".to_string());
    }
    parts.extend(terms.iter().map(|t| t.join(":")));
    if parts.is_empty() {
        parts.push("1".to_string());
    }
    format!("~ {}", parts.join(" + "))
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(self.intercept, &self.terms))
    }
}

impl FromStr for Formula {
    type Err = SplineDeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| SplineDeError::InvalidFormula {
            formula: s.to_string(),
            reason: reason.to_string(),
        };

        let rhs = s
            .trim()
            .strip_prefix('~')
            .ok_or_else(|| invalid("formula must start with '~'"))?;
        if rhs.trim().is_empty() {
            return Err(invalid("formula has no terms"));
        }

        let mut intercept = true;
        let mut terms = Vec::new();
        for token in rhs.split('+') {
            let token = token.trim();
            match token {
                "" => return Err(invalid("empty term")),
                "1" => intercept = true,
                "0" => intercept = false,
                _ => {
                    if token.contains(['*', '-', '(', ')', '/', '^', '|']) {
                        return Err(invalid(&format!("unsupported operator in term '{}'", token)));
                    }
                    let vars: Vec<String> = token.split(':').map(|v| v.trim().to_string()).collect();
                    if vars.iter().any(|v| v.is_empty()) {
                        return Err(invalid(&format!("malformed interaction '{}'", token)));
                    }
                    terms.push(vars);
                }
            }
        }

        Self::new(intercept, terms).map_err(|e| match e {
            SplineDeError::InvalidFormula { reason, .. } => SplineDeError::InvalidFormula {
                formula: s.to_string(),
                reason,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_model() {
        let f: Formula = "~donor + donor:fun1 + donor:fun2 + donor:fun3".parse().unwrap();
        assert!(f.has_intercept());
        assert_eq!(f.terms().len(), 4);
        assert_eq!(f.terms()[1], strings(&["donor", "fun1"]));
        assert!(f.contains_term(&strings(&["fun1", "donor"])));
        assert!(!f.contains_term(&strings(&["fun1"])));
        assert_eq!(f.variables(), strings(&["donor", "fun1", "fun2", "fun3"]));
    }

    #[test]
    fn test_terms_reordered_by_order() {
        let f: Formula = "~ donor:fun1 + donor + fun1".parse().unwrap();
        assert_eq!(f.to_string(), "~ donor + fun1 + donor:fun1");
    }

    #[test]
    fn test_no_intercept() {
        let f: Formula = "~0 + donor".parse().unwrap();
        assert!(!f.has_intercept());
        assert_eq!(f.to_string(), "~ 0 + donor");
    }

    #[test]
    fn test_builders_match_parsed() {
        let basis = strings(&["fun1", "fun2", "fun3"]);
        let full: Formula = "~donor + donor:fun1 + donor:fun2 + donor:fun3".parse().unwrap();
        let reduced: Formula = "~donor + fun1 + fun2 + fun3".parse().unwrap();
        assert_eq!(Formula::group_trends("donor", &basis).unwrap(), full);
        assert_eq!(Formula::shared_trend("donor", &basis).unwrap(), reduced);
    }

    #[test]
    fn test_invalid_formulas() {
        assert!("donor + time".parse::<Formula>().is_err());
        assert!("~".parse::<Formula>().is_err());
        assert!("~ donor * time".parse::<Formula>().is_err());
        assert!("~ donor + ".parse::<Formula>().is_err());
        assert!("~ 0".parse::<Formula>().is_err());
        assert!("~ 2donor".parse::<Formula>().is_err());
    }
}
