//! Contract expression sets
//!
//! A `ContractSet` is an ordered list of boolean expressions whose meaning is
//! the conjunction of its parts. Order is kept for diagnostics only.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keywords::{replace_keyword, Keywords};

/// Which set of a declaration's contract is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Precondition,
    Postcondition,
    Invariant,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::Precondition => write!(f, "precondition"),
            ContractKind::Postcondition => write!(f, "postcondition"),
            ContractKind::Invariant => write!(f, "invariant"),
        }
    }
}

/// Ordered conjunction of contract expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractSet {
    parts: Vec<String>,
}

impl ContractSet {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ContractSet {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// The set used when a declaration states nothing: exactly as strong as
    /// whatever it inherits.
    pub fn inherited(keywords: &Keywords) -> Self {
        ContractSet::new([keywords.inherited.clone()])
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(String::as_str)
    }

    /// Join all parts into one boolean expression with `&&`.
    /// An empty set is trivially `true`.
    pub fn merged(&self) -> String {
        match self.parts.len() {
            0 => "true".to_string(),
            1 => self.parts[0].clone(),
            _ => self
                .parts
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" && "),
        }
    }

    /// Replace a placeholder in every part, leaving `self` untouched
    pub fn substitute(&self, keyword: &str, replacement: &str) -> ContractSet {
        ContractSet {
            parts: self
                .parts
                .iter()
                .map(|p| replace_keyword(p, keyword, replacement))
                .collect(),
        }
    }

    /// Apply `f` to every part
    pub fn map_parts<F>(&self, mut f: F) -> ContractSet
    where
        F: FnMut(&str) -> String,
    {
        ContractSet {
            parts: self.parts.iter().map(|p| f(p)).collect(),
        }
    }

    /// SHA-256 over the parts, stable across runs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl fmt::Display for ContractSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.merged())
    }
}

impl From<Vec<String>> for ContractSet {
    fn from(parts: Vec<String>) -> Self {
        ContractSet { parts }
    }
}

impl<'a> IntoIterator for &'a ContractSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_single_part_is_verbatim() {
        assert_eq!(ContractSet::new(["amount>0"]).merged(), "amount>0");
    }

    #[test]
    fn test_merged_parenthesizes_each_part() {
        let set = ContractSet::new(["a || b", "c"]);
        assert_eq!(set.merged(), "(a || b) && (c)");
    }

    #[test]
    fn test_empty_set_is_true() {
        assert_eq!(ContractSet::default().merged(), "true");
        assert!(ContractSet::default().is_empty());
    }

    #[test]
    fn test_substitute_does_not_mutate_original() {
        let set = ContractSet::new(["$super", "x > 1"]);
        let resolved = set.substitute("$super", "(true)");
        assert_eq!(resolved.parts(), &["(true)".to_string(), "x > 1".to_string()]);
        assert_eq!(set.parts()[0], "$super");
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        let a = ContractSet::new(["x > 0", "y > 0"]);
        let b = ContractSet::new(["x > 0", "y > 0"]);
        let c = ContractSet::new(["x > 0y > 0"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_serde_transparent() {
        let set = ContractSet::new(["a", "b"]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let back: ContractSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
