//! Error types for Adbc
//!
//! All fallible operations return `Result<T, Error>`.
//! A contract *violation* (the program broke a contract) is kept apart from a
//! *malformed expression* (the contract itself cannot be evaluated).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Adbc error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A contract was broken at runtime
    #[error("{0}")]
    Violation(#[from] Violation),

    /// Contract text cannot be rewritten, parsed or evaluated
    #[error("Malformed expression '{expression}': {reason}")]
    MalformedExpression { expression: String, reason: String },

    /// A type name that the hierarchy does not know
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    /// A declaration that cannot be found or resolved
    #[error("Unknown declaration '{0}'")]
    UnknownDeclaration(String),

    /// The type hierarchy is not a well-formed tree
    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    /// Advice that can never run because an unconditional advice precedes it
    #[error("Dead advice: {advice} can never run, it follows unconditional advice {after}")]
    DeadAdvice { advice: String, after: String },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a program, trace or config file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid JSON document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn malformed(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// The violation carried by this error, if any
    pub fn as_violation(&self) -> Option<&Violation> {
        match self {
            Error::Violation(v) => Some(v),
            _ => None,
        }
    }
}

/// Result type alias for Adbc operations
pub type Result<T> = std::result::Result<T, Error>;

// ── Violations ────────────────────────────────────────────

/// Which kind of contract was broken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Precondition,
    Postcondition,
    Invariant,
    Substitution,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Precondition => write!(f, "Precondition"),
            ViolationKind::Postcondition => write!(f, "Postcondition"),
            ViolationKind::Invariant => write!(f, "Invariant"),
            ViolationKind::Substitution => write!(f, "Substitution principle"),
        }
    }
}

/// Which behavioral-subtyping rule an override or advice broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionRule {
    PreconditionStrengthened,
    PostconditionWeakened,
    InvariantNotPreserved,
}

impl fmt::Display for SubstitutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstitutionRule::PreconditionStrengthened => write!(f, "precondition strengthened"),
            SubstitutionRule::PostconditionWeakened => write!(f, "postcondition weakened"),
            SubstitutionRule::InvariantNotPreserved => write!(f, "invariant not preserved"),
        }
    }
}

/// A structured contract violation.
///
/// `expression` is the single failing part of the contract set, after
/// placeholder substitution. `location` names the declaration the contract
/// belongs to and `blame` the party responsible for breaking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub expression: String,
    pub location: String,
    pub blame: String,
    pub rule: Option<SubstitutionRule>,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        expression: impl Into<String>,
        location: impl Into<String>,
        blame: impl Into<String>,
    ) -> Self {
        Violation {
            kind,
            expression: expression.into(),
            location: location.into(),
            blame: blame.into(),
            rule: None,
        }
    }

    pub fn substitution(
        rule: SubstitutionRule,
        expression: impl Into<String>,
        location: impl Into<String>,
        blame: impl Into<String>,
    ) -> Self {
        Violation {
            rule: Some(rule),
            ..Violation::new(ViolationKind::Substitution, expression, location, blame)
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} broken!", self.kind)?;
        if let Some(rule) = self.rule {
            write!(f, " ({})", rule)?;
        }
        write!(f, "\n\tContract:\t{}", self.expression)?;
        write!(f, "\n\tWhere:\t\t{}", self.location)?;
        write!(f, "\n\tBlame:\t\t{}", self.blame)
    }
}

impl std::error::Error for Violation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display_names_contract_and_blame() {
        let v = Violation::new(
            ViolationKind::Precondition,
            "amount>0",
            "Account.deposit(double)",
            "caller of Account.deposit(double)",
        );
        let text = v.to_string();
        assert!(text.starts_with("Precondition broken!"));
        assert!(text.contains("Contract:\tamount>0"));
        assert!(text.contains("Blame:\t\tcaller of Account.deposit(double)"));
    }

    #[test]
    fn test_substitution_display_includes_rule() {
        let v = Violation::substitution(
            SubstitutionRule::PreconditionStrengthened,
            "to.owner == $this.owner",
            "SavingsAccount.transfer(double, Account)",
            "SavingsAccount.transfer(double, Account)",
        );
        assert_eq!(v.kind, ViolationKind::Substitution);
        assert!(v
            .to_string()
            .starts_with("Substitution principle broken! (precondition strengthened)"));
    }

    #[test]
    fn test_error_wraps_violation() {
        let v = Violation::new(ViolationKind::Invariant, "false", "User", "User");
        let err = Error::from(v.clone());
        assert_eq!(err.as_violation(), Some(&v));
        assert!(Error::malformed("x", "y").as_violation().is_none());
    }
}
