//! Program verifier: checks contract declarations before anything runs
//!
//! The verifier works on a built [`Model`] and the [`Enforcer`] that will
//! guard it. It accumulates all diagnostics rather than stopping at the
//! first error, giving users a complete picture.
//!
//! # Verification Phases
//!
//! 1. **Placeholders**: reserved names used where they mean nothing
//!    (`$result` or `$old` in a precondition, `$proc` outside advice)
//! 2. **Expressions**: every resolved contract parses in the configured engine
//! 3. **Dead advice**: advice shadowed by an unconditional advice
//! 4. **Substitution**: overrides and advice checked against recorded samples

use std::collections::BTreeSet;

use crate::advice::{AdviceReceivers, Resolution};
use crate::contract::{ContractKind, ContractSet};
use crate::enforcer::Enforcer;
use crate::hierarchy::DeclKey;
use crate::keywords::{mentions, Keywords};
use crate::program::Model;
use crate::rewriter::OldValueRewriter;
use crate::Error;

// ── Verification Result Types ─────────────────────────────

/// Result of program verification, accumulates all diagnostics
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    /// Returns true if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn add_error(&mut self, kind: DiagnosticKind, message: String, decl: Option<&DeclKey>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            decl: decl.cloned(),
        });
    }

    fn add_warning(&mut self, kind: DiagnosticKind, message: String, decl: Option<&DeclKey>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            decl: decl.cloned(),
        });
    }
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single verification diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Declaration the diagnostic is about
    pub decl: Option<DeclKey>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(ref decl) = self.decl {
            write!(f, "{} [{}] at {}: {}", prefix, self.kind, decl, self.message)
        } else {
            write!(f, "{} [{}]: {}", prefix, self.kind, self.message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Category of verification issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    PlaceholderMisuse,
    MalformedExpression,
    DeadAdvice,
    SubstitutionError,
    DeclarationError,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::PlaceholderMisuse => write!(f, "placeholder"),
            DiagnosticKind::MalformedExpression => write!(f, "expression"),
            DiagnosticKind::DeadAdvice => write!(f, "dead-advice"),
            DiagnosticKind::SubstitutionError => write!(f, "substitution"),
            DiagnosticKind::DeclarationError => write!(f, "declaration"),
        }
    }
}

// ── Public API ────────────────────────────────────────────

/// Verify a program model against the enforcer that will guard it.
///
/// Runs all verification phases and returns accumulated diagnostics.
pub fn verify(model: &Model, enforcer: &Enforcer) -> VerificationResult {
    let mut result = VerificationResult::new();

    verify_placeholders(model, enforcer.keywords(), &mut result);
    verify_expressions(model, enforcer, &mut result);
    verify_dead_advice(model, enforcer, &mut result);
    verify_substitution(model, enforcer, &mut result);

    tracing::debug!(
        errors = result.errors().len(),
        warnings = result.warnings().len(),
        "verification finished"
    );
    result
}

// ── Phase 1: Placeholders ─────────────────────────────────

fn verify_placeholders(model: &Model, keywords: &Keywords, result: &mut VerificationResult) {
    for (decl, kind, set) in model.table.iter() {
        for part in set.iter() {
            if kind != ContractKind::Postcondition {
                for reserved in [&keywords.result, &keywords.old] {
                    if mentions(part, reserved) {
                        result.add_error(
                            DiagnosticKind::PlaceholderMisuse,
                            format!("'{}' is only meaningful in a postcondition: {}", reserved, part),
                            Some(decl),
                        );
                    }
                }
            }
            if !decl.is_advice() && mentions(part, &keywords.proc_) {
                result.add_error(
                    DiagnosticKind::PlaceholderMisuse,
                    format!("'{}' is only meaningful in advice: {}", keywords.proc_, part),
                    Some(decl),
                );
            }
            if mentions(part, &keywords.inherited)
                && !decl.is_advice()
                && model.hierarchy.overridden(decl).is_none()
            {
                result.add_warning(
                    DiagnosticKind::PlaceholderMisuse,
                    format!("'{}' has nothing to inherit and stands for true", keywords.inherited),
                    Some(decl),
                );
            }
            if let Err(e) = OldValueRewriter::scan(keywords, part) {
                result.add_error(DiagnosticKind::MalformedExpression, e.to_string(), Some(decl));
            }
        }
    }
}

// ── Phase 2: Expressions ──────────────────────────────────

/// Resolve every contract the enforcer could check and run it through the
/// engine's syntax check
fn verify_expressions(model: &Model, enforcer: &Enforcer, result: &mut VerificationResult) {
    let repository = enforcer.repository();
    let engine = enforcer.detector().engine();

    let mut targets = Vec::new();
    for ty in model.hierarchy.types() {
        targets.push((DeclKey::ty(ty), repository.invariant(ty)));
    }
    for decl in model.hierarchy.members() {
        targets.push((decl.clone(), repository.precondition(&decl)));
        targets.push((decl.clone(), repository.postcondition(&decl)));
    }
    for (join_point, list) in model.join_points() {
        for advice in &list {
            for kind in [ContractKind::Precondition, ContractKind::Postcondition] {
                let resolved = enforcer
                    .advice_links(&join_point, advice, &AdviceReceivers::default())
                    .and_then(|later| enforcer.resolve_advice(advice, &join_point, &later, kind))
                    .map(|r| r.contract);
                // reported by the dead advice phase
                if matches!(resolved, Err(Error::DeadAdvice { .. })) {
                    continue;
                }
                targets.push((advice.clone(), resolved));
            }
        }
    }

    for (decl, resolved) in targets {
        match resolved {
            Ok(set) => validate_set(engine, &decl, &set, result),
            Err(e) => result.add_error(DiagnosticKind::DeclarationError, e.to_string(), Some(&decl)),
        }
    }
}

fn validate_set(
    engine: &dyn crate::engine::ExpressionEngine,
    decl: &DeclKey,
    set: &ContractSet,
    result: &mut VerificationResult,
) {
    for part in set.iter() {
        if let Err(e) = engine.validate(part) {
            result.add_error(DiagnosticKind::MalformedExpression, e.to_string(), Some(decl));
        }
    }
}

// ── Phase 3: Dead Advice ──────────────────────────────────

fn verify_dead_advice(model: &Model, enforcer: &Enforcer, result: &mut VerificationResult) {
    for (join_point, list) in model.join_points() {
        let mut reported = BTreeSet::new();
        for advice in &list {
            let resolution = enforcer
                .advice_links(&join_point, advice, &AdviceReceivers::default())
                .and_then(|later| {
                    enforcer.resolve_advice(advice, &join_point, &later, ContractKind::Precondition)
                });
            match resolution {
                Ok(Resolution { dead_advice, .. }) => {
                    for dead in dead_advice {
                        if reported.insert(dead.clone()) {
                            result.add_warning(
                                DiagnosticKind::DeadAdvice,
                                format!("{} can never run at {}", dead, join_point),
                                Some(&dead),
                            );
                        }
                    }
                }
                Err(e @ Error::DeadAdvice { .. }) => {
                    if reported.insert(advice.clone()) {
                        result.add_error(DiagnosticKind::DeadAdvice, e.to_string(), Some(&join_point));
                    }
                }
                // reported by the expression phase
                Err(_) => {}
            }
        }
    }
}

// ── Phase 4: Substitution ─────────────────────────────────

fn verify_substitution(model: &Model, enforcer: &Enforcer, result: &mut VerificationResult) {
    let keywords = enforcer.keywords();
    for decl in model.samples.keys() {
        let samples = model.sample_contexts(decl, keywords);
        if let Err(e) = enforcer.verify_override(decl, &samples) {
            report_substitution(e, decl, result);
        }
    }
    for (join_point, list) in model.join_points() {
        let samples = model.sample_contexts(&join_point, keywords);
        if samples.is_empty() {
            continue;
        }
        for advice in &list {
            match enforcer.verify_advice(advice, &join_point, &samples) {
                Ok(()) | Err(Error::DeadAdvice { .. }) => {}
                Err(e) => report_substitution(e, advice, result),
            }
        }
    }
}

fn report_substitution(error: Error, decl: &DeclKey, result: &mut VerificationResult) {
    match error {
        Error::Violation(v) => result.add_error(
            DiagnosticKind::SubstitutionError,
            v.to_string().replace('\n', " "),
            Some(decl),
        ),
        other => result.add_error(DiagnosticKind::DeclarationError, other.to_string(), Some(decl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::program::Program;

    fn verify_json(text: &str, config: Config) -> VerificationResult {
        let model = Program::from_json(text).unwrap().build().unwrap();
        let enforcer = model.enforcer(config).unwrap();
        verify(&model, &enforcer)
    }

    fn kinds(result: &VerificationResult) -> Vec<(Severity, DiagnosticKind)> {
        result.diagnostics.iter().map(|d| (d.severity, d.kind)).collect()
    }

    #[test]
    fn test_clean_program_verifies() {
        let result = verify_json(
            r#"{ "types": [
                { "name": "Account", "invariant": ["$this.balance >= 0"],
                  "methods": [ { "name": "deposit", "params": ["double"], "param_names": ["amount"],
                                 "requires": ["amount > 0"],
                                 "ensures": ["$this.balance == $old($this.balance) + amount"] } ] },
                { "name": "Savings", "parent": "Account",
                  "methods": [ { "name": "deposit", "params": ["double"], "requires": ["$super"] } ] } ] }"#,
            Config::default(),
        );
        assert!(result.is_valid(), "{:?}", result.errors());
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn test_result_in_precondition_rejected() {
        let result = verify_json(
            r#"{ "types": [ { "name": "A",
                "methods": [ { "name": "f", "requires": ["$result > 0"] } ] } ] }"#,
            Config::default(),
        );
        assert_eq!(kinds(&result), vec![(Severity::Error, DiagnosticKind::PlaceholderMisuse)]);
        let diag = &result.errors()[0];
        assert_eq!(diag.decl, Some(DeclKey::method("A", "f", Vec::<String>::new())));
        assert!(diag.to_string().starts_with("error [placeholder] at A.f()"));
    }

    #[test]
    fn test_proc_outside_advice_rejected() {
        let result = verify_json(
            r#"{ "types": [ { "name": "A",
                "methods": [ { "name": "f", "ensures": ["$proc"] } ] } ] }"#,
            Config::default(),
        );
        assert!(!result.is_valid());
        assert!(result.errors()[0].message.contains("only meaningful in advice"));
    }

    #[test]
    fn test_super_without_parent_warns() {
        let result = verify_json(
            r#"{ "types": [ { "name": "A",
                "methods": [ { "name": "f", "requires": ["$super", "true"] } ] } ] }"#,
            Config::default(),
        );
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
    }

    #[test]
    fn test_malformed_and_unbalanced_expressions() {
        let result = verify_json(
            r#"{ "types": [ { "name": "A",
                "methods": [ { "name": "f", "requires": ["x >"],
                               "ensures": ["$old(x == 1"] } ] } ] }"#,
            Config::default(),
        );
        let errors = result.errors();
        assert!(errors.iter().all(|d| d.kind == DiagnosticKind::MalformedExpression));
        assert!(errors.iter().any(|d| d.message.contains("no matching parenthesis")));
        assert!(errors.iter().any(|d| d.message.contains("'x >'")));
    }

    const SHADOWED: &str = r#"{
        "types": [ { "name": "A", "methods": [ { "name": "f", "requires": ["true"],
            "advised_by": ["Log.first", "Log.always", "Log.never"] } ] } ],
        "aspects": [ { "name": "Log", "advice": [
            { "name": "first", "runtime_test": "debug", "requires": ["$proc"] },
            { "name": "always", "requires": ["$proc"] },
            { "name": "never", "runtime_test": "x > 1", "requires": ["$proc"] } ] } ]
    }"#;

    #[test]
    fn test_dead_advice_warning() {
        let result = verify_json(SHADOWED, Config::default());
        assert!(result.is_valid(), "{:?}", result.errors());
        let warnings = result.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, DiagnosticKind::DeadAdvice);
        assert_eq!(warnings[0].decl, Some(DeclKey::advice("Log", "never")));
    }

    #[test]
    fn test_dead_advice_rejected_when_configured() {
        let config = Config {
            reject_dead_advice: true,
            ..Config::default()
        };
        let result = verify_json(SHADOWED, config);
        assert!(!result.is_valid());
        assert!(result.errors().iter().all(|d| d.kind == DiagnosticKind::DeadAdvice));
        assert_eq!(result.errors().len(), 1);
    }

    #[test]
    fn test_strengthened_override_found_on_samples() {
        let text = r#"{ "types": [
            { "name": "A", "methods": [ { "name": "f", "params": ["int"], "param_names": ["n"],
                                          "requires": ["n > 0"] } ] },
            { "name": "B", "parent": "A",
              "methods": [ { "name": "f", "params": ["int"], "requires": ["n > 10"],
                             "samples": [ { "n": 5 }, { "n": 50 } ] } ] } ] }"#;
        let result = verify_json(text, Config::default());
        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::SubstitutionError);
        assert!(errors[0].message.contains("precondition strengthened"), "{}", errors[0].message);

        let relaxed = Config {
            check_substitution: false,
            ..Config::default()
        };
        assert!(verify_json(text, relaxed).is_valid());
    }
}
