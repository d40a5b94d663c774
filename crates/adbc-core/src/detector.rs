//! Evaluating contract sets and comparing them across overrides

use std::sync::Arc;

use crate::bindings::BindingContext;
use crate::contract::ContractSet;
use crate::engine::ExpressionEngine;
use crate::error::SubstitutionRule;
use crate::Result;

/// Runs contract sets through an expression engine
#[derive(Clone)]
pub struct ViolationDetector {
    engine: Arc<dyn ExpressionEngine>,
}

impl ViolationDetector {
    pub fn new(engine: Arc<dyn ExpressionEngine>) -> Self {
        ViolationDetector { engine }
    }

    pub fn engine(&self) -> &dyn ExpressionEngine {
        self.engine.as_ref()
    }

    /// Evaluate the parts of `set` in order and return the first one that
    /// does not hold. Later parts are not evaluated.
    ///
    /// # Errors
    /// An evaluation failure is returned as an error, never as a failing part.
    pub fn check(&self, set: &ContractSet, bindings: &BindingContext) -> Result<Option<String>> {
        for part in set.iter() {
            if !self.engine.condition(part, bindings)? {
                tracing::trace!(part, "contract part does not hold");
                return Ok(Some(part.to_string()));
            }
        }
        Ok(None)
    }

    pub fn holds(&self, set: &ContractSet, bindings: &BindingContext) -> Result<bool> {
        Ok(self.check(set, bindings)?.is_none())
    }

    /// Check one substitution rule between an overriding contract and the
    /// contract it replaces. Returns the failing part that witnesses the
    /// broken rule:
    ///
    /// - precondition strengthened: `overridden` holds, `overriding` fails;
    ///   the witness is the failing part of `overriding`
    /// - postcondition weakened, invariant not preserved: `overriding`
    ///   holds, `overridden` fails; the witness is the failing part of
    ///   `overridden`
    pub fn check_substitution(
        &self,
        rule: SubstitutionRule,
        overriding: &ContractSet,
        overridden: &ContractSet,
        bindings: &BindingContext,
    ) -> Result<Option<String>> {
        match rule {
            SubstitutionRule::PreconditionStrengthened => {
                if !self.holds(overridden, bindings)? {
                    return Ok(None);
                }
                self.check(overriding, bindings)
            }
            SubstitutionRule::PostconditionWeakened | SubstitutionRule::InvariantNotPreserved => {
                if !self.holds(overriding, bindings)? {
                    return Ok(None);
                }
                self.check(overridden, bindings)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StandardEngine;
    use crate::keywords::Keywords;
    use crate::value::Value;
    use crate::Error;

    fn detector() -> ViolationDetector {
        ViolationDetector::new(Arc::new(StandardEngine::new()))
    }

    fn ctx(amount: f64) -> BindingContext {
        let mut ctx = BindingContext::new(&Keywords::default());
        ctx.bind("amount", Value::Float(amount));
        ctx
    }

    #[test]
    fn test_first_failing_part_short_circuits() {
        let set = ContractSet::new(["amount>0", "amount<10", "unbound_later"]);
        assert_eq!(
            detector().check(&set, &ctx(-5.0)).unwrap(),
            Some("amount>0".to_string())
        );
        assert_eq!(
            detector().check(&set, &ctx(20.0)).unwrap(),
            Some("amount<10".to_string())
        );
    }

    #[test]
    fn test_malformed_is_not_a_failure() {
        let set = ContractSet::new(["amount >", "false"]);
        let err = detector().check(&set, &ctx(1.0)).unwrap_err();
        assert!(matches!(err, Error::MalformedExpression { .. }));
    }

    #[test]
    fn test_empty_set_holds() {
        assert!(detector().holds(&ContractSet::default(), &ctx(1.0)).unwrap());
    }

    #[test]
    fn test_precondition_strengthened() {
        let parent = ContractSet::new(["amount>0"]);
        let child = ContractSet::new(["amount>0", "amount<10"]);
        let d = detector();
        let rule = SubstitutionRule::PreconditionStrengthened;
        assert_eq!(
            d.check_substitution(rule, &child, &parent, &ctx(20.0)).unwrap(),
            Some("amount<10".to_string())
        );
        // both fail: a plain precondition violation, not a substitution one
        assert_eq!(d.check_substitution(rule, &child, &parent, &ctx(-1.0)).unwrap(), None);
        assert_eq!(d.check_substitution(rule, &parent, &parent, &ctx(20.0)).unwrap(), None);
    }

    #[test]
    fn test_postcondition_weakened() {
        let parent = ContractSet::new(["amount>5"]);
        let child = ContractSet::new(["amount>0"]);
        let d = detector();
        let rule = SubstitutionRule::PostconditionWeakened;
        assert_eq!(
            d.check_substitution(rule, &child, &parent, &ctx(3.0)).unwrap(),
            Some("amount>5".to_string())
        );
        assert_eq!(d.check_substitution(rule, &child, &parent, &ctx(8.0)).unwrap(), None);
    }
}
