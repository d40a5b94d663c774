//! Advice chains and `$proc` continuations
//!
//! When several pieces of advice wrap one join point, `$proc` in an advice
//! contract stands for "whatever runs when this advice proceeds". Which
//! advice that is depends on runtime tests, so the continuation is built as
//! a conditional expression over the guards of the advice that follow.
//!
//! Positions in a chain: the advice being checked is position 0, the advice
//! after it are 1, 2, ... Each position gets its own receiver binding
//! (`$this0`, `$this1`, ...) so that receivers of different advice never
//! alias.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contract::{ContractKind, ContractSet};
use crate::hierarchy::DeclKey;
use crate::keywords::Keywords;
use crate::value::Value;
use crate::{Error, Result};

/// The runtime test that decides whether an advice applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Guard {
    #[default]
    Always,
    When(String),
}

impl Guard {
    pub fn parse(text: &str) -> Guard {
        match text.trim() {
            "true" => Guard::Always,
            other => Guard::When(other.to_string()),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Guard::Always)
    }
}

impl From<String> for Guard {
    fn from(text: String) -> Self {
        Guard::parse(&text)
    }
}

impl From<&str> for Guard {
    fn from(text: &str) -> Self {
        Guard::parse(text)
    }
}

impl From<bool> for Guard {
    fn from(always: bool) -> Self {
        if always {
            Guard::Always
        } else {
            Guard::When("false".to_string())
        }
    }
}

impl From<Guard> for String {
    fn from(guard: Guard) -> Self {
        guard.to_string()
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Always => write!(f, "true"),
            Guard::When(expr) => write!(f, "{}", expr),
        }
    }
}

/// One advice that may run after the current one
#[derive(Debug, Clone, PartialEq)]
pub struct AdviceLink {
    pub advice: DeclKey,
    pub precondition: ContractSet,
    pub postcondition: ContractSet,
    pub guard: Guard,
    /// Bound as the position-qualified receiver when present
    pub receiver: Option<Value>,
}

impl AdviceLink {
    pub fn new(advice: DeclKey, precondition: ContractSet, postcondition: ContractSet, guard: Guard) -> Self {
        AdviceLink {
            advice,
            precondition,
            postcondition,
            guard,
            receiver: None,
        }
    }

    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn contract(&self, kind: ContractKind) -> Result<&ContractSet> {
        match kind {
            ContractKind::Precondition => Ok(&self.precondition),
            ContractKind::Postcondition => Ok(&self.postcondition),
            ContractKind::Invariant => Err(Error::UnknownDeclaration(format!(
                "advice {} has no invariant",
                self.advice
            ))),
        }
    }
}

/// Receivers of the advice running around one call. Advice without an
/// entry of its own sees the fallback, usually the advised receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdviceReceivers {
    fallback: Option<Value>,
    by_advice: BTreeMap<DeclKey, Value>,
}

impl AdviceReceivers {
    pub fn new(fallback: Option<Value>) -> Self {
        AdviceReceivers {
            fallback,
            by_advice: BTreeMap::new(),
        }
    }

    pub fn with(mut self, advice: DeclKey, receiver: Value) -> Self {
        self.by_advice.insert(advice, receiver);
        self
    }

    pub fn get(&self, advice: &DeclKey) -> Option<&Value> {
        self.by_advice.get(advice).or(self.fallback.as_ref())
    }
}

/// An advice contract with `$proc` filled in
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub contract: ContractSet,
    /// Advice that can never be the next one to run, in chain order
    pub dead_advice: Vec<DeclKey>,
}

/// Builds continuations for advice chains
#[derive(Debug, Clone)]
pub struct AdviceResolver {
    keywords: Keywords,
    reject_dead_advice: bool,
}

impl AdviceResolver {
    pub fn new(keywords: &Keywords, reject_dead_advice: bool) -> Self {
        AdviceResolver {
            keywords: keywords.clone(),
            reject_dead_advice,
        }
    }

    /// Resolve `own`, the contract of the advice at position 0, against the
    /// advice that follow it and the join point contract.
    ///
    /// # Errors
    /// `DeadAdvice` when an advice is shadowed by an unconditional one and
    /// dead advice is rejected.
    pub fn resolve_continuation(
        &self,
        own: &ContractSet,
        join_point: &ContractSet,
        later: &[AdviceLink],
        kind: ContractKind,
    ) -> Result<Resolution> {
        let mut dead = Vec::new();
        let fallback = join_point.merged();
        let continuation = self.continuation(0, &fallback, later, kind, &mut dead)?;
        let contract = self.qualify(own, 0, &continuation);

        if let Some((shadowed, after)) = dead.first() {
            if self.reject_dead_advice {
                return Err(Error::DeadAdvice {
                    advice: shadowed.to_string(),
                    after: after.to_string(),
                });
            }
            for (shadowed, after) in &dead {
                tracing::warn!(
                    advice = %shadowed,
                    after = %after,
                    "advice can never run next: an earlier advice always applies"
                );
            }
        }
        tracing::debug!(%kind, %contract, "resolved advice continuation");
        Ok(Resolution {
            contract,
            dead_advice: dead.into_iter().map(|(d, _)| d).collect(),
        })
    }

    /// The expression `$proc` stands for when proceeding from `later[start - 1]`
    fn continuation(
        &self,
        start: usize,
        fallback: &str,
        later: &[AdviceLink],
        kind: ContractKind,
        dead: &mut Vec<(DeclKey, DeclKey)>,
    ) -> Result<String> {
        if start == later.len() {
            return Ok(fallback.to_string());
        }

        let mut out = String::new();
        let mut j = start;
        while j < later.len() {
            let Guard::When(test) = &later[j].guard else {
                break;
            };
            let resolved = self.resolve_link(j, fallback, later, kind, dead)?;
            if j != start {
                out.push_str(" else ");
            }
            out.push_str(&format!("if ({}) {{ {} }}", test, resolved.merged()));
            j += 1;
        }

        if j == later.len() {
            out.push_str(&format!(" else {{ {} }}", fallback));
            return Ok(out);
        }

        let resolved = self.resolve_link(j, fallback, later, kind, dead)?;
        for shadowed in &later[j + 1..] {
            if !dead.iter().any(|(d, _)| d == &shadowed.advice) {
                dead.push((shadowed.advice.clone(), later[j].advice.clone()));
            }
        }
        if j == start {
            Ok(resolved.merged())
        } else {
            out.push_str(&format!(" else {{ {} }}", resolved.merged()));
            Ok(out)
        }
    }

    /// Contract of `later[index]` with its receiver qualified and `$proc`
    /// replaced by what follows it
    fn resolve_link(
        &self,
        index: usize,
        fallback: &str,
        later: &[AdviceLink],
        kind: ContractKind,
        dead: &mut Vec<(DeclKey, DeclKey)>,
    ) -> Result<ContractSet> {
        let own = later[index].contract(kind)?;
        let next = self.continuation(index + 1, fallback, later, kind, dead)?;
        Ok(self.qualify(own, index + 1, &next))
    }

    fn qualify(&self, contract: &ContractSet, position: usize, continuation: &str) -> ContractSet {
        contract
            .substitute(&self.keywords.this, &self.keywords.advice_this(position))
            .substitute(&self.keywords.proc_, &format!("({})", continuation))
    }
}
