//! Where declared contracts come from
//!
//! The repository never inspects program text itself. Everything it needs
//! about a declaration is asked of a [`ContractSource`].

use std::collections::{BTreeMap, HashMap};

use crate::advice::Guard;
use crate::contract::{ContractKind, ContractSet};
use crate::hierarchy::DeclKey;

pub trait ContractSource: Send + Sync {
    /// The contract set written on `decl`, or `None` if it states none.
    /// Returned sets are copies; callers may not change the source.
    fn declared(&self, decl: &DeclKey, kind: ContractKind) -> Option<ContractSet>;

    /// Advice wrapping the join point `decl`, highest precedence first
    fn advised_by(&self, decl: &DeclKey) -> Vec<DeclKey>;

    /// Runtime test of an advice. Advice without one always applies.
    fn runtime_test(&self, advice: &DeclKey) -> Guard;

    /// Declared parameter names of a method, constructor or advice
    fn parameter_names(&self, decl: &DeclKey) -> Option<Vec<String>>;
}

/// In-memory [`ContractSource`]
#[derive(Debug, Clone, Default)]
pub struct DeclarationTable {
    contracts: BTreeMap<(DeclKey, ContractKind), ContractSet>,
    advised_by: HashMap<DeclKey, Vec<DeclKey>>,
    guards: HashMap<DeclKey, Guard>,
    parameter_names: HashMap<DeclKey, Vec<String>>,
}

impl DeclarationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: DeclKey, kind: ContractKind, set: ContractSet) -> &mut Self {
        self.contracts.insert((decl, kind), set);
        self
    }

    pub fn requires<I, S>(&mut self, decl: &DeclKey, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(decl.clone(), ContractKind::Precondition, ContractSet::new(parts))
    }

    pub fn ensures<I, S>(&mut self, decl: &DeclKey, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(decl.clone(), ContractKind::Postcondition, ContractSet::new(parts))
    }

    pub fn invariant<I, S>(&mut self, ty: &str, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declare(DeclKey::ty(ty), ContractKind::Invariant, ContractSet::new(parts))
    }

    pub fn set_advised_by(&mut self, join_point: &DeclKey, advice: Vec<DeclKey>) -> &mut Self {
        self.advised_by.insert(join_point.clone(), advice);
        self
    }

    pub fn set_runtime_test(&mut self, advice: &DeclKey, guard: Guard) -> &mut Self {
        self.guards.insert(advice.clone(), guard);
        self
    }

    pub fn set_parameter_names<S: Into<String>>(
        &mut self,
        decl: &DeclKey,
        names: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.parameter_names
            .insert(decl.clone(), names.into_iter().map(Into::into).collect());
        self
    }

    /// Every declared contract, ordered by declaration then kind
    pub fn iter(&self) -> impl Iterator<Item = (&DeclKey, ContractKind, &ContractSet)> {
        self.contracts.iter().map(|((d, k), s)| (d, *k, s))
    }

    /// Join points that carry an advice list
    pub fn join_points(&self) -> impl Iterator<Item = (&DeclKey, &[DeclKey])> {
        self.advised_by.iter().map(|(jp, list)| (jp, list.as_slice()))
    }
}

impl ContractSource for DeclarationTable {
    fn declared(&self, decl: &DeclKey, kind: ContractKind) -> Option<ContractSet> {
        self.contracts.get(&(decl.clone(), kind)).cloned()
    }

    fn advised_by(&self, decl: &DeclKey) -> Vec<DeclKey> {
        self.advised_by.get(decl).cloned().unwrap_or_default()
    }

    fn runtime_test(&self, advice: &DeclKey) -> Guard {
        self.guards.get(advice).cloned().unwrap_or_default()
    }

    fn parameter_names(&self, decl: &DeclKey) -> Option<Vec<String>> {
        self.parameter_names.get(decl).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_returns_copies() {
        let deposit = DeclKey::method("Account", "deposit", ["double"]);
        let mut table = DeclarationTable::new();
        table.requires(&deposit, ["amount>0"]);

        let mut copy = table.declared(&deposit, ContractKind::Precondition).unwrap();
        copy = copy.substitute("amount", "x");
        assert_eq!(copy.parts(), &["x>0"]);
        assert_eq!(
            table
                .declared(&deposit, ContractKind::Precondition)
                .unwrap()
                .parts(),
            &["amount>0"]
        );
        assert!(table.declared(&deposit, ContractKind::Postcondition).is_none());
    }

    #[test]
    fn test_defaults_for_missing_entries() {
        let table = DeclarationTable::new();
        let advice = DeclKey::advice("Logging", "trace");
        assert!(table.runtime_test(&advice).is_always());
        assert!(table.advised_by(&advice).is_empty());
        assert!(table.parameter_names(&advice).is_none());
    }
}
