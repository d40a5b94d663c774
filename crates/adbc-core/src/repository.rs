//! Inheritance-aware contract lookup with a shared cache
//!
//! A declaration that states no contract inherits the one it overrides
//! (`{"$super"}`). A stated contract may mention `$super` explicitly to
//! combine with the inherited one. Resolution replaces `$super` by the
//! merged, already resolved contract of the overridden declaration, or by
//! `(true)` at the root. A root declaration that states nothing is the
//! literal `true`.
//!
//! Resolved sets are cached per kind and declaration. Entries are written
//! once and never change afterwards. Concurrent first lookups of the same
//! key serialize on a per-key lock; different keys never block each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::contract::{ContractKind, ContractSet};
use crate::hierarchy::{DeclKey, TypeHierarchy};
use crate::keywords::Keywords;
use crate::source::ContractSource;
use crate::{Error, Result};

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct ContractRepository {
    hierarchy: Arc<TypeHierarchy>,
    source: Arc<dyn ContractSource>,
    keywords: Keywords,
    preconditions: DashMap<DeclKey, ContractSet>,
    postconditions: DashMap<DeclKey, ContractSet>,
    invariants: DashMap<DeclKey, ContractSet>,
    locks: DashMap<(ContractKind, DeclKey), Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ContractRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRepository")
            .field("keywords", &self.keywords)
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

impl ContractRepository {
    pub fn new(
        hierarchy: Arc<TypeHierarchy>,
        source: Arc<dyn ContractSource>,
        keywords: Keywords,
    ) -> Self {
        ContractRepository {
            hierarchy,
            source,
            keywords,
            preconditions: DashMap::new(),
            postconditions: DashMap::new(),
            invariants: DashMap::new(),
            locks: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    pub fn source(&self) -> &dyn ContractSource {
        self.source.as_ref()
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    /// Resolved precondition of a method, constructor or advice
    pub fn precondition(&self, decl: &DeclKey) -> Result<ContractSet> {
        self.resolve(ContractKind::Precondition, decl)
    }

    /// Resolved postcondition of a method, constructor or advice
    pub fn postcondition(&self, decl: &DeclKey) -> Result<ContractSet> {
        self.resolve(ContractKind::Postcondition, decl)
    }

    /// Resolved invariant of a type
    pub fn invariant(&self, ty: &str) -> Result<ContractSet> {
        self.resolve(ContractKind::Invariant, &DeclKey::ty(ty))
    }

    /// The declaration whose contract `decl` inherits
    pub fn overridden(&self, decl: &DeclKey) -> Option<DeclKey> {
        self.hierarchy.overridden(decl).cloned()
    }

    /// The declared contract, before `$super` is resolved
    pub fn declared(&self, kind: ContractKind, decl: &DeclKey) -> ContractSet {
        self.source
            .declared(decl, kind)
            .unwrap_or_else(|| ContractSet::inherited(&self.keywords))
    }

    /// Resolve the `kind` contract of `decl`, caching the result
    pub fn resolve(&self, kind: ContractKind, decl: &DeclKey) -> Result<ContractSet> {
        let cache = self.cache(kind);
        if let Some(hit) = cache.get(decl) {
            trace!(%kind, %decl, "contract cache hit");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }
        self.check_applicable(kind, decl)?;

        let lock = self.locks.entry((kind, decl.clone())).or_default().value().clone();
        let _guard = lock.lock();
        if let Some(hit) = cache.get(decl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let parent = self.hierarchy.overridden(decl);
        let resolved = match (self.source.declared(decl, kind), parent) {
            (None, None) => ContractSet::new(["true"]),
            (declared, parent) => {
                let declared = declared.unwrap_or_else(|| ContractSet::inherited(&self.keywords));
                let inherited = match parent {
                    Some(parent) => self.resolve(kind, parent)?.merged(),
                    None => "true".to_string(),
                };
                declared.substitute(&self.keywords.inherited, &format!("({})", inherited))
            }
        };
        debug!(%kind, %decl, contract = %resolved, "resolved contract");

        cache.insert(decl.clone(), resolved.clone());
        Ok(resolved)
    }

    /// The cached entry, without resolving
    pub fn cached(&self, kind: ContractKind, decl: &DeclKey) -> Option<ContractSet> {
        self.cache(kind).get(decl).map(|entry| entry.clone())
    }

    pub fn cached_len(&self) -> usize {
        self.preconditions.len() + self.postconditions.len() + self.invariants.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached entry. Per-key locks survive so that a resolution
    /// in flight still excludes a concurrent miss on the same key.
    pub fn reset(&self) {
        self.preconditions.clear();
        self.postconditions.clear();
        self.invariants.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("contract cache cleared");
    }

    fn cache(&self, kind: ContractKind) -> &DashMap<DeclKey, ContractSet> {
        match kind {
            ContractKind::Precondition => &self.preconditions,
            ContractKind::Postcondition => &self.postconditions,
            ContractKind::Invariant => &self.invariants,
        }
    }

    fn check_applicable(&self, kind: ContractKind, decl: &DeclKey) -> Result<()> {
        match (kind, decl) {
            (ContractKind::Invariant, DeclKey::Type { name }) => {
                if self.hierarchy.contains(name) {
                    Ok(())
                } else {
                    Err(Error::UnknownType(name.clone()))
                }
            }
            (ContractKind::Invariant, _) | (_, DeclKey::Type { .. }) => Err(
                Error::UnknownDeclaration(format!("{} has no {}", decl, kind)),
            ),
            (_, DeclKey::Advice { .. }) => Ok(()),
            (_, member) => {
                let owner = member.owner().unwrap_or_default();
                if !self.hierarchy.contains(owner) {
                    Err(Error::UnknownType(owner.to_string()))
                } else if !self.hierarchy.declares(member) {
                    Err(Error::UnknownDeclaration(member.to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DeclarationTable;
    use std::thread;

    fn transfer(owner: &str) -> DeclKey {
        DeclKey::method(owner, "transfer", ["double", "Account"])
    }

    fn repository(table: DeclarationTable) -> ContractRepository {
        let mut b = TypeHierarchy::builder();
        b.add_type("Account", None)
            .add_type("SavingsAccount", Some("Account"))
            .add_type("Locked", Some("SavingsAccount"))
            .add_member(transfer("Account"))
            .add_member(transfer("SavingsAccount"))
            .add_member(transfer("Locked"))
            .add_member(DeclKey::method("Account", "getBalance", Vec::<String>::new()));
        ContractRepository::new(Arc::new(b.build().unwrap()), Arc::new(table), Keywords::default())
    }

    fn bank_table() -> DeclarationTable {
        let mut t = DeclarationTable::new();
        t.requires(&transfer("Account"), ["amount>0", "to != null"])
            .requires(&transfer("SavingsAccount"), ["$super", "$this.owner == to.owner"])
            .invariant("Account", ["$this.balance >= 0"])
            .invariant("SavingsAccount", ["$super && $this.rate > 0"]);
        t
    }

    #[test]
    fn test_root_super_is_true() {
        let mut t = DeclarationTable::new();
        t.requires(&transfer("Account"), ["$super && amount>0"]);
        let repo = repository(t);
        assert_eq!(
            repo.precondition(&transfer("Account")).unwrap().parts(),
            &["(true) && amount>0"]
        );
        // nothing declared anywhere
        assert_eq!(
            repo.postcondition(&transfer("Account")).unwrap().parts(),
            &["true"]
        );
    }

    #[test]
    fn test_super_substituted_with_merged_parent() {
        let repo = repository(bank_table());
        assert_eq!(
            repo.precondition(&transfer("SavingsAccount")).unwrap().parts(),
            &["((amount>0) && (to != null))", "$this.owner == to.owner"]
        );
    }

    #[test]
    fn test_undeclared_inherits_through_chain() {
        let repo = repository(bank_table());
        let locked = repo.precondition(&transfer("Locked")).unwrap();
        assert_eq!(
            locked.parts(),
            &["((((amount>0) && (to != null))) && ($this.owner == to.owner))"]
        );
    }

    #[test]
    fn test_invariant_uses_direct_superclass() {
        let repo = repository(bank_table());
        assert_eq!(
            repo.invariant("SavingsAccount").unwrap().parts(),
            &["($this.balance >= 0) && $this.rate > 0"]
        );
        assert_eq!(repo.invariant("Locked").unwrap().parts(), &["(($this.balance >= 0) && $this.rate > 0)"]);
        assert_eq!(repo.invariant("Account").unwrap().parts(), &["$this.balance >= 0"]);
    }

    #[test]
    fn test_lookup_is_content_stable_and_cached() {
        let repo = repository(bank_table());
        let first = repo.precondition(&transfer("SavingsAccount")).unwrap();
        let second = repo.precondition(&transfer("SavingsAccount")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert!(repo.stats().hits >= 1);
        assert!(repo
            .cached(ContractKind::Precondition, &transfer("Account"))
            .is_some());
    }

    #[test]
    fn test_source_is_never_rewritten() {
        let repo = repository(bank_table());
        repo.precondition(&transfer("SavingsAccount")).unwrap();
        assert_eq!(
            repo.declared(ContractKind::Precondition, &transfer("SavingsAccount"))
                .parts(),
            &["$super", "$this.owner == to.owner"]
        );
        repo.reset();
        assert_eq!(repo.cached_len(), 0);
        assert_eq!(
            repo.precondition(&transfer("SavingsAccount")).unwrap().parts()[0],
            "((amount>0) && (to != null))"
        );
    }

    #[test]
    fn test_super_inside_identifier_untouched() {
        let mut t = DeclarationTable::new();
        t.requires(&transfer("Account"), ["$superuser || $super"]);
        let repo = repository(t);
        assert_eq!(
            repo.precondition(&transfer("Account")).unwrap().parts(),
            &["$superuser || (true)"]
        );
    }

    #[test]
    fn test_unknown_declarations() {
        let repo = repository(bank_table());
        assert!(matches!(repo.invariant("Nope"), Err(Error::UnknownType(_))));
        assert!(matches!(
            repo.precondition(&DeclKey::method("Account", "close", Vec::<String>::new())),
            Err(Error::UnknownDeclaration(_))
        ));
        assert!(matches!(
            repo.precondition(&DeclKey::method("Nope", "close", Vec::<String>::new())),
            Err(Error::UnknownType(_))
        ));
        assert!(matches!(
            repo.precondition(&DeclKey::ty("Account")),
            Err(Error::UnknownDeclaration(_))
        ));
    }

    #[test]
    fn test_advice_has_no_parent() {
        let repo = repository(DeclarationTable::new());
        let advice = DeclKey::advice("Security", "authenticate");
        assert_eq!(repo.precondition(&advice).unwrap().parts(), &["true"]);
    }

    #[test]
    fn test_concurrent_first_lookups_agree() {
        let repo = Arc::new(repository(bank_table()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || repo.precondition(&transfer("Locked")).unwrap())
            })
            .collect();
        let results: Vec<ContractSet> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(repo.stats().misses, 3);
    }

    #[test]
    fn test_concurrent_hits_are_all_counted() {
        let repo = Arc::new(repository(bank_table()));
        repo.precondition(&transfer("SavingsAccount")).unwrap();
        let before = repo.stats();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                thread::spawn(move || {
                    for _ in 0..100 {
                        repo.precondition(&transfer("SavingsAccount")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(repo.stats().hits, before.hits + 800);
        assert_eq!(repo.stats().misses, before.misses);
    }

    #[test]
    fn test_reset_keeps_key_locks() {
        let repo = repository(bank_table());
        repo.precondition(&transfer("SavingsAccount")).unwrap();
        let key = (ContractKind::Precondition, transfer("SavingsAccount"));
        let lock = repo.locks.get(&key).unwrap().value().clone();
        repo.reset();
        assert_eq!(repo.stats(), CacheStats::default());
        assert!(Arc::ptr_eq(&lock, repo.locks.get(&key).unwrap().value()));
    }

    #[test]
    fn test_undeclared_root_is_literal_true() {
        let repo = repository(bank_table());
        assert_eq!(
            repo.postcondition(&transfer("Account")).unwrap().parts(),
            &["true"]
        );
        // an undeclared override still inherits its parent
        assert_eq!(
            repo.postcondition(&transfer("SavingsAccount")).unwrap().parts(),
            &["(true)"]
        );
    }
}
