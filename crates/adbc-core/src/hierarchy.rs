//! Declaration keys and the type hierarchy
//!
//! The hierarchy is an explicit parent-pointer graph built once. Building it
//! also computes, for every method and constructor, the nearest declaration
//! it overrides, so lookups at check time never walk the graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ── Declaration keys ───────────────────────────────────────

/// Identifies one contract-bearing declaration.
///
/// Overloads differ by parameter types, overrides differ by owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeclKey {
    Method {
        owner: String,
        name: String,
        params: Vec<String>,
    },
    Constructor {
        owner: String,
        params: Vec<String>,
    },
    Type {
        name: String,
    },
    Advice {
        aspect: String,
        name: String,
    },
}

impl DeclKey {
    pub fn method<S: Into<String>>(owner: &str, name: &str, params: impl IntoIterator<Item = S>) -> Self {
        DeclKey::Method {
            owner: owner.to_string(),
            name: name.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn constructor<S: Into<String>>(owner: &str, params: impl IntoIterator<Item = S>) -> Self {
        DeclKey::Constructor {
            owner: owner.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ty(name: &str) -> Self {
        DeclKey::Type {
            name: name.to_string(),
        }
    }

    pub fn advice(aspect: &str, name: &str) -> Self {
        DeclKey::Advice {
            aspect: aspect.to_string(),
            name: name.to_string(),
        }
    }

    /// The type a method, constructor or type key belongs to
    pub fn owner(&self) -> Option<&str> {
        match self {
            DeclKey::Method { owner, .. } | DeclKey::Constructor { owner, .. } => Some(owner),
            DeclKey::Type { name } => Some(name),
            DeclKey::Advice { .. } => None,
        }
    }

    pub fn is_advice(&self) -> bool {
        matches!(self, DeclKey::Advice { .. })
    }

    /// Same declaration moved to another owner
    fn with_owner(&self, new_owner: &str) -> DeclKey {
        match self {
            DeclKey::Method { name, params, .. } => DeclKey::Method {
                owner: new_owner.to_string(),
                name: name.clone(),
                params: params.clone(),
            },
            DeclKey::Constructor { params, .. } => DeclKey::Constructor {
                owner: new_owner.to_string(),
                params: params.clone(),
            },
            DeclKey::Type { .. } => DeclKey::ty(new_owner),
            DeclKey::Advice { .. } => self.clone(),
        }
    }
}

impl fmt::Display for DeclKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclKey::Method {
                owner,
                name,
                params,
            } => write!(f, "{}.{}({})", owner, name, params.join(", ")),
            DeclKey::Constructor { owner, params } => {
                write!(f, "{}::new({})", owner, params.join(", "))
            }
            DeclKey::Type { name } => write!(f, "{}", name),
            DeclKey::Advice { aspect, name } => write!(f, "@{}.{}", aspect, name),
        }
    }
}

fn split_params(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl FromStr for DeclKey {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        let bad = || Error::UnknownDeclaration(format!("cannot parse declaration '{}'", text));
        if text.is_empty() {
            return Err(bad());
        }
        if let Some(rest) = text.strip_prefix('@') {
            let (aspect, name) = rest.rsplit_once('.').ok_or_else(bad)?;
            if aspect.is_empty() || name.is_empty() {
                return Err(bad());
            }
            return Ok(DeclKey::advice(aspect, name));
        }
        let Some(open) = text.find('(') else {
            return Ok(DeclKey::ty(text));
        };
        let inner = text[open + 1..].strip_suffix(')').ok_or_else(bad)?;
        let params = split_params(inner);
        let head = &text[..open];
        if let Some(owner) = head.strip_suffix("::new") {
            if owner.is_empty() {
                return Err(bad());
            }
            return Ok(DeclKey::Constructor {
                owner: owner.to_string(),
                params,
            });
        }
        let (owner, name) = head.rsplit_once('.').ok_or_else(bad)?;
        if owner.is_empty() || name.is_empty() {
            return Err(bad());
        }
        Ok(DeclKey::Method {
            owner: owner.to_string(),
            name: name.to_string(),
            params,
        })
    }
}

// ── Hierarchy ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct TypeEntry {
    parent: Option<String>,
    methods: BTreeSet<(String, Vec<String>)>,
    constructors: BTreeSet<Vec<String>>,
}

/// Collects types and members, then validates them into a [`TypeHierarchy`]
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    types: BTreeMap<String, TypeEntry>,
    duplicates: Vec<String>,
    orphans: Vec<DeclKey>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, name: &str, parent: Option<&str>) -> &mut Self {
        if self.types.contains_key(name) {
            self.duplicates.push(name.to_string());
        } else {
            self.types.insert(
                name.to_string(),
                TypeEntry {
                    parent: parent.map(str::to_string),
                    ..TypeEntry::default()
                },
            );
        }
        self
    }

    /// Register a method or constructor; the owner must be added before `build`
    pub fn add_member(&mut self, decl: DeclKey) -> &mut Self {
        let Some(entry) = decl.owner().and_then(|o| self.types.get_mut(o)) else {
            self.orphans.push(decl);
            return self;
        };
        match &decl {
            DeclKey::Method { name, params, .. } => {
                entry.methods.insert((name.clone(), params.clone()));
            }
            DeclKey::Constructor { params, .. } => {
                entry.constructors.insert(params.clone());
            }
            _ => self.orphans.push(decl.clone()),
        }
        self
    }

    pub fn build(&self) -> Result<TypeHierarchy> {
        if let Some(name) = self.duplicates.first() {
            return Err(Error::Hierarchy(format!("type '{}' declared twice", name)));
        }
        if let Some(decl) = self.orphans.first() {
            return match decl.owner() {
                Some(owner) if !self.types.contains_key(owner) => {
                    Err(Error::UnknownType(owner.to_string()))
                }
                _ => Err(Error::Hierarchy(format!("'{}' is not a type member", decl))),
            };
        }
        for (name, entry) in &self.types {
            if let Some(parent) = &entry.parent {
                if !self.types.contains_key(parent) {
                    return Err(Error::Hierarchy(format!(
                        "type '{}' extends unknown type '{}'",
                        name, parent
                    )));
                }
            }
        }
        for name in self.types.keys() {
            let mut seen = BTreeSet::new();
            let mut current = Some(name.as_str());
            while let Some(ty) = current {
                if !seen.insert(ty) {
                    return Err(Error::Hierarchy(format!(
                        "inheritance cycle through '{}'",
                        ty
                    )));
                }
                current = self.types.get(ty).and_then(|e| e.parent.as_deref());
            }
        }

        let mut hierarchy = TypeHierarchy {
            types: self.types.clone(),
            overrides: HashMap::new(),
        };
        let mut overrides = HashMap::new();
        for (name, entry) in &self.types {
            if let Some(parent) = &entry.parent {
                overrides.insert(DeclKey::ty(name), DeclKey::ty(parent));
            }
            for (method, params) in &entry.methods {
                let decl = DeclKey::method(name, method, params.iter().cloned());
                if let Some(found) = hierarchy.find_in_ancestors(&decl) {
                    overrides.insert(decl, found);
                }
            }
            for params in &entry.constructors {
                let decl = DeclKey::constructor(name, params.iter().cloned());
                if let Some(found) = hierarchy.find_in_ancestors(&decl) {
                    overrides.insert(decl, found);
                }
            }
        }
        hierarchy.overrides = overrides;
        tracing::debug!(
            types = hierarchy.types.len(),
            overrides = hierarchy.overrides.len(),
            "built type hierarchy"
        );
        Ok(hierarchy)
    }
}

/// Acyclic single-inheritance graph with a precomputed override map
#[derive(Debug, Clone)]
pub struct TypeHierarchy {
    types: BTreeMap<String, TypeEntry>,
    overrides: HashMap<DeclKey, DeclKey>,
}

impl TypeHierarchy {
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::new()
    }

    pub fn contains(&self, ty: &str) -> bool {
        self.types.contains_key(ty)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn parent(&self, ty: &str) -> Result<Option<&str>> {
        self.types
            .get(ty)
            .map(|e| e.parent.as_deref())
            .ok_or_else(|| Error::UnknownType(ty.to_string()))
    }

    /// Proper ancestors of `ty`, nearest first
    pub fn ancestors(&self, ty: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut current = self.types.get(ty).and_then(|e| e.parent.as_deref());
        while let Some(name) = current {
            out.push(name);
            current = self.types.get(name).and_then(|e| e.parent.as_deref());
        }
        out
    }

    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.ancestors(sub).contains(&sup)
    }

    /// True if the method, constructor or type named by `decl` is declared here
    pub fn declares(&self, decl: &DeclKey) -> bool {
        match decl {
            DeclKey::Method {
                owner,
                name,
                params,
            } => self
                .types
                .get(owner)
                .is_some_and(|e| e.methods.contains(&(name.clone(), params.clone()))),
            DeclKey::Constructor { owner, params } => self
                .types
                .get(owner)
                .is_some_and(|e| e.constructors.contains(params)),
            DeclKey::Type { name } => self.types.contains_key(name),
            DeclKey::Advice { .. } => false,
        }
    }

    /// The nearest declaration `decl` overrides. For a type this is its
    /// direct parent type; advice overrides nothing.
    pub fn overridden(&self, decl: &DeclKey) -> Option<&DeclKey> {
        self.overrides.get(decl)
    }

    /// The declaration that runs when `name(params)` is called on a `ty`
    /// receiver: the nearest one declared in `ty` or its ancestors.
    pub fn dispatch(&self, ty: &str, name: &str, params: &[String]) -> Option<DeclKey> {
        let decl = DeclKey::method(ty, name, params.iter().cloned());
        if self.declares(&decl) {
            return Some(decl);
        }
        self.find_in_ancestors(&decl)
    }

    /// Every method and constructor key, ordered by owner
    pub fn members(&self) -> Vec<DeclKey> {
        let mut out = Vec::new();
        for (owner, entry) in &self.types {
            for params in &entry.constructors {
                out.push(DeclKey::constructor(owner, params.iter().cloned()));
            }
            for (name, params) in &entry.methods {
                out.push(DeclKey::method(owner, name, params.iter().cloned()));
            }
        }
        out
    }

    fn find_in_ancestors(&self, decl: &DeclKey) -> Option<DeclKey> {
        let owner = decl.owner()?;
        self.ancestors(owner)
            .into_iter()
            .map(|ancestor| decl.with_owner(ancestor))
            .find(|candidate| self.declares(candidate))
    }
}
