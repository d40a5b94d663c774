//! Program descriptions
//!
//! A program description lists the types of an advised program with their
//! contracts, plus the aspects whose advice wraps its methods. It stands in
//! for the annotations an interception layer would read.
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "Account",
//!       "invariant": ["$this.balance >= 0"],
//!       "methods": [
//!         { "name": "deposit", "params": ["double"], "param_names": ["amount"],
//!           "requires": ["amount>0"], "advised_by": ["Security.authenticate"] } ] }
//!   ],
//!   "aspects": [
//!     { "name": "Security",
//!       "advice": [ { "name": "authenticate", "runtime_test": "true", "requires": ["$proc"] } ] }
//!   ]
//! }
//! ```
//!
//! `requires`, `ensures` and `invariant` may be omitted, in which case the
//! declaration inherits the contract it overrides.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::advice::Guard;
use crate::bindings::BindingContext;
use crate::config::Config;
use crate::contract::{ContractKind, ContractSet};
use crate::enforcer::Enforcer;
use crate::hierarchy::{DeclKey, TypeHierarchy};
use crate::keywords::Keywords;
use crate::source::DeclarationTable;
use crate::value::Value;
use crate::{Error, Result};

/// Variable bindings of one sample call
pub type Sample = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    #[serde(default)]
    pub types: Vec<TypeSpec>,
    #[serde(default)]
    pub aspects: Vec<AspectSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub invariant: Option<Vec<String>>,
    #[serde(default)]
    pub constructors: Vec<MemberSpec>,
    #[serde(default)]
    pub methods: Vec<MemberSpec>,
    /// Receiver states the invariant is checked against
    #[serde(default)]
    pub samples: Vec<Sample>,
}

/// A method or a constructor. Constructors leave `name` empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub param_names: Option<Vec<String>>,
    #[serde(default)]
    pub requires: Option<Vec<String>>,
    #[serde(default)]
    pub ensures: Option<Vec<String>>,
    /// Advice wrapping this member, as `Aspect.advice`, highest precedence first
    #[serde(default)]
    pub advised_by: Vec<String>,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AspectSpec {
    pub name: String,
    #[serde(default)]
    pub advice: Vec<AdviceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdviceSpec {
    pub name: String,
    #[serde(default)]
    pub runtime_test: Guard,
    #[serde(default)]
    pub param_names: Option<Vec<String>>,
    #[serde(default)]
    pub requires: Option<Vec<String>>,
    #[serde(default)]
    pub ensures: Option<Vec<String>>,
}

/// A built program: hierarchy, declarations and samples
#[derive(Debug, Clone)]
pub struct Model {
    pub hierarchy: Arc<TypeHierarchy>,
    pub table: Arc<DeclarationTable>,
    pub samples: BTreeMap<DeclKey, Vec<Sample>>,
    /// Every advice, in declaration order
    pub advice: Vec<DeclKey>,
}

impl Program {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn build(&self) -> Result<Model> {
        let mut builder = TypeHierarchy::builder();
        let mut table = DeclarationTable::new();
        let mut samples = BTreeMap::new();
        let mut advice = Vec::new();

        for aspect in &self.aspects {
            for spec in &aspect.advice {
                let key = DeclKey::advice(&aspect.name, &spec.name);
                if advice.contains(&key) {
                    return Err(Error::Hierarchy(format!("advice {} declared twice", key)));
                }
                table.set_runtime_test(&key, spec.runtime_test.clone());
                declare(&mut table, &key, &spec.requires, &spec.ensures, &spec.param_names);
                advice.push(key);
            }
        }

        for ty in &self.types {
            builder.add_type(&ty.name, ty.parent.as_deref());
            if let Some(parts) = &ty.invariant {
                table.invariant(&ty.name, parts.iter().cloned());
            }
            if !ty.samples.is_empty() {
                samples.insert(DeclKey::ty(&ty.name), ty.samples.clone());
            }
            let members = ty
                .constructors
                .iter()
                .map(|c| (DeclKey::constructor(&ty.name, c.params.iter().cloned()), c))
                .chain(ty.methods.iter().map(|m| {
                    (DeclKey::method(&ty.name, &m.name, m.params.iter().cloned()), m)
                }));
            for (key, member) in members {
                if let DeclKey::Method { name, .. } = &key {
                    if name.is_empty() {
                        return Err(Error::Hierarchy(format!(
                            "a method of '{}' has no name",
                            ty.name
                        )));
                    }
                }
                builder.add_member(key.clone());
                declare(&mut table, &key, &member.requires, &member.ensures, &member.param_names);
                if !member.advised_by.is_empty() {
                    let list = member
                        .advised_by
                        .iter()
                        .map(|a| advice_key(a))
                        .collect::<Result<Vec<_>>>()?;
                    if let Some(unknown) = list.iter().find(|a| !advice.contains(a)) {
                        return Err(Error::UnknownDeclaration(unknown.to_string()));
                    }
                    table.set_advised_by(&key, list);
                }
                if !member.samples.is_empty() {
                    samples.insert(key, member.samples.clone());
                }
            }
        }

        let hierarchy = builder.build()?;
        tracing::debug!(
            types = self.types.len(),
            advice = advice.len(),
            "built program model"
        );
        Ok(Model {
            hierarchy: Arc::new(hierarchy),
            table: Arc::new(table),
            samples,
            advice,
        })
    }
}

fn declare(
    table: &mut DeclarationTable,
    key: &DeclKey,
    requires: &Option<Vec<String>>,
    ensures: &Option<Vec<String>>,
    param_names: &Option<Vec<String>>,
) {
    if let Some(parts) = requires {
        table.declare(key.clone(), ContractKind::Precondition, ContractSet::new(parts.iter().cloned()));
    }
    if let Some(parts) = ensures {
        table.declare(key.clone(), ContractKind::Postcondition, ContractSet::new(parts.iter().cloned()));
    }
    if let Some(names) = param_names {
        table.set_parameter_names(key, names.iter().cloned());
    }
}

/// Parse `Aspect.advice` or `@Aspect.advice`
fn advice_key(text: &str) -> Result<DeclKey> {
    let text = text.trim();
    let qualified = if text.starts_with('@') {
        text.to_string()
    } else {
        format!("@{}", text)
    };
    qualified.parse()
}

impl Model {
    pub fn enforcer(&self, config: Config) -> Result<Enforcer> {
        Enforcer::from_config(config, Arc::clone(&self.hierarchy), self.table.clone())
    }

    /// Sample contexts recorded for `decl`
    pub fn sample_contexts(&self, decl: &DeclKey, keywords: &Keywords) -> Vec<BindingContext> {
        self.samples
            .get(decl)
            .map(|samples| {
                samples
                    .iter()
                    .map(|sample| {
                        let mut ctx = BindingContext::new(keywords);
                        for (name, value) in sample {
                            ctx.bind(name.clone(), value.clone());
                        }
                        ctx
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Join points and the advice wrapping them
    pub fn join_points(&self) -> Vec<(DeclKey, Vec<DeclKey>)> {
        let mut out: Vec<_> = self
            .table
            .join_points()
            .map(|(jp, list)| (jp.clone(), list.to_vec()))
            .collect();
        out.sort();
        out
    }
}
