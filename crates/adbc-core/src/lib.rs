//! Adbc Core - design-by-contract enforcement for advised programs
//!
//! Contracts are boolean expressions attached to types (invariants),
//! methods and constructors (pre- and postconditions) and advice. This
//! crate resolves them through inheritance and advice chains, checks them
//! around guarded calls and assigns blame when one is broken.
//!
//! # Architecture
//!
//! ```text
//! Program → TypeHierarchy + DeclarationTable (ContractSource)
//!                              ↓
//!                   ContractRepository → resolves $super, caches
//!                              ↓
//!     AdviceResolver → resolves $proc    OldValueRewriter → captures $old
//!                              ↓
//!          Enforcer → ViolationDetector → ExpressionEngine
//!                              ↓
//!                     Violation + blame
//! ```
//!
//! # Guarantees
//!
//! - **Blame**: a failed precondition blames the caller, anything else the
//!   declaration, and a broken override the override itself
//! - **Resolved once**: each contract is resolved at most once per repository
//! - **Placeholder free**: engines never see `$super` or `$proc`
//! - **Inert when off**: with enforcement disabled nothing is bound or evaluated

pub mod advice;
pub mod bindings;
pub mod config;
pub mod contract;
pub mod detector;
pub mod enforcer;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod keywords;
pub mod program;
pub mod repository;
pub mod rewriter;
pub mod source;
pub mod value;
pub mod verifier;

pub use advice::{AdviceLink, AdviceReceivers, AdviceResolver, Guard, Resolution};
pub use bindings::BindingContext;
pub use config::Config;
pub use contract::{ContractKind, ContractSet};
pub use detector::ViolationDetector;
pub use enforcer::{Enforcer, Phase, PostState};
pub use engine::{ExpressionEngine, StandardEngine};
pub use error::{Error, Result, SubstitutionRule, Violation, ViolationKind};
pub use hierarchy::{DeclKey, HierarchyBuilder, TypeHierarchy};
pub use keywords::Keywords;
pub use program::{Model, Program};
pub use repository::{CacheStats, ContractRepository};
pub use rewriter::OldValueRewriter;
pub use source::{ContractSource, DeclarationTable};
pub use value::Value;
pub use verifier::{verify, Diagnostic, DiagnosticKind, Severity, VerificationResult};
