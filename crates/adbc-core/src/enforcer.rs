//! Contract checks around guarded calls
//!
//! The enforcer is what an interception layer talks to. For one call it
//! checks, in order:
//!
//! 1. the receiver's invariant on entry (methods only)
//! 2. the precondition
//! 3. captures `$old(...)` values for the postcondition
//! 4. runs the body and binds `$result`
//! 5. the postcondition
//! 6. the receiver's invariant on exit
//!
//! With substitution checking on, a failing contract is compared with the
//! contract it overrides so that a broken override is blamed on the
//! override instead of on its caller.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::advice::{AdviceLink, AdviceReceivers, AdviceResolver, Resolution};
use crate::bindings::BindingContext;
use crate::config::Config;
use crate::contract::{ContractKind, ContractSet};
use crate::detector::ViolationDetector;
use crate::engine::{self, ExpressionEngine};
use crate::error::{SubstitutionRule, Violation, ViolationKind};
use crate::hierarchy::{DeclKey, TypeHierarchy};
use crate::keywords::Keywords;
use crate::repository::ContractRepository;
use crate::rewriter::OldValueRewriter;
use crate::source::ContractSource;
use crate::value::Value;
use crate::{Error, Result};

/// When an invariant is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Entry,
    Exit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Entry => write!(f, "entry"),
            Phase::Exit => write!(f, "exit"),
        }
    }
}

/// Postcondition state captured before a body runs
#[derive(Debug, Clone, Default)]
pub struct PostState {
    contract: ContractSet,
    /// Contract the postcondition must not be weaker than
    reference: Option<ContractSet>,
    snapshots: Vec<(String, Value)>,
    active: bool,
}

impl PostState {
    fn inactive() -> Self {
        Self::default()
    }

    /// The postcondition with `$old` calls replaced
    pub fn contract(&self) -> &ContractSet {
        &self.contract
    }

    pub fn snapshots(&self) -> &[(String, Value)] {
        &self.snapshots
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

pub struct Enforcer {
    config: Config,
    keywords: Keywords,
    repository: Arc<ContractRepository>,
    detector: ViolationDetector,
    resolver: AdviceResolver,
}

impl Enforcer {
    pub fn new(
        config: Config,
        repository: Arc<ContractRepository>,
        engine: Arc<dyn ExpressionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let keywords = config.keywords()?;
        if repository.keywords() != &keywords {
            return Err(Error::Config(format!(
                "repository uses keyword prefix '{}' but the configuration says '{}'",
                repository.keywords().prefix,
                keywords.prefix
            )));
        }
        let resolver = AdviceResolver::new(&keywords, config.reject_dead_advice);
        Ok(Enforcer {
            config,
            keywords,
            repository,
            detector: ViolationDetector::new(engine),
            resolver,
        })
    }

    /// Build the repository and engine named by `config`
    pub fn from_config(
        config: Config,
        hierarchy: Arc<TypeHierarchy>,
        source: Arc<dyn ContractSource>,
    ) -> Result<Self> {
        config.validate()?;
        let keywords = config.keywords()?;
        let engine = engine::by_name(&config.engine)?;
        let repository = Arc::new(ContractRepository::new(hierarchy, source, keywords));
        Self::new(config, repository, engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub fn repository(&self) -> &Arc<ContractRepository> {
        &self.repository
    }

    pub fn detector(&self) -> &ViolationDetector {
        &self.detector
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enforce_contracts
    }

    /// A fresh binding context using this enforcer's keywords
    pub fn context(&self) -> BindingContext {
        BindingContext::new(&self.keywords)
    }

    fn checks_postconditions(&self) -> bool {
        self.config.enforce_contracts && self.config.check_postconditions
    }

    fn violation(&self, violation: Violation) -> Error {
        debug!(
            kind = %violation.kind,
            expression = %violation.expression,
            location = %violation.location,
            blame = %violation.blame,
            "contract violation"
        );
        Error::Violation(violation)
    }

    fn caller_of(decl: &DeclKey, ctx: &BindingContext) -> String {
        ctx.caller()
            .map(str::to_string)
            .unwrap_or_else(|| format!("caller of {}", decl))
    }

    // ── Binding ────────────────────────────────────────────

    /// Bind call arguments under the parameter names of `decl` and of every
    /// declaration it overrides, so inherited contract text finds them too.
    /// Names declared on `decl` itself win on conflict.
    pub fn bind_arguments(&self, decl: &DeclKey, ctx: &mut BindingContext, args: Vec<Value>) {
        if !self.is_enabled() {
            return;
        }
        let mut chain = vec![decl.clone()];
        while let Some(parent) = chain.last().and_then(|d| self.repository.overridden(d)) {
            chain.push(parent);
        }
        let source = self.repository.source();
        for d in chain.iter().rev() {
            let names = source.parameter_names(d);
            ctx.bind_parameters(names.as_deref(), args.clone());
        }
    }

    /// Bind `$this0` to the receiver of `advice` and `$this{k+1}` to the
    /// receiver of `later[k]`
    fn bind_chain_receivers(
        advice: &DeclKey,
        later: &[AdviceLink],
        receivers: &AdviceReceivers,
        ctx: &mut BindingContext,
    ) {
        if let Some(receiver) = receivers.get(advice) {
            ctx.bind_advice_receiver(0, receiver.clone());
        }
        for (k, link) in later.iter().enumerate() {
            if let Some(receiver) = link.receiver.as_ref().or_else(|| receivers.get(&link.advice)) {
                ctx.bind_advice_receiver(k + 1, receiver.clone());
            }
        }
    }

    // ── Method and constructor checks ──────────────────────

    /// Check the resolved precondition of `decl`.
    ///
    /// A failure blames the caller, unless substitution checking is on and
    /// the overridden precondition holds: then the override strengthened
    /// its precondition and is blamed itself.
    pub fn check_pre(&self, decl: &DeclKey, ctx: &BindingContext) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let pre = self.repository.precondition(decl)?;
        let Some(failing) = self.detector.check(&pre, ctx)? else {
            return Ok(());
        };
        if self.config.check_substitution {
            if let Some(parent) = self.repository.overridden(decl) {
                let parent_pre = self.repository.precondition(&parent)?;
                if self.detector.holds(&parent_pre, ctx)? {
                    return Err(self.violation(Violation::substitution(
                        SubstitutionRule::PreconditionStrengthened,
                        failing,
                        decl.to_string(),
                        decl.to_string(),
                    )));
                }
            }
        }
        Err(self.violation(Violation::new(
            ViolationKind::Precondition,
            failing,
            decl.to_string(),
            Self::caller_of(decl, ctx),
        )))
    }

    /// Capture `$old` values for the postcondition of `decl`. Must run
    /// before the body.
    pub fn prepare_post(&self, decl: &DeclKey, ctx: &BindingContext) -> Result<PostState> {
        if !self.checks_postconditions() {
            return Ok(PostState::inactive());
        }
        let post = self.repository.postcondition(decl)?;
        let reference = match self.repository.overridden(decl) {
            Some(parent) if self.config.check_substitution => {
                Some(self.repository.postcondition(&parent)?)
            }
            _ => None,
        };
        self.capture(&post, reference.as_ref(), ctx)
    }

    fn capture(
        &self,
        post: &ContractSet,
        reference: Option<&ContractSet>,
        ctx: &BindingContext,
    ) -> Result<PostState> {
        let engine = self.detector.engine();
        let mut rewriter = OldValueRewriter::new(&self.keywords);
        let contract = rewriter.rewrite_set(post, |arg| engine.evaluate(arg, ctx))?;
        let reference = match reference {
            Some(r) => Some(rewriter.rewrite_set(r, |arg| engine.evaluate(arg, ctx))?),
            None => None,
        };
        Ok(PostState {
            contract,
            reference,
            snapshots: rewriter.into_snapshots(),
            active: true,
        })
    }

    /// Check the postcondition captured by [`Enforcer::prepare_post`].
    /// `$result` must already be bound.
    pub fn check_post(&self, decl: &DeclKey, state: PostState, ctx: &mut BindingContext) -> Result<()> {
        self.finish_post(decl, state, ctx)
    }

    fn finish_post(&self, blamed: &DeclKey, state: PostState, ctx: &mut BindingContext) -> Result<()> {
        if !state.active || !self.checks_postconditions() {
            return Ok(());
        }
        for (name, value) in state.snapshots {
            ctx.bind(name, value);
        }
        if let Some(failing) = self.detector.check(&state.contract, ctx)? {
            return Err(self.violation(Violation::new(
                ViolationKind::Postcondition,
                failing,
                blamed.to_string(),
                blamed.to_string(),
            )));
        }
        if let Some(reference) = &state.reference {
            if let Some(failing) = self.detector.check(reference, ctx)? {
                return Err(self.violation(Violation::substitution(
                    SubstitutionRule::PostconditionWeakened,
                    failing,
                    blamed.to_string(),
                    blamed.to_string(),
                )));
            }
        }
        Ok(())
    }

    /// Check the resolved invariant of `ty` against the receiver in `ctx`
    pub fn check_invariant(&self, ty: &str, ctx: &BindingContext, phase: Phase) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let invariant = self.repository.invariant(ty)?;
        let location = format!("{} (on {})", ty, phase);
        if let Some(failing) = self.detector.check(&invariant, ctx)? {
            return Err(self.violation(Violation::new(
                ViolationKind::Invariant,
                failing,
                location,
                ty,
            )));
        }
        if self.config.check_substitution {
            if let Some(DeclKey::Type { name: parent }) = self.repository.overridden(&DeclKey::ty(ty)) {
                let parent_invariant = self.repository.invariant(&parent)?;
                if let Some(failing) = self.detector.check(&parent_invariant, ctx)? {
                    return Err(self.violation(Violation::substitution(
                        SubstitutionRule::InvariantNotPreserved,
                        failing,
                        location,
                        ty,
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run `body` as a guarded call of `decl` on a receiver of its owner type
    pub fn invoke<F>(&self, decl: &DeclKey, ctx: &mut BindingContext, body: F) -> Result<Value>
    where
        F: FnOnce(&mut BindingContext) -> Result<Value>,
    {
        let owner = decl.owner().unwrap_or_default().to_string();
        self.invoke_as(&owner, decl, ctx, body)
    }

    /// Run `body` as a guarded call of `decl` on a receiver of type
    /// `receiver_type`, whose invariant is the one checked
    pub fn invoke_as<F>(
        &self,
        receiver_type: &str,
        decl: &DeclKey,
        ctx: &mut BindingContext,
        body: F,
    ) -> Result<Value>
    where
        F: FnOnce(&mut BindingContext) -> Result<Value>,
    {
        if !self.is_enabled() {
            return body(ctx);
        }
        let is_method = match decl {
            DeclKey::Method { .. } => true,
            DeclKey::Constructor { .. } => false,
            other => {
                return Err(Error::UnknownDeclaration(format!(
                    "{} is not a method or constructor",
                    other
                )))
            }
        };
        if is_method {
            self.check_invariant(receiver_type, ctx, Phase::Entry)?;
        }
        self.check_pre(decl, ctx)?;
        let state = self.prepare_post(decl, ctx)?;
        let result = body(ctx)?;
        ctx.bind_result(result.clone());
        self.check_post(decl, state, ctx)?;
        self.check_invariant(receiver_type, ctx, Phase::Exit)?;
        Ok(result)
    }

    // ── Advice checks ──────────────────────────────────────

    /// The advice that follow `advice` on `join_point`, in precedence order,
    /// each carrying its receiver from `receivers`. Advice missing from the
    /// join point's list is followed by nothing.
    pub fn advice_links(
        &self,
        join_point: &DeclKey,
        advice: &DeclKey,
        receivers: &AdviceReceivers,
    ) -> Result<Vec<AdviceLink>> {
        let source = self.repository.source();
        let list = source.advised_by(join_point);
        let start = list
            .iter()
            .position(|a| a == advice)
            .map_or(list.len(), |i| i + 1);
        list[start..]
            .iter()
            .map(|a| {
                let link = AdviceLink::new(
                    a.clone(),
                    self.repository.precondition(a)?,
                    self.repository.postcondition(a)?,
                    source.runtime_test(a),
                );
                Ok(match receivers.get(a) {
                    Some(receiver) => link.with_receiver(receiver.clone()),
                    None => link,
                })
            })
            .collect()
    }

    /// The `kind` contract of `advice` with `$proc` resolved
    pub fn resolve_advice(
        &self,
        advice: &DeclKey,
        join_point: &DeclKey,
        later: &[AdviceLink],
        kind: ContractKind,
    ) -> Result<Resolution> {
        let own = self.repository.resolve(kind, advice)?;
        let target = self.repository.resolve(kind, join_point)?;
        self.resolver.resolve_continuation(&own, &target, later, kind)
    }

    /// Check the precondition of `advice` running at `join_point`
    pub fn check_advice_pre(
        &self,
        advice: &DeclKey,
        join_point: &DeclKey,
        receivers: &AdviceReceivers,
        ctx: &mut BindingContext,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let later = self.advice_links(join_point, advice, receivers)?;
        let resolution = self.resolve_advice(advice, join_point, &later, ContractKind::Precondition)?;
        Self::bind_chain_receivers(advice, &later, receivers, ctx);
        let Some(failing) = self.detector.check(&resolution.contract, ctx)? else {
            return Ok(());
        };
        if self.config.check_substitution {
            let target = self.repository.precondition(join_point)?;
            if self.detector.holds(&target, ctx)? {
                return Err(self.violation(Violation::substitution(
                    SubstitutionRule::PreconditionStrengthened,
                    failing,
                    advice.to_string(),
                    advice.to_string(),
                )));
            }
        }
        Err(self.violation(Violation::new(
            ViolationKind::Precondition,
            failing,
            advice.to_string(),
            Self::caller_of(join_point, ctx),
        )))
    }

    /// Capture `$old` values for the postcondition of `advice`
    pub fn prepare_advice_post(
        &self,
        advice: &DeclKey,
        join_point: &DeclKey,
        receivers: &AdviceReceivers,
        ctx: &mut BindingContext,
    ) -> Result<PostState> {
        if !self.checks_postconditions() {
            return Ok(PostState::inactive());
        }
        let later = self.advice_links(join_point, advice, receivers)?;
        let resolution = self.resolve_advice(advice, join_point, &later, ContractKind::Postcondition)?;
        Self::bind_chain_receivers(advice, &later, receivers, ctx);
        let reference = if self.config.check_substitution {
            Some(self.repository.postcondition(join_point)?)
        } else {
            None
        };
        self.capture(&resolution.contract, reference.as_ref(), ctx)
    }

    /// Check the postcondition captured by [`Enforcer::prepare_advice_post`].
    /// `receivers` is the state of the chain once the body has run.
    pub fn check_advice_post(
        &self,
        advice: &DeclKey,
        join_point: &DeclKey,
        receivers: &AdviceReceivers,
        state: PostState,
        ctx: &mut BindingContext,
    ) -> Result<()> {
        if !state.is_active() {
            return Ok(());
        }
        let later = self.advice_links(join_point, advice, receivers)?;
        Self::bind_chain_receivers(advice, &later, receivers, ctx);
        self.finish_post(advice, state, ctx)
    }

    // ── Registration-time checks ───────────────────────────

    /// Check that `decl` may substitute for what it overrides on every
    /// sample context. Postconditions are compared only on samples that
    /// bind `$result`.
    pub fn verify_override(&self, decl: &DeclKey, samples: &[BindingContext]) -> Result<()> {
        if !self.is_enabled() || !self.config.check_substitution {
            return Ok(());
        }
        let Some(parent) = self.repository.overridden(decl) else {
            return Ok(());
        };
        if let (DeclKey::Type { name }, DeclKey::Type { name: parent_name }) = (decl, &parent) {
            let own = self.repository.invariant(name)?;
            let inherited = self.repository.invariant(parent_name)?;
            for sample in samples {
                self.compare(SubstitutionRule::InvariantNotPreserved, &own, &inherited, sample, decl)?;
            }
            return Ok(());
        }
        let pre = self.repository.precondition(decl)?;
        let parent_pre = self.repository.precondition(&parent)?;
        let post = self.repository.postcondition(decl)?;
        let parent_post = self.repository.postcondition(&parent)?;
        for sample in samples {
            self.compare(SubstitutionRule::PreconditionStrengthened, &pre, &parent_pre, sample, decl)?;
            if self.checks_postconditions() {
                self.compare_post(&post, &parent_post, sample, decl)?;
            }
        }
        Ok(())
    }

    /// Check that `advice` may substitute for `join_point` on every sample
    /// context
    pub fn verify_advice(
        &self,
        advice: &DeclKey,
        join_point: &DeclKey,
        samples: &[BindingContext],
    ) -> Result<()> {
        if !self.is_enabled() || !self.config.check_substitution {
            return Ok(());
        }
        let later = self.advice_links(join_point, advice, &AdviceReceivers::default())?;
        let pre = self
            .resolve_advice(advice, join_point, &later, ContractKind::Precondition)?
            .contract;
        let target_pre = self.repository.precondition(join_point)?;
        let post = self
            .resolve_advice(advice, join_point, &later, ContractKind::Postcondition)?
            .contract;
        let target_post = self.repository.postcondition(join_point)?;
        for sample in samples {
            let mut ctx = sample.clone();
            let receivers = AdviceReceivers::new(sample.receiver().cloned());
            Self::bind_chain_receivers(advice, &later, &receivers, &mut ctx);
            self.compare(SubstitutionRule::PreconditionStrengthened, &pre, &target_pre, &ctx, advice)?;
            if self.checks_postconditions() {
                self.compare_post(&post, &target_post, &ctx, advice)?;
            }
        }
        Ok(())
    }

    fn compare(
        &self,
        rule: SubstitutionRule,
        overriding: &ContractSet,
        overridden: &ContractSet,
        ctx: &BindingContext,
        blamed: &DeclKey,
    ) -> Result<()> {
        match self.detector.check_substitution(rule, overriding, overridden, ctx)? {
            Some(failing) => Err(self.violation(Violation::substitution(
                rule,
                failing,
                blamed.to_string(),
                blamed.to_string(),
            ))),
            None => Ok(()),
        }
    }

    fn compare_post(
        &self,
        post: &ContractSet,
        reference: &ContractSet,
        sample: &BindingContext,
        blamed: &DeclKey,
    ) -> Result<()> {
        if !sample.contains(&self.keywords.result) {
            return Ok(());
        }
        let state = self.capture(post, Some(reference), sample)?;
        let mut ctx = sample.clone();
        for (name, value) in state.snapshots {
            ctx.bind(name, value);
        }
        let reference = state.reference.unwrap_or_default();
        self.compare(
            SubstitutionRule::PostconditionWeakened,
            &state.contract,
            &reference,
            &ctx,
            blamed,
        )
    }
}
