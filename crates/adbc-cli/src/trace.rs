//! Replaying recorded calls through the enforcer
//!
//! A trace stands in for the interception layer: each entry is one guarded
//! call as it was observed, with the receiver before and after the body and
//! the value the body returned.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use adbc_core::{
    AdviceReceivers, BindingContext, DeclKey, Enforcer, Error, Model, PostState, Value, Violation,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Call {
    /// Declaration called, e.g. `Account.deposit(double)`
    pub decl: String,
    /// Dynamic type of the receiver, defaults to the declaring type
    #[serde(default)]
    pub receiver_type: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub receiver: Option<Value>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    /// Receiver state once the body has run
    #[serde(default)]
    pub receiver_after: Option<Value>,
    /// Advice that ran around the call, outermost first
    #[serde(default)]
    pub advice: Vec<String>,
    /// Receivers of individual advice, keyed like `advice`. Advice without
    /// one sees the call's receiver.
    #[serde(default)]
    pub receivers: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Violation,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub call: usize,
    pub decl: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Replay every call of `trace`. A failing call does not stop the replay.
pub fn replay(model: &Model, enforcer: &Enforcer, trace: &Trace) -> Vec<Outcome> {
    trace
        .calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let outcome = replay_call(model, enforcer, call);
            let (status, violation, error) = match outcome {
                Ok(()) => (Status::Ok, None, None),
                Err(Error::Violation(v)) => (Status::Violation, Some(v), None),
                Err(e) => (Status::Error, None, Some(e.to_string())),
            };
            tracing::debug!(call = i, decl = %call.decl, ?status, "replayed call");
            Outcome {
                call: i,
                decl: call.decl.clone(),
                status,
                violation,
                error,
            }
        })
        .collect()
}

fn replay_call(model: &Model, enforcer: &Enforcer, call: &Call) -> Result<(), Error> {
    let named: DeclKey = call.decl.parse()?;
    let (decl, receiver_type) = locate(model, &named, call.receiver_type.as_deref())?;

    let mut ctx = enforcer.context();
    if let Some(caller) = &call.caller {
        ctx = ctx.with_caller(caller.clone());
    }
    if let Some(receiver) = &call.receiver {
        ctx.bind_receiver(receiver.clone());
    }
    enforcer.bind_arguments(&decl, &mut ctx, call.args.clone());

    let advice = call
        .advice
        .iter()
        .map(|a| advice_key(a))
        .collect::<Result<Vec<DeclKey>, Error>>()?;
    let before = receivers(call, call.receiver.as_ref())?;
    let after = receivers(call, call.receiver_after.as_ref().or(call.receiver.as_ref()))?;

    let mut pending: Vec<(DeclKey, PostState)> = Vec::new();
    for a in advice.iter().filter(|_| enforcer.is_enabled()) {
        enforcer.check_advice_pre(a, &decl, &before, &mut ctx)?;
        let state = enforcer.prepare_advice_post(a, &decl, &before, &mut ctx)?;
        pending.push((a.clone(), state));
    }

    let result = call.result.clone().unwrap_or(Value::Null);
    let receiver_after = call.receiver_after.clone();
    enforcer.invoke_as(&receiver_type, &decl, &mut ctx, |ctx: &mut BindingContext| {
        if let Some(receiver_after) = receiver_after {
            ctx.bind_receiver(receiver_after);
        }
        Ok(result)
    })?;

    for (a, state) in pending.into_iter().rev() {
        enforcer.check_advice_post(&a, &decl, &after, state, &mut ctx)?;
    }
    Ok(())
}

/// `Aspect.name` or `@Aspect.name`
fn advice_key(text: &str) -> Result<DeclKey, Error> {
    let text = text.trim();
    if text.starts_with('@') {
        text.parse()
    } else {
        format!("@{}", text).parse()
    }
}

fn receivers(call: &Call, fallback: Option<&Value>) -> Result<AdviceReceivers, Error> {
    call.receivers
        .iter()
        .try_fold(AdviceReceivers::new(fallback.cloned()), |acc, (name, receiver)| {
            Ok(acc.with(advice_key(name)?, receiver.clone()))
        })
}

/// The declaration that runs for `named` and the receiver type whose
/// invariant applies. A method named on a type that only inherits it is
/// dispatched to the nearest declaring ancestor.
fn locate(model: &Model, named: &DeclKey, receiver_type: Option<&str>) -> Result<(DeclKey, String), Error> {
    let hierarchy = &model.hierarchy;
    let owner = named
        .owner()
        .ok_or_else(|| Error::UnknownDeclaration(format!("{} cannot be called", named)))?
        .to_string();
    if !hierarchy.contains(&owner) {
        return Err(Error::UnknownType(owner));
    }
    let receiver_type = receiver_type.map(str::to_string).unwrap_or_else(|| owner.clone());
    if !hierarchy.is_subtype(&receiver_type, &owner) {
        return Err(Error::Hierarchy(format!(
            "{} is not a subtype of {}",
            receiver_type, owner
        )));
    }
    let decl = match named {
        DeclKey::Method { name, params, .. } if !hierarchy.declares(named) => hierarchy
            .dispatch(&owner, name, params)
            .ok_or_else(|| Error::UnknownDeclaration(named.to_string()))?,
        _ => named.clone(),
    };
    Ok((decl, receiver_type))
}
