//! Variable environment for a single contract evaluation
//!
//! A `BindingContext` is created per guarded call and dropped afterwards.
//! It is never shared between concurrent evaluations.

use std::collections::BTreeMap;

use crate::keywords::Keywords;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct BindingContext {
    keywords: Keywords,
    vars: BTreeMap<String, Value>,
    caller: Option<String>,
}

impl BindingContext {
    pub fn new(keywords: &Keywords) -> Self {
        BindingContext {
            keywords: keywords.clone(),
            vars: BTreeMap::new(),
            caller: None,
        }
    }

    /// Label of the calling party, used when a precondition fails
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn unbind_all(&mut self) {
        self.vars.clear();
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn bind_receiver(&mut self, receiver: Value) {
        let name = self.keywords.this.clone();
        self.vars.insert(name, receiver);
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.vars.get(&self.keywords.this)
    }

    pub fn bind_result(&mut self, result: Value) {
        let name = self.keywords.result.clone();
        self.vars.insert(name, result);
    }

    /// Bind call arguments by declared name. Arguments without a name are
    /// available as `arg0`, `arg1`, ...
    pub fn bind_parameters(&mut self, names: Option<&[String]>, values: Vec<Value>) {
        for (i, value) in values.into_iter().enumerate() {
            let name = match names.and_then(|n| n.get(i)) {
                Some(name) => name.clone(),
                None => format!("arg{}", i),
            };
            self.vars.insert(name, value);
        }
    }

    /// Bind the receiver of the advice at `position` in an advice chain
    pub fn bind_advice_receiver(&mut self, position: usize, receiver: Value) {
        let name = self.keywords.advice_this(position);
        self.vars.insert(name, receiver);
    }

    /// Copy all bindings of `other` into `self`, overwriting on conflict
    pub fn extend_from(&mut self, other: &BindingContext) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }
}
