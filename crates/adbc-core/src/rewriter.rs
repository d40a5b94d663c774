//! `$old(...)` capture
//!
//! Postconditions may refer to pre-call state through `$old(expr)`. Before
//! the body runs, every such call is evaluated and replaced by a fresh
//! variable (`$old1`, `$old2`, ...) whose snapshot is bound again before the
//! postcondition is checked.

use crate::contract::ContractSet;
use crate::keywords::{is_identifier_char, Keywords};
use crate::value::Value;
use crate::{Error, Result};

/// Rewrites `$old` calls, numbering snapshots across everything it touches.
///
/// One rewriter serves one guarded call, so all names it mints are distinct.
#[derive(Debug)]
pub struct OldValueRewriter {
    old: String,
    keywords: Keywords,
    counter: usize,
    snapshots: Vec<(String, Value)>,
}

impl OldValueRewriter {
    pub fn new(keywords: &Keywords) -> Self {
        OldValueRewriter {
            old: keywords.old.clone(),
            keywords: keywords.clone(),
            counter: 0,
            snapshots: Vec::new(),
        }
    }

    /// Replace every `$old(arg)` in `expression` by a snapshot name, calling
    /// `evaluate` on each `arg` as written.
    pub fn rewrite<F>(&mut self, expression: &str, mut evaluate: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<Value>,
    {
        self.rewrite_with(expression, &mut evaluate)
    }

    /// Rewrite every part of a set with one shared counter
    pub fn rewrite_set<F>(&mut self, set: &ContractSet, mut evaluate: F) -> Result<ContractSet>
    where
        F: FnMut(&str) -> Result<Value>,
    {
        let mut parts = Vec::with_capacity(set.len());
        for part in set.iter() {
            parts.push(self.rewrite_with(part, &mut evaluate)?);
        }
        Ok(ContractSet::from(parts))
    }

    fn rewrite_with(
        &mut self,
        expression: &str,
        evaluate: &mut dyn FnMut(&str) -> Result<Value>,
    ) -> Result<String> {
        let mut out = String::with_capacity(expression.len());
        let mut rest = expression;
        while let Some((start, open)) = find_old_call(rest, &self.old) {
            let close = matching_paren(rest, open).ok_or_else(|| {
                Error::malformed(expression, format!("no matching parenthesis in call to {}", self.old))
            })?;
            let argument = &rest[open + 1..close];
            let value = evaluate(argument)?;
            self.counter += 1;
            let name = self.keywords.old_snapshot(self.counter);
            tracing::trace!(argument, %name, "captured old value");
            out.push_str(&rest[..start]);
            out.push_str(&name);
            self.snapshots.push((name, value));
            rest = &rest[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Names minted so far
    pub fn count(&self) -> usize {
        self.counter
    }

    pub fn snapshots(&self) -> &[(String, Value)] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<(String, Value)> {
        self.snapshots
    }

    /// Check that every `$old(` call in `expression` is closed, without
    /// evaluating anything. Returns the number of calls found.
    pub fn scan(keywords: &Keywords, expression: &str) -> Result<usize> {
        let mut found = 0;
        let mut rest = expression;
        while let Some((_, open)) = find_old_call(rest, &keywords.old) {
            let close = matching_paren(rest, open).ok_or_else(|| {
                Error::malformed(
                    expression,
                    format!("no matching parenthesis in call to {}", keywords.old),
                )
            })?;
            found += 1;
            rest = &rest[close + 1..];
        }
        Ok(found)
    }
}

/// Byte offsets of the first standalone `old(`: (start of keyword, open paren)
fn find_old_call(text: &str, old: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(rel) = text[from..].find(old) {
        let start = from + rel;
        let end = start + old.len();
        let standalone = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_identifier_char(c));
        if standalone && text[end..].starts_with('(') {
            return Some((start, end));
        }
        from = end;
    }
    None
}

/// Offset of the parenthesis closing the one at `open`
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn constant(v: i64) -> impl FnMut(&str) -> Result<Value> {
        move |_| Ok(Value::Integer(v))
    }

    #[test]
    fn test_single_old_call() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let mut seen = Vec::new();
        let out = rw
            .rewrite("$this.balance == $old($this.balance) + amount", |arg| {
                seen.push(arg.to_string());
                Ok(Value::Float(30.0))
            })
            .unwrap();
        assert_eq!(out, "$this.balance == $old1 + amount");
        assert_eq!(seen, vec!["$this.balance"]);
        assert_eq!(rw.snapshots(), &[("$old1".to_string(), Value::Float(30.0))]);
    }

    #[test]
    fn test_multiple_calls_get_distinct_names() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let out = rw
            .rewrite("$old(a) + $old(f(b, (c))) > 0", constant(1))
            .unwrap();
        assert_eq!(out, "$old1 + $old2 > 0");
        let names: Vec<_> = rw.into_snapshots().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["$old1", "$old2"]);
    }

    #[test]
    fn test_counter_shared_across_set() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let set = ContractSet::new(["$old(a) == 1", "$old(b) == 2"]);
        let out = rw.rewrite_set(&set, constant(0)).unwrap();
        assert_eq!(out.parts(), &["$old1 == 1", "$old2 == 2"]);
        assert_eq!(rw.count(), 2);
    }

    #[test]
    fn test_unbalanced_is_malformed() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let err = rw.rewrite("$old($this.balance + 1", constant(0)).unwrap_err();
        assert!(matches!(err, Error::MalformedExpression { .. }));
        assert!(OldValueRewriter::scan(&Keywords::default(), "$old((x)").is_err());
    }

    #[test]
    fn test_no_old_call_is_unchanged() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        assert_eq!(rw.rewrite("$result > 0", constant(0)).unwrap(), "$result > 0");
        assert_eq!(rw.rewrite("x$old(1)", constant(0)).unwrap(), "x$old(1)");
        assert_eq!(rw.count(), 0);
    }

    #[test]
    fn test_nested_old_argument_passed_verbatim() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let mut seen = Vec::new();
        let out = rw
            .rewrite("$old($old(x) + 1) > 0", |arg| {
                seen.push(arg.to_string());
                Ok(Value::Null)
            })
            .unwrap();
        assert_eq!(out, "$old1 > 0");
        assert_eq!(seen, vec!["$old(x) + 1"]);
    }

    #[test]
    fn test_evaluation_error_propagates() {
        let mut rw = OldValueRewriter::new(&Keywords::default());
        let result = rw.rewrite("$old(x) > 0", |arg| Err(Error::malformed(arg, "unbound")));
        assert!(result.is_err());
        assert!(rw.snapshots().is_empty());
    }

    #[test]
    fn test_custom_prefix() {
        let keywords = Keywords::new("_").unwrap();
        let mut rw = OldValueRewriter::new(&keywords);
        let out = rw.rewrite("_old(a) > 0 && $old(b)", constant(0)).unwrap();
        assert_eq!(out, "_old1 > 0 && $old(b)");
    }

    proptest! {
        #[test]
        fn test_every_call_is_replaced(n in 0usize..8, filler in "[a-z ]{0,6}") {
            let text: Vec<String> = (0..n).map(|i| format!("$old(v{}){}", i, filler)).collect();
            let text = text.join(" + ");
            let mut rw = OldValueRewriter::new(&Keywords::default());
            let out = rw.rewrite(&text, constant(7)).unwrap();
            prop_assert_eq!(rw.count(), n);
            prop_assert!(!out.contains("$old("));
            for i in 1..=n {
                let expected = format!("$old{}", i);
                prop_assert!(out.contains(&expected));
            }
        }
    }
}
