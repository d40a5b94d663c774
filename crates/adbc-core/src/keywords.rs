//! Reserved constructs recognized inside contract text
//!
//! Placeholders are textual substitution points: the expression engine never
//! sees `$super` or `$proc`, only the text that replaced them.

use crate::{Error, Result};

pub const DEFAULT_PREFIX: &str = "$";

/// The reserved names for one keyword prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keywords {
    pub prefix: String,
    /// Receiver object
    pub this: String,
    /// Return value, postconditions only
    pub result: String,
    /// Pre-call snapshot function
    pub old: String,
    /// Inherited contract placeholder
    pub inherited: String,
    /// Continuation placeholder, advice only
    pub proc_: String,
}

impl Keywords {
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.is_empty() || !prefix.chars().all(is_identifier_char) {
            return Err(Error::Config(format!(
                "keyword prefix '{}' must be non-empty and made of identifier characters",
                prefix
            )));
        }
        Ok(Keywords {
            prefix: prefix.to_string(),
            this: format!("{}this", prefix),
            result: format!("{}result", prefix),
            old: format!("{}old", prefix),
            inherited: format!("{}super", prefix),
            proc_: format!("{}proc", prefix),
        })
    }

    /// Receiver binding of the advice at `position` in an advice chain
    pub fn advice_this(&self, position: usize) -> String {
        format!("{}{}", self.this, position)
    }

    /// Name of the `n`th captured old value
    pub fn old_snapshot(&self, n: usize) -> String {
        format!("{}{}", self.old, n)
    }
}

impl Default for Keywords {
    fn default() -> Self {
        Keywords {
            prefix: DEFAULT_PREFIX.to_string(),
            this: "$this".into(),
            result: "$result".into(),
            old: "$old".into(),
            inherited: "$super".into(),
            proc_: "$proc".into(),
        }
    }
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Find every occurrence of `keyword` in `text` that is not part of a longer
/// identifier. Returns byte offsets.
pub fn find_keyword(text: &str, keyword: &str) -> Vec<usize> {
    let mut found = Vec::new();
    if keyword.is_empty() {
        return found;
    }
    let mut from = 0;
    while let Some(rel) = text[from..].find(keyword) {
        let start = from + rel;
        let end = start + keyword.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_identifier_char(c));
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_identifier_char(c));
        if before_ok && after_ok {
            found.push(start);
        }
        from = end;
    }
    found
}

/// Replace every standalone occurrence of `keyword` in `text`
pub fn replace_keyword(text: &str, keyword: &str, replacement: &str) -> String {
    let positions = find_keyword(text, keyword);
    if positions.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + positions.len() * replacement.len());
    let mut last = 0;
    for start in positions {
        out.push_str(&text[last..start]);
        out.push_str(replacement);
        last = start + keyword.len();
    }
    out.push_str(&text[last..]);
    out
}

/// True if `text` mentions `keyword` as a standalone identifier
pub fn mentions(text: &str, keyword: &str) -> bool {
    !find_keyword(text, keyword).is_empty()
}
