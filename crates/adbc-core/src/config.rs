//! Enforcement configuration
//!
//! Loaded from JSON; any field may be omitted. Environment variables
//! override file values:
//!
//! | variable                    | field                  |
//! |-----------------------------|------------------------|
//! | `ADBC_ENFORCE`              | `enforce_contracts`    |
//! | `ADBC_CHECK_SUBSTITUTION`   | `check_substitution`   |
//! | `ADBC_CHECK_POSTCONDITIONS` | `check_postconditions` |
//! | `ADBC_ENGINE`               | `engine`               |
//! | `ADBC_KEYWORD_PREFIX`       | `keyword_prefix`       |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::ENGINE_NAMES;
use crate::keywords::{Keywords, DEFAULT_PREFIX};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Master switch. When off nothing is bound, evaluated or cached.
    pub enforce_contracts: bool,
    /// Check overrides and advice against what they replace
    pub check_substitution: bool,
    pub check_postconditions: bool,
    /// Expression engine name, see [`crate::engine::by_name`]
    pub engine: String,
    pub keyword_prefix: String,
    /// Treat advice shadowed by unconditional advice as an error
    pub reject_dead_advice: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enforce_contracts: true,
            check_substitution: true,
            check_postconditions: true,
            engine: "standard".to_string(),
            keyword_prefix: DEFAULT_PREFIX.to_string(),
            reject_dead_advice: false,
        }
    }
}

impl Config {
    /// Configuration with enforcement switched off
    pub fn disabled() -> Self {
        Config {
            enforce_contracts: false,
            ..Config::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ADBC_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `ADBC_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ADBC_ENFORCE") {
            self.enforce_contracts = parse_flag("ADBC_ENFORCE", &v)?;
        }
        if let Some(v) = lookup("ADBC_CHECK_SUBSTITUTION") {
            self.check_substitution = parse_flag("ADBC_CHECK_SUBSTITUTION", &v)?;
        }
        if let Some(v) = lookup("ADBC_CHECK_POSTCONDITIONS") {
            self.check_postconditions = parse_flag("ADBC_CHECK_POSTCONDITIONS", &v)?;
        }
        if let Some(v) = lookup("ADBC_ENGINE") {
            self.engine = v;
        }
        if let Some(v) = lookup("ADBC_KEYWORD_PREFIX") {
            self.keyword_prefix = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !ENGINE_NAMES.contains(&self.engine.as_str()) {
            return Err(Error::Config(format!(
                "unknown expression engine '{}' (expected one of: {})",
                self.engine,
                ENGINE_NAMES.join(", ")
            )));
        }
        Keywords::new(&self.keyword_prefix).map(|_| ())
    }

    pub fn keywords(&self) -> Result<Keywords> {
        Keywords::new(&self.keyword_prefix)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}
