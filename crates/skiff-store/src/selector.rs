//! Typed label selectors.
//!
//! A selector is a conjunction of `key=value` / `key!=value`
//! requirements. Keys and values are validated when the requirement is
//! added, so a selector that exists always renders to a well-formed
//! query string.

use std::fmt;

use regex::Regex;
use thiserror::Error;

use crate::types::Labels;

const MAX_SEGMENT_LEN: usize = 63;
const NAME_PATTERN: &str = r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$";
const PREFIX_PATTERN: &str = r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key `{0}`")]
    InvalidKey(String),

    #[error("invalid value `{value}` for label `{key}`")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOp {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: SelectorOp,
    pub value: String,
}

impl Requirement {
    fn matches(&self, labels: &Labels) -> bool {
        let actual = labels.get(&self.key);
        match self.op {
            SelectorOp::Equals => actual == Some(&self.value),
            // An absent label satisfies `!=`.
            SelectorOp::NotEquals => actual != Some(&self.value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selects every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn eq(key: &str, value: &str) -> Result<Self, SelectorError> {
        Self::default().and_eq(key, value)
    }

    pub fn and_eq(self, key: &str, value: &str) -> Result<Self, SelectorError> {
        self.push(key, SelectorOp::Equals, value)
    }

    pub fn and_not_eq(self, key: &str, value: &str) -> Result<Self, SelectorError> {
        self.push(key, SelectorOp::NotEquals, value)
    }

    fn push(mut self, key: &str, op: SelectorOp, value: &str) -> Result<Self, SelectorError> {
        validate_key(key)?;
        validate_value(key, value)?;
        self.requirements.push(Requirement {
            key: key.to_string(),
            op,
            value: value.to_string(),
        });
        Ok(self)
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let op = match r.op {
                SelectorOp::Equals => "=",
                SelectorOp::NotEquals => "!=",
            };
            write!(f, "{}{}{}", r.key, op, r.value)?;
        }
        Ok(())
    }
}

fn is_name(s: &str) -> bool {
    s.len() <= MAX_SEGMENT_LEN && Regex::new(NAME_PATTERN).is_ok_and(|re| re.is_match(s))
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = || SelectorError::InvalidKey(key.to_string());
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        let ok = prefix.len() <= 253
            && Regex::new(PREFIX_PATTERN).is_ok_and(|re| re.is_match(prefix));
        if !ok {
            return Err(invalid());
        }
    }
    if !is_name(name) {
        return Err(invalid());
    }
    Ok(())
}

/// Label values may be empty; otherwise they follow the name syntax.
pub fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || is_name(value) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
