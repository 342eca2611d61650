//! Application naming rules.
//!
//! An app name ends up as a resource name, a label value and a path
//! segment, so it is restricted to the DNS-label alphabet.

use regex::Regex;
use thiserror::Error;

/// Longest name accepted; leaves room for the `-{buildVersion}` suffix.
pub const MAX_APP_NAME_LEN: usize = 40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("application name is empty")]
    Empty,

    #[error("application name `{0}` is longer than 40 characters")]
    TooLong(String),

    #[error("application name `{0}` must be lowercase alphanumerics and '-', starting and ending alphanumeric")]
    Invalid(String),
}

/// Lowercase and validate an application name.
pub fn normalize_app_name(raw: &str) -> Result<String, NameError> {
    let name = raw.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_APP_NAME_LEN {
        return Err(NameError::TooLong(name));
    }
    let re = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .map_err(|_| NameError::Invalid(name.clone()))?;
    if !re.is_match(&name) {
        return Err(NameError::Invalid(name));
    }
    Ok(name)
}
