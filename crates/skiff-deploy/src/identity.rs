//! Application identity and build versions.
//!
//! A build version is `{image tag}-{config version}`, where the config
//! version is the resourceVersion of the app's config secret (`0` when
//! the app has no config). It changes exactly when either half does.
//!
//! The build version is a label value and part of the controller name,
//! so the tag half is folded into that alphabet: lowercased, characters
//! outside `[a-z0-9.-]` become `-`, leading and trailing punctuation is
//! dropped, and it is cut to fit 63 characters with the config version.

use regex::Regex;
use serde::{Deserialize, Serialize};
use skiff_store::selector::validate_value;

use crate::BUILD_VERSION_LABEL;
use crate::error::{DeployError, DeployResult};

/// Config version used when an app has no config secret.
pub const UNCONFIGURED: &str = "0";

/// Hex digits of a digest kept in the tag.
const DIGEST_TAG_LEN: usize = 12;

/// Longest label value the cluster accepts.
const MAX_VERSION_LEN: usize = 63;

/// Longest object name the cluster accepts.
const MAX_NAME_LEN: usize = 253;

/// Everything that determines one deployed version of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub name: String,
    pub image: String,
    pub config_version: Option<String>,
    pub build_version: String,
}

impl AppIdentity {
    /// Derive the identity, failing before anything is written when the
    /// image cannot produce a usable version or controller name.
    pub fn new(name: &str, image: &str, config_version: Option<&str>) -> DeployResult<Self> {
        let identity = Self {
            name: name.to_string(),
            image: image.to_string(),
            config_version: config_version.map(str::to_string),
            build_version: build_version(image, config_version)?,
        };
        let controller = identity.controller_name();
        let dns_name = Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$")
            .is_ok_and(|re| re.is_match(&controller));
        if controller.len() > MAX_NAME_LEN || !dns_name {
            return Err(DeployError::InvalidVersion {
                image: image.to_string(),
                reason: format!("`{controller}` is not a valid controller name"),
            });
        }
        Ok(identity)
    }

    /// Name of the controller running this version.
    pub fn controller_name(&self) -> String {
        format!("{}-{}", self.name, self.build_version)
    }
}

/// The version part of an image reference.
///
/// `registry:5000/app:v3` is `v3`; an untagged image is `latest`; a
/// digest reference keeps the first 12 hex digits of the digest.
pub fn image_tag(image: &str) -> String {
    if let Some((_, digest)) = image.rsplit_once('@') {
        let hex = digest.rsplit_once(':').map_or(digest, |(_, hex)| hex);
        return hex.chars().take(DIGEST_TAG_LEN).collect();
    }
    // A ':' before the last '/' is a registry port, not a tag.
    let last_segment = image.rsplit_once('/').map_or(image, |(_, seg)| seg);
    match last_segment.rsplit_once(':') {
        Some((_, tag)) if !tag.is_empty() => tag.to_string(),
        _ => "latest".to_string(),
    }
}

pub fn build_version(image: &str, config_version: Option<&str>) -> DeployResult<String> {
    let invalid = |reason: String| DeployError::InvalidVersion {
        image: image.to_string(),
        reason,
    };
    let config_version = config_version.unwrap_or(UNCONFIGURED);
    let room = MAX_VERSION_LEN
        .checked_sub(config_version.len() + 1)
        .filter(|room| *room > 0)
        .ok_or_else(|| invalid(format!("config version `{config_version}` is too long")))?;

    let tag = label_safe(&image_tag(image), room);
    if tag.is_empty() {
        return Err(invalid("the tag has no letters or digits".to_string()));
    }
    let version = format!("{tag}-{config_version}");
    validate_value(BUILD_VERSION_LABEL, &version).map_err(|e| invalid(e.to_string()))?;
    Ok(version)
}

/// Fold a tag into the lowercase label alphabet, at most `max` long.
fn label_safe(tag: &str, max: usize) -> String {
    let mut folded: String = tag
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '-' | '.') => c,
            _ => '-',
        })
        .collect();
    folded.truncate(max);
    folded
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
