//! Typed resources for the store.
//!
//! Only the fields skiff reads or writes are modelled; anything else the
//! server sends is ignored on decode. Field names follow the cluster
//! API's camelCase wire format.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Label map attached to an object.
pub type Labels = BTreeMap<String, String>;

/// Secret payload: key to raw bytes (base64 only on the wire).
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Resource collections skiff touches, by URL path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pods,
    Services,
    ReplicationControllers,
    Secrets,
}

impl ResourceKind {
    /// Plural path segment, e.g. `replicationcontrollers`.
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Services => "services",
            ResourceKind::ReplicationControllers => "replicationcontrollers",
            ResourceKind::Secrets => "secrets",
        }
    }

    /// Value of the object's `kind` field.
    pub fn kind_name(self) -> &'static str {
        match self {
            ResourceKind::Pods => "Pod",
            ResourceKind::Services => "Service",
            ResourceKind::ReplicationControllers => "ReplicationController",
            ResourceKind::Secrets => "Secret",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    /// Opaque token assigned by the store on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// A typed object living in one resource collection.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn labels(&self) -> &Labels {
        &self.metadata().labels
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:ident) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }
        }
    };
}

// ── Secret ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default, with = "crate::codec::base64_map")]
    pub data: SecretData,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
}

impl Secret {
    pub fn new(metadata: ObjectMeta, data: SecretData) -> Self {
        Self {
            metadata,
            data,
            secret_type: Some("Opaque".to_string()),
        }
    }
}

impl_resource!(Secret, Secrets);

// ── Service ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: Labels,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<PortRef>,
}

/// A port given by number or by container port name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

impl_resource!(Service, Services);

// ── ReplicationController ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationController {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ControllerSpec,
    #[serde(default)]
    pub status: ControllerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerSpec {
    /// Desired replica count.
    #[serde(default)]
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Replicas the cluster currently runs.
    #[serde(default)]
    pub replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

impl ReplicationController {
    /// Image of the first container in the pod template.
    pub fn image(&self) -> Option<&str> {
        self.spec
            .template
            .as_ref()
            .and_then(|t| t.spec.containers.first())
            .map(|c| c.image.as_str())
    }
}

impl_resource!(ReplicationController, ReplicationControllers);

// ── Pod ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl_resource!(Pod, Pods);

// ── Status ─────────────────────────────────────────────────────────

/// Status body returned with failures and embedded in watch errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

// ── Watch events ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One line of a watch stream, before the object is typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: serde_json::Value,
}

/// A change to one object, as delivered by [`crate::Api::watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
    /// Progress marker carrying only a resourceVersion.
    Bookmark(String),
    /// The server ended the watch with a status (e.g. 410 expired).
    Error(Status),
}

impl<R: Resource> WatchEvent<R> {
    pub fn from_raw(raw: RawWatchEvent) -> StoreResult<Self> {
        let decode = |v: serde_json::Value| -> StoreResult<R> {
            serde_json::from_value(v).map_err(|e| StoreError::decode(e.to_string()))
        };
        Ok(match raw.event_type {
            WatchEventType::Added => WatchEvent::Added(decode(raw.object)?),
            WatchEventType::Modified => WatchEvent::Modified(decode(raw.object)?),
            WatchEventType::Deleted => WatchEvent::Deleted(decode(raw.object)?),
            WatchEventType::Bookmark => {
                let meta: ObjectMeta = raw
                    .object
                    .get("metadata")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| StoreError::decode(e.to_string()))?
                    .unwrap_or_default();
                WatchEvent::Bookmark(meta.resource_version.unwrap_or_default())
            }
            WatchEventType::Error => WatchEvent::Error(
                serde_json::from_value(raw.object).map_err(|e| StoreError::decode(e.to_string()))?,
            ),
        })
    }

    /// The resourceVersion this event moves a watcher to, if any.
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            WatchEvent::Added(r) | WatchEvent::Modified(r) | WatchEvent::Deleted(r) => {
                r.resource_version()
            }
            WatchEvent::Bookmark(rv) => Some(rv.as_str()),
            WatchEvent::Error(_) => None,
        }
    }
}
