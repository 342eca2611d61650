//! Reconciler behavior against an in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use skiff_deploy::{AppStatus, DeployError, Deployer};
use skiff_store::{
    Api, ControllerSpec, LabelSelector, LocalStore, ObjectMeta, RawWatchStream,
    ReplicationController, Resource, ResourceKind, ResourceStore, Secret, SecretData, Service,
    StoreResult,
};

/// Delegates to a local store and records every write.
struct Recording {
    inner: LocalStore,
    writes: Mutex<Vec<String>>,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalStore::open_in_memory("skiffapp").unwrap(),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, op: &str, kind: ResourceKind, name: &str) {
        self.writes
            .lock()
            .unwrap()
            .push(format!("{op} {} {name}", kind.path()));
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

#[async_trait]
impl ResourceStore for Recording {
    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> StoreResult<Value> {
        self.inner.get(kind, name).await
    }

    async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Value>> {
        self.inner.list(kind, selector).await
    }

    async fn create(&self, kind: ResourceKind, object: Value) -> StoreResult<Value> {
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.record("create", kind, &name);
        self.inner.create(kind, object).await
    }

    async fn replace(&self, kind: ResourceKind, name: &str, object: Value) -> StoreResult<Value> {
        self.record("replace", kind, name);
        self.inner.replace(kind, name, object).await
    }

    async fn patch(&self, kind: ResourceKind, name: &str, patch: Value) -> StoreResult<Value> {
        self.record(&format!("patch {patch}"), kind, name);
        self.inner.patch(kind, name, patch).await
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> StoreResult<()> {
        self.record("delete", kind, name);
        self.inner.delete(kind, name).await
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &LabelSelector,
        resource_version: Option<&str>,
    ) -> StoreResult<RawWatchStream> {
        self.inner.watch(kind, selector, resource_version).await
    }
}

fn pairs(items: &[(&str, &str)]) -> SecretData {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
}

fn controller(name: &str, version: &str, replicas: u32) -> ReplicationController {
    ReplicationController {
        metadata: ObjectMeta::named(name)
            .with_label("app", "web")
            .with_label("build-version", version),
        spec: ControllerSpec {
            replicas,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn controller_names(store: &dyn ResourceStore) -> Vec<String> {
    Api::<ReplicationController>::new(store)
        .list(&LabelSelector::eq("app", "web").unwrap())
        .await
        .unwrap()
        .into_iter()
        .map(|rc| rc.metadata.name)
        .collect()
}

#[tokio::test]
async fn first_deploy_creates_service_and_controller() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());

    let deployment = deployer.deploy("Web", Some("registry/web:abc123"), None).await.unwrap();
    assert_eq!(deployment.identity.name, "web");
    assert_eq!(deployment.identity.build_version, "abc123-0");
    assert!(deployment.retired.is_empty());

    assert_eq!(
        store.writes(),
        vec![
            "create services web".to_string(),
            "create replicationcontrollers web-abc123-0".to_string(),
        ]
    );
    assert_eq!(controller_names(store.as_ref()).await, vec!["web-abc123-0"]);
}

#[tokio::test]
async fn service_is_created_once() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());

    deployer.deploy("web", Some("web:v1"), None).await.unwrap();
    store.clear();
    deployer.deploy("web", Some("web:v2"), None).await.unwrap();

    assert!(!store.writes().iter().any(|w| w.starts_with("create services")));
}

#[tokio::test]
async fn turndown_scales_then_deletes_stale_versions_only() {
    let store = Recording::new();
    let rcs = Api::<ReplicationController>::new(store.as_ref());
    rcs.create(&controller("web-a", "v1", 2)).await.unwrap();
    rcs.create(&controller("web-b", "v1", 0)).await.unwrap();
    rcs.create(&controller("web-v2", "v2", 1)).await.unwrap();
    store.clear();

    let deployer = Deployer::new(store.clone());
    let deployment = deployer.deploy("web", Some("web:v2"), None).await.unwrap();
    // The target version is `v2-0`; the hand-made `v2` controller is stale too.
    assert_eq!(deployment.retired.len(), 3);

    let writes = store.writes();
    let scale_a = writes
        .iter()
        .position(|w| w.starts_with("patch") && w.ends_with("web-a"))
        .expect("web-a scaled down");
    let delete_a = writes
        .iter()
        .position(|w| w == "delete replicationcontrollers web-a")
        .expect("web-a deleted");
    assert!(scale_a < delete_a);

    // Already at zero: deleted without a scale.
    assert!(!writes.iter().any(|w| w.starts_with("patch") && w.ends_with("web-b")));
    assert!(writes.contains(&"delete replicationcontrollers web-b".to_string()));

    assert_eq!(controller_names(store.as_ref()).await, vec!["web-v2-0"]);
}

#[tokio::test]
async fn matching_version_is_left_alone() {
    let store = Recording::new();
    let rcs = Api::<ReplicationController>::new(store.as_ref());
    rcs.create(&controller("web-v1a", "v1-0", 1)).await.unwrap();
    rcs.create(&controller("web-v1b", "v1-0", 1)).await.unwrap();
    rcs.create(&controller("web-v2-0", "v2-0", 3)).await.unwrap();
    store.clear();

    let deployer = Deployer::new(store.clone());
    let deployment = deployer.deploy("web", Some("web:v2"), None).await.unwrap();

    assert_eq!(deployment.retired, vec!["web-v1a", "web-v1b"]);
    // The existing v2-0 controller is reused and never written.
    assert_eq!(deployment.controller.spec.replicas, 3);
    assert!(!store.writes().iter().any(|w| w.contains("patch") && w.ends_with("web-v2-0")));
    assert!(!store.writes().contains(&"delete replicationcontrollers web-v2-0".to_string()));
    assert_eq!(controller_names(store.as_ref()).await, vec!["web-v2-0"]);
}

#[tokio::test]
async fn redeploy_without_arguments_keeps_version() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());

    let config = deployer
        .update_config("web", pairs(&[("DATABASE_URL", "postgres://db")]))
        .await
        .unwrap();
    let first = deployer
        .deploy("web", Some("registry/web:abc123"), Some(&config))
        .await
        .unwrap();
    let second = deployer.deploy("web", None, None).await.unwrap();

    assert_eq!(second.identity.build_version, first.identity.build_version);
    assert_eq!(second.identity.image, "registry/web:abc123");
    assert_eq!(controller_names(store.as_ref()).await.len(), 1);
}

#[tokio::test]
async fn config_change_rolls_a_new_version() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());

    let first = deployer.deploy("web", Some("web:v1"), None).await.unwrap();
    let config = deployer.update_config("web", pairs(&[("A", "1")])).await.unwrap();
    let second = deployer.deploy("web", None, Some(&config)).await.unwrap();

    assert_ne!(first.identity.build_version, second.identity.build_version);
    assert_eq!(second.retired, vec![first.identity.controller_name()]);
}

#[tokio::test]
async fn deploy_without_image_or_history_fails() {
    let deployer = Deployer::new(Recording::new());
    let err = deployer.deploy("web", None, None).await.unwrap_err();
    assert!(matches!(err, DeployError::NoPriorVersion(app) if app == "web"));
}

#[tokio::test]
async fn deploy_without_image_is_ambiguous_with_two_controllers() {
    let store = Recording::new();
    let rcs = Api::<ReplicationController>::new(store.as_ref());
    rcs.create(&controller("web-a", "v1", 1)).await.unwrap();
    rcs.create(&controller("web-b", "v2", 1)).await.unwrap();

    let err = Deployer::new(store).deploy("web", None, None).await.unwrap_err();
    assert!(matches!(err, DeployError::AmbiguousState { controllers, .. } if controllers.len() == 2));
}

#[tokio::test]
async fn update_config_merges_over_existing_keys() {
    let deployer = Deployer::new(Recording::new());

    deployer.update_config("web", pairs(&[("a", "1"), ("b", "2")])).await.unwrap();
    let merged = deployer
        .update_config("web", pairs(&[("b", "3"), ("c", "4")]))
        .await
        .unwrap();

    assert_eq!(merged.data, pairs(&[("a", "1"), ("b", "3"), ("c", "4")]));
    let stored = deployer.get_config("web").await.unwrap().unwrap();
    assert_eq!(stored.data, merged.data);
}

#[tokio::test]
async fn update_config_does_not_touch_controllers() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    deployer.deploy("web", Some("web:v1"), None).await.unwrap();
    store.clear();

    deployer.update_config("web", pairs(&[("a", "1")])).await.unwrap();
    assert_eq!(store.writes(), vec!["create secrets web".to_string()]);
}

#[tokio::test]
async fn delete_removes_everything_and_is_idempotent() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    deployer.update_config("web", pairs(&[("a", "1")])).await.unwrap();
    deployer.deploy("web", Some("web:v1"), None).await.unwrap();

    deployer.delete("web").await.unwrap();
    deployer.delete("web").await.unwrap();

    assert!(controller_names(store.as_ref()).await.is_empty());
    assert!(Api::<Service>::new(store.as_ref()).get("web").await.unwrap_err().is_not_found());
    assert!(Api::<Secret>::new(store.as_ref()).get("web").await.unwrap_err().is_not_found());
    assert_eq!(deployer.status("web").await.unwrap(), AppStatus::Absent);
}

#[tokio::test]
async fn scale_to_honors_requested_count() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    deployer.deploy("web", Some("web:v1"), None).await.unwrap();

    let scaled = deployer.scale_to("web", 4).await.unwrap();
    assert_eq!(scaled.spec.replicas, 4);
    assert_eq!(
        deployer.status("web").await.unwrap(),
        AppStatus::Running {
            version: "v1-0".to_string(),
            replicas: 4,
            ready: 0
        }
    );
}

#[tokio::test]
async fn scale_to_requires_a_deployment() {
    let deployer = Deployer::new(Recording::new());
    let err = deployer.scale_to("web", 2).await.unwrap_err();
    assert!(matches!(err, DeployError::NotDeployed(_)));
}

#[tokio::test]
async fn invalid_app_name_is_rejected_before_any_write() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    assert!(matches!(
        deployer.deploy("my_app", Some("web:v1"), None).await.unwrap_err(),
        DeployError::Name(_)
    ));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn controller_version_matches_label_on_store() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    let deployment = deployer.deploy("web", Some("web:v7"), None).await.unwrap();

    let stored = Api::<ReplicationController>::new(store.as_ref())
        .get(&deployment.identity.controller_name())
        .await
        .unwrap();
    assert_eq!(stored.labels()["build-version"], "v7-0");
    assert!(stored.resource_version().is_some());
}

#[tokio::test]
async fn odd_docker_tags_replace_the_running_version() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    deployer.deploy("web", Some("web:v1"), None).await.unwrap();

    let hotfix = deployer.deploy("web", Some("web:_hotfix"), None).await.unwrap();
    assert_eq!(hotfix.identity.build_version, "hotfix-0");
    assert_eq!(hotfix.retired, vec!["web-v1-0"]);

    let upper = deployer.deploy("web", Some("web:RC1"), None).await.unwrap();
    assert_eq!(upper.identity.controller_name(), "web-rc1-0");
    assert_eq!(controller_names(store.as_ref()).await, vec!["web-rc1-0"]);

    // Exactly one current controller remains, so the image can be reused.
    let again = deployer.deploy("web", None, None).await.unwrap();
    assert_eq!(again.identity.image, "web:RC1");
}

#[tokio::test]
async fn long_tag_fits_the_label_limit() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    let image = format!("registry/web:{}", "f".repeat(100));

    let deployment = deployer.deploy("web", Some(&image), None).await.unwrap();
    assert_eq!(deployment.identity.build_version.len(), 63);
    assert_eq!(controller_names(store.as_ref()).await.len(), 1);
}

#[tokio::test]
async fn unusable_tag_is_rejected_before_any_write() {
    let store = Recording::new();
    let deployer = Deployer::new(store.clone());
    deployer.deploy("web", Some("web:v1"), None).await.unwrap();
    store.clear();

    let err = deployer.deploy("web", Some("web:__"), None).await.unwrap_err();
    assert!(matches!(err, DeployError::InvalidVersion { .. }));
    assert!(store.writes().is_empty());
    assert_eq!(controller_names(store.as_ref()).await, vec!["web-v1-0"]);
}
