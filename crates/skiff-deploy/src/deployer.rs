//! Deployer: drives an app's resources to a target version.
//!
//! Per app the states are `Absent → Running(v1) → Running(v2) +
//! Draining(v1) → Running(v2)`. A version change always creates a new
//! controller; the old ones are scaled to zero and deleted without
//! waiting for their pods to terminate. Every operation here is one-shot:
//! the first store error aborts it.

use std::sync::Arc;

use serde_json::json;
use skiff_core::normalize_app_name;
use skiff_store::{
    Api, LabelSelector, Pod, ReplicationController, Resource, ResourceStore, Secret, SecretData,
    Service, StoreResultExt,
};
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use crate::identity::AppIdentity;
use crate::status::AppStatus;
use crate::templates::{Renderer, Templates};
use crate::{APP_LABEL, BUILD_VERSION_LABEL};

/// Result of a successful deploy.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub identity: AppIdentity,
    pub controller: ReplicationController,
    pub service: Service,
    /// Controllers turned down by this deploy.
    pub retired: Vec<String>,
}

/// Reconciles apps in one namespace of a resource store.
pub struct Deployer {
    store: Arc<dyn ResourceStore>,
    renderer: Box<dyn Renderer>,
}

impl Deployer {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self::with_renderer(store, Templates::default())
    }

    pub fn with_renderer(store: Arc<dyn ResourceStore>, renderer: impl Renderer + 'static) -> Self {
        Self {
            store,
            renderer: Box::new(renderer),
        }
    }

    fn api<R: Resource>(&self) -> Api<'_, R> {
        Api::new(self.store.as_ref())
    }

    /// Deploy `app` at the version given by `image` and `config`.
    ///
    /// Without an image, the current controller's image is reused; it is
    /// an error if nothing is deployed yet. Without a config, the app's
    /// stored config secret is used if there is one.
    pub async fn deploy(
        &self,
        app: &str,
        image: Option<&str>,
        config: Option<&Secret>,
    ) -> DeployResult<Deployment> {
        let app = normalize_app_name(app)?;

        let image = match image {
            Some(image) => image.to_string(),
            None => self.current_image(&app).await?,
        };

        let stored;
        let config = match config {
            Some(config) => Some(config),
            None => {
                stored = self.get_config(&app).await?;
                stored.as_ref()
            }
        };

        let identity = AppIdentity::new(&app, &image, config.and_then(|c| c.resource_version()))?;
        info!(
            app = %app,
            image = %identity.image,
            version = %identity.build_version,
            "deploying"
        );

        let service = self.ensure_service(&app).await?;
        let controller = self.create_controller(&identity, config).await?;
        let retired = self.retire(&app, Some(&identity.build_version)).await?;

        info!(
            app = %app,
            version = %identity.build_version,
            retired = retired.len(),
            "deploy complete"
        );
        Ok(Deployment {
            identity,
            controller,
            service,
            retired,
        })
    }

    /// Remove the app's config, service and every controller.
    ///
    /// Deleting an app that does not exist is not an error.
    pub async fn delete(&self, app: &str) -> DeployResult<()> {
        let app = normalize_app_name(app)?;
        info!(app = %app, "deleting app");

        if self.api::<Secret>().delete(&app).await.optional()?.is_none() {
            debug!(app = %app, "no config to delete");
        }
        if self.api::<Service>().delete(&app).await.optional()?.is_none() {
            debug!(app = %app, "no service to delete");
        }
        self.retire(&app, None).await?;
        Ok(())
    }

    /// The app's config secret, if it has one.
    pub async fn get_config(&self, app: &str) -> DeployResult<Option<Secret>> {
        let app = normalize_app_name(app)?;
        Ok(self.api::<Secret>().get(&app).await.optional()?)
    }

    /// Merge `pairs` into the app's config; new values win and other keys
    /// are kept. The running version is not touched; deploy afterwards to
    /// roll the new config out.
    pub async fn update_config(&self, app: &str, pairs: SecretData) -> DeployResult<Secret> {
        let app = normalize_app_name(app)?;
        let secrets = self.api::<Secret>();

        let updated = match secrets.get(&app).await.optional()? {
            Some(mut existing) => {
                existing.data.extend(pairs);
                // Carries the read resourceVersion, so a concurrent
                // update surfaces as a conflict.
                secrets.replace(&existing).await?
            }
            None => secrets.create(&self.renderer.secret(&app, pairs)).await?,
        };
        info!(
            app = %app,
            keys = updated.data.len(),
            version = ?updated.resource_version(),
            "config updated"
        );
        Ok(updated)
    }

    /// Set the desired replica count of the app's current controller.
    pub async fn scale_to(&self, app: &str, replicas: u32) -> DeployResult<ReplicationController> {
        let app = normalize_app_name(app)?;
        let current = self
            .current_controller(&app)
            .await?
            .ok_or_else(|| DeployError::NotDeployed(app.clone()))?;

        info!(app = %app, controller = %current.name(), replicas, "scaling");
        Ok(self
            .api::<ReplicationController>()
            .patch(current.name(), json!({ "spec": { "replicas": replicas } }))
            .await?)
    }

    pub async fn status(&self, app: &str) -> DeployResult<AppStatus> {
        let app = normalize_app_name(app)?;
        let selector = LabelSelector::eq(APP_LABEL, &app)?;
        let controllers = self.api::<ReplicationController>().list(&selector).await?;
        let pods = self.api::<Pod>().list(&selector).await?;
        AppStatus::observe(&app, &controllers, &pods)
    }

    /// The single controller labelled with `app`, if any.
    pub async fn current_controller(&self, app: &str) -> DeployResult<Option<ReplicationController>> {
        let selector = LabelSelector::eq(APP_LABEL, app)?;
        let mut controllers = self.api::<ReplicationController>().list(&selector).await?;
        match controllers.len() {
            0 => Ok(None),
            1 => Ok(controllers.pop()),
            _ => Err(DeployError::AmbiguousState {
                app: app.to_string(),
                controllers: controllers.iter().map(|rc| rc.name().to_string()).collect(),
            }),
        }
    }

    async fn current_image(&self, app: &str) -> DeployResult<String> {
        let current = self
            .current_controller(app)
            .await?
            .ok_or_else(|| DeployError::NoPriorVersion(app.to_string()))?;
        current
            .image()
            .map(str::to_string)
            .ok_or_else(|| DeployError::MissingImage(current.name().to_string()))
    }

    async fn ensure_service(&self, app: &str) -> DeployResult<Service> {
        let services = self.api::<Service>();
        if let Some(existing) = services.get(app).await.optional()? {
            return Ok(existing);
        }
        info!(app = %app, "creating service");
        Ok(services.create(&self.renderer.service(app)).await?)
    }

    /// Create the controller for `identity`. Redeploying an unchanged
    /// version finds its controller already present and reuses it.
    async fn create_controller(
        &self,
        identity: &AppIdentity,
        config: Option<&Secret>,
    ) -> DeployResult<ReplicationController> {
        let controllers = self.api::<ReplicationController>();
        let spec = self.renderer.controller(identity, config);
        match controllers.create(&spec).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_conflict() => {
                let existing = controllers.get(spec.name()).await?;
                if existing.labels().get(BUILD_VERSION_LABEL) == Some(&identity.build_version) {
                    info!(
                        controller = %existing.name(),
                        "version already deployed"
                    );
                    Ok(existing)
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turn down every controller of `app` whose build version is not
    /// `keep`; with `keep` unset, all of them. Returns the retired names.
    async fn retire(&self, app: &str, keep: Option<&str>) -> DeployResult<Vec<String>> {
        let mut selector = LabelSelector::eq(APP_LABEL, app)?;
        if let Some(keep) = keep {
            selector = selector.and_not_eq(BUILD_VERSION_LABEL, keep)?;
        }

        let controllers = self.api::<ReplicationController>();
        let mut retired = Vec::new();
        for rc in controllers.list(&selector).await? {
            let name = rc.name().to_string();
            if rc.spec.replicas != 0 {
                debug!(controller = %name, replicas = rc.spec.replicas, "scaling to zero");
                controllers
                    .patch(&name, json!({ "spec": { "replicas": 0 } }))
                    .await?;
            }
            controllers.delete(&name).await?;
            info!(controller = %name, "retired");
            retired.push(name);
        }
        Ok(retired)
    }
}
