//! Resource templates.
//!
//! Rendering is a pure function from app parameters to resource specs;
//! the deployer only depends on the [`Renderer`] trait so the shapes can
//! be swapped without touching reconciliation.

use skiff_store::{
    Container, ContainerPort, ControllerSpec, EnvVar, EnvVarSource, ObjectMeta, PodSpec,
    PodTemplate, PortRef, ReplicationController, Secret, SecretData, SecretKeySelector, Service,
    ServicePort, ServiceSpec,
};

use crate::identity::AppIdentity;
use crate::{APP_CONTAINER, APP_LABEL, BUILD_VERSION_LABEL};

/// Produces the resources one app needs.
pub trait Renderer: Send + Sync {
    fn service(&self, app: &str) -> Service;

    /// Controller for one version; `config` is the app's config secret.
    fn controller(&self, identity: &AppIdentity, config: Option<&Secret>) -> ReplicationController;

    fn secret(&self, app: &str, data: SecretData) -> Secret;
}

/// Default templates: one `app` container listening on `container_port`,
/// fronted by a service on port 80.
#[derive(Debug, Clone)]
pub struct Templates {
    pub container_port: u16,
    pub service_port: u16,
    pub replicas: u32,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            container_port: 8080,
            service_port: 80,
            replicas: 1,
        }
    }
}

impl Renderer for Templates {
    fn service(&self, app: &str) -> Service {
        Service {
            metadata: ObjectMeta::named(app).with_label(APP_LABEL, app),
            spec: ServiceSpec {
                selector: [(APP_LABEL.to_string(), app.to_string())].into(),
                ports: vec![ServicePort {
                    name: Some("http".to_string()),
                    port: self.service_port,
                    target_port: Some(PortRef::Number(self.container_port)),
                }],
                service_type: None,
            },
        }
    }

    fn controller(&self, identity: &AppIdentity, config: Option<&Secret>) -> ReplicationController {
        let labels = ObjectMeta::default()
            .with_label(APP_LABEL, &identity.name)
            .with_label(BUILD_VERSION_LABEL, &identity.build_version)
            .labels;

        let mut env = vec![EnvVar {
            name: "PORT".to_string(),
            value: Some(self.container_port.to_string()),
            value_from: None,
        }];
        // Values stay in the secret; the pod reads them by reference.
        if let Some(secret) = config {
            env.extend(secret.data.keys().map(|key| EnvVar {
                name: key.clone(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: SecretKeySelector {
                        name: secret.metadata.name.clone(),
                        key: key.clone(),
                    },
                }),
            }));
        }

        ReplicationController {
            metadata: ObjectMeta {
                name: identity.controller_name(),
                labels: labels.clone(),
                ..Default::default()
            },
            spec: ControllerSpec {
                replicas: self.replicas,
                selector: labels.clone(),
                template: Some(PodTemplate {
                    metadata: ObjectMeta {
                        labels,
                        ..Default::default()
                    },
                    spec: PodSpec {
                        containers: vec![Container {
                            name: APP_CONTAINER.to_string(),
                            image: identity.image.clone(),
                            ports: vec![ContainerPort {
                                container_port: self.container_port,
                            }],
                            env,
                        }],
                    },
                }),
            },
            ..Default::default()
        }
    }

    fn secret(&self, app: &str, data: SecretData) -> Secret {
        Secret::new(ObjectMeta::named(app).with_label(APP_LABEL, app), data)
    }
}
