//! Observable app state, derived from the controllers present.

use std::fmt;

use serde::Serialize;
use skiff_store::{Pod, ReplicationController, Resource};

use crate::BUILD_VERSION_LABEL;
use crate::error::{DeployError, DeployResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AppStatus {
    /// Nothing deployed.
    Absent,
    /// A single version owns the app.
    Running {
        version: String,
        replicas: u32,
        /// Pods of this version in phase `Running`.
        ready: usize,
    },
    /// A new version is up and older ones are being turned down.
    Transitioning {
        current: String,
        draining: Vec<String>,
    },
}

impl AppStatus {
    /// Classify an app from its controllers and pods.
    ///
    /// With several controllers, the one with a nonzero desired replica
    /// count is current and the rest are draining; any other mix is
    /// ambiguous.
    pub fn observe(
        app: &str,
        controllers: &[ReplicationController],
        pods: &[Pod],
    ) -> DeployResult<Self> {
        match controllers {
            [] => Ok(AppStatus::Absent),
            [only] => {
                let version = version_of(only);
                let ready = pods
                    .iter()
                    .filter(|p| p.labels().get(BUILD_VERSION_LABEL) == Some(&version))
                    .filter(|p| p.status.phase.as_deref() == Some("Running"))
                    .count();
                Ok(AppStatus::Running {
                    version,
                    replicas: only.spec.replicas,
                    ready,
                })
            }
            many => {
                let (active, draining): (Vec<_>, Vec<_>) =
                    many.iter().partition(|rc| rc.spec.replicas > 0);
                match active.as_slice() {
                    [current] => Ok(AppStatus::Transitioning {
                        current: version_of(current),
                        draining: draining.iter().map(|rc| version_of(rc)).collect(),
                    }),
                    _ => Err(DeployError::AmbiguousState {
                        app: app.to_string(),
                        controllers: many.iter().map(|rc| rc.name().to_string()).collect(),
                    }),
                }
            }
        }
    }
}

fn version_of(rc: &ReplicationController) -> String {
    rc.labels()
        .get(BUILD_VERSION_LABEL)
        .cloned()
        .unwrap_or_default()
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Absent => f.write_str("not deployed"),
            AppStatus::Running {
                version,
                replicas,
                ready,
            } => write!(f, "running {version} ({ready}/{replicas} pods ready)"),
            AppStatus::Transitioning { current, draining } => {
                write!(f, "deploying {current}, draining {}", draining.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_store::{ControllerSpec, ObjectMeta, PodStatus};

    fn rc(version: &str, replicas: u32) -> ReplicationController {
        ReplicationController {
            metadata: ObjectMeta::named(&format!("web-{version}"))
                .with_label("app", "web")
                .with_label(BUILD_VERSION_LABEL, version),
            spec: ControllerSpec {
                replicas,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod(version: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta::named("p")
                .with_label("app", "web")
                .with_label(BUILD_VERSION_LABEL, version),
            status: PodStatus {
                phase: Some(phase.to_string()),
            },
        }
    }

    #[test]
    fn absent_without_controllers() {
        assert_eq!(AppStatus::observe("web", &[], &[]).unwrap(), AppStatus::Absent);
    }

    #[test]
    fn running_counts_ready_pods_of_its_version() {
        let pods = [pod("v2-0", "Running"), pod("v2-0", "Pending"), pod("v1-0", "Running")];
        let status = AppStatus::observe("web", &[rc("v2-0", 2)], &pods).unwrap();
        assert_eq!(
            status,
            AppStatus::Running {
                version: "v2-0".to_string(),
                replicas: 2,
                ready: 1
            }
        );
        assert_eq!(status.to_string(), "running v2-0 (1/2 pods ready)");
    }

    #[test]
    fn transitioning_while_old_version_drains() {
        let status = AppStatus::observe("web", &[rc("v1-0", 0), rc("v2-0", 1)], &[]).unwrap();
        assert_eq!(
            status,
            AppStatus::Transitioning {
                current: "v2-0".to_string(),
                draining: vec!["v1-0".to_string()]
            }
        );
    }

    #[test]
    fn two_active_versions_are_ambiguous() {
        let err = AppStatus::observe("web", &[rc("v1-0", 1), rc("v2-0", 1)], &[]).unwrap_err();
        assert!(matches!(err, DeployError::AmbiguousState { .. }));
    }
}
