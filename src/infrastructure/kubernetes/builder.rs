//! Cluster object builder
//!
//! Pure construction of every object a suite run creates. Nothing here talks
//! to the cluster, so the shapes can be checked directly in tests.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvFromSource, EnvVar, Namespace, PodSpec, PodTemplateSpec,
    Secret, SecretEnvSource, SecretVolumeSource, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

use crate::config::ExecutionConfig;
use crate::error::{ExecutorError, Result};

pub const NAMESPACE_PREFIX: &str = "suite-executor-";
pub const SERVICE_ACCOUNT_NAME: &str = "cluster-admin";
pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
pub const CLUSTER_ROLE_BINDING_PREFIX: &str = "suite-executor-cluster-admin-";
pub const PASSTHROUGH_SECRET_NAME: &str = "ci-secrets";
pub const KUBECONFIG_SECRET_NAME: &str = "config";
pub const JOB_NAME_PREFIX: &str = "executor-";
pub const JOB_NAME_LABEL: &str = "job-name";

pub const WORKLOAD_CONTAINER: &str = "e2e-suite";
pub const SIDECAR_CONTAINER: &str = "pause-for-artifacts";
pub const SIDECAR_IMAGE: &str = "busybox:latest";

pub const RESULTS_VOLUME: &str = "results";
pub const RESULTS_MOUNT_PATH: &str = "/test-run-results";
const KUBECONFIG_VOLUME: &str = "kubeconfig-volume";
const KUBECONFIG_MOUNT_PATH: &str = "/tmp/.kube/";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "suite-executor";
const REQUIRED_SCC_ANNOTATION: &str = "openshift.io/required-scc";
const REQUIRED_SCC: &str = "restricted-v2";

/// Secrets the launcher created before submitting the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecretRefs {
    pub passthrough: bool,
    pub kubeconfig: bool,
}

fn managed_labels() -> BTreeMap<String, String> {
    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]
        .into_iter()
        .collect()
}

pub fn namespace_name(suffix: &str) -> String {
    format!("{}{}", NAMESPACE_PREFIX, suffix)
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Binding of the run's service account to `cluster-admin`, owned by the
/// namespace so the cluster reclaims it if the namespace goes away.
///
/// `owner` must be the namespace as returned by the API server (it needs a uid).
pub fn cluster_role_binding(
    owner: &Namespace,
    service_account: &ServiceAccount,
) -> Result<ClusterRoleBinding> {
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        ExecutorError::Cluster("namespace has no name or uid to own the role binding".to_string())
    })?;

    Ok(ClusterRoleBinding {
        metadata: ObjectMeta {
            generate_name: Some(CLUSTER_ROLE_BINDING_PREFIX.to_string()),
            labels: Some(managed_labels()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CLUSTER_ADMIN_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.metadata.name.clone().unwrap_or_default(),
            namespace: service_account.metadata.namespace.clone(),
            ..Default::default()
        }]),
    })
}

pub fn passthrough_secret(namespace: &str, values: &BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(PASSTHROUGH_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(values.clone()),
        ..Default::default()
    }
}

pub fn kubeconfig_secret(namespace: &str, contents: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(KUBECONFIG_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(
            [("config".to_string(), contents.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn results_mount() -> VolumeMount {
    VolumeMount {
        name: RESULTS_VOLUME.to_string(),
        mount_path: RESULTS_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

/// The identifying variables the suite image is expected to read.
pub fn workload_env(config: &ExecutionConfig) -> Vec<EnvVar> {
    vec![
        env("OCM_CLUSTER_ID", &config.cluster_id),
        env("OCM_ENV", &config.environment),
        env("CLOUD_PROVIDER_ID", &config.cloud_provider_id),
        env("CLOUD_PROVIDER_REGION", &config.cloud_provider_region),
        env("GINKGO_NO_COLOR", "TRUE"),
    ]
}

/// Active deadline in whole seconds, never below one.
pub fn active_deadline_seconds(config: &ExecutionConfig) -> i64 {
    config.timeout.as_secs().max(1) as i64
}

/// Two-container job: the suite image plus a pause sidecar sharing the
/// results volume so artifacts outlive the suite process.
pub fn workload_job(
    namespace: &str,
    image: &str,
    config: &ExecutionConfig,
    secrets: SecretRefs,
) -> Job {
    let mut workload_env = workload_env(config);
    let mut workload_mounts = vec![results_mount()];
    let mut volumes = vec![Volume {
        name: RESULTS_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];

    let env_from = secrets.passthrough.then(|| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: PASSTHROUGH_SECRET_NAME.to_string(),
                optional: None,
            }),
            ..Default::default()
        }]
    });

    if secrets.kubeconfig {
        workload_env.push(env("KUBECONFIG", &format!("{}config", KUBECONFIG_MOUNT_PATH)));
        workload_mounts.push(VolumeMount {
            name: KUBECONFIG_VOLUME.to_string(),
            mount_path: KUBECONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: KUBECONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(KUBECONFIG_SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let workload = Container {
        name: WORKLOAD_CONTAINER.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(workload_env),
        env_from,
        volume_mounts: Some(workload_mounts),
        ..Default::default()
    };

    let sidecar = Container {
        name: SIDECAR_CONTAINER.to_string(),
        image: Some(SIDECAR_IMAGE.to_string()),
        command: Some(vec![
            "tail".to_string(),
            "-f".to_string(),
            "/dev/null".to_string(),
        ]),
        volume_mounts: Some(vec![results_mount()]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            generate_name: Some(JOB_NAME_PREFIX.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            parallelism: Some(1),
            completions: Some(1),
            backoff_limit: Some(0),
            active_deadline_seconds: Some(active_deadline_seconds(config)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: Some(
                        [(REQUIRED_SCC_ANNOTATION.to_string(), REQUIRED_SCC.to_string())]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(SERVICE_ACCOUNT_NAME.to_string()),
                    containers: vec![workload, sidecar],
                    volumes: Some(volumes),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `tar` invocation run in the sidecar to stream the results volume.
pub fn artifact_tar_command() -> Vec<String> {
    ["tar", "cf", "-", "-C", RESULTS_MOUNT_PATH, RESULTS_MOUNT_PATH]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
