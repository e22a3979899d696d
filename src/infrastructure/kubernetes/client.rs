//! Cluster client seam
//!
//! [`ClusterClient`] is the only way the runners talk to the cluster. The
//! production implementation wraps a `kube::Client`; tests substitute an
//! in-memory cluster.

use async_trait::async_trait;
use futures::AsyncRead;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::{
    api::{AttachParams, DeleteParams, ListParams, LogParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::config::ClusterConnection;
use crate::error::{ExecutorError, Result};
use crate::infrastructure::kubernetes::builder::JOB_NAME_LABEL;

/// Log stream of a single container, read to completion by the caller.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Captured output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Delete a namespace; everything inside it (and everything it owns) cascades.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount>;

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// Pods carrying the `job-name=<job_name>` label.
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>>;

    /// Open the log stream of one container of a pod.
    async fn log_stream(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream>;

    /// Run `command` in a container with stdin closed, buffering stdout and stderr.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput>;
}

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer one from the environment.
    pub async fn connect(connection: &ClusterConnection) -> Result<Self> {
        let options = KubeConfigOptions {
            context: connection.context.clone(),
            ..Default::default()
        };

        let config = match (&connection.kubeconfig_path, &connection.context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ExecutorError::Configuration(format!(
                        "Failed to read kubeconfig from {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| {
                        ExecutorError::Configuration(format!("Invalid kubeconfig: {}", e))
                    })?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options).await.map_err(|e| {
                ExecutorError::Configuration(format!("Invalid kubeconfig: {}", e))
            })?,
            (None, None) => Config::infer().await.map_err(|e| {
                ExecutorError::Configuration(format!("Failed to infer cluster config: {}", e))
            })?,
        };

        let client = Client::try_from(config)
            .map_err(|e| ExecutorError::kube("creating Kubernetes client", e))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace)
            .await
            .map_err(|e| {
                let name = namespace.metadata.name.as_deref().unwrap_or_default();
                ExecutorError::kube(format!("create namespace {}", name), e)
            })
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| ExecutorError::kube(format!("get namespace {}", name), e))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = name, "Namespace already gone");
                Ok(())
            }
            Err(e) => Err(ExecutorError::kube(format!("delete namespace {}", name), e)),
        }
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service_account)
            .await
            .map_err(|e| ExecutorError::kube("create service account", e))
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), binding)
            .await
            .map_err(|e| ExecutorError::kube("create cluster role binding", e))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| ExecutorError::kube("create secret", e))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job)
            .await
            .map_err(|e| ExecutorError::kube("create job", e))
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", JOB_NAME_LABEL, job_name);
        api.list(&ListParams::default().labels(&selector))
            .await
            .map(|list| list.items)
            .map_err(|e| ExecutorError::kube("listing pods for job", e))
    }

    async fn log_stream(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        let stream = api
            .log_stream(pod, &params)
            .await
            .map_err(|e| ExecutorError::kube("open log stream", e))?;
        Ok(Box::pin(stream))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);

        debug!(namespace, pod, container, ?command, "Opening remote exec channel");
        let mut attached = api
            .exec(pod, command, &params)
            .await
            .map_err(|e| ExecutorError::kube("new remote exec", e))?;

        let mut stdout_reader = attached.stdout().ok_or_else(|| {
            ExecutorError::Cluster("streaming executor: stdout was not attached".to_string())
        })?;
        let mut stderr_reader = attached.stderr().ok_or_else(|| {
            ExecutorError::Cluster("streaming executor: stderr was not attached".to_string())
        })?;
        let status = attached.take_status();

        let mut output = ExecOutput::default();
        tokio::try_join!(
            stdout_reader.read_to_end(&mut output.stdout),
            stderr_reader.read_to_end(&mut output.stderr),
        )
        .map_err(|e| ExecutorError::io("streaming executor", e))?;

        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") {
                    return Err(ExecutorError::Cluster(format!(
                        "streaming executor: {} {}",
                        status.message.unwrap_or_default(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
            }
        }

        attached
            .join()
            .await
            .map_err(|e| ExecutorError::Cluster(format!("streaming executor: {}", e)))?;

        Ok(output)
    }
}
