//! Job launcher
//!
//! Injects the optional secrets, then submits the two-container job.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ExecutionConfig;
use crate::core::cancellation::run_cancellable;
use crate::domain::entities::WorkloadJob;
use crate::error::{ExecutorError, Result, ResultExt};
use crate::infrastructure::kubernetes::builder::{self, SecretRefs};
use crate::infrastructure::kubernetes::ClusterClient;

pub struct JobLauncher {
    client: Arc<dyn ClusterClient>,
    config: Arc<ExecutionConfig>,
}

impl JobLauncher {
    pub fn new(client: Arc<dyn ClusterClient>, config: Arc<ExecutionConfig>) -> Self {
        Self { client, config }
    }

    pub async fn launch(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        image: &str,
    ) -> Result<WorkloadJob> {
        let secrets = self.create_secrets(cancel, namespace).await?;
        let job = builder::workload_job(namespace, image, &self.config, secrets);

        let created = run_cancellable(
            cancel,
            "creating job",
            self.client.create_job(namespace, &job),
        )
        .await
        .context("creating job")?;

        let name = created.metadata.name.ok_or_else(|| {
            ExecutorError::Cluster("created job has no generated name".to_string())
        })?;
        let namespace = created
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string());

        info!(namespace = %namespace, job = %name, image, "Created job");
        Ok(WorkloadJob::new(namespace, name, image))
    }

    /// Secrets must exist before the job so the workload sees them at start.
    async fn create_secrets(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
    ) -> Result<SecretRefs> {
        let mut refs = SecretRefs::default();

        if !self.config.passthrough_secrets.is_empty() {
            let secret = builder::passthrough_secret(namespace, &self.config.passthrough_secrets);
            run_cancellable(
                cancel,
                "creating passthru secrets",
                self.client.create_secret(namespace, &secret),
            )
            .await
            .context("creating passthru secrets")?;
            info!(
                namespace,
                keys = self.config.passthrough_secrets.len(),
                "Created passthrough secret"
            );
            refs.passthrough = true;
        }

        let kubeconfig = self
            .config
            .kubeconfig_contents
            .as_deref()
            .filter(|contents| !contents.is_empty());
        if let Some(contents) = kubeconfig {
            let secret = builder::kubeconfig_secret(namespace, contents);
            run_cancellable(
                cancel,
                "creating kubeconfig secret",
                self.client.create_secret(namespace, &secret),
            )
            .await
            .context("creating kubeconfig secret")?;
            refs.kubeconfig = true;
        }

        Ok(refs)
    }
}
