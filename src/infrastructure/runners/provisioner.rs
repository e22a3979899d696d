//! Execution environment provisioner
//!
//! Creates the per-run namespace, its `cluster-admin` service account and the
//! cluster-role-binding granting it, and owns their teardown.

use k8s_openapi::api::core::v1::Namespace;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::cancellation::run_cancellable;
use crate::domain::entities::ExecutionEnvironment;
use crate::error::{ExecutorError, Result, ResultExt};
use crate::infrastructure::kubernetes::builder;
use crate::infrastructure::kubernetes::{ClusterClient, NameGenerator};

pub struct EnvironmentProvisioner {
    client: Arc<dyn ClusterClient>,
    names: Arc<dyn NameGenerator>,
}

impl EnvironmentProvisioner {
    pub fn new(client: Arc<dyn ClusterClient>, names: Arc<dyn NameGenerator>) -> Self {
        Self { client, names }
    }

    /// Create a uniquely named namespace. A name collision is reported as an
    /// error, not retried.
    ///
    /// Provisioning is split in two so the caller holds the namespace before
    /// any later step can fail, and can always tear it down.
    pub async fn create_namespace(&self, cancel: &CancellationToken) -> Result<Namespace> {
        let name = builder::namespace_name(&self.names.generate_suffix());
        let created = run_cancellable(
            cancel,
            "creating namespace",
            self.client.create_namespace(&builder::namespace(&name)),
        )
        .await
        .context("creating namespace")?;

        info!(namespace = %name, "Created namespace");
        Ok(created)
    }

    /// Create the service account and bind it to `cluster-admin`.
    ///
    /// `namespace` must be the object returned by the API server so the
    /// binding can carry an owner reference to it.
    pub async fn grant_cluster_admin(
        &self,
        cancel: &CancellationToken,
        namespace: &Namespace,
    ) -> Result<ExecutionEnvironment> {
        let ns_name = namespace.metadata.name.clone().ok_or_else(|| {
            ExecutorError::Cluster("created namespace has no name".to_string())
        })?;

        let service_account = run_cancellable(
            cancel,
            "creating cluster-admin serviceaccount",
            self.client
                .create_service_account(&ns_name, &builder::service_account(&ns_name)),
        )
        .await
        .context("creating cluster-admin serviceaccount")?;
        info!(
            namespace = %ns_name,
            service_account = builder::SERVICE_ACCOUNT_NAME,
            "Created service account"
        );

        let binding = builder::cluster_role_binding(namespace, &service_account)
            .context("creating cluster role binding")?;
        let binding = run_cancellable(
            cancel,
            "creating cluster role binding",
            self.client.create_cluster_role_binding(&binding),
        )
        .await
        .context("creating cluster role binding")?;
        let binding_name = binding.metadata.name.clone().unwrap_or_default();
        info!(namespace = %ns_name, binding = %binding_name, "Created cluster role binding");

        Ok(ExecutionEnvironment {
            namespace: ns_name,
            service_account: builder::SERVICE_ACCOUNT_NAME.to_string(),
            cluster_role_binding: binding_name,
        })
    }

    /// Best-effort namespace deletion, bounded by `limit`.
    ///
    /// Deletion cascades to everything in the namespace and, through the owner
    /// reference, to the cluster-role-binding. Failures are logged only.
    pub async fn teardown(&self, namespace: &str, limit: Duration) {
        match timeout(limit, self.client.delete_namespace(namespace)).await {
            Ok(Ok(())) => info!(namespace, "Deleted namespace"),
            Ok(Err(e)) => warn!(namespace, error = %e, "Failed to delete namespace"),
            Err(_) => warn!(namespace, timeout = ?limit, "Namespace deletion timed out"),
        }
    }
}
