//! Suite executor
//!
//! Runs one test-suite image end to end in a throwaway namespace:
//! provision, launch, wait, retrieve, process results, then tear down.

use chrono::Utc;
use k8s_openapi::api::core::v1::Namespace;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::application::results::{JUnitResultProcessor, ResultProcessor};
use crate::config::ExecutionConfig;
use crate::domain::entities::{ExecutionReport, RunId};
use crate::error::{ExecutorError, Result, ResultExt};
use crate::infrastructure::kubernetes::{
    ClusterClient, KubeClusterClient, NameGenerator, RandomSuffix,
};
use crate::infrastructure::runners::artifacts::ArtifactRetriever;
use crate::infrastructure::runners::launcher::JobLauncher;
use crate::infrastructure::runners::provisioner::EnvironmentProvisioner;
use crate::infrastructure::runners::watcher::{CompletionWatcher, PollingWatcher};

pub struct SuiteExecutor {
    client: Arc<dyn ClusterClient>,
    config: Arc<ExecutionConfig>,
    names: Arc<dyn NameGenerator>,
    watcher: Arc<dyn CompletionWatcher>,
    processor: Arc<dyn ResultProcessor>,
}

impl SuiteExecutor {
    /// Connect to the cluster named in `config` and build an executor for it.
    pub async fn connect(config: ExecutionConfig) -> Result<Self> {
        config.validate()?;
        let client = KubeClusterClient::connect(&config.cluster).await?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn new(client: Arc<dyn ClusterClient>, config: ExecutionConfig) -> Self {
        let watcher = PollingWatcher::new(client.clone(), config.poll.clone(), config.timeout);
        Self {
            client,
            config: Arc::new(config),
            names: Arc::new(RandomSuffix::default()),
            watcher: Arc::new(watcher),
            processor: Arc::new(JUnitResultProcessor),
        }
    }

    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn CompletionWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn with_result_processor(mut self, processor: Arc<dyn ResultProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Run `image` to completion and bring its artifacts back to the output
    /// directory.
    ///
    /// The namespace created for the run is deleted on every exit path once
    /// it exists, including errors and cancellation, unless `skip_cleanup`
    /// is set. Teardown failures are logged and never change the outcome.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        image: &str,
    ) -> Result<ExecutionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("execute", run_id = %run_id, image);
        self.execute_in_span(cancel, image, run_id, span.clone())
            .instrument(span)
            .await
    }

    async fn execute_in_span(
        &self,
        cancel: &CancellationToken,
        image: &str,
        run_id: RunId,
        span: Span,
    ) -> Result<ExecutionReport> {
        let started_at = Utc::now();

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ExecutorError::io("creating output directory", e))?;

        let provisioner = EnvironmentProvisioner::new(self.client.clone(), self.names.clone());
        let namespace = provisioner.create_namespace(cancel).await?;
        let Some(ns_name) = namespace.metadata.name.clone() else {
            return Err(ExecutorError::Cluster("created namespace has no name".to_string()));
        };

        let outcome = self
            .run_suite(cancel, &provisioner, &namespace, image, run_id, started_at, &span)
            .await;

        self.cleanup(&provisioner, &ns_name).await;

        match &outcome {
            Ok(report) => info!(
                namespace = %ns_name,
                job = %report.job.name,
                exit_code = ?report.exit_code,
                passed = report.is_success(),
                "Suite execution finished"
            ),
            Err(e) => warn!(namespace = %ns_name, error = %e, "Suite execution failed"),
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_suite(
        &self,
        cancel: &CancellationToken,
        provisioner: &EnvironmentProvisioner,
        namespace: &Namespace,
        image: &str,
        run_id: RunId,
        started_at: chrono::DateTime<Utc>,
        span: &Span,
    ) -> Result<ExecutionReport> {
        let environment = provisioner.grant_cluster_admin(cancel, namespace).await?;

        let launcher = JobLauncher::new(self.client.clone(), self.config.clone());
        let mut job = launcher.launch(cancel, &environment.namespace, image).await?;

        let window = self
            .watcher
            .wait_for_completion(cancel, &job)
            .await
            .context("waiting for suite to finish")?;
        job.enter_artifact_window(&window);

        let retriever = ArtifactRetriever::new(self.client.clone());
        let artifacts = retriever
            .retrieve_window(cancel, &window, &self.config.output_dir)
            .await
            .context("fetching artifacts")?;

        let results = self
            .processor
            .process(&self.config.output_dir, span)
            .await
            .context("processing test results")?;

        Ok(ExecutionReport {
            run_id,
            image: image.to_string(),
            environment,
            job,
            exit_code: window.exit_code,
            artifacts,
            results,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Not tied to the caller's cancellation token; bounded by `cleanup_timeout`.
    async fn cleanup(&self, provisioner: &EnvironmentProvisioner, namespace: &str) {
        if self.config.skip_cleanup {
            info!(namespace, "Skipping cleanup");
            return;
        }
        provisioner
            .teardown(namespace, self.config.cleanup_timeout)
            .await;
    }
}
