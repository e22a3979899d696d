//! Artifact retriever
//!
//! Copies the workload's log into `<output_dir>/<job>.log`, then runs `tar`
//! in the pause sidecar and unpacks its stdout into the output directory.

use futures::AsyncReadExt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cancellation::run_cancellable;
use crate::domain::entities::{ArtifactSet, ArtifactWindow};
use crate::error::{ExecutorError, Result, ResultExt};
use crate::infrastructure::kubernetes::builder::{self, SIDECAR_CONTAINER, WORKLOAD_CONTAINER};
use crate::infrastructure::kubernetes::ClusterClient;
use crate::infrastructure::runners::untar::{unpack_archive, UnpackSummary};
use crate::infrastructure::runners::watcher::select_pod;

pub struct ArtifactRetriever {
    client: Arc<dyn ClusterClient>,
}

impl ArtifactRetriever {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Retrieve artifacts for a job by name, locating its pod first.
    pub async fn retrieve(
        &self,
        cancel: &CancellationToken,
        job_name: &str,
        namespace: &str,
        output_dir: &Path,
    ) -> Result<ArtifactSet> {
        let pods = run_cancellable(
            cancel,
            "finding job pod",
            self.client.list_job_pods(namespace, job_name),
        )
        .await
        .context("finding job pod")?;
        let pod_name = select_pod(pods, job_name)
            .and_then(|p| p.metadata.name)
            .ok_or_else(|| ExecutorError::PodNotFound(job_name.to_string()))
            .context("finding job pod")?;

        let window = ArtifactWindow {
            namespace: namespace.to_string(),
            job_name: job_name.to_string(),
            pod_name,
            exit_code: None,
            reason: None,
        };
        self.retrieve_window(cancel, &window, output_dir).await
    }

    /// Retrieve artifacts from a pod whose workload has already terminated.
    pub async fn retrieve_window(
        &self,
        cancel: &CancellationToken,
        window: &ArtifactWindow,
        output_dir: &Path,
    ) -> Result<ArtifactSet> {
        let log_file = self
            .fetch_logs(cancel, window, output_dir)
            .await
            .context("fetching pod logs")?;

        let (directories, files) = self
            .fetch_files(cancel, window, output_dir)
            .await
            .context("fetching artifact files")?;

        info!(
            job = %window.job_name,
            log = %log_file.display(),
            files = files.len(),
            "Fetched artifacts"
        );
        Ok(ArtifactSet {
            log_file,
            directories,
            files,
        })
    }

    async fn fetch_logs(
        &self,
        cancel: &CancellationToken,
        window: &ArtifactWindow,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let read_logs = async {
            let mut stream = self
                .client
                .log_stream(&window.namespace, &window.pod_name, WORKLOAD_CONTAINER)
                .await
                .context("getting logs")?;
            let mut logs = Vec::new();
            stream
                .read_to_end(&mut logs)
                .await
                .map_err(|e| ExecutorError::io("reading logs", e))?;
            Ok::<_, ExecutorError>(logs)
        };
        let mut logs = run_cancellable(cancel, "getting logs", read_logs).await?;
        logs.push(b'\n');

        let path = output_dir.join(format!("{}.log", window.job_name));
        tokio::fs::write(&path, &logs)
            .await
            .map_err(|e| ExecutorError::io("writing pod logs", e))?;
        debug!(path = %path.display(), bytes = logs.len(), "Wrote pod logs");
        Ok(path)
    }

    async fn fetch_files(
        &self,
        cancel: &CancellationToken,
        window: &ArtifactWindow,
        output_dir: &Path,
    ) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        // The whole archive is buffered in memory before extraction.
        let output = run_cancellable(
            cancel,
            "streaming executor",
            self.client.exec(
                &window.namespace,
                &window.pod_name,
                SIDECAR_CONTAINER,
                builder::artifact_tar_command(),
            ),
        )
        .await?;

        if !output.stderr.is_empty() {
            warn!(
                pod = %window.pod_name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tar wrote to stderr"
            );
        }

        let target = output_dir.to_path_buf();
        let stdout = output.stdout;
        let summary = unpack_blocking(move || unpack_archive(Cursor::new(stdout), &target)).await?;

        Ok((summary.directories, summary.files))
    }
}

/// Run an extraction on the blocking pool. A task that dies is a local I/O
/// failure, not a cluster one.
async fn unpack_blocking<F>(unpack: F) -> Result<UnpackSummary>
where
    F: FnOnce() -> Result<UnpackSummary> + Send + 'static,
{
    tokio::task::spawn_blocking(unpack)
        .await
        .map_err(|e| ExecutorError::io("untar task", e.into()))
        .and_then(|summary| summary)
        .context("untarring buffer")
}
