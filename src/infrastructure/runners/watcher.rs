//! Completion watcher
//!
//! The job itself never completes while the pause sidecar runs, so completion
//! is read from the workload container's status on the job's pod. Polling is
//! level-triggered: each tick re-reads the pod and classifies the container
//! as unknown, waiting, running or terminated.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::core::cancellation::run_cancellable;
use crate::domain::entities::{ArtifactWindow, CompletionState, WorkloadJob};
use crate::error::{ExecutorError, Result};
use crate::infrastructure::kubernetes::builder::WORKLOAD_CONTAINER;
use crate::infrastructure::kubernetes::ClusterClient;

/// Waiting reasons that mean the image will never start.
pub const IMAGE_PULL_FAILURE_REASONS: &[&str] =
    &["ImagePullBackOff", "ErrImagePull", "InvalidImageName"];

/// Observes a launched job until its workload container terminates.
#[async_trait]
pub trait CompletionWatcher: Send + Sync {
    async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        job: &WorkloadJob,
    ) -> Result<ArtifactWindow>;
}

/// Classify one container status.
pub fn container_state(status: &ContainerStatus) -> CompletionState {
    let Some(state) = status.state.as_ref() else {
        return CompletionState::Unknown;
    };

    if let Some(terminated) = state.terminated.as_ref() {
        return CompletionState::Terminated {
            exit_code: terminated.exit_code,
            reason: terminated.reason.clone(),
        };
    }
    if let Some(waiting) = state.waiting.as_ref() {
        return CompletionState::Waiting {
            reason: waiting.reason.clone(),
        };
    }
    if state.running.is_some() {
        return CompletionState::Running;
    }
    CompletionState::Unknown
}

/// State of the workload container on `pod`; the sidecar is ignored.
pub fn workload_state(pod: &Pod) -> CompletionState {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == WORKLOAD_CONTAINER))
        .map(container_state)
        .unwrap_or(CompletionState::Unknown)
}

pub fn is_image_pull_failure(state: &CompletionState) -> bool {
    match state {
        CompletionState::Waiting {
            reason: Some(reason),
        } => IMAGE_PULL_FAILURE_REASONS.contains(&reason.as_str()),
        _ => false,
    }
}

/// Pick the pod backing the job. Exactly one is expected; with several the
/// oldest is used so repeated polls keep looking at the same pod.
pub(crate) fn select_pod(mut pods: Vec<Pod>, job_name: &str) -> Option<Pod> {
    if pods.len() > 1 {
        warn!(job = job_name, count = pods.len(), "More than one pod found for job");
        pods.sort_by(|a, b| {
            let key = |p: &Pod| {
                (
                    p.metadata.creation_timestamp.as_ref().map(|t| t.0),
                    p.metadata.name.clone(),
                )
            };
            key(a).cmp(&key(b))
        });
    }
    pods.into_iter().next()
}

/// Fixed-interval (optionally backed-off) poller bounded by the run timeout.
pub struct PollingWatcher {
    client: Arc<dyn ClusterClient>,
    poll: PollSettings,
    timeout: Duration,
}

impl PollingWatcher {
    pub fn new(client: Arc<dyn ClusterClient>, poll: PollSettings, timeout: Duration) -> Self {
        Self {
            client,
            poll,
            timeout,
        }
    }

    /// One observation: `Some(window)` once terminated, `None` to keep polling.
    async fn observe(
        &self,
        cancel: &CancellationToken,
        job: &WorkloadJob,
    ) -> Result<Option<ArtifactWindow>> {
        let pods = match run_cancellable(
            cancel,
            "waiting for suite to finish",
            self.client.list_job_pods(&job.namespace, &job.name),
        )
        .await
        {
            Ok(pods) => pods,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(job = %job.name, error = %e, "Failed to list pods for job, will retry");
                return Ok(None);
            }
        };

        let Some(pod) = select_pod(pods, &job.name) else {
            debug!(job = %job.name, "Pod for job not created yet");
            return Ok(None);
        };
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        let state = workload_state(&pod);
        if is_image_pull_failure(&state) {
            let reason = match &state {
                CompletionState::Waiting { reason } => reason.clone().unwrap_or_default(),
                _ => String::new(),
            };
            return Err(ExecutorError::ImagePull {
                image: job.image.clone(),
                reason,
            });
        }

        match state {
            CompletionState::Terminated { exit_code, reason } => {
                info!(
                    job = %job.name,
                    pod = %pod_name,
                    container = WORKLOAD_CONTAINER,
                    exit_code,
                    reason = ?reason,
                    "Test container has terminated"
                );
                Ok(Some(ArtifactWindow {
                    namespace: job.namespace.clone(),
                    job_name: job.name.clone(),
                    pod_name,
                    exit_code: Some(exit_code),
                    reason,
                }))
            }
            other => {
                debug!(
                    job = %job.name,
                    pod = %pod_name,
                    state = ?other,
                    "Test container not finished"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CompletionWatcher for PollingWatcher {
    async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        job: &WorkloadJob,
    ) -> Result<ArtifactWindow> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut interval = self.poll.interval;

        info!(
            job = %job.name,
            timeout = ?self.timeout,
            interval = ?interval,
            "Waiting for suite to complete"
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExecutorError::Timeout {
                    elapsed: now - started,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ExecutorError::Cancelled("waiting for suite to finish".to_string()));
                }
                _ = sleep(interval.min(deadline - now)) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.observe(cancel, job)).await {
                Ok(Ok(Some(window))) => return Ok(window),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ExecutorError::Timeout {
                        elapsed: started.elapsed(),
                    });
                }
            }

            interval = self.poll.next_interval(interval);
        }
    }
}
