//! Suite execution domain entities
//!
//! These types describe one remote suite run: the isolated environment it
//! gets, the job that runs the image, the observed state of the workload
//! container and the artifacts brought back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a single `Execute` invocation
pub type RunId = Uuid;

/// Transient namespace plus the RBAC scaffolding created for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    /// Generated namespace name; the isolation unit of a run
    pub namespace: String,
    /// Service account the workload pod runs as
    pub service_account: String,
    /// Cluster-role-binding name assigned by the API server
    pub cluster_role_binding: String,
}

/// Lifecycle of the pod backing a [`WorkloadJob`].
///
/// The pod first runs the workload container. Once that container terminates
/// the pause sidecar keeps the pod alive, opening a window in which artifacts
/// can still be read from the shared volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLifecycle {
    /// Workload container not yet terminated
    Workload,
    /// Workload terminated, sidecar still serving the shared volume
    ArtifactWindow,
}

/// A submitted job running the suite image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadJob {
    pub namespace: String,
    /// Name generated by the API server
    pub name: String,
    pub image: String,
    pub lifecycle: JobLifecycle,
}

impl WorkloadJob {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            image: image.into(),
            lifecycle: JobLifecycle::Workload,
        }
    }

    /// Move the job into its artifact window once the workload has terminated.
    pub fn enter_artifact_window(&mut self, window: &ArtifactWindow) {
        debug_assert_eq!(window.job_name, self.name);
        self.lifecycle = JobLifecycle::ArtifactWindow;
    }
}

/// Derived status of the workload container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionState {
    /// No pod (or no status for the workload container) observed yet
    Unknown,
    /// Container waiting to start; `reason` as reported by the kubelet
    Waiting { reason: Option<String> },
    Running,
    /// Container exited, successfully or not
    Terminated {
        exit_code: i32,
        reason: Option<String>,
    },
}

/// Proof that the workload terminated while its pod is still reachable.
///
/// Only the completion watcher produces this value; artifact retrieval
/// consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactWindow {
    pub namespace: String,
    pub job_name: String,
    pub pod_name: String,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// Files retrieved from a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    /// `<output_dir>/<job_name>.log`
    pub log_file: PathBuf,
    /// Directories created while unpacking, relative to the output directory
    pub directories: Vec<PathBuf>,
    /// Regular files written while unpacking, relative to the output directory
    pub files: Vec<PathBuf>,
}

/// Summary produced by the result-processing collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub suites: u32,
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
    /// Report files the summary was built from
    pub reports: Vec<PathBuf>,
}

impl TestResults {
    pub fn passed(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }

    pub fn merge(&mut self, other: TestResults) {
        self.suites += other.suites;
        self.tests += other.tests;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.reports.extend(other.reports);
    }
}

/// Everything a caller learns from one `Execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub image: String,
    pub environment: ExecutionEnvironment,
    pub job: WorkloadJob,
    /// Exit code of the workload container, when the kubelet reported one
    pub exit_code: Option<i32>,
    pub artifacts: ArtifactSet,
    pub results: TestResults,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// True when the workload exited cleanly and every test passed.
    pub fn is_success(&self) -> bool {
        self.exit_code.unwrap_or(0) == 0 && self.results.passed()
    }
}
