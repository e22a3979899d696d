//! Domain entities for remote suite execution

pub mod execution;

pub use execution::{
    ArtifactSet, ArtifactWindow, CompletionState, ExecutionEnvironment, ExecutionReport,
    JobLifecycle, RunId, TestResults, WorkloadJob,
};
