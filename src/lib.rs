//! Suite executor - runs a containerized test suite on a Kubernetes cluster
//!
//! Each run provisions a throwaway namespace with cluster-admin rights,
//! launches the suite image as a job next to a pause sidecar, waits for the
//! suite container to terminate, copies its log and result files back to a
//! local directory and hands that directory to a result processor.

pub mod application;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use application::results::{JUnitResultProcessor, ResultProcessor};
pub use config::{ClusterConnection, ExecutionConfig, PollSettings};
pub use domain::entities::{ExecutionReport, TestResults};
pub use error::{ExecutorError, Result};
pub use infrastructure::kubernetes::{ClusterClient, KubeClusterClient};
pub use infrastructure::runners::SuiteExecutor;
