//! Kubernetes plumbing: object construction, naming and the client seam

pub mod builder;
pub mod client;
pub mod naming;

pub use client::{ClusterClient, ExecOutput, KubeClusterClient, LogStream};
pub use naming::{NameGenerator, RandomSuffix, SequentialSuffix};
