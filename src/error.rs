use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("{context}: {source}")]
    Kube {
        context: String,
        #[source]
        source: kube::Error,
    },

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("timed out after {elapsed:?} waiting for the workload container to terminate")]
    Timeout { elapsed: Duration },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("pod for job not found: {0}")]
    PodNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Result processing error: {0}")]
    ResultProcessing(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ExecutorError>,
    },
}

impl ExecutorError {
    pub fn kube(context: impl Into<String>, source: kube::Error) -> Self {
        ExecutorError::Kube {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecutorError::Io {
            context: context.into(),
            source,
        }
    }

    /// Innermost error once all stage wrapping is stripped.
    pub fn root(&self) -> &ExecutorError {
        match self {
            ExecutorError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the workload image could not be pulled ("bad image").
    pub fn is_image_pull(&self) -> bool {
        matches!(self.root(), ExecutorError::ImagePull { .. })
    }

    /// True when the workload never terminated within the deadline ("suite hung").
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), ExecutorError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ExecutorError::Cancelled(_))
    }
}

/// Wraps an error with the name of the stage that produced it.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ExecutorError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ExecutorError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}

impl From<std::io::Error> for ExecutorError {
    fn from(err: std::io::Error) -> Self {
        ExecutorError::io("IO error", err)
    }
}

impl From<serde_yaml::Error> for ExecutorError {
    fn from(err: serde_yaml::Error) -> Self {
        ExecutorError::Configuration(format!("YAML error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
