use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExecutorError, Result};

const SECRET_ENV_PREFIX: &str = "EXECUTOR_SECRET_";

/// How to reach the cluster the suite runs in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConnection {
    /// Path to a kubeconfig file (None = infer from environment / in-cluster)
    #[serde(default)]
    pub kubeconfig_path: Option<PathBuf>,
    /// Kubeconfig context to select
    #[serde(default)]
    pub context: Option<String>,
}

/// Completion polling cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    /// Delay between status checks
    #[serde(
        rename = "interval_seconds",
        default = "default_poll_interval",
        deserialize_with = "duration_from_secs"
    )]
    pub interval: Duration,
    /// Multiplier applied to the interval after every tick (1.0 = fixed)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for the interval once backoff applies
    #[serde(
        rename = "max_interval_seconds",
        default = "default_max_interval",
        deserialize_with = "duration_from_secs"
    )]
    pub max_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            backoff_factor: default_backoff_factor(),
            max_interval: default_max_interval(),
        }
    }
}

impl PollSettings {
    /// Interval to wait after `current`, honouring backoff and its ceiling.
    pub fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff_factor.is_nan() || self.backoff_factor <= 1.0 {
            return current;
        }
        let ceiling = self.max_interval.max(self.interval);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map(|next| next.min(ceiling))
            .unwrap_or(ceiling)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ExecutorError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ExecutorError::Configuration(format!(
                "poll backoff factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        // The ceiling only matters once backoff is enabled.
        if self.backoff_factor > 1.0 && self.max_interval < self.interval {
            return Err(ExecutorError::Configuration(format!(
                "poll max interval ({:?}) is shorter than the interval ({:?})",
                self.max_interval, self.interval
            )));
        }
        Ok(())
    }
}

/// Immutable input for one suite execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub cluster: ClusterConnection,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub cloud_provider_id: String,
    #[serde(default)]
    pub cloud_provider_region: String,
    /// Key/value pairs exposed to the workload through a secret
    #[serde(default)]
    pub passthrough_secrets: BTreeMap<String, String>,
    /// Execution deadline for the workload container
    #[serde(
        rename = "timeout_seconds",
        default = "default_timeout",
        deserialize_with = "duration_from_secs"
    )]
    pub timeout: Duration,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub skip_cleanup: bool,
    #[serde(default)]
    pub poll: PollSettings,
    /// Bound on the best-effort teardown
    #[serde(
        rename = "cleanup_timeout_seconds",
        default = "default_cleanup_timeout",
        deserialize_with = "duration_from_secs"
    )]
    pub cleanup_timeout: Duration,
    /// Kubeconfig handed to the workload, mounted from a secret
    #[serde(default)]
    pub kubeconfig_contents: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConnection::default(),
            cluster_id: String::new(),
            environment: String::new(),
            cloud_provider_id: String::new(),
            cloud_provider_region: String::new(),
            passthrough_secrets: BTreeMap::new(),
            timeout: default_timeout(),
            output_dir: PathBuf::from("./artifacts"),
            skip_cleanup: false,
            poll: PollSettings::default(),
            cleanup_timeout: default_cleanup_timeout(),
            kubeconfig_contents: None,
        }
    }
}

impl ExecutionConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from an arbitrary set of key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = ExecutionConfig::default();

        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(SECRET_ENV_PREFIX) {
                if !name.is_empty() {
                    config.passthrough_secrets.insert(name.to_string(), value);
                }
                continue;
            }

            match key.as_str() {
                "EXECUTOR_KUBECONFIG" => config.cluster.kubeconfig_path = Some(value.into()),
                "EXECUTOR_KUBE_CONTEXT" => config.cluster.context = Some(value),
                "OCM_CLUSTER_ID" => config.cluster_id = value,
                "OCM_ENV" => config.environment = value,
                "CLOUD_PROVIDER_ID" => config.cloud_provider_id = value,
                "CLOUD_PROVIDER_REGION" => config.cloud_provider_region = value,
                "EXECUTOR_TIMEOUT_SECONDS" => {
                    config.timeout = parse_secs(&key, &value)?;
                }
                "EXECUTOR_POLL_INTERVAL_SECONDS" => {
                    config.poll.interval = parse_secs(&key, &value)?;
                }
                "EXECUTOR_CLEANUP_TIMEOUT_SECONDS" => {
                    config.cleanup_timeout = parse_secs(&key, &value)?;
                }
                "EXECUTOR_OUTPUT_DIR" => config.output_dir = value.into(),
                "EXECUTOR_SKIP_CLEANUP" => {
                    config.skip_cleanup = matches!(
                        value.to_lowercase().as_str(),
                        "1" | "true" | "yes" | "on"
                    );
                }
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ExecutorError::io(format!("reading config {}", path.display()), e))?;
        let config: ExecutionConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(ExecutorError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ExecutorError::Configuration(
                "output directory must be set".to_string(),
            ));
        }
        self.poll.validate()
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ExecutorError::Configuration(format!("{} must be a number of seconds", key)))
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cleanup_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(30)
}
