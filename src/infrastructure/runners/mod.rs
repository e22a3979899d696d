pub mod artifacts;
pub mod executor;
pub mod launcher;
pub mod provisioner;
pub mod untar;
pub mod watcher;

pub use artifacts::ArtifactRetriever;
pub use executor::SuiteExecutor;
pub use launcher::JobLauncher;
pub use provisioner::EnvironmentProvisioner;
pub use watcher::{CompletionWatcher, PollingWatcher};
