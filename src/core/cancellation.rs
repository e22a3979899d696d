use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{ExecutorError, Result};

/// Run `fut` unless `token` is cancelled first.
///
/// Cancellation drops the in-flight future, which aborts the underlying
/// network operation, and reports which stage was interrupted.
pub async fn run_cancellable<T, F>(token: &CancellationToken, stage: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ExecutorError::Cancelled(stage.to_string())),
        result = fut => result,
    }
}
