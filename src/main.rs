use anyhow::{bail, Context};
use dotenv::dotenv;
use suite_executor::core::logging::{init_logging_with_format, init_structured_logging};
use suite_executor::{ExecutionConfig, SuiteExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn usage() -> &'static str {
    "usage: suite-executor <image>\n\n\
     The image may also be given as EXECUTOR_IMAGE. Configuration is read from\n\
     the YAML file named by EXECUTOR_CONFIG, or from EXECUTOR_* environment variables."
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    match std::env::var("EXECUTOR_LOG_FORMAT") {
        Ok(format) => init_logging_with_format(&format)?,
        Err(_) => init_structured_logging()?,
    }

    let image = match std::env::args().nth(1).or_else(|| std::env::var("EXECUTOR_IMAGE").ok()) {
        Some(image) if !image.trim().is_empty() => image,
        _ => bail!(usage()),
    };

    let config = match std::env::var("EXECUTOR_CONFIG") {
        Ok(path) => ExecutionConfig::from_yaml_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        Err(_) => ExecutionConfig::from_env().context("loading configuration from environment")?,
    };

    info!(
        image = %image,
        output_dir = %config.output_dir.display(),
        timeout = ?config.timeout,
        skip_cleanup = config.skip_cleanup,
        "Starting suite executor"
    );

    let executor = SuiteExecutor::connect(config)
        .await
        .context("connecting to cluster")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    match executor.execute(&cancel, &image).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                error!(
                    exit_code = ?report.exit_code,
                    failures = report.results.failures,
                    errors = report.results.errors,
                    "Suite reported failures"
                );
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            if e.is_image_pull() {
                error!(image = %image, "Suite image could not be pulled");
            } else if e.is_timeout() {
                error!(image = %image, "Suite did not finish before the deadline");
            }
            Err(e.into())
        }
    }
}
