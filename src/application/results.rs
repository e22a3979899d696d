//! Result processing
//!
//! The orchestrator hands the populated output directory to a
//! [`ResultProcessor`]. The default implementation summarises the JUnit XML
//! reports a suite leaves behind.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, Span};
use walkdir::WalkDir;

use crate::domain::entities::TestResults;
use crate::error::{ExecutorError, Result};

#[async_trait]
pub trait ResultProcessor: Send + Sync {
    /// Turn the artifacts in `output_dir` into a structured result.
    ///
    /// `span` is the run's logging span; processors log inside it.
    async fn process(&self, output_dir: &Path, span: &Span) -> Result<TestResults>;
}

/// Sums the `<testsuite>` counters of every `junit*.xml` under the output directory.
#[derive(Debug, Clone, Default)]
pub struct JUnitResultProcessor;

fn testsuite_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<testsuite\b([^>]*)>").expect("static regex"))
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(\w+)\s*=\s*"(\d+)""#).expect("static regex"))
}

fn is_junit_report(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("junit") && n.ends_with(".xml"))
        .unwrap_or(false)
}

/// Parse the counters out of one report's `<testsuite>` elements.
pub fn summarize_report(xml: &str) -> TestResults {
    let mut results = TestResults::default();

    for suite in testsuite_pattern().captures_iter(xml) {
        results.suites += 1;
        for attr in attribute_pattern().captures_iter(&suite[1]) {
            let value: u32 = attr[2].parse().unwrap_or(0);
            match &attr[1] {
                "tests" => results.tests += value,
                "failures" => results.failures += value,
                "errors" => results.errors += value,
                "skipped" | "disabled" => results.skipped += value,
                _ => {}
            }
        }
    }

    results
}

fn collect_reports(output_dir: &Path) -> Result<TestResults> {
    let mut total = TestResults::default();
    let mut reports: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(output_dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            ExecutorError::ResultProcessing(format!("walking {}: {}", output_dir.display(), e))
        })?;
        if !entry.file_type().is_file() || !is_junit_report(entry.path()) {
            continue;
        }

        let xml = std::fs::read_to_string(entry.path())
            .map_err(|e| ExecutorError::io(format!("reading {}", entry.path().display()), e))?;
        let summary = summarize_report(&xml);
        debug!(
            report = %entry.path().display(),
            tests = summary.tests,
            failures = summary.failures,
            "Parsed JUnit report"
        );
        total.merge(summary);
        reports.push(entry.path().to_path_buf());
    }

    if reports.is_empty() {
        return Err(ExecutorError::ResultProcessing(
            "results did not contain JUnit XML report".to_string(),
        ));
    }

    reports.sort();
    total.reports = reports;
    Ok(total)
}

#[async_trait]
impl ResultProcessor for JUnitResultProcessor {
    async fn process(&self, output_dir: &Path, span: &Span) -> Result<TestResults> {
        let dir = output_dir.to_path_buf();
        let span = span.clone();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let results = collect_reports(&dir)?;
            info!(
                suites = results.suites,
                tests = results.tests,
                failures = results.failures,
                errors = results.errors,
                skipped = results.skipped,
                "Processed test results"
            );
            Ok::<_, ExecutorError>(results)
        })
        .await
        .map_err(|e| ExecutorError::ResultProcessing(format!("result task failed: {}", e)))?
    }
}
