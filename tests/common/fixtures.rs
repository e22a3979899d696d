use std::path::Path;
use std::time::Duration;
use tar::{Builder, EntryType, Header};

use suite_executor::config::{ExecutionConfig, PollSettings};

pub const SUITE_IMAGE: &str = "quay.io/example/e2e-suite:latest";

pub const PASSING_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="e2e" tests="3" failures="0" errors="0" skipped="1">
  <testcase name="cluster is healthy"/>
</testsuite>"#;

pub const FAILING_REPORT: &str =
    r#"<testsuite name="e2e" tests="3" failures="2" errors="0"></testsuite>"#;

/// Config with a short deadline and a one second poll.
pub fn test_config(output_dir: &Path) -> ExecutionConfig {
    ExecutionConfig {
        output_dir: output_dir.to_path_buf(),
        timeout: Duration::from_secs(5),
        poll: PollSettings {
            interval: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A tar stream laid out the way `tar cf - -C /test-run-results /test-run-results` emits it.
pub fn results_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut data = Vec::new();
    {
        let mut builder = Builder::new(&mut data);

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "test-run-results/", std::io::empty())
            .unwrap();

        for (path, contents) in files {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("test-run-results/{}", path), *contents)
                .unwrap();
        }
        builder.finish().unwrap();
    }
    data
}

pub fn passing_archive() -> Vec<u8> {
    results_archive(&[
        ("junit_e2e.xml", PASSING_REPORT.as_bytes()),
        ("must-gather/cluster.txt", b"nodes: 3".as_slice()),
    ])
}
