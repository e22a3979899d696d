//! Tar stream extraction
//!
//! Unpacks any `Read` carrying a tar stream into a directory. Directories and
//! regular files are reproduced; every other entry type is skipped. Entry
//! paths are taken relative to the output directory and may not escape it.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{ExecutorError, Result};

/// What an extraction wrote, relative to the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub directories: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// Strip root/prefix components; reject `..` so nothing lands outside the target.
fn relative_entry_path(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

pub fn unpack_archive<R: Read>(reader: R, output_dir: &Path) -> Result<UnpackSummary> {
    let mut archive = tar::Archive::new(reader);
    let mut summary = UnpackSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| ExecutorError::io("reading tar header", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ExecutorError::io("reading tar header", e))?;
        let entry_path = entry
            .path()
            .map_err(|e| ExecutorError::io("reading tar header", e))?
            .into_owned();

        let Some(relative) = relative_entry_path(&entry_path) else {
            debug!(path = %entry_path.display(), "Skipping tar entry outside output directory");
            continue;
        };
        let target = output_dir.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ExecutorError::io("unable to mkdir", e))?;
            summary.directories.push(relative);
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ExecutorError::io("unable to mkdir", e))?;
            }
            let mut file =
                File::create(&target).map_err(|e| ExecutorError::io("creating file", e))?;
            // `file` is closed on drop whether or not the copy succeeds.
            io::copy(&mut entry, &mut file).map_err(|e| ExecutorError::io("writing file", e))?;
            summary.files.push(relative);
        } else {
            debug!(path = %entry_path.display(), entry_type = ?entry_type, "Skipping tar entry");
        }
    }

    Ok(summary)
}
