//! Seeding the catalog from a directory of JSON files.
//!
//! Each file holds one project aggregate or an array of them. A file's
//! SHA-256 is recorded with its projects, so importing the same directory
//! twice adds nothing the second time.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::database::writer::WriterHandle;
use crate::ingest::{hasher, scanner};
use crate::model::ProjectAggregate;

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    Many(Vec<ProjectAggregate>),
    One(ProjectAggregate),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub files_seen: usize,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub projects_inserted: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum FileOutcome {
    Imported(usize),
    AlreadyImported,
}

/// Parse the body of one seed file.
pub fn parse_seed(bytes: &[u8]) -> Result<Vec<ProjectAggregate>> {
    let parsed: SeedFile = serde_json::from_slice(bytes).context("Invalid seed JSON")?;
    let projects = match parsed {
        SeedFile::Many(projects) => projects,
        SeedFile::One(project) => vec![project],
    };
    for (i, project) in projects.iter().enumerate() {
        project
            .validate()
            .map_err(|e| anyhow!("project #{}: {}", i, e))?;
    }
    Ok(projects)
}

/// Import every seed file under `root` through the writer.
///
/// A file that cannot be read, parsed or stored is logged and counted as
/// failed; the rest of the directory still imports.
pub fn import_directory(
    root: &Path,
    writer: &WriterHandle,
    progress: &ProgressBar,
) -> Result<SeedSummary> {
    if !root.is_dir() {
        return Err(anyhow!("Seed directory {:?} does not exist", root));
    }

    let (scan_tx, scan_rx) = bounded::<PathBuf>(256);
    let scan_root = root.to_path_buf();
    let scanner_handle = thread::spawn(move || scanner::scan_directory(&scan_root, scan_tx));

    let mut summary = SeedSummary::default();
    for path in scan_rx {
        summary.files_seen += 1;
        progress.set_message(path.display().to_string());

        match import_file(root, &path, writer) {
            Ok(FileOutcome::Imported(count)) => {
                summary.files_imported += 1;
                summary.projects_inserted += count;
            }
            Ok(FileOutcome::AlreadyImported) => {
                summary.files_skipped += 1;
                info!("Skipping {:?}: already imported", path);
            }
            Err(e) => {
                summary.files_failed += 1;
                error!("Failed to import {:?}: {:#}", path, e);
            }
        }
        progress.inc(1);
    }

    scanner_handle
        .join()
        .map_err(|_| anyhow!("Seed scanner panicked"))?
        .context("Failed to scan seed directory")?;

    if summary.files_failed > 0 {
        warn!(failed = summary.files_failed, "Some seed files were not imported");
    }
    Ok(summary)
}

fn import_file(root: &Path, path: &Path, writer: &WriterHandle) -> Result<FileOutcome> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let digest = hasher::digest_bytes(&bytes);
    let projects = parse_seed(&bytes)?;
    let source = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();

    match writer.import_seed(digest, source, projects)? {
        Some(ids) => Ok(FileOutcome::Imported(ids.len())),
        None => Ok(FileOutcome::AlreadyImported),
    }
}
