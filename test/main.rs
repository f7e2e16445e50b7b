// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use pbackup::backup::sync::{SyncError, SyncOutcome, SyncRequest, Synchronizer};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};
use walkdir::WalkDir;

/// Write files relative to `root`, creating parent directories.
pub(crate) fn write_tree(root: impl AsRef<Path>, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let path = root.as_ref().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }

    Ok(())
}

/// Read every regular file below `root` keyed by its relative path.
pub(crate) fn read_tree(root: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
    let root = root.as_ref();
    let mut tree = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?;
            let key = relative.to_string_lossy().replace('\\', "/");
            tree.insert(key, fs::read_to_string(entry.path())?);
        }
    }

    Ok(tree)
}

#[cfg(unix)]
pub(crate) fn inode(path: impl AsRef<Path>) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;

    Ok(fs::metadata(path)?.ino())
}

/// Check if an rsync binary can be run on this system.
pub(crate) fn rsync_available() -> bool {
    Command::new("rsync")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// In-process stand-in for rsync.
///
/// Changed files are written to a temporary file and renamed into place, so
/// hard links shared with older snapshots are never modified in place.
#[derive(Debug, Default)]
pub(crate) struct MirrorSynchronizer;

impl Synchronizer for MirrorSynchronizer {
    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncOutcome, SyncError> {
        match mirror(request) {
            Ok(output) => Ok(SyncOutcome::success(output)),
            Err(err) => Ok(SyncOutcome {
                exit_code: Some(23),
                output: vec![err.to_string()],
            }),
        }
    }
}

fn mirror(request: &SyncRequest<'_>) -> io::Result<Vec<String>> {
    let mut output = Vec::new();
    for entry in WalkDir::new(request.source).min_depth(1) {
        let entry = entry?;
        let relative = relative_to(entry.path(), request.source);
        let dest = request.dest.join(&relative);

        if entry.file_type().is_dir() {
            if !dest.is_dir() {
                output.push(format!("cd+++++++++ {}/", relative.display()));
                if !request.dry_run {
                    fs::create_dir_all(&dest)?;
                }
            }
        } else if entry.file_type().is_file() {
            let content = fs::read(entry.path())?;
            if fs::read(&dest).ok().as_deref() == Some(content.as_slice()) {
                continue;
            }

            output.push(format!(">f+++++++++ {}", relative.display()));
            if !request.dry_run {
                let tmp = dest.with_extension("pbackup-tmp");
                fs::write(&tmp, &content)?;
                fs::rename(&tmp, &dest)?;
            }
        }
    }

    if request.delete_extraneous && request.dest.is_dir() {
        let mut stale = Vec::new();
        for entry in WalkDir::new(request.dest).min_depth(1).contents_first(true) {
            let entry = entry?;
            let relative = relative_to(entry.path(), request.dest);
            if fs::symlink_metadata(request.source.join(&relative)).is_err() {
                stale.push((relative, entry.file_type().is_dir()));
            }
        }

        for (relative, is_dir) in stale {
            output.push(format!("*deleting   {}", relative.display()));
            if request.dry_run {
                continue;
            }

            let path = request.dest.join(&relative);
            if is_dir {
                fs::remove_dir(path)?;
            } else {
                fs::remove_file(path)?;
            }
        }
    }

    Ok(output)
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
