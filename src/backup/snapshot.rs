// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Incremental snapshot directory handling.
//!
//! An incremental profile keeps a sequence of __snapshots__ under its target
//! directory. Each snapshot is a full mirror of the source at the time it was
//! taken. Unchanged files are shared between consecutive snapshots through
//! hard links, so they only take up storage once.
//!
//! # Snapshot Layout
//!
//! ```text
//! <target>/2026-10-16_21-00-00   -> newest snapshot
//! <target>/2026-10-15_21-00-00
//! <target>/2026-10-14_21-00-00   -> oldest snapshot
//! ```
//!
//! Snapshot names are fixed-width timestamps, so plain lexical order is
//! chronological order. The newest and oldest snapshot are always found by
//! comparing names, never by looking at modification times.
//!
//! # Snapshot Life Cycle
//!
//! A new snapshot is created at the start of a run. If an older snapshot
//! exists, the new one is seeded by hard linking every file of the newest
//! snapshot into it. The sync tool then updates the new snapshot in place.
//! Changed files are replaced by the sync tool, which breaks their link,
//! while unchanged files stay linked. Once the sync succeeded, the oldest
//! snapshots are pruned until the retention count is met.

use crate::config::Retention;

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Format of snapshot directory names.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const LINK_PROBE: &str = ".pbackup-link-probe";

/// Snapshot directory of an incremental profile.
///
/// Ordering follows the snapshot name, which is also chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    name: String,
    taken_at: NaiveDateTime,
    path: PathBuf,
}

impl Snapshot {
    /// Construct snapshot from a directory path if its name is snapshot shaped.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?.to_string();
        let taken_at = parse_snapshot_name(&name)?;

        Some(Self {
            name,
            taken_at,
            path,
        })
    }

    /// Name of snapshot directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moment the snapshot was taken.
    pub fn taken_at(&self) -> NaiveDateTime {
        self.taken_at
    }

    /// Full path to snapshot directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse snapshot directory name into its timestamp.
///
/// Only names that round trip through [`SNAPSHOT_NAME_FORMAT`] are accepted,
/// so every accepted name has the same width.
pub fn parse_snapshot_name(name: &str) -> Option<NaiveDateTime> {
    let taken_at = NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT).ok()?;
    (snapshot_name(taken_at) == name).then_some(taken_at)
}

/// Format timestamp as snapshot directory name.
pub fn snapshot_name(taken_at: NaiveDateTime) -> String {
    taken_at.format(SNAPSHOT_NAME_FORMAT).to_string()
}

/// Determine timestamp of the next snapshot.
///
/// Uses `now` truncated to whole seconds, unless that would not sort after
/// the newest existing snapshot. Then the newest snapshot plus one second is
/// used instead, keeping the sequence strictly ordered.
pub fn next_snapshot_time(existing: &[Snapshot], now: NaiveDateTime) -> NaiveDateTime {
    let candidate = now.with_nanosecond(0).unwrap_or(now);
    match existing.iter().max() {
        Some(newest) if newest.taken_at >= candidate => newest.taken_at + TimeDelta::seconds(1),
        _ => candidate,
    }
}

/// List snapshots under target directory from oldest to newest.
///
/// A missing target directory has no snapshots.
///
/// # Errors
///
/// - Return [`SnapshotError::ReadTarget`] if the target cannot be read.
/// - Return [`SnapshotError::UnexpectedEntries`] if the target contains
///   anything that is not a snapshot directory.
pub fn list_snapshots(target_root: impl AsRef<Path>) -> Result<Vec<Snapshot>> {
    let target_root = target_root.as_ref();
    if !target_root.exists() {
        return Ok(Vec::new());
    }

    let read_error = |err| SnapshotError::ReadTarget {
        source: err,
        path: target_root.to_path_buf(),
    };

    let mut snapshots = Vec::new();
    let mut unexpected = Vec::new();
    for entry in fs::read_dir(target_root).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let is_dir = entry.file_type().map_err(read_error)?.is_dir();
        match Snapshot::from_path(entry.path()) {
            Some(snapshot) if is_dir => snapshots.push(snapshot),
            _ => unexpected.push(entry.file_name().to_string_lossy().into_owned()),
        }
    }

    // INVARIANT: Never guess what foreign entries are, and never touch them.
    if !unexpected.is_empty() {
        unexpected.sort();
        return Err(SnapshotError::UnexpectedEntries {
            path: target_root.to_path_buf(),
            entries: unexpected,
        });
    }

    snapshots.sort();
    Ok(snapshots)
}

/// Find snapshot to restore from.
///
/// Without a selector the newest snapshot is chosen. Otherwise a snapshot
/// whose name equals the selector wins, else the newest snapshot whose name
/// starts with it. So `2026-10-16` selects the last snapshot of that day.
///
/// # Errors
///
/// - Return [`SnapshotError`] if snapshots cannot be listed.
pub fn find_snapshot(
    target_root: impl AsRef<Path>,
    selector: Option<&str>,
) -> Result<Option<Snapshot>> {
    let snapshots = list_snapshots(target_root)?;
    let found = match selector {
        None => snapshots.into_iter().next_back(),
        Some(selector) => {
            let exact = snapshots.iter().find(|s| s.name == selector).cloned();
            exact.or_else(|| {
                snapshots
                    .into_iter()
                    .rev()
                    .find(|s| s.name.starts_with(selector))
            })
        }
    };

    Ok(found)
}

/// Path the next snapshot would get, without creating anything.
///
/// # Errors
///
/// - Return [`SnapshotError`] if snapshots cannot be listed.
pub fn next_snapshot_path(target_root: impl AsRef<Path>, now: NaiveDateTime) -> Result<PathBuf> {
    let target_root = target_root.as_ref();
    let existing = list_snapshots(target_root)?;
    Ok(target_root.join(snapshot_name(next_snapshot_time(&existing, now))))
}

/// Create the next snapshot directory.
///
/// The first snapshot of a profile is created empty. Every later snapshot is
/// seeded from the newest existing snapshot by hard linking its files, and
/// recreating its directories and symbolic links. File content is never
/// copied.
///
/// Before seeding, the newest snapshot and the new snapshot directory must
/// report the same device, and a probe hard link must succeed inside the new
/// directory. The device check catches a newest snapshot that is itself a
/// mount point.
///
/// # Errors
///
/// - Return [`SnapshotError::UnexpectedEntries`] if the target contains
///   foreign entries.
/// - Return [`SnapshotError::CrossDevice`] or
///   [`SnapshotError::LinkUnsupported`] if hard links cannot be used.
/// - Return other [`SnapshotError`] variants on I/O failure.
#[instrument(skip(target_root, now), level = "debug")]
pub fn prepare_next_snapshot(
    target_root: impl AsRef<Path>,
    now: NaiveDateTime,
) -> Result<PathBuf> {
    let target_root = target_root.as_ref();
    let existing = list_snapshots(target_root)?;
    let path = target_root.join(snapshot_name(next_snapshot_time(&existing, now)));

    let Some(newest) = existing.last() else {
        info!("create first snapshot {:?}", path.display());
        create_snapshot_dir(&path)?;
        return Ok(path);
    };

    create_snapshot_dir(&path)?;

    // INVARIANT: Never leave a half seeded snapshot behind.
    let seeded = check_same_device(newest.path(), &path)
        .and_then(|_| probe_hard_link(&path))
        .and_then(|_| seed_hard_links(newest.path(), &path));
    match seeded {
        Ok(linked) => {
            info!(
                "seeded snapshot {:?} from {:?} ({linked} files linked)",
                path.display(),
                newest.name()
            );
            Ok(path)
        }
        Err(error) => {
            if let Err(cleanup) = fs::remove_dir_all(&path) {
                warn!(
                    "failed to remove partial snapshot {:?}: {cleanup}",
                    path.display()
                );
            }
            Err(error)
        }
    }
}

/// Remove oldest snapshots until retention is met.
///
/// Failing to remove one snapshot does not stop the others from being
/// removed. Every failure ends up as a [`PruneWarning`] in the report.
///
/// # Errors
///
/// - Return [`SnapshotError`] if snapshots cannot be listed.
#[instrument(skip(target_root), level = "debug")]
pub fn prune_old_snapshots(
    target_root: impl AsRef<Path>,
    retention: Retention,
) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    let Some(limit) = retention.limit() else {
        debug!("unlimited retention, nothing to prune");
        return Ok(report);
    };

    let snapshots = list_snapshots(target_root)?;
    let excess = snapshots.len().saturating_sub(limit);
    for snapshot in &snapshots[..excess] {
        info!("remove oldest snapshot {:?}", snapshot.path().display());
        match fs::remove_dir_all(snapshot.path()) {
            Ok(()) => report.removed += 1,
            Err(err) => report.warnings.push(PruneWarning {
                source: err,
                path: snapshot.path().to_path_buf(),
            }),
        }
    }

    Ok(report)
}

/// Outcome of pruning old snapshots.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Number of snapshots removed.
    pub removed: usize,

    /// Snapshots that could not be removed.
    pub warnings: Vec<PruneWarning>,
}

/// Old snapshot could not be removed.
#[derive(Debug, thiserror::Error)]
#[error("failed to remove old snapshot {:?}", path.display())]
pub struct PruneWarning {
    #[source]
    pub source: io::Error,
    pub path: PathBuf,
}

fn create_snapshot_dir(path: &Path) -> Result<()> {
    fs::create_dir(path).map_err(|err| SnapshotError::CreateSnapshot {
        source: err,
        path: path.to_path_buf(),
    })
}

#[cfg(unix)]
fn check_same_device(newest: &Path, snapshot: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let device = |path: &Path| {
        fs::metadata(path)
            .map(|meta| meta.dev())
            .map_err(|err| SnapshotError::ReadTarget {
                source: err,
                path: path.to_path_buf(),
            })
    };

    if device(newest)? != device(snapshot)? {
        return Err(SnapshotError::CrossDevice {
            newest: newest.to_path_buf(),
            snapshot: snapshot.to_path_buf(),
        });
    }

    Ok(())
}

#[cfg(not(unix))]
fn check_same_device(_newest: &Path, _snapshot: &Path) -> Result<()> {
    Ok(())
}

fn probe_hard_link(dir: &Path) -> Result<()> {
    let probe = dir.join(LINK_PROBE);
    let link = dir.join(format!("{LINK_PROBE}.link"));
    let unsupported = |err| SnapshotError::LinkUnsupported {
        source: err,
        path: dir.to_path_buf(),
    };

    File::create(&probe).map_err(unsupported)?;
    let linked = fs::hard_link(&probe, &link);
    let _ = fs::remove_file(&link);
    let _ = fs::remove_file(&probe);
    linked.map_err(unsupported)
}

fn seed_hard_links(from: &Path, to: &Path) -> Result<usize> {
    let mut linked = 0;
    let mut dir_permissions = Vec::new();
    for entry in WalkDir::new(from).follow_links(false).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(relative);
        let seed_error = |err| SnapshotError::Seed {
            source: err,
            from: entry.path().to_path_buf(),
            to: dest.clone(),
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir(&dest).map_err(seed_error)?;
            dir_permissions.push((dest.clone(), entry.metadata()?.permissions()));
        } else if file_type.is_file() {
            fs::hard_link(entry.path(), &dest).map_err(seed_error)?;
            linked += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest).map_err(seed_error)?;
        } else {
            debug!("skip special file {:?}", entry.path().display());
        }
    }

    // INVARIANT: Read-only directories only become read-only once filled.
    for (dir, permissions) in dir_permissions.into_iter().rev() {
        fs::set_permissions(&dir, permissions).map_err(|err| SnapshotError::Seed {
            source: err,
            from: from.to_path_buf(),
            to: dir.clone(),
        })?;
    }

    Ok(linked)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(windows)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let link = fs::read_link(from)?;
    if from.is_dir() {
        std::os::windows::fs::symlink_dir(link, to)
    } else {
        std::os::windows::fs::symlink_file(link, to)
    }
}

/// Snapshot handling error types.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Target contains entries that are not snapshot directories.
    #[error(
        "target {:?} contains entries that are not snapshots: {}",
        path.display(),
        entries.join(", ")
    )]
    UnexpectedEntries { path: PathBuf, entries: Vec<String> },

    /// Target directory cannot be read.
    #[error("failed to read target directory {:?}", path.display())]
    ReadTarget {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Snapshot directory cannot be created.
    #[error("failed to create snapshot directory {:?}", path.display())]
    CreateSnapshot {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Newest snapshot is not on the same filesystem as the target.
    #[error(
        "snapshot {:?} is on a different filesystem than {:?}, cannot hard link",
        newest.display(),
        snapshot.display()
    )]
    CrossDevice { newest: PathBuf, snapshot: PathBuf },

    /// Filesystem does not support hard links.
    #[error("filesystem at {:?} does not support hard links", path.display())]
    LinkUnsupported {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Entry of the newest snapshot cannot be linked into the new one.
    #[error("failed to seed {:?} from {:?}", to.display(), from.display())]
    Seed {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Newest snapshot cannot be traversed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl SnapshotError {
    /// Whether the error stems from a misconfigured target layout.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, Self::UnexpectedEntries { .. })
    }
}

/// Friendly result alias :3
type Result<T, E = SnapshotError> = std::result::Result<T, E>;
