// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup orchestration.
//!
//! The orchestrator runs requested profiles one after another. Each profile
//! walks through the same set of states:
//!
//! ```text
//! Pending -> Preparing -> Syncing -> Finalizing -> Succeeded
//!    |           |           |
//!    +-----------+-----------+------------------> Failed
//! ```
//!
//! - __Pending__: the source is checked, and the target is created if it
//!   is missing.
//! - __Preparing__: the destination of the sync is determined. Synchronize
//!   profiles sync straight into their target. Incremental profiles get a new
//!   snapshot directory seeded from the newest existing one.
//! - __Syncing__: the sync tool mirrors the source into the destination.
//! - __Finalizing__: incremental profiles prune snapshots beyond their
//!   retention count. Pruning problems are reported, but never fail the run.
//!
//! A failing profile never stops the remaining profiles from running. The
//! [`RunSummary`] of all profiles decides the exit status of the process.
//!
//! # Dry Runs
//!
//! Dry runs never touch the filesystem. The target is not created, no
//! snapshot is prepared, nothing is pruned. Incremental profiles simulate the
//! sync into their newest snapshot instead, or into the path the first
//! snapshot would get.
//!
//! # See Also
//!
//! 1. [`snapshot`]
//! 2. [`sync`]

pub mod snapshot;
pub mod sync;

use crate::{
    backup::{
        snapshot::{PruneWarning, SnapshotError},
        sync::{Rsync, SyncError, SyncRequest, Synchronizer},
    },
    config::{BackupMode, BackupProfile},
};

use chrono::{Local, NaiveDateTime};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Process wide flags applied to every requested profile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    /// Simulate without mutating anything.
    pub dry_run: bool,

    /// Delete destination entries that are absent from the source.
    pub delete_extraneous: bool,

    /// Relay sync tool output.
    pub verbose: bool,
}

/// One profile to run with the process wide flags.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub profile: &'a BackupProfile,
    pub flags: RunFlags,
}

/// States a profile run passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Preparing,
    Syncing,
    Finalizing,
    Succeeded,
    Failed,
}

impl Display for RunState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let state = match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Syncing => "syncing",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        fmt.write_str(state)
    }
}

/// Final status of a profile run.
#[derive(Debug)]
pub enum RunStatus {
    Succeeded,
    Failed(BackupError),
}

/// Outcome of running one profile.
#[derive(Debug)]
pub struct RunResult {
    /// Name of the profile that ran.
    pub profile: String,

    /// Whether the run succeeded.
    pub status: RunStatus,

    /// Exit code of the sync tool, if it ran to completion.
    pub exit_code: Option<i32>,

    /// Directory the sync tool wrote into, if it got that far.
    pub destination: Option<PathBuf>,

    /// Old snapshots that could not be pruned.
    pub prune_warnings: Vec<PruneWarning>,
}

impl RunResult {
    fn new(profile: &BackupProfile) -> Self {
        Self {
            profile: profile.name.clone(),
            status: RunStatus::Succeeded,
            exit_code: None,
            destination: None,
            prune_warnings: Vec::new(),
        }
    }

    /// Check if the run succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded)
    }

    /// Error that failed the run, if any.
    pub fn error(&self) -> Option<&BackupError> {
        match &self.status {
            RunStatus::Succeeded => None,
            RunStatus::Failed(error) => Some(error),
        }
    }
}

impl Display for RunResult {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.status {
            RunStatus::Succeeded => write!(fmt, "{}: succeeded", self.profile),
            RunStatus::Failed(error) => {
                write!(fmt, "{}: failed ({}): {error}", self.profile, error.kind())
            }
        }
    }
}

/// Outcomes of every requested profile, in request order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<RunResult>,
}

impl RunSummary {
    /// Check if every requested profile succeeded.
    ///
    /// Trivially true when no profile was requested.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(RunResult::is_success)
    }

    /// Results of failed profiles.
    pub fn failed(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|result| !result.is_success())
    }

    /// Process exit code for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }
}

/// Runs backup and restore operations for profiles.
#[derive(Debug, Default)]
pub struct Orchestrator<S = Rsync>
where
    S: Synchronizer,
{
    synchronizer: S,
}

impl<S> Orchestrator<S>
where
    S: Synchronizer,
{
    /// Construct new orchestrator around a synchronizer.
    pub fn new(synchronizer: S) -> Self {
        Self { synchronizer }
    }

    /// Back up every profile in order.
    ///
    /// Failures are isolated to the profile they happened in.
    pub fn run_all<'a>(
        &self,
        profiles: impl IntoIterator<Item = &'a BackupProfile>,
        flags: RunFlags,
    ) -> RunSummary {
        let results = profiles
            .into_iter()
            .map(|profile| self.run(RunRequest { profile, flags }))
            .collect();

        RunSummary { results }
    }

    /// Back up one profile.
    #[instrument(skip(self, request), fields(profile = %request.profile.name), level = "debug")]
    pub fn run(&self, request: RunRequest<'_>) -> RunResult {
        let profile = request.profile;
        info!("===== backup profile: {}", profile.name);
        info!(
            "starting backup from {:?} to {:?}{}",
            profile.source.display(),
            profile.target.display(),
            dry_run_suffix(request.flags)
        );

        let mut tracker = RunTracker::new(profile);
        let mut result = RunResult::new(profile);
        let outcome = self.backup(request, &mut tracker, &mut result);
        finish(tracker, result, outcome)
    }

    /// Restore one profile by syncing its target back into its source.
    ///
    /// Incremental profiles restore from the snapshot picked by `selector`,
    /// see [`snapshot::find_snapshot`]. Restores never create or prune
    /// snapshots.
    #[instrument(skip(self, request), fields(profile = %request.profile.name), level = "debug")]
    pub fn restore(&self, request: RunRequest<'_>, selector: Option<&str>) -> RunResult {
        let profile = request.profile;
        info!("===== restore profile: {}", profile.name);

        let mut tracker = RunTracker::new(profile);
        let mut result = RunResult::new(profile);
        let outcome = self.restore_from(request, selector, &mut tracker, &mut result);
        finish(tracker, result, outcome)
    }

    fn backup(
        &self,
        request: RunRequest<'_>,
        tracker: &mut RunTracker<'_>,
        result: &mut RunResult,
    ) -> Result<()> {
        let RunRequest { profile, flags } = request;
        check_source(profile.source())?;
        ensure_target(profile.target(), flags.dry_run)?;

        tracker.advance(RunState::Preparing);
        let dest = match profile.mode {
            BackupMode::Synchronize => profile.target.clone(),
            BackupMode::Incremental if flags.dry_run => {
                match snapshot::list_snapshots(profile.target())?.pop() {
                    Some(newest) => newest.path().to_path_buf(),
                    None => snapshot::next_snapshot_path(profile.target(), now())?,
                }
            }
            BackupMode::Incremental => snapshot::prepare_next_snapshot(profile.target(), now())?,
        };
        result.destination = Some(dest.clone());

        tracker.advance(RunState::Syncing);
        self.sync(profile, profile.source(), &dest, flags, result)?;

        tracker.advance(RunState::Finalizing);
        if profile.mode == BackupMode::Incremental && !flags.dry_run {
            match snapshot::prune_old_snapshots(profile.target(), profile.retention) {
                Ok(report) => {
                    debug!("pruned {} old snapshots", report.removed);
                    result.prune_warnings = report.warnings;
                }
                Err(err) => warn!("skip pruning of {:?}: {err}", profile.target().display()),
            }

            for warning in &result.prune_warnings {
                warn!("{warning}: {}", warning.source);
            }
        }

        Ok(())
    }

    fn restore_from(
        &self,
        request: RunRequest<'_>,
        selector: Option<&str>,
        tracker: &mut RunTracker<'_>,
        result: &mut RunResult,
    ) -> Result<()> {
        let RunRequest { profile, flags } = request;

        tracker.advance(RunState::Preparing);
        let source = match profile.mode {
            BackupMode::Synchronize => {
                if let Some(selector) = selector {
                    warn!(
                        "ignore snapshot selector {selector:?}, profile {:?} is not incremental",
                        profile.name
                    );
                }
                profile.target.clone()
            }
            BackupMode::Incremental => snapshot::find_snapshot(profile.target(), selector)?
                .map(|snapshot| snapshot.path().to_path_buf())
                .ok_or_else(|| BackupError::NoSnapshot {
                    path: profile.target.clone(),
                    selector: selector.map(ToString::to_string),
                })?,
        };
        info!(
            "restore backup from {:?} to {:?}{}",
            source.display(),
            profile.source.display(),
            dry_run_suffix(flags)
        );

        check_source(&source)?;
        ensure_target(profile.source(), flags.dry_run)?;
        result.destination = Some(profile.source.clone());

        tracker.advance(RunState::Syncing);
        self.sync(profile, &source, profile.source(), flags, result)?;

        tracker.advance(RunState::Finalizing);
        Ok(())
    }

    fn sync(
        &self,
        profile: &BackupProfile,
        source: &Path,
        dest: &Path,
        flags: RunFlags,
        result: &mut RunResult,
    ) -> Result<()> {
        let request = SyncRequest {
            source,
            dest,
            options: &profile.options,
            delete_extraneous: flags.delete_extraneous,
            dry_run: flags.dry_run,
            verbose: flags.verbose,
        };

        let outcome = self.synchronizer.sync(&request)?;
        result.exit_code = outcome.exit_code;
        outcome.into_result()?;

        Ok(())
    }
}

struct RunTracker<'a> {
    profile: &'a str,
    state: RunState,
}

impl<'a> RunTracker<'a> {
    fn new(profile: &'a BackupProfile) -> Self {
        Self {
            profile: &profile.name,
            state: RunState::Pending,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("{}: {} -> {}", self.profile, self.state, next);
        self.state = next;
    }
}

fn finish(mut tracker: RunTracker<'_>, mut result: RunResult, outcome: Result<()>) -> RunResult {
    match outcome {
        Ok(()) => {
            tracker.advance(RunState::Succeeded);
            info!("{result}");
        }
        Err(err) => {
            tracker.advance(RunState::Failed);
            result.status = RunStatus::Failed(err);
            error!("{result}");
        }
    }

    result
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn dry_run_suffix(flags: RunFlags) -> &'static str {
    if flags.dry_run {
        " (dry-run)"
    } else {
        ""
    }
}

fn check_source(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(BackupError::MissingSource {
            path: path.to_path_buf(),
        });
    }

    if !path.is_dir() {
        return Err(BackupError::SourceNotDirectory {
            path: path.to_path_buf(),
        });
    }

    let mut entries = fs::read_dir(path).map_err(|err| BackupError::ReadSource {
        source: err,
        path: path.to_path_buf(),
    })?;

    // INVARIANT: An empty source is most likely an unmounted drive, never mirror it.
    if entries.next().is_none() {
        return Err(BackupError::EmptySource {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

fn ensure_target(path: &Path, dry_run: bool) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(BackupError::TargetNotDirectory {
                path: path.to_path_buf(),
            });
        }

        return Ok(());
    }

    if dry_run {
        info!("would create target directory {:?}", path.display());
        return Ok(());
    }

    info!("create target directory {:?}", path.display());
    fs::create_dir_all(path).map_err(|err| BackupError::CreateTarget {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Broad classification of a failed profile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Profile or target layout is invalid.
    Config,

    /// Filesystem operation failed.
    Io,

    /// Sync tool reported failure.
    Sync,
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Config => fmt.write_str("configuration error"),
            Self::Io => fmt.write_str("I/O error"),
            Self::Sync => fmt.write_str("sync error"),
        }
    }
}

/// All possible error types for a profile run.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Source directory does not exist.
    #[error("source does not exist: {:?}", path.display())]
    MissingSource { path: PathBuf },

    /// Source is not a directory.
    #[error("source is not a directory: {:?}", path.display())]
    SourceNotDirectory { path: PathBuf },

    /// Source directory is empty.
    #[error("source is empty: {:?}", path.display())]
    EmptySource { path: PathBuf },

    /// Source directory cannot be read.
    #[error("failed to read source {:?}", path.display())]
    ReadSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Target exists but is not a directory.
    #[error("target is not a directory: {:?}", path.display())]
    TargetNotDirectory { path: PathBuf },

    /// Target directory cannot be created.
    #[error("failed to create target directory {:?}", path.display())]
    CreateTarget {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// No snapshot to restore from.
    #[error(
        "no incremental backup found in {:?}{}",
        path.display(),
        selector.as_deref().map(|s| format!(" matching {s:?}")).unwrap_or_default()
    )]
    NoSnapshot {
        path: PathBuf,
        selector: Option<String>,
    },

    /// Snapshot handling fails.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Sync tool fails.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl BackupError {
    /// Classify error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSource { .. }
            | Self::SourceNotDirectory { .. }
            | Self::EmptySource { .. }
            | Self::TargetNotDirectory { .. }
            | Self::NoSnapshot { .. } => ErrorKind::Config,
            Self::Snapshot(err) if err.is_misconfiguration() => ErrorKind::Config,
            Self::Sync(SyncError::Failed { .. }) => ErrorKind::Sync,
            Self::ReadSource { .. }
            | Self::CreateTarget { .. }
            | Self::Snapshot(_)
            | Self::Sync(_) => ErrorKind::Io,
        }
    }

    /// Exit code reported by the sync tool, if the failure came from it.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Sync(err) => err.exit_code(),
            _ => None,
        }
    }
}

/// Friendly result alias :3
type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backup::sync::SyncOutcome, config::Retention};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Call {
        source: PathBuf,
        dest: PathBuf,
        delete_extraneous: bool,
        dry_run: bool,
    }

    /// Records every request and answers with a fixed exit code.
    #[derive(Debug, Default)]
    struct RecordingSynchronizer {
        calls: RefCell<Vec<Call>>,
        exit_code: i32,
    }

    impl RecordingSynchronizer {
        fn failing(exit_code: i32) -> Self {
            Self {
                exit_code,
                ..Default::default()
            }
        }
    }

    impl Synchronizer for RecordingSynchronizer {
        fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncOutcome, SyncError> {
            self.calls.borrow_mut().push(Call {
                source: request.source.to_path_buf(),
                dest: request.dest.to_path_buf(),
                delete_extraneous: request.delete_extraneous,
                dry_run: request.dry_run,
            });

            Ok(SyncOutcome {
                exit_code: Some(self.exit_code),
                output: Vec::new(),
            })
        }
    }

    struct Fixture {
        _root: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let root = TempDir::new()?;
            let source = root.path().join("src");
            let target = root.path().join("dst");
            fs::create_dir_all(&source)?;
            fs::write(source.join("a.txt"), "a")?;

            Ok(Self {
                _root: root,
                source,
                target,
            })
        }

        fn synchronize(&self, name: &str) -> BackupProfile {
            BackupProfile::new(name, &self.source, &self.target)
        }

        fn incremental(&self, name: &str, count: i64) -> BackupProfile {
            self.synchronize(name)
                .incremental(Retention::from_count(Some(count)))
        }
    }

    fn snapshot_count(target: &Path) -> usize {
        snapshot::list_snapshots(target).unwrap().len()
    }

    #[test]
    fn synchronize_syncs_into_target() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.synchronize("p1");
        let flags = RunFlags {
            delete_extraneous: true,
            ..Default::default()
        };

        let result = orchestrator.run(RunRequest {
            profile: &profile,
            flags,
        });

        assert!(result.is_success());
        assert_eq!(result.exit_code, Some(0));
        assert!(fixture.target.is_dir());
        assert_eq!(
            orchestrator.synchronizer.calls.borrow().clone(),
            vec![Call {
                source: fixture.source.clone(),
                dest: fixture.target.clone(),
                delete_extraneous: true,
                dry_run: false,
            }]
        );

        Ok(())
    }

    #[test]
    fn incremental_syncs_into_new_snapshot_and_prunes() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.incremental("p2", 2);

        for _ in 0..3 {
            let result = orchestrator.run(RunRequest {
                profile: &profile,
                flags: RunFlags::default(),
            });
            assert!(result.is_success());
        }

        let snapshots = snapshot::list_snapshots(&fixture.target)?;
        assert_eq!(snapshots.len(), 2);

        let calls = orchestrator.synchronizer.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].dest, snapshots[1].path());

        Ok(())
    }

    #[test]
    fn missing_source_fails_without_sync() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::remove_dir_all(&fixture.source)?;
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.incremental("p1", 2);

        let result = orchestrator.run(RunRequest {
            profile: &profile,
            flags: RunFlags::default(),
        });

        assert!(!result.is_success());
        assert_eq!(result.error().map(BackupError::kind), Some(ErrorKind::Config));
        assert!(orchestrator.synchronizer.calls.borrow().is_empty());
        assert!(!fixture.target.exists());

        Ok(())
    }

    #[test]
    fn empty_source_fails() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::remove_file(fixture.source.join("a.txt"))?;
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());

        let result = orchestrator.run(RunRequest {
            profile: &fixture.synchronize("p1"),
            flags: RunFlags::default(),
        });

        assert!(matches!(
            result.error(),
            Some(BackupError::EmptySource { .. })
        ));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn prune_warnings_do_not_fail_run() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new()?;
        fs::create_dir_all(&fixture.target)?;
        for name in ["2020-01-01_00-00-00", "2020-01-02_00-00-00"] {
            fs::create_dir(fixture.target.join(name))?;
        }
        let locked = fixture.target.join("2020-01-01_00-00-00/locked");
        fs::create_dir(&locked)?;
        fs::write(locked.join("file.txt"), "stuck")?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;

        // Privileged users bypass permission bits.
        if fs::File::create(locked.join(".write-check")).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
            return Ok(());
        }

        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let result = orchestrator.run(RunRequest {
            profile: &fixture.incremental("p2", 1),
            flags: RunFlags::default(),
        });
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        assert!(result.is_success());
        assert_eq!(result.prune_warnings.len(), 1);
        assert_eq!(
            result.prune_warnings[0].path,
            fixture.target.join("2020-01-01_00-00-00")
        );
        assert_eq!(snapshot_count(&fixture.target), 2);

        Ok(())
    }

    #[test]
    fn restore_synchronize_ignores_snapshot_selector() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::create_dir_all(&fixture.target)?;
        fs::write(fixture.target.join("a.txt"), "backup")?;

        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.synchronize("p1");
        let result = orchestrator.restore(
            RunRequest {
                profile: &profile,
                flags: RunFlags::default(),
            },
            Some("2026-10-16"),
        );

        assert!(result.is_success());
        let calls = orchestrator.synchronizer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].source, fixture.target);
        assert_eq!(calls[0].dest, fixture.source);

        Ok(())
    }

    #[test]
    fn sync_failure_keeps_old_snapshots() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::create_dir_all(&fixture.target)?;
        for name in ["2020-01-01_00-00-00", "2020-01-02_00-00-00"] {
            fs::create_dir(fixture.target.join(name))?;
        }

        let orchestrator = Orchestrator::new(RecordingSynchronizer::failing(23));
        let result = orchestrator.run(RunRequest {
            profile: &fixture.incremental("p2", 1),
            flags: RunFlags::default(),
        });

        let error = result.error().expect("run should fail");
        assert_eq!(error.kind(), ErrorKind::Sync);
        assert_eq!(error.exit_code(), Some(23));
        assert_eq!(result.exit_code, Some(23));

        // Prepared snapshot stays, nothing gets pruned.
        assert_eq!(snapshot_count(&fixture.target), 3);

        Ok(())
    }

    #[test]
    fn dry_run_does_not_touch_target() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.incremental("p2", 1);
        let flags = RunFlags {
            dry_run: true,
            ..Default::default()
        };

        let result = orchestrator.run(RunRequest {
            profile: &profile,
            flags,
        });
        assert!(result.is_success());
        assert!(!fixture.target.exists());

        fs::create_dir_all(&fixture.target)?;
        for name in ["2020-01-01_00-00-00", "2020-01-02_00-00-00"] {
            fs::create_dir(fixture.target.join(name))?;
        }

        let result = orchestrator.run(RunRequest {
            profile: &profile,
            flags,
        });
        assert!(result.is_success());
        assert_eq!(snapshot_count(&fixture.target), 2);

        let calls = orchestrator.synchronizer.calls.borrow();
        assert!(calls.iter().all(|call| call.dry_run));
        assert_eq!(calls[1].dest, fixture.target.join("2020-01-02_00-00-00"));

        Ok(())
    }

    #[test]
    fn foreign_target_entries_fail_incremental_run() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::create_dir_all(&fixture.target)?;
        fs::write(fixture.target.join("notes.txt"), "keep me")?;

        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let result = orchestrator.run(RunRequest {
            profile: &fixture.incremental("p2", 1),
            flags: RunFlags::default(),
        });

        assert_eq!(result.error().map(BackupError::kind), Some(ErrorKind::Config));
        assert!(orchestrator.synchronizer.calls.borrow().is_empty());
        assert!(fixture.target.join("notes.txt").exists());

        Ok(())
    }

    #[test]
    fn failures_do_not_stop_remaining_profiles() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let broken = BackupProfile::new("p1", fixture.source.join("missing"), &fixture.target);
        let working = fixture.synchronize("p2");
        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());

        let summary = orchestrator.run_all([&broken, &working], RunFlags::default());

        let statuses = summary
            .results
            .iter()
            .map(|result| (result.profile.as_str(), result.is_success()))
            .collect::<Vec<_>>();
        assert_eq!(statuses, vec![("p1", false), ("p2", true)]);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.failed().count(), 1);

        Ok(())
    }

    #[test]
    fn empty_summary_succeeds() {
        assert_eq!(RunSummary::default().exit_code(), 0);
    }

    #[test]
    fn restore_incremental_from_selected_snapshot() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fs::create_dir_all(&fixture.target)?;
        for name in ["2026-10-15_21-00-00", "2026-10-16_21-00-00"] {
            fs::create_dir(fixture.target.join(name))?;
            fs::write(fixture.target.join(name).join("a.txt"), name)?;
        }

        let orchestrator = Orchestrator::new(RecordingSynchronizer::default());
        let profile = fixture.incremental("p2", 3);
        let request = RunRequest {
            profile: &profile,
            flags: RunFlags::default(),
        };

        assert!(orchestrator.restore(request, Some("2026-10-15")).is_success());
        assert!(orchestrator.restore(request, None).is_success());
        let missing = orchestrator.restore(request, Some("2019"));
        assert!(matches!(
            missing.error(),
            Some(BackupError::NoSnapshot { .. })
        ));

        let calls = orchestrator.synchronizer.calls.borrow();
        let sources = calls.iter().map(|call| call.source.clone()).collect::<Vec<_>>();
        assert_eq!(
            sources,
            vec![
                fixture.target.join("2026-10-15_21-00-00"),
                fixture.target.join("2026-10-16_21-00-00"),
            ]
        );
        assert!(calls.iter().all(|call| call.dest == fixture.source));
        assert_eq!(snapshot_count(&fixture.target), 2);

        Ok(())
    }
}
