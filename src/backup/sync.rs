// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content synchronization through an external tool.
//!
//! pbackup never compares or transfers file content itself. All of that is
//! offloaded to rsync, which mirrors a source directory into a destination
//! directory and only transfers what changed. This module builds the rsync
//! command line for a [`SyncRequest`], runs it, relays its output, and turns
//! its exit status into a [`SyncOutcome`].

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::{OsStr, OsString},
    io::{BufRead, BufReader, IsTerminal, Read},
    path::Path,
    process::{Command, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, info, instrument};

/// Options used when a profile does not specify any.
pub const DEFAULT_OPTIONS: &[&str] = &["-avi"];

/// Everything needed to run one synchronization.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    /// Directory whose content gets mirrored.
    pub source: &'a Path,

    /// Directory to mirror into.
    pub dest: &'a Path,

    /// Tool options passed verbatim and in order.
    pub options: &'a [String],

    /// Remove destination entries that do not exist in source.
    pub delete_extraneous: bool,

    /// Simulate without touching the destination.
    pub dry_run: bool,

    /// Relay tool output to the terminal.
    pub verbose: bool,
}

/// Result of running the sync tool to completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Exit code of the tool, [`None`] if it was killed by a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout lines followed by captured stderr lines.
    pub output: Vec<String>,
}

impl SyncOutcome {
    /// Construct outcome of a successful run.
    pub fn success(output: Vec<String>) -> Self {
        Self {
            exit_code: Some(0),
            output,
        }
    }

    /// Check if the tool reported success.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert failed outcome into [`SyncError::Failed`].
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Failed`] if the tool did not exit with zero.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        Err(SyncError::Failed {
            exit_code: self.exit_code,
            output: self.output,
        })
    }
}

/// Layer of indirection for content synchronization.
pub trait Synchronizer {
    /// Mirror `request.source` into `request.dest`.
    ///
    /// A tool that ran but failed is not an error here. Its exit code is
    /// reported through the returned [`SyncOutcome`] instead.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError`] if the tool could not be run at all.
    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncOutcome>;
}

/// Synchronization through the rsync binary.
#[derive(Debug, Clone)]
pub struct Rsync {
    program: OsString,
}

impl Default for Rsync {
    fn default() -> Self {
        Self::with_program("rsync")
    }
}

impl Rsync {
    /// Construct rsync synchronizer using a specific binary.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build argument list for a request.
    ///
    /// Source and destination always end with a slash, so the content of the
    /// source is mirrored into the destination rather than the source
    /// directory itself.
    pub fn command_args(&self, request: &SyncRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = if request.options.is_empty() {
            DEFAULT_OPTIONS.iter().map(OsString::from).collect()
        } else {
            request.options.iter().map(OsString::from).collect()
        };

        if request.verbose {
            args.push("--progress".into());
        }

        if request.delete_extraneous {
            args.push("--delete".into());
        }

        if request.dry_run {
            args.push("-n".into());
        }

        args.push(with_trailing_slash(request.source));
        args.push(with_trailing_slash(request.dest));

        args
    }
}

impl Synchronizer for Rsync {
    #[instrument(skip(self, request), level = "debug")]
    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncOutcome> {
        info!(
            "synchronizing from {:?} to {:?}",
            request.source.display(),
            request.dest.display()
        );

        let args = self.command_args(request);
        let command_line = format_command(&self.program, &args);
        if request.verbose || request.dry_run {
            info!("{command_line}");
        } else {
            debug!("{command_line}");
        }

        syscall_relayed(&self.program, args, request.verbose)
    }
}

fn with_trailing_slash(path: &Path) -> OsString {
    let mut path = path.as_os_str().to_os_string();
    if !path.to_string_lossy().ends_with('/') {
        path.push("/");
    }

    path
}

/// Render command line for display.
///
/// Arguments containing spaces are quoted.
pub fn format_command(
    program: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> String {
    std::iter::once(program.as_ref().to_string_lossy().into_owned())
        .chain(args.into_iter().map(|arg| {
            let arg = arg.as_ref().to_string_lossy();
            if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.into_owned()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

fn syscall_relayed(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    verbose: bool,
) -> Result<SyncOutcome> {
    let program = cmd.as_ref().to_string_lossy().into_owned();
    let mut child = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| SyncError::Spawn {
            source: err,
            program: program.clone(),
        })?;

    // INVARIANT: Drain stderr on its own thread so a full pipe never blocks the tool.
    let stderr_reader = child.stderr.take().map(|stderr| {
        thread::spawn(move || {
            let mut lines = Vec::new();
            for line in read_lines(stderr) {
                if verbose {
                    eprintln!("{line}");
                }
                lines.push(line);
            }
            lines
        })
    });

    let spinner = spinner(verbose, &program)?;
    let mut output = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        for line in read_lines(stdout) {
            if verbose {
                println!("{line}");
            } else {
                debug!("{program}: {line}");
                spinner.set_message(line.clone());
            }
            output.push(line);
        }
    }

    let status = child.wait().map_err(|err| SyncError::Wait {
        source: err,
        program: program.clone(),
    })?;
    spinner.finish_and_clear();

    if let Some(reader) = stderr_reader {
        let lines = reader.join().unwrap_or_default();
        for line in &lines {
            debug!("{program} (stderr): {line}");
        }
        output.extend(lines);
    }

    debug!("{program} exited with {status}");
    Ok(SyncOutcome {
        exit_code: status.code(),
        output,
    })
}

// INVARIANT: Read until EOF even on invalid UTF-8, a closed pipe would kill the tool.
fn read_lines(reader: impl Read) -> impl Iterator<Item = String> {
    BufReader::new(reader)
        .split(b'\n')
        .map_while(std::io::Result::ok)
        .map(|bytes| {
            let line = String::from_utf8_lossy(&bytes);
            line.strip_suffix('\r').unwrap_or(&line).to_string()
        })
}

fn spinner(verbose: bool, program: &str) -> Result<ProgressBar> {
    if verbose || !std::io::stderr().is_terminal() {
        return Ok(ProgressBar::hidden());
    }

    let style = ProgressStyle::with_template("{spinner:.cyan} {elapsed_precise:.green}  {msg}")?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(format!("running {program}"));
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Sync tool cannot be started.
    #[error("failed to run {program:?}, is it installed?")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Sync tool cannot be waited on.
    #[error("failed to wait for {program:?}")]
    Wait {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Sync tool reported failure.
    #[error("sync tool failed with {}{}", describe_exit(*exit_code), last_line(output))]
    Failed {
        exit_code: Option<i32>,
        output: Vec<String>,
    },

    /// Style template cannot be set for the spinner.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

impl SyncError {
    /// Exit code reported by the sync tool, if it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".into(),
    }
}

fn last_line(output: &[String]) -> String {
    output
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| format!(": {}", line.trim()))
        .unwrap_or_default()
}

/// Friendly result alias :3
type Result<T, E = SyncError> = std::result::Result<T, E>;
