// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the profile definition file lives. A relative file name
//! is searched for in the following order:
//!
//! 1. Current working directory: `./<file>`.
//! 2. Tools directory in home: `~/.tools/<file>`.
//! 3. XDG configuration directory: `$XDG_CONFIG_HOME/pbackup/<file>`.
//! 4. Directory of the running executable: `<exe_dir>/<file>`.
//!
//! An absolute file name is used as is.

use std::{
    env,
    fmt::Write as _,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Default name of the profile definition file.
pub const DEFAULT_DEFINITION_FILE: &str = "backup.toml";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf, NoWayHome> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// List every location a definition file may be found at, in search order.
///
/// Locations that cannot be determined on the current system are skipped.
pub fn definition_file_candidates(file: impl AsRef<Path>) -> Vec<PathBuf> {
    let file = file.as_ref();
    if file.is_absolute() {
        return vec![file.to_path_buf()];
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(file));
    }

    if let Ok(home) = home_dir() {
        candidates.push(home.join(".tools").join(file));
    }

    if let Some(config) = dirs::config_dir() {
        candidates.push(config.join("pbackup").join(file));
    }

    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(file));
    }

    candidates
}

/// Locate definition file.
///
/// Returns the first candidate from [`definition_file_candidates`] that
/// exists.
///
/// # Errors
///
/// - Return [`DefinitionNotFound`] listing every candidate if none exist.
pub fn find_definition_file(file: impl AsRef<Path>) -> Result<PathBuf, DefinitionNotFound> {
    let candidates = definition_file_candidates(file);
    for candidate in &candidates {
        debug!("look for definition file at {:?}", candidate.display());
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    Err(DefinitionNotFound { candidates })
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Definition file could not be found at any candidate location.
#[derive(Clone, Debug, thiserror::Error)]
#[error("definition file not found:{}", list_candidates(candidates))]
pub struct DefinitionNotFound {
    pub candidates: Vec<PathBuf>,
}

fn list_candidates(candidates: &[PathBuf]) -> String {
    candidates.iter().fold(String::new(), |mut out, path| {
        let _ = write!(out, "\n  {}", path.display());
        out
    })
}
