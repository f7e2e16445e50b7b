// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Definition file layout.
//!
//! Specify the layout of the profile definition file that pbackup reads at
//! startup, and turn its raw entries into validated [`BackupProfile`] records.
//! File I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! A definition file is a TOML document containing zero or more
//! `[[profile]]` tables. Each table describes one named backup task:
//!
//! ```toml
//! [[profile]]
//! name = "docs"
//! description = "My documents"
//! source = "~/Documents"
//! target = "/mnt/backup/docs"
//! mode = "incremental"
//! options = ["-a", "--exclude=*.tmp"]
//! count = 3
//! ```
//!
//! Source and target paths go through shell expansion, so `~` and
//! environment variables may be used. After expansion both must be absolute.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Template printed by `pbackup --print-profile-template`.
pub const PROFILE_TEMPLATE: &str = r#"# pbackup profile definitions
[[profile]]
name = "PROFILE NAME"
description = "PROFILE DESCRIPTION"
source = "/SOURCE/FOLDER"
target = "/TARGET/FOLDER"
# Optional: "incremental" or "synchronize"
mode = "synchronize"
# Optional: one or more rsync options, passed verbatim and in order
options = ["-rltvzi"]
# Optional: number of incremental snapshots to keep, unlimited when omitted
count = 3
"#;

/// Raw definition file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DefinitionFile {
    /// Profile entries in the order they appear in the file.
    #[serde(rename = "profile", default)]
    pub profiles: Vec<ProfileDefinition>,
}

impl FromStr for DefinitionFile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl DefinitionFile {
    /// Validate every profile entry.
    ///
    /// All problems are collected before failing, so the user can fix the
    /// whole file in one pass.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] listing every problem found.
    pub fn into_profiles(self) -> Result<Vec<BackupProfile>> {
        let mut problems = Vec::new();
        let mut used_names = HashSet::new();
        let mut profiles = Vec::new();

        for (index, definition) in self.profiles.into_iter().enumerate() {
            let label = match definition.name.as_deref() {
                Some(name) if !name.trim().is_empty() => name.to_string(),
                _ => {
                    problems.push(format!("profile #{}: field `name` is required", index + 1));
                    continue;
                }
            };

            if !used_names.insert(label.clone()) {
                problems.push(format!("{label}: a profile with this name already exists"));
            }

            match definition.validate(&label) {
                Ok(profile) => profiles.push(profile),
                Err(mut found) => problems.append(&mut found),
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid { problems });
        }

        Ok(profiles)
    }
}

/// Raw profile entry of a definition file.
///
/// Every field is optional at this stage so that missing fields can be
/// reported together instead of failing on the first one.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProfileDefinition {
    /// Unique profile name.
    pub name: Option<String>,

    /// Free text description shown in listings.
    pub description: Option<String>,

    /// Directory to back up.
    pub source: Option<String>,

    /// Directory to back up into.
    pub target: Option<String>,

    /// Backup mode, defaults to [`BackupMode::Synchronize`].
    pub mode: Option<BackupMode>,

    /// Options handed to the sync tool verbatim.
    #[serde(default)]
    pub options: Vec<String>,

    /// Number of incremental snapshots to keep.
    pub count: Option<i64>,
}

impl ProfileDefinition {
    fn validate(self, label: &str) -> Result<BackupProfile, Vec<String>> {
        let mut problems = Vec::new();
        let source = expand_path(label, "source", self.source.as_deref(), &mut problems);
        let target = expand_path(label, "target", self.target.as_deref(), &mut problems);

        match (source, target) {
            (Some(source), Some(target)) if problems.is_empty() => Ok(BackupProfile {
                name: label.to_string(),
                description: self.description,
                source,
                target,
                mode: self.mode.unwrap_or_default(),
                options: self.options,
                retention: Retention::from_count(self.count),
            }),
            _ => Err(problems),
        }
    }
}

fn expand_path(
    label: &str,
    field: &str,
    raw: Option<&str>,
    problems: &mut Vec<String>,
) -> Option<PathBuf> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        problems.push(format!("{label}: field `{field}` is required"));
        return None;
    };

    let expanded = match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(error) => {
            problems.push(format!("{label}: cannot expand `{field}` {raw:?}: {error}"));
            return None;
        }
    };

    // INVARIANT: Profiles only ever carry absolute paths.
    if !expanded.is_absolute() {
        problems.push(format!(
            "{label}: `{field}` must be an absolute path, got {:?}",
            expanded.display()
        ));
        return None;
    }

    Some(expanded)
}

/// Validated backup profile.
///
/// Constructed once when the definition file is loaded, and never mutated
/// afterwards.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BackupProfile {
    /// Unique profile name.
    pub name: String,

    /// Free text description.
    pub description: Option<String>,

    /// Absolute path of the directory to back up.
    pub source: PathBuf,

    /// Absolute path of the directory to back up into.
    pub target: PathBuf,

    /// How the target is laid out.
    pub mode: BackupMode,

    /// Options handed to the sync tool verbatim and in order.
    pub options: Vec<String>,

    /// How many incremental snapshots to keep.
    pub retention: Retention,
}

impl BackupProfile {
    /// Construct new profile in synchronize mode without options.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            source: source.into(),
            target: target.into(),
            mode: BackupMode::default(),
            options: Vec::new(),
            retention: Retention::default(),
        }
    }

    /// Switch profile to incremental mode with given retention.
    pub fn incremental(mut self, retention: Retention) -> Self {
        self.mode = BackupMode::Incremental;
        self.retention = retention;
        self
    }

    /// Replace sync tool options.
    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Treat source directory as [`Path`] slice.
    pub fn source(&self) -> &Path {
        self.source.as_path()
    }

    /// Treat target directory as [`Path`] slice.
    pub fn target(&self) -> &Path {
        self.target.as_path()
    }
}

impl Display for BackupProfile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "===== {:<11}: {}", "Profile", self.name)?;
        writeln!(
            fmt,
            "  {:<15}: {}",
            "Description",
            self.description.as_deref().unwrap_or("-")
        )?;
        writeln!(fmt, "  {:<15}: {}", "Source", self.source.display())?;
        writeln!(fmt, "  {:<15}: {}", "Target", self.target.display())?;
        writeln!(fmt, "  {:<15}: {}", "Mode", self.mode)?;
        writeln!(fmt, "  {:<15}: {:?}", "Options", self.options)?;
        if self.mode == BackupMode::Incremental {
            writeln!(fmt, "  {:<15}: {}", "Backup Count", self.retention)?;
        }

        Ok(())
    }
}

/// Layout of a profile's target directory.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Keep a sequence of hard-linked snapshot directories under the target.
    Incremental,

    /// Mirror the source into the target itself.
    #[default]
    Synchronize,
}

impl Display for BackupMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Incremental => fmt.write_str("incremental"),
            Self::Synchronize => fmt.write_str("synchronize"),
        }
    }
}

/// Number of incremental snapshots to keep.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Retention {
    /// Never prune.
    #[default]
    Unlimited,

    /// Keep at most this many snapshots.
    Keep(NonZeroUsize),
}

impl Retention {
    /// Interpret the `count` field of a definition.
    ///
    /// Missing, zero, or negative counts mean unlimited retention.
    pub fn from_count(count: Option<i64>) -> Self {
        count
            .and_then(|count| usize::try_from(count).ok())
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unlimited, Self::Keep)
    }

    /// Upper bound on retained snapshots, if any.
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unlimited => None,
            Self::Keep(count) => Some(count.get()),
        }
    }
}

impl Display for Retention {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unlimited => fmt.write_str("unlimited"),
            Self::Keep(count) => write!(fmt, "{count}"),
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize definition file.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Definition file contains invalid profiles.
    #[error("invalid profile definitions:\n  {}", problems.join("\n  "))]
    Invalid { problems: Vec<String> },
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
