// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Profile store management.
//!
//! pbackup groups every profile of a definition file together into one place
//! called the __profile store__. The store is loaded once at startup and
//! handed to the backup orchestrator as an immutable value. It never changes
//! while backups run.

use crate::config::{BackupProfile, ConfigError, DefinitionFile};

use std::{
    collections::HashSet,
    fmt::Write as _,
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Validated set of backup profiles.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileStore {
    path: Option<PathBuf>,
    profiles: Vec<BackupProfile>,
}

impl ProfileStore {
    /// Construct new profile store from already validated profiles.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::DuplicateProfile`] if two profiles share a name.
    pub fn new(profiles: impl IntoIterator<Item = BackupProfile>) -> Result<Self> {
        let profiles = profiles.into_iter().collect::<Vec<_>>();
        let mut names = HashSet::new();
        for profile in &profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(StoreError::DuplicateProfile {
                    name: profile.name.clone(),
                });
            }
        }

        Ok(Self {
            path: None,
            profiles,
        })
    }

    /// Open profile store by loading a definition file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDefinition`] if the file cannot be read.
    /// - Return [`StoreError::Config`] if the file content is invalid.
    #[instrument(skip(path), level = "debug")]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("parse definition file {:?}", path.display());
        let content = read_to_string(path).map_err(|err| StoreError::ReadDefinition {
            source: err,
            path: path.to_path_buf(),
        })?;

        let profiles = content
            .parse::<DefinitionFile>()
            .and_then(DefinitionFile::into_profiles)
            .map_err(|err| StoreError::Config {
                source: err,
                path: path.to_path_buf(),
            })?;
        debug!("loaded {} profiles", profiles.len());

        Ok(Self {
            path: Some(path.to_path_buf()),
            profiles,
        })
    }

    /// Definition file this store was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All profiles in definition order.
    pub fn profiles(&self) -> &[BackupProfile] {
        &self.profiles
    }

    /// Lookup profile by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&BackupProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name.as_ref())
    }

    /// Select profiles by name, preserving the requested order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::UnknownProfiles`] naming every requested
    ///   profile that does not exist.
    pub fn select(
        &self,
        names: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Vec<&BackupProfile>> {
        let mut selected = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match self.get(name.as_ref()) {
                Some(profile) => selected.push(profile),
                None => unknown.push(name.as_ref().to_string()),
            }
        }

        if !unknown.is_empty() {
            return Err(StoreError::UnknownProfiles { names: unknown });
        }

        Ok(selected)
    }

    /// Render listing of available profiles with their descriptions.
    pub fn listing(&self) -> String {
        let mut out = String::from("Available backup profiles:\n");
        for profile in &self.profiles {
            let line = format!(
                "  {:<15}: {}",
                profile.name,
                profile.description.as_deref().unwrap_or("")
            );
            let _ = writeln!(out, "{}", line.trim_end());
        }

        out
    }
}

/// All possible error types for profile store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Definition file cannot be read.
    #[error("failed to read definition file {:?}", path.display())]
    ReadDefinition {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Definition file content is invalid.
    #[error("definition file {:?} is invalid", path.display())]
    Config {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },

    /// Two profiles share one name.
    #[error("a profile named {name:?} already exists")]
    DuplicateProfile { name: String },

    /// Requested profiles are not defined.
    #[error("profiles not found: {}", names.join(", "))]
    UnknownProfiles { names: Vec<String> },
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;
