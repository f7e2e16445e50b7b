// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Profile driven directory backups.
//!
//! A __backup profile__ names a source directory, a target directory, and how
//! the source gets copied into the target. Profiles live together in a TOML
//! definition file, see [`config`]. Two modes exist:
//!
//! - __Synchronize__: the target is kept as a mirror of the source.
//! - __Incremental__: every run creates a new timestamped snapshot below the
//!   target. Unchanged files are hard linked to the previous snapshot, so
//!   each snapshot looks complete while only changed files use new space.
//!   Old snapshots are pruned past the profile's retention count.
//!
//! The actual copying is delegated to an external sync tool, rsync by
//! default, see [`backup::sync`].

pub mod backup;
pub mod config;
pub mod path;
pub mod store;
