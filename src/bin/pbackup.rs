// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pbackup::{
    backup::{
        snapshot::list_snapshots, sync::Rsync, Orchestrator, RunFlags, RunRequest, RunSummary,
    },
    config::{BackupMode, BackupProfile, PROFILE_TEMPLATE},
    path::{find_definition_file, DEFAULT_DEFINITION_FILE},
    store::{ProfileStore, StoreError},
};

use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  pbackup [options]\n  pbackup [options] <profile>...",
    version
)]
struct Cli {
    /// Names of profiles to back up, in order.
    #[arg(value_name = "profile")]
    pub profiles: Vec<String>,

    /// Profile definition file to use.
    #[arg(long, value_name = "file", default_value = DEFAULT_DEFINITION_FILE)]
    pub file: PathBuf,

    /// Relay output of the sync tool and echo its command line.
    #[arg(short, long)]
    pub verbose: bool,

    /// Simulate without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Delete files in the destination that are absent from the source.
    #[arg(long)]
    pub delete: bool,

    /// Print details of the named profiles, or of all profiles.
    #[arg(short = 'p', long)]
    pub profile_details: bool,

    /// Print a profile definition template.
    #[arg(short = 't', long)]
    pub print_profile_template: bool,

    /// Restore from target back into source.
    #[arg(long)]
    pub restore: bool,

    /// Snapshot name, or name prefix, to restore from.
    #[arg(long, value_name = "snapshot", requires = "restore")]
    pub restore_date: Option<String>,

    /// Do not ask for confirmation before restoring.
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Show debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    fn run(self) -> Result<i32> {
        if self.print_profile_template {
            print!("{PROFILE_TEMPLATE}");
            return Ok(0);
        }

        let path = find_definition_file(&self.file)?;
        info!("using definition file {:?}", path.display());
        let store = ProfileStore::open(&path)?;

        if self.profiles.is_empty() {
            if self.profile_details {
                store.profiles().iter().for_each(print_details);
            } else {
                print!("{}", store.listing());
            }

            return Ok(0);
        }

        let profiles = match store.select(&self.profiles) {
            Ok(profiles) => profiles,
            Err(StoreError::UnknownProfiles { names }) => {
                for name in names {
                    error!("Profile {name:?} not found");
                }
                print!("{}", store.listing());
                return Ok(1);
            }
            Err(err) => return Err(err.into()),
        };

        if self.profile_details {
            profiles.into_iter().for_each(print_details);
            return Ok(0);
        }

        let flags = RunFlags {
            dry_run: self.dry_run,
            delete_extraneous: self.delete,
            verbose: self.verbose,
        };
        let orchestrator = Orchestrator::<Rsync>::default();
        let summary = if self.restore {
            self.restore_all(&orchestrator, profiles, flags)
        } else {
            orchestrator.run_all(profiles, flags)
        };

        report(&summary);
        Ok(summary.exit_code())
    }

    fn restore_all(
        &self,
        orchestrator: &Orchestrator,
        profiles: Vec<&BackupProfile>,
        flags: RunFlags,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for profile in profiles {
            if !self.yes && !flags.dry_run && !confirm_restore(profile) {
                warn!("skip restore of profile {:?}", profile.name);
                continue;
            }

            let request = RunRequest { profile, flags };
            summary
                .results
                .push(orchestrator.restore(request, self.restore_date.as_deref()));
        }

        summary
    }
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match cli.run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn print_details(profile: &BackupProfile) {
    print!("{profile}");
    if profile.mode != BackupMode::Incremental {
        return;
    }

    match list_snapshots(profile.target()) {
        Ok(snapshots) => {
            println!("  {:<15}: {}", "Snapshots", snapshots.len());
            for snapshot in snapshots {
                println!("    {}", snapshot.name());
            }
        }
        Err(err) => warn!("cannot list snapshots of {:?}: {err}", profile.name),
    }
}

fn confirm_restore(profile: &BackupProfile) -> bool {
    let message = format!(
        "Restore profile {:?} into {}?",
        profile.name,
        profile.source.display()
    );

    inquire::Confirm::new(&message)
        .with_default(false)
        .with_help_message("Files in the source directory will be overwritten")
        .prompt()
        .unwrap_or_else(|err| {
            warn!("confirmation cancelled: {err}");
            false
        })
}

fn report(summary: &RunSummary) {
    if summary.all_succeeded() {
        info!("all {} profiles succeeded", summary.results.len());
        return;
    }

    let failed = summary
        .failed()
        .map(|result| result.profile.as_str())
        .collect::<Vec<_>>();
    error!(
        "{} of {} profiles failed: {}",
        failed.len(),
        summary.results.len(),
        failed.join(", ")
    );
}
