// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod error;

use crate::error::Result;
use hackage_security::{
    BootstrapSettings, DefaultTransport, ExpirationEnforcement, Limits, PackageId, Repository,
    Settings, UpdateStatus,
};
use simplelog::{ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use snafu::{ErrorCompat, ResultExt};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::clap::ErrorKind as ClapErrorKind;
use structopt::StructOpt;

/// This wrapper enables global options and initializes the logger before
/// running any subcommands.
#[derive(Debug, StructOpt)]
struct Program {
    /// Set logging verbosity [trace|debug|info|warn|error]
    #[structopt(
        name = "log-level",
        short = "l",
        long = "log-level",
        default_value = "info"
    )]
    log_level: LevelFilter,
    #[structopt(subcommand)]
    cmd: Command,
}

impl Program {
    fn run(self) -> Result<()> {
        TermLogger::init(
            self.log_level,
            ConfigBuilder::new()
                .add_filter_allow_str("hackagetool")
                .add_filter_allow_str("hackage_security")
                .build(),
            TerminalMode::Mixed,
        )
        .context(error::Logger)?;
        self.cmd.run()
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Establish trust in a repository's root keys
    Bootstrap(BootstrapArgs),
    /// Check the repository for updated metadata and refresh the cache
    Check(CheckArgs),
    /// Download and verify a package's source archive
    Get(GetArgs),
}

impl Command {
    fn run(self) -> Result<()> {
        match self {
            Command::Bootstrap(args) => args.run(),
            Command::Check(args) => args.run(),
            Command::Get(args) => args.run(),
        }
    }
}

#[derive(Debug, StructOpt)]
struct RepoArgs {
    /// Directory where verified metadata and the package index are cached
    #[structopt(long = "cache-dir", parse(from_os_str))]
    cache_dir: PathBuf,

    /// Base URL of the package repository
    #[structopt(long = "repository-url")]
    repository_url: String,
}

#[derive(Debug, StructOpt)]
struct BootstrapArgs {
    #[structopt(flatten)]
    repo: RepoArgs,

    /// Number of trusted root keys that must have signed the root document
    #[structopt(long = "threshold")]
    threshold: u64,

    /// Hex key ID of a root key trusted out-of-band (may be repeated)
    #[structopt(long = "root-key", required = true)]
    root_keys: Vec<String>,
}

impl BootstrapArgs {
    fn run(&self) -> Result<()> {
        let transport = DefaultTransport::new();
        Repository::bootstrap(
            &transport,
            &BootstrapSettings {
                cache_dir: &self.repo.cache_dir,
                repository_base_url: &self.repo.repository_url,
                root_key_ids: &self.root_keys,
                threshold: self.threshold,
                limits: Limits::default(),
            },
        )
        .context(error::Repository)?;
        println!("OK");
        Ok(())
    }
}

#[derive(Debug, StructOpt)]
struct CheckArgs {
    #[structopt(flatten)]
    repo: RepoArgs,

    /// Skip metadata expiration checks (offline inspection only; unsafe)
    #[structopt(long = "no-expiry-check")]
    no_expiry_check: bool,
}

impl CheckArgs {
    fn run(&self) -> Result<()> {
        let transport = DefaultTransport::new();
        let mut repository = Repository::load(
            &transport,
            Settings {
                cache_dir: &self.repo.cache_dir,
                repository_base_url: &self.repo.repository_url,
                limits: Limits::default(),
                expiration_enforcement: ExpirationEnforcement::from(!self.no_expiry_check),
            },
        )
        .context(error::Repository)?;
        match repository.check_for_updates().context(error::Repository)? {
            UpdateStatus::NoUpdates => println!("NoUpdates"),
            UpdateStatus::HasUpdates => println!("HasUpdates"),
        }
        Ok(())
    }
}

#[derive(Debug, StructOpt)]
struct GetArgs {
    #[structopt(flatten)]
    repo: RepoArgs,

    /// Output directory for the verified archive
    #[structopt(
        short = "o",
        long = "outdir",
        default_value = ".",
        parse(from_os_str)
    )]
    outdir: PathBuf,

    /// Package identifier, e.g. aeson-2.2.1.0
    package: String,
}

impl GetArgs {
    fn run(&self) -> Result<()> {
        let package = PackageId::from_str(&self.package).context(error::Repository)?;
        let transport = DefaultTransport::new();
        let repository = Repository::load(
            &transport,
            Settings {
                cache_dir: &self.repo.cache_dir,
                repository_base_url: &self.repo.repository_url,
                limits: Limits::default(),
                expiration_enforcement: ExpirationEnforcement::Safe,
            },
        )
        .context(error::Repository)?;
        repository
            .save_package(&package, &self.outdir)
            .context(error::Repository)?;
        Ok(())
    }
}

fn main() -> ! {
    let program = match Program::from_iter_safe(std::env::args_os()) {
        Ok(program) => program,
        Err(err) => {
            if err.kind == ClapErrorKind::HelpDisplayed || err.kind == ClapErrorKind::VersionDisplayed {
                println!("{}", err.message);
                std::process::exit(0);
            }
            eprintln!("{}", err.message);
            std::process::exit(3);
        }
    };
    std::process::exit(match program.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            if let Some(var) = std::env::var_os("RUST_BACKTRACE") {
                if var != "0" {
                    if let Some(backtrace) = ErrorCompat::backtrace(&err) {
                        eprintln!("\n{:?}", backtrace);
                    }
                }
            }
            err.exit_code()
        }
    })
}
