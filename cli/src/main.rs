//! fix-boot-bcd
//!
//! Repairs the partition and disk GUIDs of Windows boot entries after a disk
//! was cloned, restored or re-partitioned.

mod prompt;
mod render;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use bcdfix_core::bcd::Choices;
use bcdfix_core::config::DEFAULT_BACKUP_SUFFIX;
use bcdfix_core::hive::DEFAULT_REGED;
use bcdfix_core::{AdjacentBackup, ForceInvalid, RegedHive, RepairConfig, Session, Tally};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "fix-boot-bcd",
    about = "Find disk and partition UUIDs in Windows BCD hives and fix them",
    version
)]
struct Args {
    /// BCD hive files, e.g. /boot/efi/EFI/Microsoft/Boot/BCD
    #[arg(value_name = "BCD", required = true)]
    hives: Vec<PathBuf>,

    /// Report what would change without writing or backing up
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Ask for a new partition for these entry ids or partition UUIDs even
    /// when they look valid
    #[arg(short = 'o', long = "override", value_name = "ENTRY[,ENTRY...]", value_delimiter = ',')]
    force: Vec<String>,

    /// Ask for a new partition for every entry, valid or not
    #[arg(short = 'O', long = "override-all", conflicts_with = "force")]
    force_all: bool,

    /// reged binary used to read and write hives
    #[arg(long, env = "REGED", default_value = DEFAULT_REGED)]
    reged: PathBuf,

    /// sysfs mount point used to find block devices
    #[arg(long, default_value = "/sys")]
    sys_root: PathBuf,

    /// Directory holding the block device nodes
    #[arg(long, default_value = "/dev")]
    dev_root: PathBuf,

    /// Backups are written as <BCD>.<SUFFIX>, then <BCD>.<SUFFIX>.1 and so on
    #[arg(long, value_name = "SUFFIX", default_value = DEFAULT_BACKUP_SUFFIX)]
    backup_suffix: String,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn config(&self) -> RepairConfig {
        let names: Vec<&str> = self
            .force
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect();
        let force = if self.force_all {
            ForceInvalid::All
        } else if names.is_empty() {
            ForceInvalid::Off
        } else {
            ForceInvalid::only(names)
        };
        RepairConfig::default()
            .dry_run(self.dry_run)
            .force_invalid(force)
            .reged(&self.reged)
            .roots(&self.sys_root, &self.dev_root)
            .backup_suffix(&self.backup_suffix)
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level());

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("fix-boot-bcd: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("BCDFIX_LOG").unwrap_or_else(|_| default_level.into()))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
}

/// Returns whether every hive was processed without a fatal error.
fn run(args: &Args) -> Result<bool> {
    let session = Session::discover(args.config()).context("cannot list partitions")?;
    info!(partitions = session.inventory().len(), "inventory built");

    let mut ok = true;
    for hive in &args.hives {
        if let Err(e) = repair(&session, hive) {
            eprintln!("fix-boot-bcd: {}: {e:#}", hive.display());
            ok = false;
        }
    }
    Ok(ok)
}

fn repair(session: &Session, path: &Path) -> Result<()> {
    let config = session.config();
    let mut store = RegedHive::open(path, &config.reged_binary)?;
    let scan = session
        .run_scan(&store)
        .with_context(|| format!("cannot read {}", path.display()))?;

    let mut out = io::stdout().lock();
    render::findings(&mut out, path, &scan, session.inventory())?;

    let plan = scan.plan();
    let choices = if session.wants_choices(&plan) {
        prompt::collect(plan.pending(), session.inventory())?
    } else {
        Choices::new()
    };

    let staged = session.stage(plan, &choices);
    let mut backup = AdjacentBackup::new(&config.backup_suffix);
    let outcome = session.finish(&staged, &mut store, &mut backup)?;

    render::outcome(&mut out, &outcome)?;
    render::tally(&mut out, &Tally::from_run(&scan, &staged), &staged)?;
    Ok(())
}
