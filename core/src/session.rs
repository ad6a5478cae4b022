//! Repair run
//!
//! A [`Session`] holds the configuration and the partition inventory shared
//! by every hive of a run. Per hive the run goes
//! `Scanning -> Classifying -> (Prompting)* -> Staged -> (Committing | DryRunReport)`:
//!
//! ```text
//! let scan = session.run_scan(&store)?;      // Scanning, Classifying
//! let plan = scan.plan();
//! let choices = ask_user(plan.pending());    // Prompting, skipped for dry runs
//! let staged = session.stage(plan, &choices);
//! let outcome = session.finish(&staged, &mut store, &mut backup)?;
//! ```

use crate::backup::Backup;
use crate::bcd::{commit, CommitError, CommitReport, Correction, Found, Plan, Scan, Staged, StagedWrite, Verdict};
use crate::config::RepairConfig;
use crate::disk::{build_inventory, Inventory, InventoryError, SysfsSource};
use crate::hive::{HiveStore, Result as HiveResult};

/// How a hive's run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Committed(CommitReport),
    /// Dry run: what would have been written
    DryRunReport { would_write: Vec<StagedWrite> },
    /// Nothing needed changing
    AbortedNoChanges,
}

pub struct Session {
    config: RepairConfig,
    inventory: Inventory,
}

impl Session {
    pub fn new(config: RepairConfig, inventory: Inventory) -> Self {
        Self { config, inventory }
    }

    /// Build the inventory from sysfs, as configured.
    pub fn discover(config: RepairConfig) -> Result<Self, InventoryError> {
        let source = SysfsSource::new(&config.sys_root, &config.dev_root);
        let inventory = build_inventory(&source)?;
        Ok(Self::new(config, inventory))
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Read the hive and classify every device element.
    pub fn run_scan(&self, store: &dyn HiveStore) -> HiveResult<Scan> {
        let hive = store.read()?;
        Ok(Scan::new(&hive, &self.inventory, &self.config.force_invalid))
    }

    /// Whether the caller should ask for choices before staging.
    pub fn wants_choices(&self, plan: &Plan) -> bool {
        !self.config.dry_run && !plan.pending().is_empty()
    }

    /// Resolve the plan. Dry runs ignore `choices`, leaving every pending
    /// entry unresolved.
    pub fn stage(&self, plan: Plan, choices: &crate::bcd::Choices) -> Staged {
        if self.config.dry_run {
            plan.resolve(&Default::default())
        } else {
            plan.resolve(choices)
        }
    }

    pub fn finish(
        &self,
        staged: &Staged,
        store: &mut dyn HiveStore,
        backup: &mut dyn Backup,
    ) -> Result<RunOutcome, CommitError> {
        if staged.is_empty() {
            return Ok(RunOutcome::AbortedNoChanges);
        }

        if self.config.dry_run {
            return Ok(RunOutcome::DryRunReport {
                would_write: staged.writes().cloned().collect(),
            });
        }

        Ok(match commit(staged, store, backup)? {
            Some(report) => RunOutcome::Committed(report),
            None => RunOutcome::AbortedNoChanges,
        })
    }
}

/// Per-run counts
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub consistent: usize,
    pub corrected: usize,
    pub reselected: usize,
    pub unresolved: usize,
    pub legacy: usize,
    pub malformed: usize,
    pub no_identifier: usize,
}

impl Tally {
    pub fn from_run(scan: &Scan, staged: &Staged) -> Self {
        let mut tally = Tally::default();

        for finding in scan.findings() {
            match (&finding.discovery.found, finding.verdict) {
                (Found::Locator(_), Some(Verdict::Consistent)) => tally.consistent += 1,
                (Found::Legacy { .. }, _) => tally.legacy += 1,
                (Found::Malformed(_), _) => tally.malformed += 1,
                (Found::NoIdentifier, _) => tally.no_identifier += 1,
                _ => {}
            }
        }

        for fix in &staged.fixes {
            match fix.correction {
                Correction::DiskCorrected { .. } => tally.corrected += 1,
                Correction::Reselected { .. } => tally.reselected += 1,
            }
        }
        tally.unresolved = staged.unresolved.len();

        tally
    }
}
