//! Resolver / repair engine
//!
//! A run moves through three values:
//!
//! 1. [`Scan`]: every device element of the hive, classified
//! 2. [`Plan`]: automatic disk corrections staged, unresolvable entries
//!    waiting in [`PendingChoices`]
//! 3. [`Staged`]: the plan after the caller supplied [`Choices`]
//!
//! Nothing here prompts or writes. The caller decides how choices are
//! obtained (interactively, scripted, or not at all for a dry run) and hands
//! the staged writes to the applier.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};
use uguid::Guid;

use super::checker::{classify, Verdict};
use super::elements::LocatorElement;
use super::walker::{walk, BootEntry, DeviceLocator, Discovery, Found, StagedWrite};
use crate::config::ForceInvalid;
use crate::disk::{Inventory, Partition};
use crate::hive::Hive;
use crate::value::{parse_uuid, LocatorError};

/// One device element with its verdict, if it carried a locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub discovery: Discovery,
    pub verdict: Option<Verdict>,
}

impl Finding {
    pub fn locator(&self) -> Option<&DeviceLocator> {
        match &self.discovery.found {
            Found::Locator(locator) => Some(locator),
            _ => None,
        }
    }
}

/// Walked and classified hive
#[derive(Clone, Debug, Default)]
pub struct Scan {
    findings: Vec<Finding>,
}

impl Scan {
    pub fn new(hive: &Hive, inventory: &Inventory, force: &ForceInvalid) -> Self {
        let findings = walk(hive)
            .map(|discovery| {
                let verdict = match &discovery.found {
                    Found::Locator(locator) => {
                        Some(classify(locator, inventory, force.applies(locator)))
                    }
                    _ => None,
                };
                Finding { discovery, verdict }
            })
            .collect();
        Self { findings }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Stage every automatic correction and collect what needs a choice.
    pub fn plan(&self) -> Plan {
        let mut plan = Plan::default();

        for finding in &self.findings {
            let (Some(locator), Some(verdict)) = (finding.locator(), finding.verdict) else {
                continue;
            };

            match verdict {
                Verdict::Consistent => {}
                Verdict::WrongDisk(disk) => match locator.rewrite(locator.partition_uuid, disk) {
                    Ok(writes) => {
                        info!(
                            entry = %locator.entry_id,
                            element = %locator.element,
                            from = %locator.disk_uuid,
                            to = %disk,
                            "disk UUID correction staged"
                        );
                        plan.fixes.push(StagedFix {
                            entry_id: locator.entry_id.clone(),
                            element: locator.element,
                            correction: Correction::DiskCorrected {
                                from: locator.disk_uuid,
                                to: disk,
                            },
                            writes,
                        });
                    }
                    Err(error) => plan.unresolved.push(Unresolved::rewrite_failed(locator, error)),
                },
                Verdict::Unresolvable => plan.pending.push(&finding.discovery.entry, locator),
            }
        }

        plan
    }
}

/// One corrected locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFix {
    pub entry_id: String,
    pub element: LocatorElement,
    pub correction: Correction,
    pub writes: Vec<StagedWrite>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Correction {
    /// Partition kept, disk GUID replaced
    DiskCorrected { from: Guid, to: Guid },
    /// Both GUIDs replaced by a chosen partition
    Reselected { partition: Guid, disk: Guid },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The user chose to leave it alone
    Skipped,
    /// No choice was supplied (dry run, or no answer)
    NoChoice,
    RewriteFailed(LocatorError),
}

/// A locator left unchanged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unresolved {
    pub entry_id: String,
    pub element: LocatorElement,
    pub reason: UnresolvedReason,
}

impl Unresolved {
    fn new(locator: &DeviceLocator, reason: UnresolvedReason) -> Self {
        Self {
            entry_id: locator.entry_id.clone(),
            element: locator.element,
            reason,
        }
    }

    fn rewrite_failed(locator: &DeviceLocator, error: LocatorError) -> Self {
        warn!(entry = %locator.entry_id, element = %locator.element, %error, "cannot rewrite locator");
        Self::new(locator, UnresolvedReason::RewriteFailed(error))
    }
}

/// A boot entry whose locators need a replacement partition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub entry: BootEntry,
    pub locators: Vec<DeviceLocator>,
}

/// Unresolvable locators grouped by boot entry, so one answer covers both
/// device elements of an entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingChoices {
    entries: Vec<PendingEntry>,
}

impl PendingChoices {
    fn push(&mut self, entry: &BootEntry, locator: &DeviceLocator) {
        match self.entries.iter_mut().find(|p| p.entry.id == entry.id) {
            Some(pending) => pending.locators.push(locator.clone()),
            None => self.entries.push(PendingEntry {
                entry: entry.clone(),
                locators: vec![locator.clone()],
            }),
        }
    }

    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Replacement for one pending entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Choice {
    Partition(Partition),
    /// A pair typed in by hand, for partitions this host cannot see
    Manual { partition_uuid: Guid, disk_uuid: Guid },
    Skip,
}

/// Choices keyed by boot entry id
pub type Choices = BTreeMap<String, Choice>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChoiceError {
    #[error("no partition {0} on this system")]
    UnknownPartition(String),

    #[error("choice {number} is out of range 1..={max}")]
    OutOfRange { number: usize, max: usize },

    #[error(transparent)]
    InvalidUuid(#[from] LocatorError),
}

impl Choice {
    /// Interpret a typed answer.
    ///
    /// Accepted forms: empty (skip), a list number, a device name or path,
    /// a partition UUID, or `PARTUUID,DISKUUID`.
    pub fn from_answer(answer: &str, inventory: &Inventory) -> Result<Self, ChoiceError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Self::Skip);
        }

        if let Ok(number) = answer.parse::<usize>() {
            let max = inventory.len();
            return match number.checked_sub(1).and_then(|i| inventory.partitions().get(i)) {
                Some(part) => Ok(Self::Partition(part.clone())),
                None => Err(ChoiceError::OutOfRange { number, max }),
            };
        }

        if let Some((partition, disk)) = answer.split_once(',') {
            let partition_uuid = parse_uuid(partition)?;
            let disk_uuid = parse_uuid(disk)?;
            return Ok(match inventory.by_partition(&partition_uuid) {
                Some(part) if part.disk_uuid == disk_uuid => Self::Partition(part.clone()),
                _ => Self::Manual {
                    partition_uuid,
                    disk_uuid,
                },
            });
        }

        if let Some(part) = inventory.by_device(answer) {
            return Ok(Self::Partition(part.clone()));
        }

        match parse_uuid(answer) {
            Ok(uuid) => inventory
                .by_partition(&uuid)
                .map(|part| Self::Partition(part.clone()))
                .ok_or_else(|| ChoiceError::UnknownPartition(answer.to_string())),
            Err(_) => Err(ChoiceError::UnknownPartition(answer.to_string())),
        }
    }

    fn pair(&self) -> Option<(Guid, Guid)> {
        match self {
            Self::Partition(part) => Some((part.partition_uuid, part.disk_uuid)),
            Self::Manual {
                partition_uuid,
                disk_uuid,
            } => Some((*partition_uuid, *disk_uuid)),
            Self::Skip => None,
        }
    }
}

/// Automatic corrections plus entries waiting for a choice
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    fixes: Vec<StagedFix>,
    unresolved: Vec<Unresolved>,
    pending: PendingChoices,
}

impl Plan {
    pub fn fixes(&self) -> &[StagedFix] {
        &self.fixes
    }

    pub fn pending(&self) -> &PendingChoices {
        &self.pending
    }

    /// Apply `choices` to the pending entries. Entries without a choice
    /// stay unresolved.
    pub fn resolve(self, choices: &Choices) -> Staged {
        let Plan {
            mut fixes,
            mut unresolved,
            pending,
        } = self;

        for PendingEntry { entry, locators } in pending.entries {
            let choice = choices.get(&entry.id);
            for locator in &locators {
                let pair = match choice {
                    None => {
                        unresolved.push(Unresolved::new(locator, UnresolvedReason::NoChoice));
                        continue;
                    }
                    Some(choice) => choice.pair(),
                };
                let Some((partition, disk)) = pair else {
                    debug!(entry = %entry.id, element = %locator.element, "skipped");
                    unresolved.push(Unresolved::new(locator, UnresolvedReason::Skipped));
                    continue;
                };

                match locator.rewrite(partition, disk) {
                    Ok(writes) if writes.is_empty() => {
                        debug!(entry = %entry.id, element = %locator.element, "already addresses the chosen partition");
                    }
                    Ok(writes) => {
                        info!(entry = %entry.id, element = %locator.element, %partition, %disk, "reselection staged");
                        fixes.push(StagedFix {
                            entry_id: entry.id.clone(),
                            element: locator.element,
                            correction: Correction::Reselected { partition, disk },
                            writes,
                        });
                    }
                    Err(error) => unresolved.push(Unresolved::rewrite_failed(locator, error)),
                }
            }
        }

        Staged { fixes, unresolved }
    }
}

/// Writes ready for the applier
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Staged {
    pub fixes: Vec<StagedFix>,
    pub unresolved: Vec<Unresolved>,
}

impl Staged {
    pub fn writes(&self) -> impl Iterator<Item = &StagedWrite> {
        self.fixes.iter().flat_map(|fix| fix.writes.iter())
    }

    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.writes().next().is_none()
    }
}
