//! BCD device locator repair
//!
//! Walks the boot objects of a hive, checks the partition and disk GUIDs of
//! their device elements against the host's partitions, stages corrections
//! and commits them.

pub mod applier;
pub mod checker;
pub mod elements;
pub mod resolver;
pub mod walker;

#[cfg(test)]
mod tests;

pub use applier::{commit, CommitError, CommitReport, ValueRef};
pub use checker::{classify, Verdict};
pub use elements::LocatorElement;
pub use resolver::{
    Choice, ChoiceError, Choices, Correction, Finding, PendingChoices, PendingEntry, Plan, Scan,
    Staged, StagedFix, Unresolved, UnresolvedReason,
};
pub use walker::{walk, BootEntry, DeviceLocator, Discovery, Found, LocatorShape, StagedWrite};
