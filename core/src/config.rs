//! Repair run configuration.
//!
//! Options for one repair run over one or more hives.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::bcd::walker::DeviceLocator;
use crate::hive::DEFAULT_REGED;

/// Suffix of the backup written next to a hive before the first change.
pub const DEFAULT_BACKUP_SUFFIX: &str = "bak";

/// Which valid locators to treat as needing a new partition anyway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForceInvalid {
    #[default]
    Off,
    All,
    /// Boot entry ids and/or partition UUIDs, normalized
    Only(BTreeSet<String>),
}

impl ForceInvalid {
    /// Restrict to the given entry ids or partition UUIDs.
    ///
    /// Matching ignores case and surrounding braces. An empty list means
    /// every locator.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = names
            .into_iter()
            .map(|name| normalize_id(name.as_ref()))
            .filter(|name| !name.is_empty())
            .collect();
        if set.is_empty() {
            Self::All
        } else {
            Self::Only(set)
        }
    }

    pub fn applies(&self, locator: &DeviceLocator) -> bool {
        match self {
            Self::Off => false,
            Self::All => true,
            Self::Only(set) => {
                set.contains(&normalize_id(&locator.entry_id))
                    || set.contains(&normalize_id(&locator.partition_uuid.to_string()))
            }
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, Self::Off)
    }
}

fn normalize_id(name: &str) -> String {
    let name = name.trim();
    let bare = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    bare.to_ascii_lowercase()
}

/// Repair run configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Report only: no prompt, no backup, no writes.
    pub dry_run: bool,
    pub force_invalid: ForceInvalid,
    /// `reged` executable.
    pub reged_binary: PathBuf,
    /// sysfs mount point.
    pub sys_root: PathBuf,
    /// Directory holding the block device nodes.
    pub dev_root: PathBuf,
    pub backup_suffix: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            force_invalid: ForceInvalid::Off,
            reged_binary: PathBuf::from(DEFAULT_REGED),
            sys_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

impl RepairConfig {
    /// Set dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force_invalid(mut self, force: ForceInvalid) -> Self {
        self.force_invalid = force;
        self
    }

    /// Set the reged executable.
    pub fn reged(mut self, binary: impl Into<PathBuf>) -> Self {
        self.reged_binary = binary.into();
        self
    }

    /// Set where sysfs and device nodes are looked up.
    pub fn roots(mut self, sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        self.sys_root = sys_root.into();
        self.dev_root = dev_root.into();
        self
    }

    pub fn backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.backup_suffix = suffix.into();
        self
    }
}
