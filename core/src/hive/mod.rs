//! Registry hive access
//!
//! A [`Hive`] is a typed snapshot of a registry file: a tree of [`RegKey`]s,
//! each with ordered subkeys and ordered [`RegValue`]s. Snapshots are produced
//! and written back by a [`HiveStore`]:
//!
//! - [`RegedHive`] drives chntpw's `reged` through `.reg` text files
//! - [`MemoryHive`] keeps everything in memory
//!
//! Key paths use `\` separators. Leading and trailing separators are
//! ignored, so `\Objects\{guid}` and `Objects\{guid}` name the same key.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;

use crate::value::RegValue;

mod memory;
pub mod reg_text;
mod reged;

pub use memory::MemoryHive;
pub use reged::{RegedHive, DEFAULT_REGED};

/// Errors from reading or writing a hive
#[derive(Debug, Error)]
pub enum HiveError {
    #[error("hive file {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("{} not found; install chntpw (reged) or point --reged at it", .0.display())]
    ToolMissing(PathBuf),

    #[error("failed to run {}: {source}", .tool.display())]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} {action} of {} failed ({status})", .tool.display(), .hive.display())]
    ToolFailed {
        tool: PathBuf,
        action: &'static str,
        hive: PathBuf,
        status: ExitStatus,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry export line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("{key}\\{value} does not exist")]
    MissingValue { key: String, value: String },

    #[error("{key}\\{value} is {have} bytes, refusing to write {want}")]
    SizeMismatch {
        key: String,
        value: String,
        have: usize,
        want: usize,
    },

    #[error("write to {key}\\{value} rejected")]
    WriteRejected { key: String, value: String },
}

/// Result type for hive operations
pub type Result<T> = core::result::Result<T, HiveError>;

/// Read and write access to one hive file.
pub trait HiveStore {
    /// Hive file on disk
    fn path(&self) -> &Path;

    /// Fresh snapshot of the whole hive.
    fn read(&self) -> Result<Hive>;

    /// Replace the bytes of an existing binary value.
    fn write_value(&mut self, key_path: &str, value_name: &str, bytes: &[u8]) -> Result<()>;
}

/// One registry key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegKey {
    subkeys: BTreeMap<String, RegKey>,
    values: BTreeMap<String, RegValue>,
}

impl RegKey {
    pub fn subkey(&self, name: &str) -> Option<&RegKey> {
        self.subkeys.get(name)
    }

    pub fn subkeys(&self) -> impl Iterator<Item = (&str, &RegKey)> {
        self.subkeys.iter().map(|(name, key)| (name.as_str(), key))
    }

    pub fn value(&self, name: &str) -> Option<&RegValue> {
        self.values.get(name)
    }

    pub fn set_value(&mut self, name: &str, value: RegValue) -> Option<RegValue> {
        self.values.insert(name.to_string(), value)
    }

    fn descend(&self, path: &str) -> Option<&RegKey> {
        split_path(path).try_fold(self, |key, name| key.subkey(name))
    }

    fn descend_or_insert(&mut self, path: &str) -> &mut RegKey {
        split_path(path).fold(self, |key, name| {
            key.subkeys.entry(name.to_string()).or_default()
        })
    }
}

/// Typed snapshot of a registry hive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hive {
    root: RegKey,
}

impl Hive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &RegKey {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root == RegKey::default()
    }

    pub fn key(&self, path: &str) -> Option<&RegKey> {
        self.root.descend(path)
    }

    /// Key at `path`, creating it and its ancestors as needed.
    pub fn ensure_key(&mut self, path: &str) -> &mut RegKey {
        self.root.descend_or_insert(path)
    }

    pub fn value(&self, path: &str, name: &str) -> Option<&RegValue> {
        self.key(path)?.value(name)
    }

    pub fn binary(&self, path: &str, name: &str) -> Option<&[u8]> {
        self.value(path, name)?.as_binary()
    }

    pub fn text(&self, path: &str, name: &str) -> Option<&str> {
        self.value(path, name)?.as_text()
    }

    pub fn set_value(&mut self, path: &str, name: &str, value: RegValue) -> Option<RegValue> {
        self.ensure_key(path).set_value(name, value)
    }
}

/// Components of a key path.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|part| !part.is_empty())
}

/// Canonical form of a key path: no leading or trailing separators.
pub fn normalize_path(path: &str) -> String {
    split_path(path).collect::<Vec<_>>().join("\\")
}
