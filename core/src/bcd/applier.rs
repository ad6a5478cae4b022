//! Change applier
//!
//! Staged writes are committed value by value. Each write patches only the
//! byte ranges that differ between the staged original and the staged new
//! bytes into the value as it is in the hive right now, so unrelated bytes
//! are never rewritten from a stale copy.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use super::resolver::Staged;
use super::walker::StagedWrite;
use crate::backup::{Backup, BackupError};
use crate::hive::{HiveError, HiveStore};

/// `key\value` of a written value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueRef {
    pub key_path: String,
    pub value_name: String,
}

impl ValueRef {
    fn of(write: &StagedWrite) -> Self {
        Self {
            key_path: write.key_path.clone(),
            value_name: write.value_name.clone(),
        }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.key_path, self.value_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    pub backup: PathBuf,
    pub applied: Vec<ValueRef>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("backup failed, hive left untouched: {0}")]
    Backup(#[from] BackupError),

    #[error("cannot re-read hive before writing: {0}")]
    Read(#[source] HiveError),

    #[error("{key}\\{value} changed since it was scanned, nothing written")]
    Stale { key: String, value: String },

    #[error(
        "writing {key}\\{value} failed: {source}; already written: {}; backup at {}",
        joined(.applied),
        .backup.display()
    )]
    WriteFailed {
        key: String,
        value: String,
        applied: Vec<ValueRef>,
        backup: PathBuf,
        #[source]
        source: HiveError,
    },
}

fn joined(applied: &[ValueRef]) -> String {
    if applied.is_empty() {
        return "nothing".to_string();
    }
    applied
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maximal runs of differing bytes between two equally long values.
pub fn changed_ranges(old: &[u8], new: &[u8]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = None;

    for (i, (a, b)) in old.iter().zip(new).enumerate() {
        match (a != b, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                ranges.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push(s..old.len().min(new.len()));
    }
    ranges
}

struct Patch<'a> {
    write: &'a StagedWrite,
    bytes: Vec<u8>,
}

/// Commit staged writes.
///
/// Returns `Ok(None)` when there is nothing to write; no backup is made in
/// that case. Otherwise every target value is checked against the current
/// hive, the hive is backed up and the values are written in order. The
/// first failing write stops the commit and names the values already
/// written.
pub fn commit(
    staged: &Staged,
    store: &mut dyn HiveStore,
    backup: &mut dyn Backup,
) -> Result<Option<CommitReport>, CommitError> {
    let writes: Vec<&StagedWrite> = staged.writes().collect();
    if writes.is_empty() {
        return Ok(None);
    }

    let current = store.read().map_err(CommitError::Read)?;

    let mut patches = Vec::with_capacity(writes.len());
    for write in writes {
        let stale = || CommitError::Stale {
            key: write.key_path.clone(),
            value: write.value_name.clone(),
        };
        let now = current
            .binary(&write.key_path, &write.value_name)
            .ok_or_else(stale)?;
        if now.len() != write.original.len() || write.new_bytes.len() != write.original.len() {
            return Err(stale());
        }

        let mut bytes = now.to_vec();
        for range in changed_ranges(&write.original, &write.new_bytes) {
            bytes[range.clone()].copy_from_slice(&write.new_bytes[range]);
        }
        patches.push(Patch { write, bytes });
    }

    let backup_path = backup.create(store.path())?;

    let mut applied = Vec::new();
    for Patch { write, bytes } in patches {
        if let Err(source) = store.write_value(&write.key_path, &write.value_name, &bytes) {
            return Err(CommitError::WriteFailed {
                key: write.key_path.clone(),
                value: write.value_name.clone(),
                applied,
                backup: backup_path,
                source,
            });
        }
        debug!(key = %write.key_path, value = %write.value_name, "value written");
        applied.push(ValueRef::of(write));
    }

    info!(
        hive = %store.path().display(),
        values = applied.len(),
        backup = %backup_path.display(),
        "changes committed"
    );

    Ok(Some(CommitReport {
        backup: backup_path,
        applied,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_ranges() {
        assert_eq!(changed_ranges(b"abcdef", b"abcdef"), Vec::<Range<usize>>::new());
        assert_eq!(changed_ranges(b"abcdef", b"xbcdyz"), vec![0..1, 4..6]);
        assert_eq!(changed_ranges(b"abcdef", b"aXXdeY"), vec![1..3, 5..6]);
    }
}
