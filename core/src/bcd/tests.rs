// End-to-end repair scenarios over an in-memory hive

use std::fs;
use std::path::{Path, PathBuf};

use uguid::guid;
use pretty_assertions::assert_eq;
use uguid::Guid;

use super::walker::testing::add_entry;
use super::*;
use crate::backup::{AdjacentBackup, Backup, BackupError};
use crate::config::ForceInvalid;
use crate::disk::{Inventory, Partition};
use crate::hive::{Hive, HiveError, HiveStore, MemoryHive};
use crate::value::testing::device_blob;
use crate::value::{DISK_ID_OFFSET, GUID_LEN};

const P1: Guid = guid!("c3a1e2f4-9b8d-4c7e-a6f5-d4e3c2b1a098");
const P2: Guid = guid!("0a1b2c3d-4e5f-4a6b-8c7d-8e9fa0b1c2d3");
const P3: Guid = guid!("9f8e7d6c-5b4a-4392-a1b0-c9d8e7f6a5b4");
const P_MISSING: Guid = guid!("5e6f7a8b-9c0d-4e1f-a2b3-c4d5e6f7a8b9");
const D1: Guid = guid!("2b3c4d5e-6f70-4182-93a4-b5c6d7e8f901");
const D_OLD: Guid = guid!("f1e2d3c4-b5a6-4978-8a9b-acbdcedfe0f1");
const D_NEW: Guid = guid!("8d7c6b5a-4f3e-4d2c-9b1a-0f9e8d7c6b5a");

const WINDOWS: &str = "{7c5a1b9e-3f2d-11ee-9a4b-8c1645d3e2f0}";

/// A hive file on disk, so backups have something to copy, with its
/// contents served from memory.
struct Fixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
    store: MemoryHive,
}

impl Fixture {
    fn new(hive: Hive) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BCD");
        fs::write(&path, b"regf\0\0\0\0original hive").unwrap();
        let store = MemoryHive::new(&path, hive);
        Self {
            _dir: dir,
            path,
            store,
        }
    }

    fn backup_path(&self) -> PathBuf {
        self.path.with_file_name("BCD.bak")
    }
}

fn single_entry(partition: Guid, disk: Guid) -> Hive {
    let mut hive = Hive::new();
    add_entry(&mut hive, WINDOWS, "Windows 11", Some(device_blob(partition, disk)), None);
    hive
}

fn locator_pairs(hive: &Hive) -> Vec<(Guid, Guid)> {
    walk(hive)
        .filter_map(|d| match d.found {
            Found::Locator(l) => Some((l.partition_uuid, l.disk_uuid)),
            _ => None,
        })
        .collect()
}

fn stage(store: &MemoryHive, inventory: &Inventory, force: &ForceInvalid, choices: &Choices) -> Staged {
    Scan::new(store.hive(), inventory, force).plan().resolve(choices)
}

#[test]
fn test_wrong_disk_is_corrected_in_place() {
    let mut fx = Fixture::new(single_entry(P1, D_OLD));
    let inventory = Inventory::from_partitions(vec![Partition::new(D_NEW, P1, "/dev/nvme0n1p3")]);

    let scan = Scan::new(fx.store.hive(), &inventory, &ForceInvalid::Off);
    assert_eq!(scan.findings()[0].verdict, Some(Verdict::WrongDisk(D_NEW)));

    let staged = scan.plan().resolve(&Choices::new());
    let writes: Vec<&StagedWrite> = staged.writes().collect();
    assert_eq!(writes.len(), 1);
    let ranges = applier::changed_ranges(&writes[0].original, &writes[0].new_bytes);
    assert!(ranges
        .iter()
        .all(|r| r.start >= DISK_ID_OFFSET && r.end <= DISK_ID_OFFSET + GUID_LEN));

    let report = commit(&staged, &mut fx.store, &mut AdjacentBackup::new("bak"))
        .unwrap()
        .unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.backup, fx.backup_path());
    assert_eq!(locator_pairs(fx.store.hive()), [(P1, D_NEW)]);
}

#[test]
fn test_unknown_partition_takes_user_choice() {
    let mut fx = Fixture::new(single_entry(P_MISSING, D1));
    let inventory = Inventory::from_partitions(vec![
        Partition::new(D1, P2, "/dev/sda2").on_disk("sda", 2),
        Partition::new(D1, P3, "/dev/sda3").on_disk("sda", 3),
    ]);

    let scan = Scan::new(fx.store.hive(), &inventory, &ForceInvalid::Off);
    assert_eq!(scan.findings()[0].verdict, Some(Verdict::Unresolvable));

    let plan = scan.plan();
    assert_eq!(plan.pending().entries()[0].entry.id, WINDOWS);

    let choice = Choice::from_answer(&P3.to_string(), &inventory).unwrap();
    let staged = plan.resolve(&Choices::from([(WINDOWS.to_string(), choice)]));
    commit(&staged, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap();

    assert_eq!(locator_pairs(fx.store.hive()), [(P3, D1)]);
}

#[test]
fn test_override_forces_prompt_for_valid_entry() {
    let fx = Fixture::new(single_entry(P2, D1));
    let inventory = Inventory::from_partitions(vec![Partition::new(D1, P2, "/dev/sda2")]);

    let scan = Scan::new(fx.store.hive(), &inventory, &ForceInvalid::All);
    assert_eq!(scan.findings()[0].verdict, Some(Verdict::Unresolvable));
    assert_eq!(scan.plan().pending().len(), 1);

    let scan = Scan::new(fx.store.hive(), &inventory, &ForceInvalid::Off);
    assert_eq!(scan.findings()[0].verdict, Some(Verdict::Consistent));
    assert!(scan.plan().pending().is_empty());
}

struct FailingBackup;

impl Backup for FailingBackup {
    fn create(&mut self, hive: &Path) -> Result<PathBuf, BackupError> {
        Err(BackupError::Create {
            path: hive.with_extension("bak"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        })
    }
}

#[test]
fn test_backup_failure_aborts_before_any_write() {
    let mut fx = Fixture::new(single_entry(P1, D_OLD));
    let before = fx.store.hive().clone();
    let inventory = Inventory::from_partitions(vec![Partition::new(D_NEW, P1, "/dev/sda1")]);

    let staged = stage(&fx.store, &inventory, &ForceInvalid::Off, &Choices::new());
    assert!(!staged.is_empty());

    let err = commit(&staged, &mut fx.store, &mut FailingBackup).unwrap_err();
    assert!(matches!(err, CommitError::Backup(_)), "{err}");
    assert_eq!(fx.store.write_count(), 0);
    assert_eq!(fx.store.hive(), &before);
}

#[test]
fn test_missing_hive_file_cannot_be_backed_up() {
    let mut store = MemoryHive::new("/nonexistent/EFI/Microsoft/Boot/BCD", single_entry(P1, D_OLD));
    let inventory = Inventory::from_partitions(vec![Partition::new(D_NEW, P1, "/dev/sda1")]);
    let staged = stage(&store, &inventory, &ForceInvalid::Off, &Choices::new());

    let err = commit(&staged, &mut store, &mut AdjacentBackup::new("bak")).unwrap_err();
    assert!(matches!(err, CommitError::Backup(BackupError::Source { .. })), "{err}");
    assert_eq!(store.write_count(), 0);
}

#[test]
fn test_second_run_is_a_no_op() {
    let mut hive = single_entry(P1, D_OLD);
    add_entry(&mut hive, "{b}", "Windows 10", Some(device_blob(P_MISSING, D_OLD)), None);
    let mut fx = Fixture::new(hive);
    let inventory = Inventory::from_partitions(vec![
        Partition::new(D_NEW, P1, "/dev/sda1").on_disk("sda", 1),
        Partition::new(D_NEW, P2, "/dev/sda2").on_disk("sda", 2),
    ]);
    let choices = Choices::from([("{b}".to_string(), Choice::from_answer("sda2", &inventory).unwrap())]);

    let first = stage(&fx.store, &inventory, &ForceInvalid::Off, &choices);
    assert_eq!(first.writes().count(), 2);
    commit(&first, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap();

    let second = stage(&fx.store, &inventory, &ForceInvalid::Off, &choices);
    assert!(second.is_empty());
    assert_eq!(
        commit(&second, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap(),
        None
    );
    assert!(!fx.path.with_file_name("BCD.bak.1").exists());
}

#[test]
fn test_write_failure_names_applied_values() {
    let mut hive = single_entry(P1, D_OLD);
    add_entry(&mut hive, "{b}", "Windows 10", Some(device_blob(P2, D_OLD)), None);
    let mut fx = Fixture::new(hive);
    let rejected = elements::element_path("{b}", "11000001");
    fx.store = fx.store.clone().reject_writes_to(&rejected, elements::ELEMENT_VALUE);

    let inventory = Inventory::from_partitions(vec![
        Partition::new(D_NEW, P1, "/dev/sda1"),
        Partition::new(D_NEW, P2, "/dev/sda2"),
    ]);
    let staged = stage(&fx.store, &inventory, &ForceInvalid::Off, &Choices::new());
    assert_eq!(staged.writes().count(), 2);

    let err = commit(&staged, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap_err();
    match &err {
        CommitError::WriteFailed {
            key,
            applied,
            backup,
            source,
            ..
        } => {
            assert_eq!(key, &rejected);
            assert_eq!(applied.len(), 1);
            assert_eq!(applied[0].key_path, elements::element_path(WINDOWS, "11000001"));
            assert_eq!(backup, &fx.backup_path());
            assert!(matches!(source, HiveError::WriteRejected { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains(WINDOWS));
    assert_eq!(fx.store.write_count(), 1);
}

#[test]
fn test_commit_refuses_stale_values() {
    let mut fx = Fixture::new(single_entry(P1, D_OLD));
    let inventory = Inventory::from_partitions(vec![Partition::new(D_NEW, P1, "/dev/sda1")]);
    let staged = stage(&fx.store, &inventory, &ForceInvalid::Off, &Choices::new());

    // Value shrank between scan and commit
    let key = elements::element_path(WINDOWS, "11000001");
    let mut changed = fx.store.hive().clone();
    changed.set_value(&key, elements::ELEMENT_VALUE, crate::value::RegValue::Binary(vec![0; 0x48]));
    fx.store = MemoryHive::new(&fx.path, changed);

    let err = commit(&staged, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap_err();
    assert!(matches!(err, CommitError::Stale { .. }), "{err}");
    assert!(!fx.backup_path().exists());
}

#[test]
fn test_commit_keeps_bytes_changed_outside_the_locator() {
    let mut fx = Fixture::new(single_entry(P1, D_OLD));
    let inventory = Inventory::from_partitions(vec![Partition::new(D_NEW, P1, "/dev/sda1")]);
    let staged = stage(&fx.store, &inventory, &ForceInvalid::Off, &Choices::new());

    // Someone flipped a flag word after the scan
    let key = elements::element_path(WINDOWS, "11000001");
    let mut blob = fx.store.hive().binary(&key, elements::ELEMENT_VALUE).unwrap().to_vec();
    blob[0x14] = 1;
    let mut changed = fx.store.hive().clone();
    changed.set_value(&key, elements::ELEMENT_VALUE, crate::value::RegValue::Binary(blob));
    fx.store = MemoryHive::new(&fx.path, changed);

    commit(&staged, &mut fx.store, &mut AdjacentBackup::new("bak")).unwrap();
    let written = fx.store.read().unwrap();
    assert_eq!(written.binary(&key, elements::ELEMENT_VALUE).unwrap()[0x14], 1);
    assert_eq!(locator_pairs(&written), [(P1, D_NEW)]);
}
