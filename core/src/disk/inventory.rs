//! Partition inventory
//!
//! A read-only snapshot of every GPT partition visible on the host, built
//! once per run and passed explicitly to everything that checks locators
//! against it.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};
use uguid::Guid;

use super::partition::Partition;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("no block devices are visible on this system")]
    NoDevices,

    #[error("no GPT partitions found on {devices} block device(s){}", denied_hint(.denied))]
    NoPartitions { devices: usize, denied: usize },

    #[error("cannot enumerate {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn denied_hint(denied: &usize) -> String {
    match denied {
        0 => String::new(),
        n => format!("; {n} could not be opened (permission denied, try running as root)"),
    }
}

/// A whole disk as returned by a [`PartitionSource`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedDisk {
    pub name: String,
    pub device_path: PathBuf,
    pub disk_uuid: Guid,
    pub partitions: Vec<Partition>,
}

/// Result of one enumeration pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceScan {
    /// Block devices looked at, with or without a partition table
    pub devices_seen: usize,
    pub permission_denied: usize,
    pub disks: Vec<ScannedDisk>,
}

/// Anything that can list the disks and partitions of a host.
pub trait PartitionSource {
    fn scan(&self) -> Result<SourceScan, InventoryError>;
}

/// A source with a fixed answer.
impl PartitionSource for SourceScan {
    fn scan(&self) -> Result<SourceScan, InventoryError> {
        Ok(self.clone())
    }
}

/// A disk as listed to the user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskRecord {
    pub device: String,
    pub disk_uuid: Guid,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    partitions: Vec<Partition>,
    disks: Vec<DiskRecord>,
}

impl Inventory {
    /// Build an inventory, keeping partition UUIDs unique.
    ///
    /// Repeats of the same `(disk, partition)` pair are dropped. A partition
    /// UUID that shows up again under another disk UUID (a cloned disk) keeps
    /// its first occurrence. Partitions with a zero partition or disk UUID
    /// cannot be addressed by a BCD locator and are left out.
    pub fn from_partitions(partitions: impl IntoIterator<Item = Partition>) -> Self {
        let mut unique: BTreeMap<Guid, Partition> = BTreeMap::new();

        for part in partitions {
            if part.partition_uuid.is_zero() || part.disk_uuid.is_zero() {
                debug!(device = %part.device_path.display(), "partition without UUID skipped");
                continue;
            }
            match unique.entry(part.partition_uuid) {
                Entry::Vacant(slot) => {
                    slot.insert(part);
                }
                Entry::Occupied(first) if first.get().disk_uuid == part.disk_uuid => {
                    debug!(partition = %part.partition_uuid, device = %part.device_path.display(), "duplicate partition");
                }
                Entry::Occupied(first) => {
                    warn!(
                        partition = %part.partition_uuid,
                        kept = %first.get().device_path.display(),
                        ignored = %part.device_path.display(),
                        "partition UUID appears on two disks"
                    );
                }
            }
        }

        let mut partitions: Vec<Partition> = unique.into_values().collect();
        partitions.sort_by(|a, b| {
            (a.disk_device.as_str(), a.number, &a.device_path)
                .cmp(&(b.disk_device.as_str(), b.number, &b.device_path))
        });

        let mut disks: Vec<DiskRecord> = Vec::new();
        for part in &partitions {
            let known = disks
                .iter()
                .any(|d| d.device == part.disk_device && d.disk_uuid == part.disk_uuid);
            if !known {
                disks.push(DiskRecord {
                    device: part.disk_device.clone(),
                    disk_uuid: part.disk_uuid,
                });
            }
        }

        Self { partitions, disks }
    }

    pub fn by_partition(&self, partition_uuid: &Guid) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| &p.partition_uuid == partition_uuid)
    }

    /// Look a partition up by device name (`sda3`) or path (`/dev/sda3`).
    pub fn by_device(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.matches_device(name))
    }

    /// All partitions, ordered by disk device then partition number.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn disks(&self) -> &[DiskRecord] {
        &self.disks
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Snapshot the partitions reported by `source`.
pub fn build_inventory(source: &dyn PartitionSource) -> Result<Inventory, InventoryError> {
    let scan = source.scan()?;

    if scan.devices_seen == 0 {
        return Err(InventoryError::NoDevices);
    }

    let inventory = Inventory::from_partitions(
        scan.disks
            .into_iter()
            .flat_map(|disk| disk.partitions.into_iter()),
    );

    if inventory.is_empty() {
        return Err(InventoryError::NoPartitions {
            devices: scan.devices_seen,
            denied: scan.permission_denied,
        });
    }

    info!(
        partitions = inventory.len(),
        disks = inventory.disks().len(),
        "partition inventory ready"
    );
    Ok(inventory)
}
