//! Linux block device enumeration
//!
//! Whole disks are listed from `<sys_root>/block`, their partition tables
//! are read straight from `<dev_root>/<disk>` and each GPT slot is matched
//! back to the kernel's partition device through the `partition` attribute
//! of the sysfs children.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use gpt_disk_io::BlockIoAdapter;
use gpt_disk_types::BlockSize;
use tracing::{debug, warn};
use uguid::Guid;

use super::inventory::{InventoryError, PartitionSource, ScannedDisk, SourceScan};
use super::partition::Partition;
use super::scan::{read_gpt, GptLayout};

/// Kernel devices that never hold a partition table
const SKIPPED_PREFIXES: &[&str] = &["ram", "zram"];

#[derive(Debug, Clone)]
pub struct SysfsSource {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for SysfsSource {
    fn default() -> Self {
        Self::new("/sys", "/dev")
    }
}

impl SysfsSource {
    pub fn new(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn block_dir(&self) -> PathBuf {
        self.sys_root.join("block")
    }

    fn disk_names(&self) -> Result<Vec<String>, InventoryError> {
        let dir = self.block_dir();
        let entries = fs::read_dir(&dir).map_err(|source| InventoryError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !SKIPPED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
            .collect();
        names.sort();
        Ok(names)
    }

    fn logical_block_size(&self, disk: &str) -> Option<BlockSize> {
        let path = self.block_dir().join(disk).join("queue/logical_block_size");
        let size = read_number(&path).unwrap_or(512);
        BlockSize::new(u32::try_from(size).ok()?)
    }

    /// Partition number -> kernel device name, from the disk's sysfs children.
    fn partition_devices(&self, disk: &str) -> BTreeMap<u64, String> {
        let disk_dir = self.block_dir().join(disk);
        let Ok(entries) = fs::read_dir(&disk_dir) else {
            return BTreeMap::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let number = read_number(&entry.path().join("partition"))?;
                let name = entry.file_name().into_string().ok()?;
                Some((number, name))
            })
            .collect()
    }

    fn partition_path(&self, disk: &str, number: u32, uuid: Guid, children: &BTreeMap<u64, String>) -> PathBuf {
        if let Some(name) = children.get(&u64::from(number)) {
            return self.dev_root.join(name);
        }

        let link = self.dev_root.join("disk/by-partuuid").join(uuid.to_string());
        if let Ok(target) = fs::canonicalize(&link) {
            return target;
        }

        PathBuf::from(format!("{disk} entry {number}"))
    }

    fn scan_disk(&self, name: &str, scan: &mut SourceScan) {
        if read_number(&self.block_dir().join(name).join("size")) == Some(0) {
            debug!(device = name, "skipping empty device");
            return;
        }
        scan.devices_seen += 1;

        let Some(block_size) = self.logical_block_size(name) else {
            warn!(device = name, "unsupported logical block size");
            return;
        };

        let device_path = self.dev_root.join(name);
        let file = match File::open(&device_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                warn!(device = %device_path.display(), "permission denied");
                scan.permission_denied += 1;
                return;
            }
            Err(err) => {
                warn!(device = %device_path.display(), error = %err, "cannot open device");
                return;
            }
        };

        let layout = match read_gpt(BlockIoAdapter::new(file, block_size), block_size) {
            Ok(Some(layout)) => layout,
            Ok(None) => {
                debug!(device = name, "no GPT");
                return;
            }
            Err(err) => {
                warn!(device = name, error = %err, "cannot read partition table");
                return;
            }
        };

        scan.disks.push(self.disk_record(name, device_path, layout));
    }

    fn disk_record(&self, name: &str, device_path: PathBuf, layout: GptLayout) -> ScannedDisk {
        let children = self.partition_devices(name);

        let partitions = layout
            .entries
            .iter()
            .map(|entry| {
                let number = entry.index + 1;
                let path = self.partition_path(name, number, entry.partition_uuid, &children);
                Partition::new(layout.disk_uuid, entry.partition_uuid, path)
                    .on_disk(name, number)
                    .with_kind(entry.kind(), entry.size_bytes(layout.block_size))
            })
            .collect::<Vec<_>>();

        debug!(device = name, disk_uuid = %layout.disk_uuid, partitions = partitions.len(), "read GPT");

        ScannedDisk {
            name: name.to_string(),
            device_path,
            disk_uuid: layout.disk_uuid,
            partitions,
        }
    }
}

impl PartitionSource for SysfsSource {
    fn scan(&self) -> Result<SourceScan, InventoryError> {
        let mut scan = SourceScan::default();
        for name in self.disk_names()? {
            self.scan_disk(&name, &mut scan);
        }
        Ok(scan)
    }
}

fn read_number(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
