//! System partition inventory
//!
//! Disks are enumerated through sysfs and their GPTs read with gpt-disk-rs.

pub mod inventory;
pub mod partition;
pub mod scan;
pub mod sysfs;

pub use inventory::{build_inventory, DiskRecord, Inventory, InventoryError, PartitionSource, ScannedDisk, SourceScan};
pub use partition::{Partition, PartitionKind};
pub use sysfs::SysfsSource;
