//! bcdfix core library
//!
//! Finds the partition and disk GUIDs stored in the device elements of a
//! Windows Boot Configuration Data hive and repairs them against the
//! partitions present on this machine.

pub mod backup;
pub mod bcd;
pub mod config;
pub mod disk;
pub mod hive;
pub mod session;
pub mod value;

pub use backup::{AdjacentBackup, Backup, BackupError};
pub use config::{ForceInvalid, RepairConfig};
pub use disk::{Inventory, InventoryError, Partition};
pub use hive::{HiveError, HiveStore, MemoryHive, RegedHive};
pub use session::{RunOutcome, Session, Tally};
