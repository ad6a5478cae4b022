// Locator consistency check

use uguid::Guid;

use super::walker::DeviceLocator;
use crate::disk::Inventory;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The partition exists on the recorded disk
    Consistent,
    /// The partition exists, but on the disk carried here
    WrongDisk(Guid),
    /// Needs a replacement partition
    Unresolvable,
}

/// Classify one locator against the host's partitions.
///
/// The partition GUID decides: a known partition under a stale disk GUID is
/// always auto-correctable and never escalated. `force_invalid` turns every
/// locator into [`Verdict::Unresolvable`].
pub fn classify(locator: &DeviceLocator, inventory: &Inventory, force_invalid: bool) -> Verdict {
    if force_invalid {
        return Verdict::Unresolvable;
    }

    match inventory.by_partition(&locator.partition_uuid) {
        None => Verdict::Unresolvable,
        Some(part) if part.disk_uuid == locator.disk_uuid => Verdict::Consistent,
        Some(part) => Verdict::WrongDisk(part.disk_uuid),
    }
}
