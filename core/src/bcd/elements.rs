// BCD key layout and element identifiers

use std::fmt;

pub const OBJECTS_KEY: &str = "Objects";
pub const ELEMENTS_KEY: &str = "Elements";

/// Value holding an element's payload
pub const ELEMENT_VALUE: &str = "Element";

/// Split-shape locator values
pub const PARTITION_ID_VALUE: &str = "PartitionId";
pub const DISK_ID_VALUE: &str = "DiskId";

pub const DESCRIPTION: &str = "12000004";
pub const APPLICATION_PATH: &str = "12000002";
pub const SYSTEM_ROOT: &str = "22000002";

/// Device elements that address a volume
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocatorElement {
    /// `11000001`, where the boot application lives
    ApplicationDevice,
    /// `21000001`, the volume the OS loader boots
    OsDevice,
}

impl LocatorElement {
    pub const ALL: [LocatorElement; 2] = [Self::ApplicationDevice, Self::OsDevice];

    pub fn id(&self) -> &'static str {
        match self {
            Self::ApplicationDevice => "11000001",
            Self::OsDevice => "21000001",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ApplicationDevice => "Disk",
            Self::OsDevice => "OSDsk",
        }
    }
}

impl fmt::Display for LocatorElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `Objects\<id>`
pub fn object_path(entry_id: &str) -> String {
    format!("{OBJECTS_KEY}\\{entry_id}")
}

/// `Objects\<id>\Elements\<element>`
pub fn element_path(entry_id: &str, element_id: &str) -> String {
    format!("{OBJECTS_KEY}\\{entry_id}\\{ELEMENTS_KEY}\\{element_id}")
}
