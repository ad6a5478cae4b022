// Partition records

use std::fmt;
use std::path::{Path, PathBuf};

use gpt_disk_types::{guid, GptPartitionType};
use uguid::Guid;

const MICROSOFT_RESERVED: GptPartitionType =
    GptPartitionType(guid!("e3c9e316-0b5c-4db8-817d-f92df00215ae"));
const WINDOWS_RECOVERY: GptPartitionType =
    GptPartitionType(guid!("de94bba4-06d1-4d40-a16a-bfd50179d6ac"));
const LINUX_FILESYSTEM: GptPartitionType =
    GptPartitionType(guid!("0fc63daf-8483-4772-8e79-3d69d8477de4"));
const LINUX_SWAP: GptPartitionType =
    GptPartitionType(guid!("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f"));

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    EfiSystem,
    MicrosoftReserved,
    BasicData,
    WindowsRecovery,
    LinuxFilesystem,
    LinuxSwap,
    Unknown,
}

impl PartitionKind {
    /// Convert from gpt_disk_types GUID to PartitionKind
    pub fn from_gpt_guid(guid: &GptPartitionType) -> Self {
        const KNOWN: [(GptPartitionType, PartitionKind); 6] = [
            (GptPartitionType::EFI_SYSTEM, PartitionKind::EfiSystem),
            (GptPartitionType::BASIC_DATA, PartitionKind::BasicData),
            (MICROSOFT_RESERVED, PartitionKind::MicrosoftReserved),
            (WINDOWS_RECOVERY, PartitionKind::WindowsRecovery),
            (LINUX_FILESYSTEM, PartitionKind::LinuxFilesystem),
            (LINUX_SWAP, PartitionKind::LinuxSwap),
        ];

        KNOWN
            .iter()
            .find(|(known, _)| known == guid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::EfiSystem => "EFI System",
            Self::MicrosoftReserved => "MS Reserved",
            Self::BasicData => "Basic Data",
            Self::WindowsRecovery => "WinRE",
            Self::LinuxFilesystem => "Linux FS",
            Self::LinuxSwap => "Linux Swap",
            Self::Unknown => "Unknown",
        }
    }
}

/// One partition visible on this host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub disk_uuid: Guid,
    pub partition_uuid: Guid,
    /// Block device node, e.g. `/dev/nvme0n1p3`
    pub device_path: PathBuf,
    /// Parent disk name, e.g. `nvme0n1`
    pub disk_device: String,
    /// 1-based slot in the partition entry array
    pub number: u32,
    pub kind: PartitionKind,
    pub size_bytes: u64,
}

impl Partition {
    pub fn new(disk_uuid: Guid, partition_uuid: Guid, device_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_uuid,
            partition_uuid,
            device_path: device_path.into(),
            disk_device: String::new(),
            number: 0,
            kind: PartitionKind::Unknown,
            size_bytes: 0,
        }
    }

    pub fn on_disk(mut self, disk_device: impl Into<String>, number: u32) -> Self {
        self.disk_device = disk_device.into();
        self.number = number;
        self
    }

    pub fn with_kind(mut self, kind: PartitionKind, size_bytes: u64) -> Self {
        self.kind = kind;
        self.size_bytes = size_bytes;
        self
    }

    pub fn size_mb(&self) -> u64 {
        self.size_bytes / (1024 * 1024)
    }

    /// Last component of the device path (`sda3`).
    pub fn device_name(&self) -> &str {
        device_name(&self.device_path)
    }

    /// Whether `name` names this partition, as `sda3` or `/dev/sda3`.
    pub fn matches_device(&self, name: &str) -> bool {
        let name = name.trim();
        !name.is_empty() && (Path::new(name) == self.device_path || name == self.device_name())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>8} MB  {:<11} {},{}",
            self.device_path.display(),
            self.size_mb(),
            self.kind.name(),
            self.partition_uuid,
            self.disk_uuid
        )
    }
}

pub(crate) fn device_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}
