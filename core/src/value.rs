//! Registry values and BCD device identifiers
//!
//! BCD keeps every boot element as a registry value. Device elements are
//! opaque `REG_BINARY` payloads that embed the partition and disk GUIDs of
//! the volume they address. Those GUIDs use the mixed-endian layout of GPT
//! on-disk structures (first three fields little-endian), which is what
//! [`Guid::from_bytes`] expects. Tools such as `blkid`, `fdisk` and the
//! `/dev/disk/by-partuuid` links print identifiers in RFC 4122 order instead;
//! [`to_rfc4122_bytes`] and [`from_rfc4122_bytes`] convert between the two.
//!
//! # Device blob layout
//!
//! ```text
//! 0x00  GUID   additional options
//! 0x10  u32    device type
//! 0x14  u32    flags
//! 0x18  u32    size
//! 0x1C  u32    reserved
//! 0x20  GUID   partition identifier (GPT) / u64 partition offset (MBR)
//! 0x38  u32    local device type
//! 0x3C  u32    partition table style (0 = GPT, 1 = MBR, 2 = raw)
//! 0x40  GUID   disk identifier (GPT) / u32 disk signature (MBR)
//! ```
//!
//! Devices nested inside a parent (VHD files, ramdisks) shift these fields,
//! so when the fixed layout does not match the blob is scanned for GUID-like
//! runs instead.

use thiserror::Error;
use uguid::Guid;

/// Size of an encoded GUID
pub const GUID_LEN: usize = 16;

/// Offset of the partition identifier in a partition device blob
pub const PARTITION_ID_OFFSET: usize = 0x20;

/// Offset of the partition table style word
pub const PARTITION_STYLE_OFFSET: usize = 0x3C;

/// Offset of the disk identifier in a partition device blob
pub const DISK_ID_OFFSET: usize = 0x40;

/// Smallest blob that can hold both identifiers at their fixed offsets
pub const MIN_QUALIFIED_LEN: usize = DISK_ID_OFFSET + GUID_LEN;

/// Typed registry value as exported from a hive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    /// `REG_BINARY`
    Binary(Vec<u8>),
    /// `REG_SZ`
    Text(String),
    /// `REG_DWORD` / `REG_QWORD`
    Integer(u64),
    /// Any other `hex(N)` payload, kept verbatim
    Other { kind: u32, bytes: Vec<u8> },
}

impl RegValue {
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// A binary value of exactly [`GUID_LEN`] bytes, decoded as a GUID.
    pub fn as_uuid(&self) -> Option<Guid> {
        self.as_binary().and_then(|bytes| decode_uuid(bytes).ok())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Binary(_) => "binary",
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Other { .. } => "other",
        }
    }
}

/// Problems found while reading or rewriting a device locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("UUID field must be {GUID_LEN} bytes, got {0}")]
    BadUuidLength(usize),

    #[error("not a UUID: {0:?}")]
    InvalidUuid(String),

    #[error("expected a partition and a disk UUID, found {found} UUID field(s)")]
    UuidCount { found: usize },

    #[error("field at offset {offset:#x} runs past the end of a {len}-byte value")]
    OutOfBounds { offset: usize, len: usize },

    #[error("element value is {0}, not binary")]
    NotBinary(&'static str),

    #[error("element key has no {0} value")]
    MissingValue(&'static str),

    #[error("rewritten locator reads back as {partition},{disk} instead of {want_partition},{want_disk}")]
    VerifyFailed {
        partition: Guid,
        disk: Guid,
        want_partition: Guid,
        want_disk: Guid,
    },
}

/// Decode a BCD/GPT encoded GUID.
pub fn decode_uuid(raw: &[u8]) -> Result<Guid, LocatorError> {
    let bytes: [u8; GUID_LEN] = raw
        .try_into()
        .map_err(|_| LocatorError::BadUuidLength(raw.len()))?;
    Ok(Guid::from_bytes(bytes))
}

/// Encode a GUID the way BCD stores it. Exact inverse of [`decode_uuid`].
pub fn encode_uuid(guid: Guid) -> [u8; GUID_LEN] {
    guid.to_bytes()
}

/// Parse a textual UUID, with or without braces, in either case.
pub fn parse_uuid(text: &str) -> Result<Guid, LocatorError> {
    let trimmed = text.trim();
    let bare = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);
    Guid::try_parse(bare).map_err(|_| LocatorError::InvalidUuid(text.to_string()))
}

/// RFC 4122 (big-endian) bytes of a GUID, the order OS tools print.
pub fn to_rfc4122_bytes(guid: Guid) -> [u8; GUID_LEN] {
    swap_mixed_endian(guid.to_bytes())
}

/// GUID from RFC 4122 (big-endian) bytes.
pub fn from_rfc4122_bytes(bytes: [u8; GUID_LEN]) -> Guid {
    Guid::from_bytes(swap_mixed_endian(bytes))
}

// The conversion is its own inverse.
fn swap_mixed_endian(mut bytes: [u8; GUID_LEN]) -> [u8; GUID_LEN] {
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    bytes
}

/// Partition table style recorded in a device blob
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionStyle {
    Gpt,
    Mbr,
    Raw,
    Unknown(u32),
}

impl PartitionStyle {
    fn from_word(word: u32) -> Self {
        match word {
            0 => Self::Gpt,
            1 => Self::Mbr,
            2 => Self::Raw,
            other => Self::Unknown(other),
        }
    }
}

/// Style word of a device blob, if the blob is long enough to carry one.
pub fn partition_style(blob: &[u8]) -> Option<PartitionStyle> {
    read_u32(blob, PARTITION_STYLE_OFFSET).map(PartitionStyle::from_word)
}

/// Whether a device blob is long enough and tagged GPT, i.e. carries a
/// partition UUID / disk UUID pair rather than an MBR disk signature.
pub fn is_uuid_like(blob: &[u8]) -> bool {
    blob.len() >= MIN_QUALIFIED_LEN && partition_style(blob) == Some(PartitionStyle::Gpt)
}

/// One GUID field inside a value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UuidField {
    pub offset: usize,
    pub guid: Guid,
}

/// What a device element's payload turned out to be
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceBlob {
    /// Partition UUID plus disk UUID
    Qualified { partition: UuidField, disk: UuidField },
    /// MBR disk, addressed by 32-bit signature and byte offset
    LegacySignature { signature: u32, partition_offset: u64 },
    /// Boot, locate or ramdisk style device without any identifier
    NoIdentifier,
    Malformed(LocatorError),
}

/// Classify a device element payload.
pub fn inspect_device(blob: &[u8]) -> DeviceBlob {
    if blob.len() >= DISK_ID_OFFSET + 4 && partition_style(blob) == Some(PartitionStyle::Mbr) {
        return DeviceBlob::LegacySignature {
            signature: read_u32(blob, DISK_ID_OFFSET).unwrap_or(0),
            partition_offset: read_u64(blob, PARTITION_ID_OFFSET).unwrap_or(0),
        };
    }

    if is_uuid_like(blob) {
        let partition = field_at(blob, PARTITION_ID_OFFSET);
        let disk = field_at(blob, DISK_ID_OFFSET);
        if let (Some(partition), Some(disk)) = (partition, disk) {
            if !partition.guid.is_zero() && !disk.guid.is_zero() {
                return DeviceBlob::Qualified { partition, disk };
            }
        }
    }

    let fields = find_uuid_fields(blob);
    match fields.as_slice() {
        [] => DeviceBlob::NoIdentifier,
        [partition, disk] => DeviceBlob::Qualified {
            partition: *partition,
            disk: *disk,
        },
        other => DeviceBlob::Malformed(LocatorError::UuidCount { found: other.len() }),
    }
}

/// Scan for GUID-like runs on 4-byte boundaries from the partition
/// identifier offset on. All-zero words are padding and skipped.
pub fn find_uuid_fields(blob: &[u8]) -> Vec<UuidField> {
    let mut fields = Vec::new();
    let mut idx = PARTITION_ID_OFFSET;

    while idx + GUID_LEN <= blob.len() {
        if blob[idx..idx + 4].iter().all(|&b| b == 0) {
            idx += 4;
            continue;
        }

        let window = &blob[idx..idx + GUID_LEN];
        let terminated = blob.get(idx + GUID_LEN).map_or(true, |&b| b == 0);
        if terminated && looks_like_guid(window) {
            if let Some(field) = field_at(blob, idx) {
                fields.push(field);
            }
            idx += GUID_LEN;
        } else {
            idx += 4;
        }
    }

    fields
}

/// Random GUID bytes rarely contain zeros and are mostly non-ASCII;
/// paths and descriptions embedded in nested devices are the opposite.
fn looks_like_guid(window: &[u8]) -> bool {
    let zeros = window.iter().filter(|&&b| b == 0).count();
    let printable = window.iter().filter(|&&b| (32..=122).contains(&b)).count();
    zeros < 2 && printable <= 10
}

fn field_at(blob: &[u8], offset: usize) -> Option<UuidField> {
    let raw = blob.get(offset..offset + GUID_LEN)?;
    decode_uuid(raw).ok().map(|guid| UuidField { offset, guid })
}

/// Replace the 16-byte field at `offset`, leaving every other byte alone.
pub fn splice_uuid(blob: &mut [u8], offset: usize, guid: Guid) -> Result<(), LocatorError> {
    let len = blob.len();
    let field = blob
        .get_mut(offset..offset + GUID_LEN)
        .ok_or(LocatorError::OutOfBounds { offset, len })?;
    field.copy_from_slice(&encode_uuid(guid));
    Ok(())
}

fn read_u32(blob: &[u8], offset: usize) -> Option<u32> {
    let raw = blob.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64(blob: &[u8], offset: usize) -> Option<u64> {
    let raw: [u8; 8] = blob.get(offset..offset + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}
