// GPT reading using gpt-disk-rs

use gpt_disk_io::{BlockIo, Disk};
use gpt_disk_types::{BlockSize, GptPartitionType};
use thiserror::Error;
use tracing::debug;
use uguid::Guid;

use super::partition::PartitionKind;

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {stage}: {reason}")]
    Io { stage: &'static str, reason: String },
}

fn io_error(stage: &'static str, err: impl core::fmt::Debug) -> ScanError {
    ScanError::Io {
        stage,
        reason: format!("{err:?}"),
    }
}

/// One used slot of the partition entry array
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptEntry {
    /// 0-based slot index
    pub index: u32,
    pub partition_uuid: Guid,
    pub partition_type: GptPartitionType,
    pub start_lba: u64,
    pub end_lba: u64,
}

impl GptEntry {
    pub fn kind(&self) -> PartitionKind {
        PartitionKind::from_gpt_guid(&self.partition_type)
    }

    /// Zero when the LBA range is inverted or its size does not fit a `u64`.
    pub fn size_bytes(&self, block_size: BlockSize) -> u64 {
        self.end_lba
            .checked_sub(self.start_lba)
            .and_then(|blocks| blocks.checked_add(1))
            .and_then(|blocks| blocks.checked_mul(block_size.to_u64()))
            .unwrap_or(0)
    }
}

/// Disk GUID and used partition entries of a GPT disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptLayout {
    pub disk_uuid: Guid,
    pub block_size: BlockSize,
    pub entries: Vec<GptEntry>,
}

/// Read the primary GPT of a disk.
///
/// Only partition table metadata is read, so partitions whose filesystem is
/// unreadable still show up. Returns `Ok(None)` when the disk has no GPT.
pub fn read_gpt<B: BlockIo>(block_io: B, block_size: BlockSize) -> Result<Option<GptLayout>, ScanError> {
    let mut disk = Disk::new(block_io).map_err(|err| io_error("disk", err))?;

    let mut block_buf = vec![0u8; block_size.to_u64() as usize];
    let header = disk
        .read_primary_gpt_header(&mut block_buf)
        .map_err(|err| io_error("GPT header", err))?;

    if !block_buf.starts_with(GPT_SIGNATURE) {
        return Ok(None);
    }

    let disk_uuid = header.disk_guid;
    if disk_uuid.is_zero() {
        debug!("GPT without a disk GUID");
        return Ok(None);
    }
    let layout = match header.get_partition_entry_array_layout() {
        Ok(layout) => layout,
        // Signature present but the header is garbage
        Err(_) => return Ok(None),
    };

    let iter = disk
        .gpt_partition_entry_array_iter(layout, &mut block_buf)
        .map_err(|err| io_error("partition entries", err))?;

    let mut entries = Vec::new();
    for (index, entry_result) in iter.enumerate() {
        let entry = entry_result.map_err(|err| io_error("partition entry", err))?;

        if !entry.is_used() {
            continue;
        }
        if entry.unique_partition_guid.is_zero() {
            debug!(index, "partition entry without a unique GUID");
            continue;
        }

        entries.push(GptEntry {
            index: index as u32,
            partition_uuid: entry.unique_partition_guid,
            partition_type: entry.partition_type_guid,
            start_lba: entry.starting_lba.to_u64(),
            end_lba: entry.ending_lba.to_u64(),
        });
    }

    Ok(Some(GptLayout {
        disk_uuid,
        block_size,
        entries,
    }))
}


#[cfg(test)]
mod tests {
    use super::testing::gpt_image;
    use super::*;
    use gpt_disk_io::BlockIoAdapter;
    use gpt_disk_types::guid;

    const DISK: Guid = guid!("f1e2d3c4-b5a6-4978-8a9b-acbdcedfe0f1");
    const ESP: Guid = guid!("0a1b2c3d-4e5f-4a6b-8c7d-8e9fa0b1c2d3");
    const WIN: Guid = guid!("c3a1e2f4-9b8d-4c7e-a6f5-d4e3c2b1a098");

    #[test]
    fn test_read_gpt_entries() {
        let image = gpt_image(
            DISK,
            &[
                (ESP, GptPartitionType::EFI_SYSTEM),
                (WIN, GptPartitionType::BASIC_DATA),
            ],
        );

        let layout = read_gpt(BlockIoAdapter::new(image.as_slice(), BlockSize::BS_512), BlockSize::BS_512)
            .unwrap()
            .unwrap();

        assert_eq!(layout.disk_uuid, DISK);
        assert_eq!(layout.entries.len(), 2);
        assert_eq!(layout.entries[0].partition_uuid, ESP);
        assert_eq!(layout.entries[0].kind(), PartitionKind::EfiSystem);
        assert_eq!(layout.entries[1].index, 1);
        assert_eq!(layout.entries[1].partition_uuid, WIN);
        assert_eq!(layout.entries[1].start_lba, 42);
        assert_eq!(layout.entries[1].size_bytes(BlockSize::BS_512), 8 * 512);
    }

    #[test]
    fn test_entries_without_uuid_are_skipped() {
        let image = gpt_image(
            DISK,
            &[
                (Guid::ZERO, GptPartitionType::BASIC_DATA),
                (WIN, GptPartitionType::BASIC_DATA),
            ],
        );
        let layout = read_gpt(BlockIoAdapter::new(image.as_slice(), BlockSize::BS_512), BlockSize::BS_512)
            .unwrap()
            .unwrap();
        assert_eq!(layout.entries.len(), 1);
        assert_eq!(layout.entries[0].index, 1);

        let image = gpt_image(Guid::ZERO, &[(WIN, GptPartitionType::BASIC_DATA)]);
        let layout = read_gpt(BlockIoAdapter::new(image.as_slice(), BlockSize::BS_512), BlockSize::BS_512)
            .unwrap();
        assert!(layout.is_none());
    }

    #[test]
    fn test_size_of_corrupt_entry_is_zero() {
        let mut entry = GptEntry {
            index: 0,
            partition_uuid: WIN,
            partition_type: GptPartitionType::BASIC_DATA,
            start_lba: 0,
            end_lba: u64::MAX,
        };
        assert_eq!(entry.size_bytes(BlockSize::BS_512), 0);

        entry.start_lba = 100;
        entry.end_lba = 10;
        assert_eq!(entry.size_bytes(BlockSize::BS_512), 0);

        entry.end_lba = 100;
        assert_eq!(entry.size_bytes(BlockSize::BS_4096), 4096);
    }

    #[test]
    fn test_blank_disk_has_no_gpt() {
        let image = vec![0u8; 64 * 512];
        let layout = read_gpt(BlockIoAdapter::new(image.as_slice(), BlockSize::BS_512), BlockSize::BS_512)
            .unwrap();
        assert!(layout.is_none());
    }

    #[test]
    fn test_truncated_disk_is_an_error() {
        let image = vec![0u8; 512];
        assert!(read_gpt(BlockIoAdapter::new(image.as_slice(), BlockSize::BS_512), BlockSize::BS_512).is_err());
    }
}
