//! BCD entry walker
//!
//! Boot objects are the subkeys of `Objects`. For every object the walker
//! looks at the two volume-addressing elements and reports what it finds in
//! each, normalizing both storage shapes into one [`DeviceLocator`]:
//!
//! - combined: one `Element` blob holding both GUIDs
//! - split: separate 16-byte `PartitionId` and `DiskId` values
//!
//! Order follows the hive's key order, so repeated walks of the same hive
//! report the same sequence.

use tracing::{debug, warn};
use uguid::Guid;

use super::elements::{
    element_path, object_path, LocatorElement, APPLICATION_PATH, DESCRIPTION, DISK_ID_VALUE,
    ELEMENTS_KEY, ELEMENT_VALUE, OBJECTS_KEY, PARTITION_ID_VALUE, SYSTEM_ROOT,
};
use crate::hive::{Hive, RegKey};
use crate::value::{decode_uuid, encode_uuid, inspect_device, splice_uuid, DeviceBlob, LocatorError, RegValue};

/// One boot loader object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootEntry {
    /// Object key name, usually a braced GUID
    pub id: String,
    pub key_path: String,
    pub description: Option<String>,
    pub application_path: Option<String>,
    pub system_root: Option<String>,
}

impl BootEntry {
    fn read(id: &str, object: &RegKey) -> Self {
        let text = |element: &str| {
            object
                .subkey(ELEMENTS_KEY)?
                .subkey(element)?
                .value(ELEMENT_VALUE)?
                .as_text()
                .map(str::to_string)
        };

        Self {
            id: id.to_string(),
            key_path: object_path(id),
            description: text(DESCRIPTION),
            application_path: text(APPLICATION_PATH),
            system_root: text(SYSTEM_ROOT),
        }
    }

    /// Description plus paths, e.g. `Windows 11 (\Windows\system32\winload.efi)`.
    pub fn title(&self) -> String {
        let mut title = self.description.clone().unwrap_or_else(|| self.id.clone());
        for path in [&self.application_path, &self.system_root].into_iter().flatten() {
            title.push_str(" (");
            title.push_str(path);
            title.push(')');
        }
        title
    }
}

/// Where a locator's GUIDs are stored
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocatorShape {
    Combined {
        value_name: String,
        bytes: Vec<u8>,
        partition_offset: usize,
        disk_offset: usize,
    },
    Split {
        partition_value: String,
        disk_value: String,
    },
}

/// A pending change to one value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedWrite {
    pub key_path: String,
    pub value_name: String,
    /// Bytes the value had when it was staged
    pub original: Vec<u8>,
    pub new_bytes: Vec<u8>,
}

/// Partition and disk GUID found in one device element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLocator {
    pub entry_id: String,
    pub element: LocatorElement,
    /// Element key the GUIDs were read from
    pub key_path: String,
    pub shape: LocatorShape,
    pub partition_uuid: Guid,
    pub disk_uuid: Guid,
}

impl DeviceLocator {
    /// Writes that make this locator address `partition` on `disk`.
    ///
    /// Only the GUID fields change. The result is decoded again and must
    /// read back as the requested pair. Returns no writes when the locator
    /// already carries the pair.
    pub fn rewrite(&self, partition: Guid, disk: Guid) -> Result<Vec<StagedWrite>, LocatorError> {
        match &self.shape {
            LocatorShape::Combined {
                value_name,
                bytes,
                partition_offset,
                disk_offset,
            } => {
                let mut new_bytes = bytes.clone();
                splice_uuid(&mut new_bytes, *partition_offset, partition)?;
                splice_uuid(&mut new_bytes, *disk_offset, disk)?;

                let (got_partition, got_disk) = match inspect_device(&new_bytes) {
                    DeviceBlob::Qualified { partition, disk } => (partition.guid, disk.guid),
                    _ => (Guid::ZERO, Guid::ZERO),
                };
                if (got_partition, got_disk) != (partition, disk) {
                    return Err(LocatorError::VerifyFailed {
                        partition: got_partition,
                        disk: got_disk,
                        want_partition: partition,
                        want_disk: disk,
                    });
                }

                if &new_bytes == bytes {
                    return Ok(Vec::new());
                }
                Ok(vec![StagedWrite {
                    key_path: self.key_path.clone(),
                    value_name: value_name.clone(),
                    original: bytes.clone(),
                    new_bytes,
                }])
            }
            LocatorShape::Split {
                partition_value,
                disk_value,
            } => {
                let fields = [
                    (partition_value, self.partition_uuid, partition),
                    (disk_value, self.disk_uuid, disk),
                ];
                let mut writes = Vec::new();
                for (value_name, current, wanted) in fields {
                    let new_bytes = encode_uuid(wanted).to_vec();
                    if decode_uuid(&new_bytes)? != wanted {
                        return Err(LocatorError::VerifyFailed {
                            partition: self.partition_uuid,
                            disk: self.disk_uuid,
                            want_partition: partition,
                            want_disk: disk,
                        });
                    }
                    if current != wanted {
                        writes.push(StagedWrite {
                            key_path: self.key_path.clone(),
                            value_name: value_name.clone(),
                            original: encode_uuid(current).to_vec(),
                            new_bytes,
                        });
                    }
                }
                Ok(writes)
            }
        }
    }
}

/// What a device element turned out to hold
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Found {
    Locator(DeviceLocator),
    /// MBR disk signature, reported but never rewritten
    Legacy { signature: u32, partition_offset: u64 },
    /// Boot, locate or ramdisk device without a volume identifier
    NoIdentifier,
    Malformed(LocatorError),
}

/// One device element of one boot entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discovery {
    pub entry: BootEntry,
    pub element: LocatorElement,
    pub key_path: String,
    pub found: Found,
}

/// Every device element of every boot entry in `hive`.
pub fn walk(hive: &Hive) -> impl Iterator<Item = Discovery> + '_ {
    hive.key(OBJECTS_KEY)
        .into_iter()
        .flat_map(|objects| objects.subkeys())
        .flat_map(|(id, object)| {
            let entry = BootEntry::read(id, object);
            LocatorElement::ALL
                .into_iter()
                .filter_map(move |element| discover(&entry, object, element))
        })
}

fn discover(entry: &BootEntry, object: &RegKey, element: LocatorElement) -> Option<Discovery> {
    let element_key = object.subkey(ELEMENTS_KEY)?.subkey(element.id())?;
    let key_path = element_path(&entry.id, element.id());

    let found = match element_key.value(ELEMENT_VALUE) {
        Some(value) => match value.as_binary() {
            Some(blob) => from_blob(entry, element, &key_path, blob),
            None => Found::Malformed(LocatorError::NotBinary(value.kind_name())),
        },
        None => from_split(entry, element, &key_path, element_key),
    };

    match &found {
        Found::Locator(locator) => debug!(
            entry = %entry.id,
            %element,
            partition = %locator.partition_uuid,
            disk = %locator.disk_uuid,
            "device locator"
        ),
        Found::Legacy { signature, .. } => warn!(
            entry = %entry.id,
            %element,
            signature = %format!("{signature:08x}"),
            "MBR disk signature locator left alone"
        ),
        Found::NoIdentifier => debug!(entry = %entry.id, %element, "device without identifier"),
        Found::Malformed(error) => warn!(entry = %entry.id, %element, %error, "malformed device locator"),
    }

    Some(Discovery {
        entry: entry.clone(),
        element,
        key_path,
        found,
    })
}

fn from_blob(entry: &BootEntry, element: LocatorElement, key_path: &str, blob: &[u8]) -> Found {
    match inspect_device(blob) {
        DeviceBlob::Qualified { partition, disk } => Found::Locator(DeviceLocator {
            entry_id: entry.id.clone(),
            element,
            key_path: key_path.to_string(),
            shape: LocatorShape::Combined {
                value_name: ELEMENT_VALUE.to_string(),
                bytes: blob.to_vec(),
                partition_offset: partition.offset,
                disk_offset: disk.offset,
            },
            partition_uuid: partition.guid,
            disk_uuid: disk.guid,
        }),
        DeviceBlob::LegacySignature {
            signature,
            partition_offset,
        } => Found::Legacy {
            signature,
            partition_offset,
        },
        DeviceBlob::NoIdentifier => Found::NoIdentifier,
        DeviceBlob::Malformed(error) => Found::Malformed(error),
    }
}

fn from_split(entry: &BootEntry, element: LocatorElement, key_path: &str, key: &RegKey) -> Found {
    let partition = key.value(PARTITION_ID_VALUE);
    let disk = key.value(DISK_ID_VALUE);

    let (partition, disk) = match (partition, disk) {
        (Some(partition), Some(disk)) => (partition, disk),
        (Some(_), None) => return Found::Malformed(LocatorError::MissingValue(DISK_ID_VALUE)),
        (None, Some(_)) => return Found::Malformed(LocatorError::MissingValue(PARTITION_ID_VALUE)),
        (None, None) => return Found::Malformed(LocatorError::MissingValue(ELEMENT_VALUE)),
    };

    match (split_uuid(partition), split_uuid(disk)) {
        (Ok(partition_uuid), Ok(disk_uuid)) => Found::Locator(DeviceLocator {
            entry_id: entry.id.clone(),
            element,
            key_path: key_path.to_string(),
            shape: LocatorShape::Split {
                partition_value: PARTITION_ID_VALUE.to_string(),
                disk_value: DISK_ID_VALUE.to_string(),
            },
            partition_uuid,
            disk_uuid,
        }),
        (Err(error), _) | (_, Err(error)) => Found::Malformed(error),
    }
}

fn split_uuid(value: &RegValue) -> Result<Guid, LocatorError> {
    let bytes = value
        .as_binary()
        .ok_or_else(|| LocatorError::NotBinary(value.kind_name()))?;
    decode_uuid(bytes)
}


#[cfg(test)]
mod tests {
    use super::testing::add_entry;
    use super::*;
    use crate::value::testing::{device_blob, mbr_blob};
    use crate::value::{DISK_ID_OFFSET, GUID_LEN, PARTITION_ID_OFFSET};
    use gpt_disk_types::guid;
    use pretty_assertions::assert_eq;

    const P1: Guid = guid!("c3a1e2f4-9b8d-4c7e-a6f5-d4e3c2b1a098");
    const P2: Guid = guid!("0a1b2c3d-4e5f-4a6b-8c7d-8e9fa0b1c2d3");
    const D1: Guid = guid!("f1e2d3c4-b5a6-4978-8a9b-acbdcedfe0f1");
    const D2: Guid = guid!("2b3c4d5e-6f70-4182-93a4-b5c6d7e8f901");

    const WINDOWS: &str = "{7c5a1b9e-3f2d-11ee-9a4b-8c1645d3e2f0}";
    const BOOTMGR: &str = "{9dea862c-5cdd-4e70-acc1-f32b344d4795}";

    fn locators(hive: &Hive) -> Vec<DeviceLocator> {
        walk(hive)
            .filter_map(|d| match d.found {
                Found::Locator(locator) => Some(locator),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_finds_both_device_elements() {
        let mut hive = Hive::new();
        add_entry(&mut hive, WINDOWS, "Windows 11", Some(device_blob(P1, D1)), Some(device_blob(P1, D1)));
        hive.set_value(
            &element_path(WINDOWS, APPLICATION_PATH),
            ELEMENT_VALUE,
            RegValue::Text("\\Windows\\system32\\winload.efi".into()),
        );

        let found: Vec<Discovery> = walk(&hive).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].element, LocatorElement::ApplicationDevice);
        assert_eq!(found[1].element, LocatorElement::OsDevice);
        assert_eq!(found[0].key_path, format!("Objects\\{WINDOWS}\\Elements\\11000001"));
        assert_eq!(
            found[0].entry.title(),
            "Windows 11 (\\Windows\\system32\\winload.efi)"
        );

        let locators = locators(&hive);
        assert_eq!(locators[0].partition_uuid, P1);
        assert_eq!(locators[0].disk_uuid, D1);
    }

    #[test]
    fn test_walk_order_is_stable() {
        let mut hive = Hive::new();
        add_entry(&mut hive, WINDOWS, "Windows 11", Some(device_blob(P1, D1)), None);
        add_entry(&mut hive, BOOTMGR, "Windows Boot Manager", Some(device_blob(P2, D2)), None);

        let first: Vec<_> = walk(&hive).map(|d| d.entry.id).collect();
        let second: Vec<_> = walk(&hive).map(|d| d.entry.id).collect();
        assert_eq!(first, second);
        assert_eq!(first, [WINDOWS, BOOTMGR]);
    }

    #[test]
    fn test_walk_reports_legacy_and_malformed() {
        let mut hive = Hive::new();
        let mut short = vec![0u8; 0x60];
        short[0x3C] = 7;
        short[0x48..0x58].copy_from_slice(&encode_uuid(P1));
        add_entry(&mut hive, WINDOWS, "Windows 7", Some(mbr_blob(0xdead_beef, 1 << 20)), Some(short));
        hive.set_value(
            &element_path(BOOTMGR, "11000001"),
            ELEMENT_VALUE,
            RegValue::Text("oops".into()),
        );

        let found: Vec<Found> = walk(&hive).map(|d| d.found).collect();
        assert_eq!(
            found,
            [
                Found::Legacy { signature: 0xdead_beef, partition_offset: 1 << 20 },
                Found::Malformed(LocatorError::UuidCount { found: 1 }),
                Found::Malformed(LocatorError::NotBinary("string")),
            ]
        );
    }

    #[test]
    fn test_walk_normalizes_split_shape() {
        let mut hive = Hive::new();
        let key = element_path(WINDOWS, "21000001");
        hive.set_value(&key, PARTITION_ID_VALUE, RegValue::Binary(encode_uuid(P1).to_vec()));
        hive.set_value(&key, DISK_ID_VALUE, RegValue::Binary(encode_uuid(D1).to_vec()));

        let locator = &locators(&hive)[0];
        assert_eq!(locator.element, LocatorElement::OsDevice);
        assert_eq!((locator.partition_uuid, locator.disk_uuid), (P1, D1));

        let writes = locator.rewrite(P1, D2).unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value_name, DISK_ID_VALUE);
        assert_eq!(decode_uuid(&writes[0].new_bytes).unwrap(), D2);
    }

    #[test]
    fn test_split_shape_missing_half_is_malformed() {
        let mut hive = Hive::new();
        hive.set_value(
            &element_path(WINDOWS, "11000001"),
            PARTITION_ID_VALUE,
            RegValue::Binary(encode_uuid(P1).to_vec()),
        );
        let found: Vec<Found> = walk(&hive).map(|d| d.found).collect();
        assert_eq!(found, [Found::Malformed(LocatorError::MissingValue(DISK_ID_VALUE))]);
    }

    #[test]
    fn test_rewrite_disk_only_touches_disk_field() {
        let mut hive = Hive::new();
        let blob = device_blob(P1, D1);
        add_entry(&mut hive, WINDOWS, "Windows 11", Some(blob.clone()), None);

        let writes = locators(&hive)[0].rewrite(P1, D2).unwrap();
        assert_eq!(writes.len(), 1);
        let new = &writes[0].new_bytes;
        assert_eq!(writes[0].original, blob);
        assert_eq!(&new[..DISK_ID_OFFSET], &blob[..DISK_ID_OFFSET]);
        assert_eq!(&new[DISK_ID_OFFSET + GUID_LEN..], &blob[DISK_ID_OFFSET + GUID_LEN..]);
        assert_eq!(decode_uuid(&new[PARTITION_ID_OFFSET..PARTITION_ID_OFFSET + GUID_LEN]).unwrap(), P1);
        assert_eq!(decode_uuid(&new[DISK_ID_OFFSET..DISK_ID_OFFSET + GUID_LEN]).unwrap(), D2);
    }

    #[test]
    fn test_rewrite_to_same_pair_is_empty() {
        let mut hive = Hive::new();
        add_entry(&mut hive, WINDOWS, "Windows 11", Some(device_blob(P1, D1)), None);
        assert!(locators(&hive)[0].rewrite(P1, D1).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_rejects_guid_the_scan_cannot_read_back() {
        // Nested device: GUIDs are only found by scanning, so a replacement
        // full of zero bytes would no longer be recognized.
        let mut blob = vec![0u8; 0x90];
        blob[0x3C] = 5;
        blob[0x48..0x58].copy_from_slice(&encode_uuid(P1));
        blob[0x70..0x80].copy_from_slice(&encode_uuid(D1));
        let mut hive = Hive::new();
        add_entry(&mut hive, WINDOWS, "VHD boot", Some(blob), None);

        let locator = &locators(&hive)[0];
        let zeroish = guid!("00000001-0000-4000-8000-000000000001");
        assert!(matches!(
            locator.rewrite(zeroish, D1),
            Err(LocatorError::VerifyFailed { .. })
        ));
        assert_eq!(locator.rewrite(P2, D2).unwrap().len(), 1);
    }
}
