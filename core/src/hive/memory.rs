// In-memory hive store

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{normalize_path, Hive, HiveError, HiveStore, Result};
use crate::value::RegValue;

/// A [`HiveStore`] that never leaves memory.
///
/// Writes follow the same rules `reged -N` enforces on a real hive: the
/// value must already exist and keep its size.
#[derive(Debug, Clone)]
pub struct MemoryHive {
    path: PathBuf,
    hive: Hive,
    rejected: BTreeSet<(String, String)>,
    writes: usize,
}

impl MemoryHive {
    pub fn new(path: impl Into<PathBuf>, hive: Hive) -> Self {
        Self {
            path: path.into(),
            hive,
            rejected: BTreeSet::new(),
            writes: 0,
        }
    }

    /// Fail every write to `key_path\value_name`.
    pub fn reject_writes_to(mut self, key_path: &str, value_name: &str) -> Self {
        self.rejected
            .insert((normalize_path(key_path), value_name.to_string()));
        self
    }

    pub fn hive(&self) -> &Hive {
        &self.hive
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl HiveStore for MemoryHive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Hive> {
        Ok(self.hive.clone())
    }

    fn write_value(&mut self, key_path: &str, value_name: &str, bytes: &[u8]) -> Result<()> {
        let key = normalize_path(key_path);
        let value = value_name.to_string();

        if self.rejected.contains(&(key.clone(), value.clone())) {
            return Err(HiveError::WriteRejected { key, value });
        }

        let have = match self.hive.binary(&key, &value) {
            Some(current) => current.len(),
            None => return Err(HiveError::MissingValue { key, value }),
        };
        if have != bytes.len() {
            return Err(HiveError::SizeMismatch {
                key,
                value,
                have,
                want: bytes.len(),
            });
        }

        self.hive
            .set_value(&key, &value, RegValue::Binary(bytes.to_vec()));
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryHive {
        let mut hive = Hive::new();
        hive.set_value("Objects\\{a}\\Elements\\11000001", "Element", RegValue::Binary(vec![0; 8]));
        MemoryHive::new("/boot/efi/EFI/Microsoft/Boot/BCD", hive)
    }

    #[test]
    fn test_write_existing_value() {
        let mut store = store();
        store
            .write_value("\\Objects\\{a}\\Elements\\11000001", "Element", &[1; 8])
            .unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(
            store.read().unwrap().binary("Objects\\{a}\\Elements\\11000001", "Element"),
            Some(&[1u8; 8][..])
        );
    }

    #[test]
    fn test_write_rules() {
        let mut store = store().reject_writes_to("Objects\\{a}\\Elements\\11000001", "Element");
        assert!(matches!(
            store.write_value("Objects\\{a}\\Elements\\11000001", "Element", &[1; 8]),
            Err(HiveError::WriteRejected { .. })
        ));

        let mut store = self::store();
        assert!(matches!(
            store.write_value("Objects\\{a}\\Elements\\11000001", "Element", &[1; 9]),
            Err(HiveError::SizeMismatch { have: 8, want: 9, .. })
        ));
        assert!(matches!(
            store.write_value("Objects\\{a}\\Elements\\21000001", "Element", &[1; 8]),
            Err(HiveError::MissingValue { .. })
        ));
        assert_eq!(store.write_count(), 0);
    }
}
