//! Hive backups
//!
//! A copy of the hive is written next to it before the first change of a
//! run. Existing backups are never overwritten: `BCD.bak` is tried first,
//! then `BCD.bak.1`, `BCD.bak.2` and so on.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// Numbered names tried after the plain suffix
const MAX_GENERATIONS: u32 = 99;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("cannot read {} for backup: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create backup {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write backup {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("every backup name next to {} is taken", .0.display())]
    Exhausted(PathBuf),
}

/// Something that can preserve a hive before it is modified.
pub trait Backup {
    /// Copy `hive` somewhere safe and return where.
    fn create(&mut self, hive: &Path) -> Result<PathBuf, BackupError>;
}

/// Backup copied next to the hive.
#[derive(Debug, Clone)]
pub struct AdjacentBackup {
    suffix: String,
}

impl AdjacentBackup {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    fn candidates(&self, hive: &Path) -> impl Iterator<Item = PathBuf> {
        let base: OsString = {
            let mut name = hive.as_os_str().to_owned();
            name.push(".");
            name.push(&self.suffix);
            name
        };

        (0..=MAX_GENERATIONS).map(move |generation| {
            let mut name = base.clone();
            if generation > 0 {
                name.push(format!(".{generation}"));
            }
            PathBuf::from(name)
        })
    }
}

impl Backup for AdjacentBackup {
    fn create(&mut self, hive: &Path) -> Result<PathBuf, BackupError> {
        let source_err = |source| BackupError::Source {
            path: hive.to_path_buf(),
            source,
        };
        let mut src = File::open(hive).map_err(source_err)?;
        let permissions = src.metadata().map_err(source_err)?.permissions();

        for path in self.candidates(hive) {
            let mut dst = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(BackupError::Create { path, source }),
            };

            let written = io::copy(&mut src, &mut dst)
                .and_then(|_| dst.sync_all())
                .and_then(|_| fs::set_permissions(&path, permissions.clone()));
            if let Err(source) = written {
                let _ = fs::remove_file(&path);
                return Err(BackupError::Write { path, source });
            }

            info!(hive = %hive.display(), backup = %path.display(), "hive backed up");
            return Ok(path);
        }

        Err(BackupError::Exhausted(hive.to_path_buf()))
    }
}
