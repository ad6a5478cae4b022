// Hive access through chntpw's reged

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::reg_text::{format_import, parse_export};
use super::{Hive, HiveError, HiveStore, Result};
use crate::value::RegValue;

/// Binary looked up on `PATH` when no explicit tool is configured
pub const DEFAULT_REGED: &str = "reged";

// Key prefix for both export and import
const ROOT: &str = "\\";

/// Hive file edited by an external `reged` process.
#[derive(Debug, Clone)]
pub struct RegedHive {
    path: PathBuf,
    tool: PathBuf,
}

impl RegedHive {
    pub fn open(path: impl Into<PathBuf>, tool: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(HiveError::Missing(path));
        }
        Ok(Self {
            path,
            tool: tool.into(),
        })
    }

    fn run(&self, action: &'static str, args: &[&OsStr]) -> Result<()> {
        debug!(tool = %self.tool.display(), hive = %self.path.display(), action, "running reged");

        let status = Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => HiveError::ToolMissing(self.tool.clone()),
                _ => HiveError::Spawn {
                    tool: self.tool.clone(),
                    source,
                },
            })?;

        if !status.success() {
            return Err(HiveError::ToolFailed {
                tool: self.tool.clone(),
                action,
                hive: self.path.clone(),
                status,
            });
        }
        Ok(())
    }
}

fn scratch_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("bcdfix")
        .tempdir()
        .map_err(|source| HiveError::Io {
            path: std::env::temp_dir(),
            source,
        })
}

impl HiveStore for RegedHive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Hive> {
        let dir = scratch_dir()?;
        let export = dir.path().join("export.reg");

        self.run(
            "export",
            &[
                OsStr::new("-x"),
                self.path.as_os_str(),
                OsStr::new(ROOT),
                OsStr::new(ROOT),
                export.as_os_str(),
            ],
        )?;

        let raw = fs::read(&export).map_err(|source| HiveError::Io {
            path: export.clone(),
            source,
        })?;
        let parsed = parse_export(&String::from_utf8_lossy(&raw))?;
        Ok(parsed.hive)
    }

    fn write_value(&mut self, key_path: &str, value_name: &str, bytes: &[u8]) -> Result<()> {
        let dir = scratch_dir()?;
        let import = dir.path().join("import.reg");
        let text = format_import(key_path, value_name, &RegValue::Binary(bytes.to_vec()));

        fs::write(&import, text).map_err(|source| HiveError::Io {
            path: import.clone(),
            source,
        })?;

        self.run(
            "import",
            &[
                OsStr::new("-N"),
                OsStr::new("-C"),
                OsStr::new("-I"),
                self.path.as_os_str(),
                OsStr::new(ROOT),
                import.as_os_str(),
            ],
        )
    }
}
