//! Tab-separated partition table parsing
//!
//! The provisioning input is a flashlayout TSV: one row per partition with
//! seven columns (opt, phase id, name, type, storage, offset, binary).
//! Comment lines start with `#`, blank lines are ignored and runs of tabs
//! collapse so hand-aligned tables parse the same as minimal ones.
//!
//! Loading a table also builds the boot image that will be pushed to the
//! device: a U-Boot script image in fastboot mode or a flashlayout image in
//! DFU mode (see [`crate::image`]).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::image;

/// Number of columns a partition row must carry.
pub const TSV_COLUMNS: usize = 7;

/// Which boot image gets built from the parsed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// Build a U-Boot legacy script image (install flow).
    Fastboot,
    /// Build a flashlayout image (open-ended phase flow).
    Flashlayout,
}

/// One row of the partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// Selection/option column, kept verbatim.
    pub opt: String,
    /// Phase id the device uses to request this partition.
    pub phase_id: u8,
    /// Partition name.
    pub name: String,
    /// Partition type (Binary, FIP, System, ...).
    pub kind: String,
    /// Target storage device.
    pub storage: String,
    /// Offset on the storage device, kept verbatim (hex text or boot area name).
    pub offset: String,
    /// Resolved binary path wrapped in double quotes, or the literal `none`.
    pub binary: String,
}

/// Parse-level failures, converted into the workspace taxonomy at the
/// table boundary.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("cannot read partition table {0}")]
    NoFile(PathBuf),
    #[error("partition table is empty")]
    EmptyFile,
    #[error("line {line}: expected {TSV_COLUMNS} columns, found {found}")]
    MalformedRow { line: usize, found: usize },
    #[error("line {line}: invalid phase id {value:?}")]
    BadPhaseId { line: usize, value: String },
    #[error("binary file not found: {0}")]
    MissingBinary(String),
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::NoFile(_) | TableError::EmptyFile => Error::NoFile,
            TableError::MalformedRow { .. }
            | TableError::BadPhaseId { .. }
            | TableError::MissingBinary(_) => Error::WrongParameter,
        }
    }
}

/// A parsed partition table plus the boot image built from it.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    records: Vec<PartitionRecord>,
    image: Vec<u8>,
    mode: TableMode,
}

impl PartitionTable {
    /// Load and parse a TSV table from `path`, then build the boot image for
    /// `mode`.
    pub fn from_file<P: AsRef<Path>>(path: P, mode: TableMode) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| {
                log::error!("cannot read {}: {e}", path.display());
                TableError::NoFile(path.to_path_buf())
            })?;
        let records = parse_rows(&text, path)?;
        let image = match mode {
            TableMode::Fastboot => image::build_script(&records)?,
            TableMode::Flashlayout => image::build_flashlayout(&records)?,
        };
        Ok(Self { records, image, mode })
    }

    pub fn records(&self) -> &[PartitionRecord] {
        &self.records
    }

    /// The boot image built at load time.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    /// A utility table drives a single RAM-loaded binary: exactly one row
    /// whose storage column is `none`.
    pub fn is_utility(&self) -> bool {
        self.records.len() == 1 && self.records[0].storage == "none"
    }

    /// Check the table carries the boot phases the device will request:
    /// 0x01 always, 0x03 unless this is a utility table.
    pub fn validate(&self, utility: bool) -> Result<(), Error> {
        if self.find_phase(0x01).is_none() {
            log::error!("partition table has no phase 0x01 entry");
            return Err(Error::WrongParameter);
        }
        if !utility && self.find_phase(0x03).is_none() {
            log::error!("partition table has no phase 0x03 entry");
            return Err(Error::WrongParameter);
        }
        Ok(())
    }

    /// Look up the record for a device-reported phase id.
    pub fn find_phase(&self, phase: u8) -> Option<&PartitionRecord> {
        self.records.iter().find(|r| r.phase_id == phase)
    }
}

fn parse_rows(text: &str, path: &Path) -> Result<Vec<PartitionRecord>, TableError> {
    if text.is_empty() {
        return Err(TableError::EmptyFile);
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').filter(|f| !f.is_empty()).collect();
        if fields.len() != TSV_COLUMNS {
            return Err(TableError::MalformedRow {
                line: idx + 1,
                found: fields.len(),
            });
        }
        let phase_text = fields[1];
        let phase_id = u8::from_str_radix(
            phase_text.trim_start_matches("0x").trim_start_matches("0X"),
            16,
        )
        .map_err(|_| TableError::BadPhaseId {
            line: idx + 1,
            value: phase_text.to_string(),
        })?;
        let binary = resolve_binary(fields[6], dir)?;
        records.push(PartitionRecord {
            opt: fields[0].to_string(),
            phase_id,
            name: fields[2].to_string(),
            kind: fields[3].to_string(),
            storage: fields[4].to_string(),
            offset: fields[5].to_string(),
            binary,
        });
    }
    if records.is_empty() {
        return Err(TableError::EmptyFile);
    }
    Ok(records)
}

/// Resolve the binary column: `none` passes through, anything else must name
/// an existing file either as given or relative to the table's directory.
/// Resolved paths are quoted so they survive the shell-joined tool command.
fn resolve_binary(field: &str, dir: &Path) -> Result<String, TableError> {
    if field == "none" {
        return Ok(field.to_string());
    }
    let direct = PathBuf::from(field);
    let resolved = if direct.is_file() {
        direct
    } else {
        let relative = dir.join(field);
        if relative.is_file() {
            relative
        } else {
            return Err(TableError::MissingBinary(field.to_string()));
        }
    };
    let mut quoted = String::new();
    // write! to a String cannot fail
    let _ = write!(quoted, "\"{}\"", resolved.display());
    Ok(quoted)
}
