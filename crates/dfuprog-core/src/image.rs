//! Boot image construction
//!
//! Two artifacts get built from a parsed partition table, both consumed by
//! U-Boot on the device side:
//!
//! - the *script image*: a legacy uImage (64-byte header, big-endian fields,
//!   two CRC32 checksums) wrapping an `env set partitions ...` command that
//!   describes the GPT layout and chains into `fastboot usb 0`;
//! - the *flashlayout image*: a 256-byte STM32 header (additive checksum,
//!   little-endian fields) followed by the table re-serialized without the
//!   binary column.

use std::fmt::Write as _;

use crate::error::Error;
use crate::partition::PartitionRecord;

/// Legacy uImage magic.
const IH_MAGIC: u32 = 0x27051956;
/// Legacy uImage type tag for scripts.
const IH_TYPE_SCRIPT: u8 = 6;
/// Legacy uImage header length.
const SCRIPT_HEADER_SIZE: usize = 64;
/// Script payload sub-header length (payload size + reserved word).
const SCRIPT_INFO_SIZE: usize = 8;
/// STM32 flashlayout header length.
const FLASHLAYOUT_HEADER_SIZE: usize = 256;

/// GPT partition type GUIDs keyed by the table's type column.
const TYPE_GUIDS: &[(&str, &str)] = &[
    ("Binary", "8DA63339-0007-60C0-C436-083AC8230908"),
    ("ENV", "3DE21764-95DB-54BD-A5C3-4ABE786F38A8"),
    ("FWU_MDATA", "8A7A84A0-8387-40F6-AB41-A8B9A5A60D23"),
    ("FIP", "19D5DF83-11B0-457b-BE2C-7559C13142A5"),
    ("FileSystem", "0FC63DAF-8483-4772-8E79-3D69D8477DE4"),
    ("ESP", "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"),
];

/// Fixed partition UUIDs for well-known names.
const PART_UUIDS: &[(&str, &str)] = &[
    ("fip-a", "4FD84C93-54EF-463F-A7EF-AE25FF887087"),
    ("fip-b", "09C54952-D5BF-45AF-ACEE-335303766FB3"),
    ("mmc0", "e91c4e10-16e6-4c0e-bd0e-77becf4a3582"),
    ("mmc1", "491f6117-415d-4f53-88c9-6e0de54deac6"),
    ("mmc2", "fd58f1c7-be0d-4338-8ee9-ad8f050aeb18"),
];

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Reflected CRC32 (IEEE polynomial), as U-Boot checks uImage headers.
pub fn crc32(data: &[u8]) -> u32 {
    let mut reg: u32 = 0xffff_ffff;
    for &byte in data {
        reg ^= u32::from(byte);
        for _ in 0..8 {
            let lsb = reg & 1;
            reg >>= 1;
            if lsb != 0 {
                reg ^= 0xedb8_8320;
            }
        }
    }
    !reg
}

fn parse_offset(offset: &str) -> Result<u64, Error> {
    let digits = offset
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|_| {
        log::error!("invalid partition offset {offset:?}");
        Error::WrongParameter
    })
}

/// A row takes part in the GPT script unless it targets no storage at all or
/// lives in a raw boot area outside the GPT.
fn is_eligible(record: &PartitionRecord) -> bool {
    record.storage != "none" && !record.offset.starts_with("boot")
}

/// Build the `env set partitions` command string for the eligible rows.
fn script_text(records: &[PartitionRecord]) -> Result<String, Error> {
    let last_eligible = match records.iter().rposition(is_eligible) {
        Some(idx) => idx,
        None => {
            log::error!("no partitions eligible for the GPT script");
            return Err(Error::NoFile);
        }
    };

    let mut script = String::from("env set partitions ");
    for (i, record) in records.iter().enumerate() {
        if !is_eligible(record) {
            continue;
        }
        let _ = write!(script, "name={}", record.name);
        if i == last_eligible {
            if record.kind == "FileSystem" {
                if let Some(guid) = lookup(TYPE_GUIDS, "FileSystem") {
                    let _ = write!(script, ",type={guid}");
                }
            }
            // Last partition takes the remaining space.
            script.push_str(",size=-");
        } else {
            let next = parse_offset(&records[i + 1].offset)?;
            let this = parse_offset(&record.offset)?;
            let size = next.checked_sub(this).ok_or_else(|| {
                log::error!("partition {} offsets are not increasing", record.name);
                Error::WrongParameter
            })?;
            let _ = write!(script, ",size=0x{size:x}");

            let kind = if record.kind == "System" {
                "FileSystem"
            } else {
                record.kind.as_str()
            };
            if let Some(guid) = lookup(TYPE_GUIDS, kind) {
                let _ = write!(script, ",type={guid}");
            }
            if record.kind == "FIP" {
                if let Some(uuid) = lookup(PART_UUIDS, &record.name) {
                    let _ = write!(script, ",uuid={uuid}");
                }
            }
            if record.name == "rootfs" {
                if let Some(uuid) = lookup(PART_UUIDS, &record.storage) {
                    let _ = write!(script, ",uuid={uuid}");
                }
            }
            if record.name.starts_with("bootfs") {
                script.push_str(",bootable");
            }
            script.push_str("\\;");
        }
    }
    script.push_str(";fastboot usb 0");
    Ok(script)
}

/// Build the complete U-Boot legacy script image.
pub fn build_script(records: &[PartitionRecord]) -> Result<Vec<u8>, Error> {
    if records.is_empty() {
        return Err(Error::NoFile);
    }
    let text = script_text(records)?;

    let total = SCRIPT_HEADER_SIZE + SCRIPT_INFO_SIZE + text.len();
    let mut image = vec![0u8; total];
    image[SCRIPT_HEADER_SIZE + SCRIPT_INFO_SIZE..].copy_from_slice(text.as_bytes());

    // Payload sub-header: big-endian payload length, reserved word zero.
    let payload_len = text.len() as u32;
    image[SCRIPT_HEADER_SIZE..SCRIPT_HEADER_SIZE + 4].copy_from_slice(&payload_len.to_be_bytes());

    // Legacy uImage header, all 32-bit fields stored big-endian. The header
    // CRC is computed with its own field still zero.
    image[0..4].copy_from_slice(&IH_MAGIC.to_be_bytes());
    let data_len = (total - SCRIPT_HEADER_SIZE) as u32;
    image[12..16].copy_from_slice(&data_len.to_be_bytes());
    let dcrc = crc32(&image[SCRIPT_HEADER_SIZE..]);
    image[24..28].copy_from_slice(&dcrc.to_be_bytes());
    image[30] = IH_TYPE_SCRIPT;
    let hcrc = crc32(&image[..SCRIPT_HEADER_SIZE]);
    image[4..8].copy_from_slice(&hcrc.to_be_bytes());

    Ok(image)
}

/// Build the flashlayout image: STM32 header plus the table re-serialized
/// without the binary column.
pub fn build_flashlayout(records: &[PartitionRecord]) -> Result<Vec<u8>, Error> {
    if records.is_empty() {
        return Err(Error::NoMemory);
    }
    let mut payload = String::new();
    for record in records {
        let _ = writeln!(
            payload,
            "{}\t0x{:02X}\t{}\t{}\t{}\t{}",
            record.opt, record.phase_id, record.name, record.kind, record.storage, record.offset
        );
    }
    Ok(stm32_wrap(payload.as_bytes()))
}

/// Prefix `payload` with the 256-byte STM32 header U-Boot authenticates.
fn stm32_wrap(payload: &[u8]) -> Vec<u8> {
    let checksum: u32 = payload.iter().map(|&b| u32::from(b)).sum();
    let mut image = vec![0u8; FLASHLAYOUT_HEADER_SIZE + payload.len()];
    image[0..4].copy_from_slice(b"STM2");
    image[68..72].copy_from_slice(&checksum.to_le_bytes());
    image[72..76].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
    image[76..80].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    image[100..104].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    image[FLASHLAYOUT_HEADER_SIZE..].copy_from_slice(payload);
    image
}
