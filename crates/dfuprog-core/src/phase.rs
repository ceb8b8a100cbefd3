//! Phase-status record reported by the U-Boot DFU stack
//!
//! During an open-ended flashing session the device exposes a virtual
//! partition whose content tells the host what to send next: a phase byte, a
//! 32-bit load address and, only when the device asks for the flashlayout,
//! one extra byte requesting a detach.

use crate::error::Error;

/// Phase value asking the host to send the flashlayout image.
pub const PHASE_FLASHLAYOUT: u8 = 0x00;
/// Phase value reporting the flashing sequence is complete.
pub const PHASE_END: u8 = 0xFE;
/// Phase value reporting the device is rebooting.
pub const PHASE_RESET: u8 = 0xFF;

/// Decoded phase-status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashPhase {
    /// Requested phase id, or one of the sentinel values.
    pub phase: u8,
    /// Load address for the requested phase.
    pub load_address: u32,
    /// Whether the device asks for a detach before continuing. Only carried
    /// when the phase is [`PHASE_FLASHLAYOUT`].
    pub detach_requested: bool,
}

impl FlashPhase {
    /// Decode the raw partition content: one phase byte, a little-endian
    /// load address and, for phase zero only, a detach-request byte.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 5 {
            log::error!("phase record too short: {} bytes", data.len());
            return Err(Error::UnsupportedFileFormat);
        }
        let phase = data[0];
        let load_address = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let detach_requested = if phase == PHASE_FLASHLAYOUT {
            match data.get(5) {
                Some(&flag) => flag != 0,
                None => {
                    log::error!("phase record is missing the detach flag");
                    return Err(Error::UnsupportedFileFormat);
                }
            }
        } else {
            false
        };
        Ok(Self {
            phase,
            load_address,
            detach_requested,
        })
    }
}
