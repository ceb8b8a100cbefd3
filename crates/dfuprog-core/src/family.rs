//! Device families and their boot flashing sequences
//!
//! Each STM32 MPU family boots through a different chain of DFU alternate
//! settings before U-Boot is up. The chains are data: an ordered list of
//! [`BootStep`]s naming the alternate setting to write, which partition row
//! feeds it and whether a detach (USB re-enumeration) follows the write.

/// Supported STM32 MPU families, keyed by the device id the bootrom reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    Stm32mp15,
    Stm32mp13,
    Stm32mp25,
    Stm32mp21,
}

/// One write in a family's boot chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootStep {
    /// DFU alternate setting index to download into.
    pub alt_index: u8,
    /// Index into the partition table's record list.
    pub partition: usize,
    /// Whether the device re-enumerates after this write.
    pub detach_after: bool,
}

const fn step(alt_index: u8, partition: usize, detach_after: bool) -> BootStep {
    BootStep {
        alt_index,
        partition,
        detach_after,
    }
}

// MP15: the bootrom exposes the FSBL copies on alts 1 and 3 and only
// re-enumerates once both are in place.
const MP15_STEPS: &[BootStep] = &[step(1, 0, false), step(3, 1, true)];
// MP13: each stage goes to alt 0 and re-enumerates.
const MP13_STEPS: &[BootStep] = &[step(0, 0, true), step(0, 1, true)];
// MP25/MP21: fsbl-boot, fip-ddr, then fip-boot on alt 1.
const MP25_STEPS: &[BootStep] = &[step(0, 0, true), step(0, 1, true), step(1, 2, true)];

impl DeviceFamily {
    /// Map the bootrom-reported device id to a family.
    pub fn from_device_id(id: u16) -> Option<Self> {
        match id {
            0x500 => Some(DeviceFamily::Stm32mp15),
            0x501 => Some(DeviceFamily::Stm32mp13),
            0x505 => Some(DeviceFamily::Stm32mp25),
            0x506 => Some(DeviceFamily::Stm32mp21),
            _ => None,
        }
    }

    /// Numeric id as the bootrom reports it.
    pub fn device_id(&self) -> u16 {
        match self {
            DeviceFamily::Stm32mp15 => 0x500,
            DeviceFamily::Stm32mp13 => 0x501,
            DeviceFamily::Stm32mp25 => 0x505,
            DeviceFamily::Stm32mp21 => 0x506,
        }
    }

    /// The boot chain for this family. A utility table carries only the
    /// first-stage binary, so only the first step runs.
    pub fn boot_steps(&self, utility: bool) -> &'static [BootStep] {
        let steps = match self {
            DeviceFamily::Stm32mp15 => MP15_STEPS,
            DeviceFamily::Stm32mp13 => MP13_STEPS,
            DeviceFamily::Stm32mp25 | DeviceFamily::Stm32mp21 => MP25_STEPS,
        };
        if utility {
            &steps[..1]
        } else {
            steps
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceFamily::Stm32mp15 => "STM32MP15",
            DeviceFamily::Stm32mp13 => "STM32MP13",
            DeviceFamily::Stm32mp25 => "STM32MP25",
            DeviceFamily::Stm32mp21 => "STM32MP21",
        };
        f.write_str(name)
    }
}
