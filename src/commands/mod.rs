//! CLI command implementations
//!
//! Thin wrappers around [`FlashService`]: each translates the parsed
//! arguments into one orchestration call and formats what the user sees.

use std::path::Path;

use dfuprog_core::phase::PHASE_FLASHLAYOUT;
use dfuprog_core::Result;
use dfuprog_dfu::Transport;
use dfuprog_service::FlashService;

pub fn run_list<T: Transport>(service: &mut FlashService<T>) -> Result<()> {
    let devices = service.list_devices()?;
    if devices.is_empty() {
        log::warn!("no STM32 DFU devices found");
        return Ok(());
    }
    println!("STM32 DFU devices list");
    println!(" Number of STM32 DFU devices: {}", devices.len());
    for (idx, device) in devices.iter().enumerate() {
        println!(" [Device {}] :", idx + 1);
        println!("     Dev num       : {}", device.devnum);
        println!("     Serial number : {}", device.serial);
    }
    Ok(())
}

pub fn run_install<T: Transport>(
    service: &mut FlashService<T>,
    table: &Path,
    fastboot: bool,
) -> Result<()> {
    service.install(table, fastboot)
}

pub fn run_flash<T: Transport>(service: &mut FlashService<T>, table: &Path) -> Result<()> {
    service.flash(table)
}

pub fn run_otp_read<T: Transport>(service: &mut FlashService<T>, output: &Path) -> Result<()> {
    // Quote the path, it rides on a shell command line.
    service.read_otp(&format!("\"{}\"", output.display()))
}

pub fn run_otp_write<T: Transport>(service: &mut FlashService<T>, input: &Path) -> Result<()> {
    service.write_otp(&format!("\"{}\"", input.display()))
}

pub fn run_phase<T: Transport>(service: &mut FlashService<T>) -> Result<()> {
    let phase = service.query_phase()?;
    println!("Phase ID : 0x{:02X}", phase.phase);
    if phase.phase == PHASE_FLASHLAYOUT && phase.detach_requested {
        println!("Detach requested");
    }
    Ok(())
}
