//! DFU device session
//!
//! [`DfuSession`] wraps every interaction with the board: it builds the
//! `dfu-util`/`lsusb` command lines, pattern-matches their stdout for the
//! fixed success markers and polls for mode changes around detaches. The ST
//! bootrom and U-Boot both enumerate as `0483:df11`; U-Boot in fastboot mode
//! enumerates as `0483:0afb`.

use std::time::{Duration, Instant};

use dfuprog_core::{Error, Result};

use crate::transport::Transport;

/// Poll interval while waiting for a DFU or fastboot mode change.
const MODE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Poll interval while waiting for the device to enumerate at all.
const PRESENCE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One enumerated DFU device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuDevice {
    pub devnum: u32,
    pub serial: String,
}

/// Session facade over the external tools.
///
/// Caches discovered device state across calls: the bootrom device id, the
/// alternate-setting table and the OTP partition's symbolic name are each
/// fetched once per session.
pub struct DfuSession<T> {
    transport: T,
    serial: Option<String>,
    device_id: Option<u16>,
    otp_partition: Option<String>,
    alt_settings: Option<Vec<(u8, String)>>,
}

impl<T: Transport> DfuSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_serial(transport, None)
    }

    /// Session restricted to the device with the given serial number; the
    /// filter rides along on every dfu-util invocation.
    pub fn with_serial(transport: T, serial: Option<String>) -> Self {
        Self {
            transport,
            serial,
            device_id: None,
            otp_partition: None,
            alt_settings: None,
        }
    }

    /// Access the underlying transport, mostly for inspecting a scripted
    /// one in tests.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn dfu_command(&self, args: &str) -> String {
        let mut command = format!("dfu-util -d 483:df11 {args}");
        if let Some(serial) = &self.serial {
            command.push_str(" --serial ");
            command.push_str(serial);
        }
        command
    }

    /// Whether dfu-util is callable at all.
    pub fn tool_available(&mut self) -> bool {
        let out = match self.transport.run("dfu-util --version") {
            Ok(out) => out,
            Err(_) => return false,
        };
        if out.stdout.is_empty() || out.stdout.contains("not found") {
            log::error!("dfu-util is not installed or cannot be found");
            return false;
        }
        true
    }

    /// Download one file into the given alternate setting.
    pub fn flash_partition(&mut self, alt_index: u8, path: &str) -> Result<()> {
        log::info!("partition index : {alt_index}");
        log::info!("firmware path   : {path}");
        let command = self.dfu_command(&format!("-a {alt_index} -D {path}"));
        log::debug!("dfu-util command: {command}");
        let out = self.transport.run(&command)?;
        if out.stdout.contains("Download done.") {
            log::info!("phase id {alt_index} : download done");
            Ok(())
        } else {
            log::error!("phase id {alt_index} : download failed");
            Err(Error::WriteFailure)
        }
    }

    /// Upload one alternate setting's content into the given file.
    pub fn read_partition(&mut self, alt_index: u8, path: &str) -> Result<()> {
        let command = self.dfu_command(&format!("-a {alt_index} -U {path}"));
        log::debug!("dfu-util command: {command}");
        let out = self.transport.run(&command)?;
        if out.stdout.contains("Upload done.") {
            Ok(())
        } else {
            log::error!("upload from alternate setting {alt_index} failed");
            Err(Error::ReadFailure)
        }
    }

    /// Ask the device to detach and re-enumerate. Judged by exit status, the
    /// tool prints nothing useful here.
    pub fn detach(&mut self) -> Result<()> {
        let command = self.dfu_command("-a 0 -e");
        log::debug!("dfu-util command: {command}");
        let out = self.transport.run(&command)?;
        if out.success {
            log::info!("detach done");
            Ok(())
        } else {
            log::error!("detach failed");
            Err(Error::Other)
        }
    }

    fn poll<R>(
        &mut self,
        command: &str,
        timeout: Duration,
        interval: Duration,
        check: impl Fn(&str) -> Option<R>,
    ) -> Option<R> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= timeout {
                log::warn!("timeout [{} ms] reached", timeout.as_millis());
                return None;
            }
            let out = match self.transport.run(command) {
                Ok(out) => out,
                Err(_) => return None,
            };
            if let Some(found) = check(&out.stdout) {
                return Some(found);
            }
            std::thread::sleep(interval);
        }
    }

    /// Poll until U-Boot answers on the DFU interface. A hit also caches the
    /// OTP partition's symbolic name, which only U-Boot exposes.
    pub fn is_dfu_mode(&mut self, timeout: Duration) -> bool {
        let command = self.dfu_command("-l");
        match self.poll(&command, timeout, MODE_POLL_INTERVAL, find_otp_name) {
            Some(name) => {
                log::info!("U-Boot in DFU mode is running");
                self.otp_partition = Some(name);
                true
            }
            None => {
                log::warn!("U-Boot in DFU mode is not running");
                false
            }
        }
    }

    /// Poll until U-Boot answers in fastboot mode.
    pub fn is_fastboot_mode(&mut self, timeout: Duration) -> bool {
        let found = self
            .poll("lsusb -d 0483:0afb", timeout, MODE_POLL_INTERVAL, |out| {
                out.contains("ID 0483:0afb").then_some(())
            })
            .is_some();
        if found {
            log::info!("U-Boot in fastboot mode is running");
        } else {
            log::warn!("no U-Boot in fastboot mode is running");
        }
        found
    }

    /// Poll until any DFU-capable device enumerates.
    pub fn device_present(&mut self, timeout: Duration) -> bool {
        let command = self.dfu_command("-l");
        let found = self
            .poll(&command, timeout, PRESENCE_POLL_INTERVAL, |out| {
                out.contains("Found DFU: [0483:df11]").then_some(())
            })
            .is_some();
        if !found {
            match &self.serial {
                Some(serial) => log::error!("no STM32 DFU device [{serial}] is detected"),
                None => log::error!("no STM32 DFU device is detected"),
            }
        }
        found
    }

    /// Bootrom device id, read once from the verbose lsusb description.
    pub fn query_device_id(&mut self) -> Result<u16> {
        if let Some(id) = self.device_id {
            return Ok(id);
        }
        let out = self.transport.run("lsusb -d 0483:df11 -v")?;
        match parse_device_id(&out.stdout) {
            Some(id) => {
                log::info!("STM32 device id = 0x{id:03X}");
                self.device_id = Some(id);
                Ok(id)
            }
            None => {
                log::error!("failed to extract the STM32 device id");
                Err(Error::NoDevice)
            }
        }
    }

    /// Resolve a symbolic alternate-setting name to its index. The full
    /// table is enumerated once and cached.
    pub fn alternate_index(&mut self, name: &str) -> Result<u8> {
        if self.alt_settings.is_none() {
            let command = self.dfu_command("-l");
            let out = self.transport.run(&command)?;
            self.alt_settings = Some(parse_alt_settings(&out.stdout));
        }
        let table = self.alt_settings.as_deref().unwrap_or_default();
        match table.iter().find(|(_, n)| n == name) {
            Some((alt, _)) => {
                log::debug!("alternate name [{name}] found with index [{alt}]");
                Ok(*alt)
            }
            None => {
                log::error!("alternate name [{name}] does not exist");
                Err(Error::InterfaceNotSupported)
            }
        }
    }

    /// The OTP partition's quoted symbolic name, discovering it through a
    /// short DFU-mode check when not already cached.
    fn otp_name(&mut self) -> Result<String> {
        if self.otp_partition.is_none() && !self.is_dfu_mode(Duration::from_secs(1)) {
            return Err(Error::Other);
        }
        self.otp_partition.clone().ok_or(Error::Other)
    }

    /// Upload the OTP partition into `path`.
    pub fn read_otp(&mut self, path: &str) -> Result<()> {
        let name = self.otp_name()?;
        log::info!("OTP partition name = {name}");
        let command = self.dfu_command(&format!("-a {name} -U {path}"));
        log::debug!("dfu-util command: {command}");
        let out = self.transport.run(&command)?;
        if out.stdout.contains("Upload done.") {
            log::info!("OTP partition read done");
            Ok(())
        } else {
            log::error!("OTP partition read failed");
            Err(Error::ReadFailure)
        }
    }

    /// Download `path` into the OTP partition. A bad binary can brick the
    /// device, the caller is expected to know what it is fusing.
    pub fn write_otp(&mut self, path: &str) -> Result<()> {
        let name = self.otp_name()?;
        log::info!("OTP partition name = {name}");
        let command = self.dfu_command(&format!("-a {name} -D {path}"));
        log::debug!("dfu-util command: {command}");
        let out = self.transport.run(&command)?;
        if out.stdout.contains("Download done.") {
            log::info!("OTP partition write done");
            Ok(())
        } else {
            log::error!("OTP partition write failed");
            Err(Error::WriteFailure)
        }
    }

    /// Enumerate the connected DFU devices, deduplicated by serial number.
    pub fn list_devices(&mut self) -> Result<Vec<DfuDevice>> {
        let command = self.dfu_command("-l");
        let out = self.transport.run(&command)?;
        Ok(parse_device_list(&out.stdout))
    }
}

/// Extract the OTP partition's name from a DFU listing, quotes included, as
/// it gets passed back verbatim to `dfu-util -a`.
fn find_otp_name(output: &str) -> Option<String> {
    let start = output.find("name=\"@OTP")? + 5;
    let quoted = &output[start..];
    let end = quoted[1..].find('"')? + 1;
    Some(quoted[..=end].to_string())
}

/// Extract the bootrom device id from the verbose lsusb description, where
/// the interface string embeds it as `@Device ID /0x500...`.
fn parse_device_id(output: &str) -> Option<u16> {
    let pos = output.find("@Device ID /")?;
    let field = output[pos + 12..].chars().take(5).collect::<String>();
    let digits = field
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).ok()
}

/// Parse `alt=N ... name="@Name /..."` pairs out of a DFU listing. The name
/// is the part between `@` and the first `/`, trailing spaces dropped.
fn parse_alt_settings(output: &str) -> Vec<(u8, String)> {
    let mut table = Vec::new();
    for line in output.lines() {
        let Some(alt_pos) = line.find("alt=") else {
            continue;
        };
        let digits: String = line[alt_pos + 4..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let Ok(alt) = digits.parse::<u8>() else {
            continue;
        };
        let Some(name_pos) = line.find("name=\"@") else {
            continue;
        };
        let rest = &line[name_pos + 7..];
        let end = rest.find(['/', '"']).unwrap_or(rest.len());
        let name = rest[..end].trim_end().to_string();
        if !name.is_empty() {
            table.push((alt, name));
        }
    }
    table
}

/// Parse `devnum=N ... serial="HEX"` pairs out of a DFU listing. Serials are
/// upper-case hex; entries sharing a serial collapse into one device, and
/// the result is ordered by serial.
fn parse_device_list(output: &str) -> Vec<DfuDevice> {
    let mut devices: Vec<DfuDevice> = Vec::new();
    for line in output.lines() {
        let Some(pos) = line.find("devnum=") else {
            continue;
        };
        let digits: String = line[pos + 7..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let Ok(devnum) = digits.parse::<u32>() else {
            continue;
        };
        let Some(serial_pos) = line.find("serial=\"") else {
            continue;
        };
        let rest = &line[serial_pos + 8..];
        let Some(end) = rest.find('"') else {
            continue;
        };
        let serial = &rest[..end];
        if serial.is_empty() || !serial.chars().all(|c| matches!(c, '0'..='9' | 'A'..='F')) {
            continue;
        }
        match devices.iter_mut().find(|d| d.serial == serial) {
            Some(existing) => existing.devnum = devnum,
            None => devices.push(DfuDevice {
                devnum,
                serial: serial.to_string(),
            }),
        }
    }
    devices.sort_by(|a, b| a.serial.cmp(&b.serial));
    devices
}
