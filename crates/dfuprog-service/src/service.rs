//! The flashing state machine
//!
//! Every public operation follows the same shape: load and validate the
//! partition table, run the preflight checks, then drive the device through
//! its family's boot chain and the mode-specific tail (fastboot
//! confirmation, DFU confirmation or the open-ended phase loop). Any failing
//! step aborts the whole run.

use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use dfuprog_core::family::DeviceFamily;
use dfuprog_core::partition::{PartitionTable, TableMode};
use dfuprog_core::phase::{FlashPhase, PHASE_END, PHASE_FLASHLAYOUT, PHASE_RESET};
use dfuprog_core::{Error, Result};
use dfuprog_dfu::{DfuDevice, DfuSession, Transport};

/// How long a quick mode/presence probe may take.
const DETECT_TIMEOUT: Duration = Duration::from_secs(1);
/// How long the device may take to re-enumerate after a detach.
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long U-Boot may take to come up in DFU mode after the boot chain.
const DFU_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
/// How long U-Boot may take to come up in fastboot mode.
const FASTBOOT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Symbolic name of the phase-status partition.
const VIRTUAL_PARTITION: &str = "virtual";
/// Phases above this value never request an intermediate detach, so no
/// follow-up query is needed after writing them.
const PHASE_DETACH_MAX: u8 = 5;

/// Orchestrator over one device session.
pub struct FlashService<T> {
    session: DfuSession<T>,
}

impl<T: Transport> FlashService<T> {
    pub fn new(session: DfuSession<T>) -> Self {
        Self { session }
    }

    /// Access the underlying session, mostly for inspecting a scripted
    /// transport in tests.
    pub fn session(&self) -> &DfuSession<T> {
        &self.session
    }

    /// Install flow: flash the boot chain, push the U-Boot script and
    /// optionally confirm fastboot mode comes up.
    pub fn install(&mut self, table_path: &Path, start_fastboot: bool) -> Result<()> {
        // The script image only exists to chain into fastboot; a plain
        // DFU-mode install never transmits it. Utility tables have no
        // script-eligible partitions at all, so asking for fastboot with one
        // fails right here with NoFile.
        let mode = if start_fastboot {
            TableMode::Fastboot
        } else {
            TableMode::Flashlayout
        };
        let table = PartitionTable::from_file(table_path, mode)?;
        let utility = table.is_utility();

        log::info!("-----------------------------------------");
        log::info!("TSV DFU downloading...");
        log::info!("  TSV path           : {}", table_path.display());
        log::info!("  Partitions number  : {}", table.records().len());
        log::info!("  Boot image size    : {} Bytes", table.image().len());
        log::info!(
            "  Start fastboot     : {}",
            if start_fastboot { "Yes" } else { "No" }
        );
        log::info!(
            "  Boot application   : {}",
            if utility { "utility firmware" } else { "U-Boot" }
        );
        log::info!("-----------------------------------------");

        table.validate(utility)?;

        if !self.session.tool_available() {
            return Err(Error::Other);
        }

        if self.session.is_fastboot_mode(DETECT_TIMEOUT) {
            if start_fastboot {
                log::info!("no flashing service will be performed");
                return Ok(());
            }
            log::error!(
                "U-Boot in fastboot mode is already running, cannot launch U-Boot in DFU mode"
            );
            log::error!("please reset the device and try again");
            return Err(Error::NotConnected);
        }

        if !self.session.device_present(DETECT_TIMEOUT) {
            return Err(Error::ConnectionFailure);
        }
        let family = self.device_family()?;

        let dfu_running = self.session.is_dfu_mode(DETECT_TIMEOUT);
        if !start_fastboot && dfu_running {
            log::info!("no flashing service will be performed");
            return Ok(());
        }
        if !dfu_running {
            self.flash_boot_partitions(family, &table, utility)?;
        }

        if start_fastboot {
            if !self.session.is_dfu_mode(DFU_CONFIRM_TIMEOUT) {
                return Err(Error::ConnectionFailure);
            }
            self.transmit_image(table.image())?;
            self.session.detach()?;
            if self.session.is_fastboot_mode(FASTBOOT_CONFIRM_TIMEOUT) {
                Ok(())
            } else {
                log::error!("failed to start fastboot");
                Err(Error::ConnectionFailure)
            }
        } else if self.session.is_dfu_mode(DFU_CONFIRM_TIMEOUT) {
            Ok(())
        } else {
            log::error!("failed to start U-Boot in DFU mode");
            Err(Error::ConnectionFailure)
        }
    }

    /// Open-ended flow: boot the device into DFU mode, then flash whatever
    /// the phase-status partition asks for until it reports completion.
    pub fn flash(&mut self, table_path: &Path) -> Result<()> {
        let table = PartitionTable::from_file(table_path, TableMode::Flashlayout)?;
        let utility = table.is_utility();

        log::info!("-----------------------------------------");
        log::info!("TSV DFU flashing...");
        log::info!("  TSV path          : {}", table_path.display());
        log::info!("  Partitions number : {}", table.records().len());
        log::info!("  Flashlayout size  : {} Bytes", table.image().len());
        log::info!("-----------------------------------------");

        table.validate(utility)?;

        if !self.session.tool_available() {
            return Err(Error::Other);
        }
        if self.session.is_fastboot_mode(DETECT_TIMEOUT) {
            log::error!(
                "U-Boot in fastboot mode is already running, cannot launch U-Boot in DFU mode"
            );
            return Err(Error::NotConnected);
        }
        if !self.session.device_present(DETECT_TIMEOUT) {
            return Err(Error::ConnectionFailure);
        }
        let family = self.device_family()?;

        if !self.session.is_dfu_mode(DETECT_TIMEOUT) {
            self.flash_boot_partitions(family, &table, utility)?;
            if !self.session.is_dfu_mode(DFU_CONFIRM_TIMEOUT) {
                return Err(Error::ConnectionFailure);
            }
        }

        self.run_phase_loop(&table)
    }

    /// Read the phase-status partition once and report it.
    pub fn query_phase(&mut self) -> Result<FlashPhase> {
        let alt = self.session.alternate_index(VIRTUAL_PARTITION)?;
        let path = std::env::temp_dir().join(format!("dfuprog-phase-{}.bin", std::process::id()));
        // Delete first so the tool has to recreate the file, a stale record
        // must never be parsed.
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                log::error!("cannot remove {}: {e}", path.display());
                Error::NoFile
            })?;
        }
        let quoted = format!("\"{}\"", path.display());
        self.session.read_partition(alt, &quoted)?;
        let data = std::fs::read(&path).map_err(|e| {
            log::error!("cannot read {}: {e}", path.display());
            Error::NoFile
        })?;
        let parsed = FlashPhase::parse(&data);
        if std::fs::remove_file(&path).is_err() {
            log::error!("failed to remove the scratch file {}", path.display());
            return Err(Error::NoMemory);
        }
        let phase = parsed?;
        log::info!("phase id = 0x{:02X}", phase.phase);
        Ok(phase)
    }

    /// Upload the OTP partition into `output_path` (quoted), overwriting any
    /// pre-existing file.
    pub fn read_otp(&mut self, output_path: &str) -> Result<()> {
        log::info!("-----------------------------------------");
        log::info!("DFU reading...");
        log::info!("  OTP partition    : 0xF2");
        log::info!("  Output file path : {output_path}");
        log::info!("-----------------------------------------");

        self.otp_preflight()?;

        let plain = output_path.trim_matches('"');
        if Path::new(plain).exists() {
            log::warn!("the file {plain} already exists, it will be overwritten");
            if let Err(e) = std::fs::remove_file(plain) {
                log::error!("error deleting file {plain}: {e}");
                return Err(Error::NoFile);
            }
        }
        self.session.read_otp(output_path)
    }

    /// Fuse the OTP partition from `input_path` (quoted).
    pub fn write_otp(&mut self, input_path: &str) -> Result<()> {
        log::info!("-----------------------------------------");
        log::info!("DFU downloading...");
        log::info!("  OTP partition   : 0xF2");
        log::info!("  Input file path : {input_path}");
        log::info!("-----------------------------------------");

        self.otp_preflight()?;
        self.session.write_otp(input_path)
    }

    /// Enumerate connected DFU devices.
    pub fn list_devices(&mut self) -> Result<Vec<DfuDevice>> {
        self.session.list_devices()
    }

    fn otp_preflight(&mut self) -> Result<()> {
        if !self.session.device_present(DETECT_TIMEOUT) {
            return Err(Error::ConnectionFailure);
        }
        self.session.query_device_id()?;
        if !self.session.is_dfu_mode(DETECT_TIMEOUT) {
            return Err(Error::ConnectionFailure);
        }
        Ok(())
    }

    fn device_family(&mut self) -> Result<DeviceFamily> {
        let id = self.session.query_device_id()?;
        match DeviceFamily::from_device_id(id) {
            Some(family) => {
                log::info!("device family: {family}");
                Ok(family)
            }
            None => {
                log::error!("unsupported device (id 0x{id:03X})");
                Err(Error::NotSupported)
            }
        }
    }

    /// Walk the family's boot chain: flash each stage, detach where the
    /// chain says so and wait for the re-enumeration before the next stage.
    fn flash_boot_partitions(
        &mut self,
        family: DeviceFamily,
        table: &PartitionTable,
        utility: bool,
    ) -> Result<()> {
        let steps = family.boot_steps(utility);
        for (idx, step) in steps.iter().enumerate() {
            let record = table.records().get(step.partition).ok_or_else(|| {
                log::error!(
                    "partition table is missing the boot stage {} entry",
                    step.partition
                );
                Error::WrongParameter
            })?;
            self.session
                .flash_partition(step.alt_index, &record.binary)
                .map_err(|e| {
                    log::error!("failed to flash partition: {}", record.binary);
                    e
                })?;
            if step.detach_after {
                self.session.detach()?;
                if idx + 1 < steps.len() && !self.session.device_present(RECONNECT_TIMEOUT) {
                    return Err(Error::ConnectionFailure);
                }
            }
        }
        Ok(())
    }

    /// Write the boot image through a scratch file into alternate setting 0.
    /// The scratch file is removed even when the download fails; a removal
    /// failure outranks the download result.
    fn transmit_image(&mut self, image: &[u8]) -> Result<()> {
        log::info!("preparing U-Boot script/flashlayout...");
        let mut file = tempfile::NamedTempFile::new().map_err(|e| {
            log::error!("could not create a scratch file: {e}");
            Error::NoFile
        })?;
        file.write_all(image).map_err(|e| {
            log::error!("could not write the scratch file: {e}");
            Error::NotSupported
        })?;
        let quoted = format!("\"{}\"", file.path().display());
        let result = self.session.flash_partition(0, &quoted);
        if file.close().is_err() {
            log::error!("failed to remove the scratch file");
            return Err(Error::NoMemory);
        }
        result
    }

    fn run_phase_loop(&mut self, table: &PartitionTable) -> Result<()> {
        let mut pending: Option<FlashPhase> = None;
        loop {
            let status = match pending.take() {
                Some(status) => status,
                None => self.query_phase()?,
            };
            match status.phase {
                PHASE_END => {
                    log::info!("flashing sequence complete");
                    return Ok(());
                }
                PHASE_RESET => {
                    log::info!("device is rebooting");
                    return Ok(());
                }
                PHASE_FLASHLAYOUT => {
                    self.transmit_image(table.image())?;
                    self.detach_and_reconnect()?;
                }
                phase => {
                    let record = table.find_phase(phase).ok_or_else(|| {
                        log::error!("phase 0x{phase:02X} is not described by the partition table");
                        Error::WrongParameter
                    })?;
                    let alt = self.session.alternate_index(&record.name)?;
                    self.session.flash_partition(alt, &record.binary)?;
                    // Early phases may require a detach before the next
                    // stage; the follow-up reading is kept for the next
                    // iteration instead of being queried twice.
                    if phase <= PHASE_DETACH_MAX {
                        let follow = self.query_phase()?;
                        if follow.detach_requested {
                            self.detach_and_reconnect()?;
                        } else {
                            pending = Some(follow);
                        }
                    }
                }
            }
        }
    }

    fn detach_and_reconnect(&mut self) -> Result<()> {
        self.session.detach()?;
        if !self.session.device_present(RECONNECT_TIMEOUT) {
            return Err(Error::ConnectionFailure);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfuprog_dfu::testing::{CannedReply, ScriptedTransport};
    use std::io::Write as _;
    use std::path::PathBuf;

    const BOOTROM_LISTING: &str = "\
dfu-util 0.11\n\
Found DFU: [0483:df11] ver=0200, devnum=18, cfg=1, intf=0, path=\"1-1\", alt=3, name=\"@SSBL /0x03/1*1Me\", serial=\"004500233438510534383330\"\n\
Found DFU: [0483:df11] ver=0200, devnum=18, cfg=1, intf=0, path=\"1-1\", alt=1, name=\"@FSBL /0x01/1*16Ke\", serial=\"004500233438510534383330\"\n";

    const UBOOT_LISTING: &str = "\
dfu-util 0.11\n\
Found DFU: [0483:df11] ver=0200, devnum=21, cfg=1, intf=0, path=\"1-1\", alt=5, name=\"@OTP /0xF2/1024*8\", serial=\"004500233438510534383330\"\n\
Found DFU: [0483:df11] ver=0200, devnum=21, cfg=1, intf=0, path=\"1-1\", alt=4, name=\"@virtual /0xF1/512*4\", serial=\"004500233438510534383330\"\n\
Found DFU: [0483:df11] ver=0200, devnum=21, cfg=1, intf=0, path=\"1-1\", alt=2, name=\"@fip-a /0x05/1*4Me\", serial=\"004500233438510534383330\"\n\
Found DFU: [0483:df11] ver=0200, devnum=21, cfg=1, intf=0, path=\"1-1\", alt=1, name=\"@fsbl /0x01/1*512Ke\", serial=\"004500233438510534383330\"\n\
Found DFU: [0483:df11] ver=0200, devnum=21, cfg=1, intf=0, path=\"1-1\", alt=0, name=\"@FlashLayout /0x00/1*256\", serial=\"004500233438510534383330\"\n";

    const DEVICE_ID_MP15: &str = "      iInterface    5 @Device ID /0x500, @Revision ID /0x2000\n";

    // The phase scratch file is keyed by process id, so tests touching it
    // must not overlap.
    static SCRATCH_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn fixture_table(dir: &tempfile::TempDir, rows: &str) -> PathBuf {
        for name in ["fsbl.stm32", "fip.bin"] {
            std::fs::write(dir.path().join(name), b"firmware").unwrap();
        }
        let path = dir.path().join("layout.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"#Opt\tId\tName\tType\tDevice\tOffset\tBinary\n")
            .unwrap();
        f.write_all(rows.as_bytes()).unwrap();
        path
    }

    fn two_stage_rows() -> &'static str {
        "P\t0x01\tfsbl\tBinary\tmmc0\tboot1\tfsbl.stm32\n\
         P\t0x03\tfip-a\tFIP\tmmc0\t0x00084400\tfip.bin\n"
    }

    #[test]
    fn install_flashes_boot_chain_then_script() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixture_table(&dir, two_stage_rows());

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule(
                "lsusb -d 0483:0afb",
                vec![
                    // Not in fastboot mode during preflight, up after detach.
                    CannedReply::error(),
                    CannedReply::ok("Bus 001 Device 023: ID 0483:0afb STMicroelectronics\n"),
                ],
            )
            .rule(
                " -l",
                vec![
                    // Present in bootrom DFU, not yet running U-Boot, then
                    // running U-Boot after the boot chain.
                    CannedReply::ok(BOOTROM_LISTING),
                    CannedReply::error(),
                    CannedReply::ok(UBOOT_LISTING),
                ],
            )
            .rule(" -D ", vec![CannedReply::ok("Download done.\n")])
            .rule(" -e", vec![CannedReply::ok("")]);

        let mut service = FlashService::new(DfuSession::new(transport));
        service.install(&table, true).unwrap();

        let commands = service.session().transport().commands();
        let downloads: Vec<&String> =
            commands.iter().filter(|c| c.contains(" -D ")).collect();
        assert_eq!(downloads.len(), 3);
        // MP15 chain: fsbl on alt 1, fip on alt 3, then the script on alt 0.
        assert!(downloads[0].contains("-a 1 -D "));
        assert!(downloads[0].contains("fsbl.stm32"));
        assert!(downloads[1].contains("-a 3 -D "));
        assert!(downloads[1].contains("fip.bin"));
        assert!(downloads[2].contains("-a 0 -D "));

        // Exactly one detach between the boot chain and the script, one
        // after the script.
        let detach_positions: Vec<usize> = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.ends_with(" -a 0 -e"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(detach_positions.len(), 2);
        let second_download = commands.iter().position(|c| c == downloads[1]).unwrap();
        let script_download = commands.iter().position(|c| c == downloads[2]).unwrap();
        assert!(second_download < detach_positions[0]);
        assert!(detach_positions[0] < script_download);
        assert!(script_download < detach_positions[1]);
    }

    #[test]
    fn install_is_a_noop_when_fastboot_already_runs() {
        let dir = tempfile::tempdir().unwrap();
        let table = fixture_table(&dir, two_stage_rows());

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule(
                "lsusb -d 0483:0afb",
                vec![CannedReply::ok("ID 0483:0afb STMicroelectronics\n")],
            );
        let mut service = FlashService::new(DfuSession::new(transport));
        service.install(&table, true).unwrap();
        let commands = service.session().transport().commands();
        assert!(commands.iter().all(|c| !c.contains(" -D ")));
    }

    #[test]
    fn utility_tables_cannot_chain_into_fastboot() {
        // A utility table has no script-eligible partitions, so requesting
        // fastboot fails at image construction before touching the device.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.stm32"), b"firmware").unwrap();
        let path = dir.path().join("layout.tsv");
        std::fs::write(&path, "P\t0x01\tfsbl\tBinary\tnone\tnone\tutil.stm32\n").unwrap();

        let mut service = FlashService::new(DfuSession::new(ScriptedTransport::new()));
        assert_eq!(service.install(&path, true).unwrap_err(), Error::NoFile);
        assert!(service.session().transport().commands().is_empty());
    }

    #[test]
    fn utility_install_runs_a_single_boot_stage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.stm32"), b"firmware").unwrap();
        let path = dir.path().join("layout.tsv");
        std::fs::write(&path, "P\t0x01\tfsbl\tBinary\tnone\tnone\tutil.stm32\n").unwrap();

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule("lsusb -d 0483:0afb", vec![CannedReply::error()])
            .rule(
                " -l",
                vec![
                    CannedReply::ok(BOOTROM_LISTING),
                    CannedReply::error(),
                    CannedReply::ok(UBOOT_LISTING),
                ],
            )
            .rule(" -D ", vec![CannedReply::ok("Download done.\n")]);
        let mut service = FlashService::new(DfuSession::new(transport));
        service.install(&path, false).unwrap();

        let commands = service.session().transport().commands();
        // MP15 utility chain: one write to alt 1, no detach, no script.
        let downloads: Vec<&String> =
            commands.iter().filter(|c| c.contains(" -D ")).collect();
        assert_eq!(downloads.len(), 1);
        assert!(downloads[0].contains("-a 1 -D "));
        assert!(commands.iter().all(|c| !c.ends_with(" -a 0 -e")));
    }

    #[test]
    fn phase_loop_follows_the_device_requests() {
        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let table = fixture_table(&dir, two_stage_rows());

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule("lsusb -d 0483:0afb", vec![CannedReply::error()])
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(
                " -U ",
                vec![
                    CannedReply::upload(&[0x01, 0, 0, 0, 0]),
                    CannedReply::upload(&[0x03, 0, 0, 0, 0]),
                    CannedReply::upload(&[0x00, 0, 0, 0, 0, 0]),
                    CannedReply::upload(&[PHASE_END, 0, 0, 0, 0]),
                ],
            )
            .rule(" -D ", vec![CannedReply::ok("Download done.\n")])
            .rule(" -e", vec![CannedReply::ok("")]);

        let mut service = FlashService::new(DfuSession::new(transport));
        service.flash(&table).unwrap();

        let commands = service.session().transport().commands();
        let downloads: Vec<&String> =
            commands.iter().filter(|c| c.contains(" -D ")).collect();
        assert_eq!(downloads.len(), 3);
        // Phase 1 resolves fsbl to alt 1, phase 3 resolves fip-a to alt 2,
        // phase 0 sends the flashlayout to alt 0.
        assert!(downloads[0].contains("-a 1 -D "));
        assert!(downloads[0].contains("fsbl.stm32"));
        assert!(downloads[1].contains("-a 2 -D "));
        assert!(downloads[1].contains("fip.bin"));
        assert!(downloads[2].contains("-a 0 -D "));

        // Four phase readings, one detach (after the flashlayout only).
        assert_eq!(commands.iter().filter(|c| c.contains(" -U ")).count(), 4);
        assert_eq!(
            commands.iter().filter(|c| c.ends_with(" -a 0 -e")).count(),
            1
        );
    }

    #[test]
    fn phase_loop_rejects_unknown_phases() {
        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let table = fixture_table(&dir, two_stage_rows());

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule("lsusb -d 0483:0afb", vec![CannedReply::error()])
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(" -U ", vec![CannedReply::upload(&[0x42, 0, 0, 0, 0])]);

        let mut service = FlashService::new(DfuSession::new(transport));
        assert_eq!(service.flash(&table).unwrap_err(), Error::WrongParameter);
    }

    #[test]
    fn query_phase_decodes_the_virtual_partition() {
        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let transport = ScriptedTransport::new()
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(" -U ", vec![CannedReply::upload(&[0x03, 0x00, 0x00, 0xE0, 0xC2])]);
        let mut service = FlashService::new(DfuSession::new(transport));
        let phase = service.query_phase().unwrap();
        assert_eq!(phase.phase, 0x03);
        assert_eq!(phase.load_address, 0xC2E0_0000);
        // The scratch file is removed after parsing.
        let scratch =
            std::env::temp_dir().join(format!("dfuprog-phase-{}.bin", std::process::id()));
        assert!(!scratch.exists());
        // The virtual partition resolved to alt 4.
        let commands = service.session().transport().commands();
        assert!(commands.iter().any(|c| c.contains("-a 4 -U ")));
    }

    #[test]
    fn otp_read_overwrites_an_existing_dump() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("otp.bin");
        std::fs::write(&output, b"stale").unwrap();

        let transport = ScriptedTransport::new()
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(" -U ", vec![CannedReply::upload(&[0xAA, 0xBB])]);
        let mut service = FlashService::new(DfuSession::new(transport));
        let quoted = format!("\"{}\"", output.display());
        service.read_otp(&quoted).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), vec![0xAA, 0xBB]);

        let last = service.session().transport().commands().last().unwrap().clone();
        assert!(last.contains("-a \"@OTP /0xF2/1024*8\" -U "));
    }

    #[test]
    fn otp_read_that_cannot_clear_the_stale_dump_is_no_file() {
        // A non-empty directory in the way makes the removal itself fail.
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("otp.bin");
        std::fs::create_dir(&output).unwrap();
        std::fs::write(output.join("keep"), b"x").unwrap();

        let transport = ScriptedTransport::new()
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(" -U ", vec![CannedReply::upload(&[0xAA, 0xBB])]);
        let mut service = FlashService::new(DfuSession::new(transport));
        let quoted = format!("\"{}\"", output.display());
        assert_eq!(service.read_otp(&quoted).unwrap_err(), Error::NoFile);

        // The upload never happens.
        let commands = service.session().transport().commands();
        assert!(commands.iter().all(|c| !c.contains(" -U ")));
    }

    #[test]
    fn otp_write_targets_the_discovered_partition() {
        let transport = ScriptedTransport::new()
            .rule("lsusb -d 0483:df11 -v", vec![CannedReply::ok(DEVICE_ID_MP15)])
            .rule(" -l", vec![CannedReply::ok(UBOOT_LISTING)])
            .rule(" -D ", vec![CannedReply::ok("Download done.\n")]);
        let mut service = FlashService::new(DfuSession::new(transport));
        service.write_otp("\"/tmp/fuses.bin\"").unwrap();
        let last = service.session().transport().commands().last().unwrap().clone();
        assert_eq!(
            last,
            "dfu-util -d 483:df11 -a \"@OTP /0xF2/1024*8\" -D \"/tmp/fuses.bin\""
        );
    }

    #[test]
    fn otp_preflight_requires_a_device() {
        let transport = ScriptedTransport::new().rule(" -l", vec![CannedReply::error()]);
        let mut service = FlashService::new(DfuSession::new(transport));
        assert_eq!(
            service.read_otp("\"/tmp/otp.bin\"").unwrap_err(),
            Error::ConnectionFailure
        );
    }

    #[test]
    fn missing_boot_stage_entry_is_a_parameter_error() {
        // MP25 needs three boot stages but the table only carries two.
        let dir = tempfile::tempdir().unwrap();
        let table = fixture_table(&dir, two_stage_rows());

        let transport = ScriptedTransport::new()
            .rule("--version", vec![CannedReply::ok("dfu-util 0.11\n")])
            .rule(
                "lsusb -d 0483:df11 -v",
                vec![CannedReply::ok(
                    "iInterface 5 @Device ID /0x505, @Revision ID /0x1003\n",
                )],
            )
            .rule("lsusb -d 0483:0afb", vec![CannedReply::error()])
            .rule(
                " -l",
                vec![
                    // Present, not in DFU mode, then answering the reconnect
                    // waits between boot stages.
                    CannedReply::ok(BOOTROM_LISTING),
                    CannedReply::error(),
                    CannedReply::ok(BOOTROM_LISTING),
                ],
            )
            .rule(" -D ", vec![CannedReply::ok("Download done.\n")])
            .rule(" -e", vec![CannedReply::ok("")]);
        let mut service = FlashService::new(DfuSession::new(transport));
        assert_eq!(service.flash(&table).unwrap_err(), Error::WrongParameter);
    }
}
