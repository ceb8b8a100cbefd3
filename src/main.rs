//! dfuprog - STM32 MPU provisioning over USB DFU
//!
//! Drives the external `dfu-util` and `lsusb` tools to bring an STM32 MPU
//! board from its bootrom DFU mode up to a running U-Boot, then installs or
//! flashes firmware partitions: U-Boot + fastboot chaining, the open-ended
//! DFU phase protocol, and OTP access.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, OtpCommands};
use dfuprog_dfu::{DfuSession, SystemTransport};
use dfuprog_service::FlashService;

fn main() {
    let cli = Cli::parse();

    // -v/-vv raise the default filter; RUST_LOG still wins when set.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_log_filter(cli.verbose)),
    )
    .init();

    let session = DfuSession::with_serial(SystemTransport, cli.serial.clone());
    let mut service = FlashService::new(session);

    let result = match cli.command {
        Commands::List => commands::run_list(&mut service),
        Commands::Install { table, fastboot } => {
            commands::run_install(&mut service, &table, fastboot)
        }
        Commands::Flash { table } => commands::run_flash(&mut service, &table),
        Commands::Otp(subcmd) => match subcmd {
            OtpCommands::Read { output } => commands::run_otp_read(&mut service, &output),
            OtpCommands::Write { input } => commands::run_otp_write(&mut service, &input),
        },
        Commands::Phase => commands::run_phase(&mut service),
    };

    if let Err(e) = result {
        log::error!("{e} (code {})", e.code());
        std::process::exit(1);
    }
}

fn default_log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_default_filter() {
        assert_eq!(default_log_filter(0), "info");
        assert_eq!(default_log_filter(1), "debug");
        assert_eq!(default_log_filter(2), "trace");
        assert_eq!(default_log_filter(5), "trace");
    }
}
