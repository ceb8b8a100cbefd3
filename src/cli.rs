//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Require the partition table argument to carry the .tsv extension
fn parse_tsv_path(s: &str) -> Result<PathBuf, String> {
    if s.to_ascii_lowercase().ends_with(".tsv") {
        Ok(PathBuf::from(s))
    } else {
        Err(format!("wrong file extension for {s:?}, expected .tsv"))
    }
}

#[derive(Parser)]
#[command(name = "dfuprog")]
#[command(author, version, about = "STM32 MPU provisioning over USB DFU", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Select the USB device by serial number
    #[arg(long, global = true)]
    pub serial: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the connected STM32 DFU devices
    List,

    /// Prepare the device, install U-Boot and optionally start fastboot
    Install {
        /// Partition table file (.tsv)
        #[arg(value_parser = parse_tsv_path)]
        table: PathBuf,

        /// Launch fastboot once U-Boot is installed
        #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
        fastboot: bool,
    },

    /// Flash the partition list through the DFU phase protocol
    Flash {
        /// Partition table file (.tsv)
        #[arg(value_parser = parse_tsv_path)]
        table: PathBuf,
    },

    /// Read and write the OTP partition
    #[command(subcommand)]
    Otp(OtpCommands),

    /// Get and display the running phase id
    Phase,
}

#[derive(Subcommand)]
pub enum OtpCommands {
    /// Read the OTP partition into a file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a binary file into the OTP partition
    Write {
        /// Input binary path
        #[arg(short, long)]
        input: PathBuf,
    },
}
