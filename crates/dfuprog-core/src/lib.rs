//! dfuprog-core - Partition tables and boot images for STM32 DFU provisioning
//!
//! This crate holds the device-independent half of the tool: the tab-separated
//! partition table parser, the two boot image builders (U-Boot legacy script
//! and flashlayout), the per-family boot sequences and the phase-status record
//! the device reports during an open-ended flashing session.
//!
//! # Example
//!
//! ```ignore
//! use dfuprog_core::partition::{PartitionTable, TableMode};
//!
//! let table = PartitionTable::from_file("flashlayout.tsv", TableMode::Fastboot)?;
//! table.validate(table.is_utility())?;
//! std::fs::write("script.img", table.image())?;
//! ```

pub mod error;
pub mod family;
pub mod image;
pub mod partition;
pub mod phase;

pub use error::{Error, Result};
