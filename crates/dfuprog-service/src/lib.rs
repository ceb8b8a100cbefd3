//! dfuprog-service - Flashing orchestration
//!
//! Sits between the CLI and the device session: loads the partition table,
//! runs the preflight checks, walks the family-specific boot chain and
//! drives either the fastboot install flow or the open-ended phase-polling
//! flow. The CLI never talks to the session directly.

pub mod service;

pub use service::FlashService;
