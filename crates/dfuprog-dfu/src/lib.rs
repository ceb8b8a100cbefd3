//! dfuprog-dfu - Device session over the dfu-util and lsusb tools
//!
//! The DFU wire protocol itself is delegated to the external `dfu-util`
//! binary (and `lsusb` for mode detection); this crate treats their stdout as
//! the wire protocol. The [`transport::Transport`] trait is the seam: the
//! real implementation shells out, tests script canned replies through
//! [`testing::ScriptedTransport`].

pub mod device;
pub mod testing;
pub mod transport;

pub use device::{DfuDevice, DfuSession};
pub use transport::{SystemTransport, ToolOutput, Transport};
