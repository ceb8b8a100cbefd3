//! Error taxonomy shared by every crate in the workspace
//!
//! Each variant carries a stable signed code so the CLI boundary can expose
//! the same numeric contract as the historical tool: zero means success and
//! every failure maps to one negative code.

/// Workspace-wide error type.
///
/// Propagation is fail-fast and non-recovering: the first failing step aborts
/// the whole orchestration call. Only the presence/mode polling loops retry
/// internally, and those surface a plain boolean instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Device not connected
    #[error("device not connected")]
    NotConnected,
    /// Device not found
    #[error("device not found")]
    NoDevice,
    /// Device connection error
    #[error("device connection error")]
    ConnectionFailure,
    /// No such file
    #[error("no such file")]
    NoFile,
    /// Operation not supported on this device
    #[error("operation not supported")]
    NotSupported,
    /// Interface not supported by the device
    #[error("interface not supported")]
    InterfaceNotSupported,
    /// Insufficient memory
    #[error("insufficient memory")]
    NoMemory,
    /// Wrong parameters
    #[error("wrong parameters")]
    WrongParameter,
    /// Memory read failure
    #[error("memory read failure")]
    ReadFailure,
    /// Memory write failure
    #[error("memory write failure")]
    WriteFailure,
    /// File format not supported for this kind of device
    #[error("file format not supported")]
    UnsupportedFileFormat,
    /// Other error
    #[error("unknown error")]
    Other,
}

impl Error {
    /// Stable signed code for the CLI boundary (zero is reserved for success).
    pub fn code(&self) -> i32 {
        match self {
            Error::NotConnected => -1,
            Error::NoDevice => -2,
            Error::ConnectionFailure => -3,
            Error::NoFile => -4,
            Error::NotSupported => -5,
            Error::InterfaceNotSupported => -6,
            Error::NoMemory => -7,
            Error::WrongParameter => -8,
            Error::ReadFailure => -9,
            Error::WriteFailure => -10,
            Error::UnsupportedFileFormat => -11,
            Error::Other => -99,
        }
    }
}

/// Result type alias using the workspace error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::NotConnected.code(), -1);
        assert_eq!(Error::UnsupportedFileFormat.code(), -11);
        assert_eq!(Error::Other.code(), -99);
    }
}
