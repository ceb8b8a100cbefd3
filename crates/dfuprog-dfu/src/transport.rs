//! Subprocess transport for the external flashing tools

use std::process::Command;

use dfuprog_core::{Error, Result};

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Everything the tool printed on stdout.
    pub stdout: String,
    /// Whether the tool exited with status zero.
    pub success: bool,
}

/// The seam between the device session and the outside world: run one shell
/// command and hand back what it printed.
pub trait Transport {
    fn run(&mut self, command: &str) -> Result<ToolOutput>;
}

/// Transport that actually shells out.
#[derive(Debug, Default)]
pub struct SystemTransport;

impl Transport for SystemTransport {
    fn run(&mut self, command: &str) -> Result<ToolOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| {
                log::error!("failed to run {command:?}: {e}");
                Error::Other
            })?;
        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            success: output.status.success(),
        })
    }
}
