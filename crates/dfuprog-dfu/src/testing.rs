//! Scripted transport for tests
//!
//! Shipped as a regular module so downstream crates can drive a whole
//! session against canned tool output. Replies are grouped by a substring
//! rule matched against the command line; within a rule they play in order,
//! and the last reply repeats for any further calls, which keeps polling
//! loops with timing-dependent iteration counts deterministic.

use std::collections::VecDeque;

use dfuprog_core::{Error, Result};

use crate::transport::{ToolOutput, Transport};

/// One canned tool invocation result.
#[derive(Debug, Clone)]
pub struct CannedReply {
    stdout: String,
    success: bool,
    upload: Option<Vec<u8>>,
    error: bool,
}

impl CannedReply {
    /// Successful exit with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            success: true,
            upload: None,
            error: false,
        }
    }

    /// Non-zero exit with the given stdout.
    pub fn failure(stdout: &str) -> Self {
        Self {
            success: false,
            ..Self::ok(stdout)
        }
    }

    /// Transport-level error, as if the tool could not be spawned.
    pub fn error() -> Self {
        Self {
            error: true,
            ..Self::ok("")
        }
    }

    /// Successful upload: `bytes` land in the file named after `-U` on the
    /// command line, and stdout reports the upload marker.
    pub fn upload(bytes: &[u8]) -> Self {
        Self {
            upload: Some(bytes.to_vec()),
            ..Self::ok("Upload done.\n")
        }
    }
}

struct Rule {
    pattern: String,
    replies: VecDeque<CannedReply>,
}

/// Transport answering from a script instead of running anything.
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Vec<Rule>,
    commands: Vec<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule: commands containing `pattern` consume `replies` in order.
    pub fn rule(mut self, pattern: &str, replies: Vec<CannedReply>) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Every command line run so far, in order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

/// Pull the path following `-U` out of a command line, with or without
/// surrounding quotes.
fn upload_path(command: &str) -> Option<String> {
    let pos = command.find(" -U ")?;
    let rest = &command[pos + 4..];
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        Some(stripped[..end].to_string())
    } else {
        Some(
            rest.split_whitespace()
                .next()
                .unwrap_or(rest)
                .to_string(),
        )
    }
}

impl Transport for ScriptedTransport {
    fn run(&mut self, command: &str) -> Result<ToolOutput> {
        log::debug!("scripted command: {command}");
        self.commands.push(command.to_string());
        let rule = self
            .rules
            .iter_mut()
            .find(|r| command.contains(&r.pattern))
            .ok_or(Error::Other)?;
        let reply = if rule.replies.len() > 1 {
            match rule.replies.pop_front() {
                Some(reply) => reply,
                None => return Err(Error::Other),
            }
        } else {
            match rule.replies.front() {
                Some(reply) => reply.clone(),
                None => return Err(Error::Other),
            }
        };
        if reply.error {
            return Err(Error::Other);
        }
        if let Some(bytes) = &reply.upload {
            let path = upload_path(command).ok_or(Error::Other)?;
            std::fs::write(&path, bytes).map_err(|_| Error::Other)?;
        }
        Ok(ToolOutput {
            stdout: reply.stdout,
            success: reply.success,
        })
    }
}
