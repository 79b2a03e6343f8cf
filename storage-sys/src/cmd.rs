// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::process::Command;

use crate::error::{Result, SysError};

/// Captured result of one external command, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Seam between the rbd client and process execution
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. A non-zero exit is not an error here;
    /// only failing to start the process is.
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutcome>;
}

/// Runs commands on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutcome> {
        let rendered = render(&program.to_string_lossy(), args);

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|error| SysError::SpawnFailed {
                command: rendered.clone(),
                reason: error.to_string(),
            })?;

        Ok(CommandOutcome {
            command: rendered,
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
