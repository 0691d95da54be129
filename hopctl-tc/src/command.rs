//! Utilities for [`std::process::Command`].

use std::{
    fmt, io,
    process::{self, Command},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status: {0}")]
    NonZero(Output),
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status, self.stderr.trim())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Renders a command the way it would be typed in a shell.
pub fn to_string(cmd: &Command) -> String {
    let mut cmd_str = cmd.get_program().to_string_lossy().to_string();
    for arg in cmd.get_args() {
        cmd_str.push(' ');
        cmd_str.push_str(&arg.to_string_lossy());
    }

    cmd_str
}

#[derive(Debug)]
pub struct Runner;

impl Runner {
    /// Runs the command to completion, capturing its output.
    pub fn run(cmd: &mut Command) -> Result<Output> {
        cmd.stderr(process::Stdio::piped()).stdout(process::Stdio::piped());

        tracing::debug!(cmd = %to_string(cmd), "running command");

        let output: Output = cmd.spawn()?.wait_with_output()?.into();

        if !output.status.success() {
            tracing::debug!(
                stderr = %output.stderr,
                status = ?output.status,
                cmd = %to_string(cmd),
                "command failed"
            );
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}
