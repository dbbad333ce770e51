//! Process execution helpers for Smelt.

use std::path::Path;
use std::process::Command;

use crate::error::UtilError;

/// What a finished rule command printed and how it exited.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// `None` when a signal terminated the process.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// A successful run with no output.
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed run with the given exit code and stderr text.
    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_owned(),
            success: false,
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }
}

/// Run `cmd` to completion, capturing both streams.
///
/// # Errors
/// Fails only when the process cannot be started. A command that runs and
/// exits non-zero yields `Ok` with `success == false`.
pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, UtilError> {
    let output = cmd.output().map_err(|source| UtilError::CommandExec {
        program: cmd.get_program().to_string_lossy().into_owned(),
        source,
    })?;
    let status = output.status;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: status.success(),
        exit_code: status.code(),
    })
}

/// Execute a tokenized command line (`program arg arg ...`) inside `cwd`.
///
/// # Errors
/// Returns an error if `tokens` is empty or the program cannot be spawned.
pub fn run_tokens(tokens: &[String], cwd: &Path) -> Result<CommandOutput, UtilError> {
    let (program, args) = tokens.split_first().ok_or(UtilError::EmptyCommand)?;
    run_command(Command::new(program).args(args).current_dir(cwd))
}

/// Render a tokenized command line for display, quoting tokens with spaces.
pub fn display_command(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| {
            if token.is_empty() || token.contains([' ', '\t', '"']) {
                format!("\"{}\"", token.replace('"', "\\\""))
            } else {
                token.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
