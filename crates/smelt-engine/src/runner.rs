//! The process-execution capability injected into the executor.

use std::path::Path;

use smelt_util::error::UtilError;
use smelt_util::process::CommandOutput;

/// Runs one tokenized command line to completion.
///
/// Implementations are shared by all workers, hence `Send + Sync`.
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `cwd` as working directory.
    ///
    /// # Errors
    /// Returns an error only if the command could not be started; a non-zero
    /// exit is reported through `CommandOutput::success`.
    fn run(&self, command: &[String], cwd: &Path) -> Result<CommandOutput, UtilError>;
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &[String], cwd: &Path) -> Result<CommandOutput, UtilError> {
        smelt_util::process::run_tokens(command, cwd)
    }
}
