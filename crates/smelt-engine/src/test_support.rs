//! Fixtures shared by the engine's unit tests.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use smelt_util::error::UtilError;
use smelt_util::process::CommandOutput;

use crate::runner::CommandRunner;

/// Set the modification time of an existing file.
pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

/// Create `path` (and its parents) with some content and the given mtime.
pub fn write_at(path: &Path, time: SystemTime) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, path.display().to_string()).unwrap();
    set_mtime(path, time);
}

/// A command runner that never spawns processes.
///
/// * `touch <paths...>` creates each path under the working directory.
/// * `write <path> <content>` writes a file (used to emit dependency records).
/// * `fail [code]` exits with `code` (default 1).
/// * anything else succeeds without side effects.
///
/// Every invocation is recorded in order.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// First token after the program name of each recorded call.
    pub fn first_args(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.get(1).cloned().unwrap_or_default())
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &[String], cwd: &Path) -> Result<CommandOutput, UtilError> {
        self.calls.lock().unwrap().push(command.to_vec());
        let Some((program, args)) = command.split_first() else {
            return Err(UtilError::EmptyCommand);
        };
        match program.as_str() {
            "touch" => {
                for arg in args {
                    let path = cwd.join(arg);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(&path, arg).unwrap();
                }
                Ok(CommandOutput::ok())
            }
            "write" => {
                let path = cwd.join(args.first().unwrap());
                std::fs::write(path, args.get(1).cloned().unwrap_or_default()).unwrap();
                Ok(CommandOutput::ok())
            }
            "fail" => {
                let code = args.first().and_then(|c| c.parse().ok()).unwrap_or(1);
                Ok(CommandOutput::failed(code, "simulated failure"))
            }
            "missing-program" => Err(UtilError::CommandExec {
                program: program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            _ => Ok(CommandOutput::ok()),
        }
    }
}
