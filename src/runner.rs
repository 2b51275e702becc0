//! Running the external build and flash scripts.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{pklog_debug, pklog_warn, Error, Result};

/// Captured result of one script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout on a zero exit, otherwise the failure payload.
    pub fn into_result(self, script: &Path) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(Error::ExternalStep {
                script: script.to_path_buf(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs one script to completion and returns its stdout.
///
/// Blocks until the script exits. No timeout and no retries: a failed
/// build or flash is final for that submission.
pub trait ScriptRunner: Send {
    fn run(&self, script: &Path) -> Result<String>;
}

/// Runs scripts through bash inside a fixed working directory.
#[derive(Debug, Clone)]
pub struct BashRunner {
    interpreter: PathBuf,
    cwd: PathBuf,
}

impl BashRunner {
    /// Locates `bash` on `PATH`, falling back to `/bin/bash`.
    pub fn new(cwd: &Path) -> Self {
        let interpreter = which::which("bash").unwrap_or_else(|_| PathBuf::from("/bin/bash"));
        Self::with_interpreter(interpreter, cwd)
    }

    pub fn with_interpreter(interpreter: PathBuf, cwd: &Path) -> Self {
        Self {
            interpreter,
            cwd: cwd.to_path_buf(),
        }
    }

    /// Run the script and capture everything, regardless of exit status.
    pub fn capture(&self, script: &Path) -> Result<StepOutput> {
        pklog_debug!(
            "BashRunner::capture script={} cwd={}",
            script.display(),
            self.cwd.display()
        );
        let output = Command::new(&self.interpreter)
            .arg(script)
            .current_dir(&self.cwd)
            .output()?;

        let step = StepOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };
        pklog_debug!(
            "Script {} finished: exit={:?} stdout={} bytes stderr={} bytes",
            script.display(),
            step.exit_code,
            step.stdout.len(),
            step.stderr.len()
        );
        Ok(step)
    }
}

impl ScriptRunner for BashRunner {
    fn run(&self, script: &Path) -> Result<String> {
        let step = self.capture(script)?;
        if !step.success() {
            pklog_warn!(
                "Script {} failed with {:?}: {}",
                script.display(),
                step.exit_code,
                step.stderr.trim()
            );
        }
        step.into_result(script)
    }
}
