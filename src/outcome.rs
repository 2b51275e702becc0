//! Orchestration stages and terminal results.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Reply text once the device stream has ended normally.
pub const FINISHED_MESSAGE: &str = "Finished reading Pico output.";

/// Reported when no board shows up after flashing.
pub const NO_DEVICE_MESSAGE: &str = "No Pico found via USB serial.";

/// Steps of one submission, in order. The run only moves forward; every
/// failure stage is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    SourceWritten,
    Built,
    Flashed,
    Settling,
    DeviceLocating,
    Streaming,
    Done,
    SourceWriteFailed,
    BuildFailed,
    FlashFailed,
    DeviceNotFound,
    DeviceLookupFailed,
    SerialFault,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Done
                | Stage::SourceWriteFailed
                | Stage::BuildFailed
                | Stage::FlashFailed
                | Stage::DeviceNotFound
                | Stage::DeviceLookupFailed
                | Stage::SerialFault
                | Stage::Cancelled
        )
    }

    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != Stage::Done
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::SourceWritten => "source_written",
            Stage::Built => "built",
            Stage::Flashed => "flashed",
            Stage::Settling => "settling",
            Stage::DeviceLocating => "device_locating",
            Stage::Streaming => "streaming",
            Stage::Done => "done",
            Stage::SourceWriteFailed => "source_write_failed",
            Stage::BuildFailed => "build_failed",
            Stage::FlashFailed => "flash_failed",
            Stage::DeviceNotFound => "device_not_found",
            Stage::DeviceLookupFailed => "device_lookup_failed",
            Stage::SerialFault => "serial_fault",
            Stage::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Terminal outcome of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The device stream ended after its idle timeout, or the submission
    /// was empty.
    Success {
        /// Device output in arrival order.
        output: String,
        lines: usize,
        /// Reply text; empty for an empty submission.
        summary: String,
    },
    SourceWriteFailed { path: PathBuf, cause: String },
    BuildFailed { exit_code: Option<i32>, stderr: String },
    FlashFailed { exit_code: Option<i32>, stderr: String },
    DeviceNotFound,
    /// The OS port list could not be read, so presence is unknown.
    DeviceLookupFailed { cause: String },
    /// The connection failed while open. Lines streamed before the fault
    /// were already delivered.
    SerialReadFault { cause: String },
    Cancelled { lines: usize },
}

impl ExecutionResult {
    /// Result of a blank submission: nothing ran.
    pub fn empty() -> Self {
        ExecutionResult::Success {
            output: String::new(),
            lines: 0,
            summary: String::new(),
        }
    }

    pub fn finished(output: String, lines: usize) -> Self {
        ExecutionResult::Success {
            output,
            lines,
            summary: FINISHED_MESSAGE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Stage the run stopped in.
    pub fn stage(&self) -> Stage {
        match self {
            ExecutionResult::Success { .. } => Stage::Done,
            ExecutionResult::SourceWriteFailed { .. } => Stage::SourceWriteFailed,
            ExecutionResult::BuildFailed { .. } => Stage::BuildFailed,
            ExecutionResult::FlashFailed { .. } => Stage::FlashFailed,
            ExecutionResult::DeviceNotFound => Stage::DeviceNotFound,
            ExecutionResult::DeviceLookupFailed { .. } => Stage::DeviceLookupFailed,
            ExecutionResult::SerialReadFault { .. } => Stage::SerialFault,
            ExecutionResult::Cancelled { .. } => Stage::Cancelled,
        }
    }

    /// Human-readable message for the caller.
    pub fn message(&self) -> String {
        match self {
            ExecutionResult::Success { summary, .. } => summary.clone(),
            ExecutionResult::SourceWriteFailed { path, cause } => {
                format!("Could not write source to {}: {}", path.display(), cause)
            }
            ExecutionResult::BuildFailed { exit_code, stderr } => {
                step_message("Build", *exit_code, stderr)
            }
            ExecutionResult::FlashFailed { exit_code, stderr } => {
                step_message("Flash", *exit_code, stderr)
            }
            ExecutionResult::DeviceNotFound => NO_DEVICE_MESSAGE.to_string(),
            ExecutionResult::DeviceLookupFailed { cause } => {
                format!("Could not list serial ports: {}", cause)
            }
            ExecutionResult::SerialReadFault { cause } => {
                format!("Serial read error: {}", cause)
            }
            ExecutionResult::Cancelled { lines } => {
                format!("Execution cancelled after {} lines of output.", lines)
            }
        }
    }
}

fn step_message(step: &str, exit_code: Option<i32>, stderr: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    if stderr.is_empty() {
        format!("{} failed ({})", step, status)
    } else {
        format!("{} failed ({}):\n{}", step, status, stderr)
    }
}
