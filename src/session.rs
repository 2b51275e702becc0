//! Execution sessions: one submission at a time from source text to device
//! output.
//!
//! A `Session` carries everything a run needs (configuration, working
//! directory, the script runner, device locator and port opener, and a
//! cancellation token) instead of relying on process-wide state. A run
//! moves through the `Stage`s in order and every failure is turned into an
//! `ExecutionResult` at the step where it happens.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::device::{DeviceLocator, PortEnumerator};
use crate::outcome::{ExecutionResult, Stage};
use crate::reply::{OutputSink, StreamChunk};
use crate::runner::{BashRunner, ScriptRunner};
use crate::serial::{self, PortOpener, SerialSettings, StreamEnd, SystemPortOpener};
use crate::{pklog, pklog_debug, pklog_error, pklog_warn, Error};

/// Granularity of the cancellable settle wait.
const SETTLE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which external script a failure came from.
#[derive(Debug, Clone, Copy)]
enum Step {
    Build,
    Flash,
}

pub struct Session {
    id: SessionId,
    source_path: PathBuf,
    build_script: PathBuf,
    flash_script: PathBuf,
    serial: SerialSettings,
    settle_delay: Duration,
    runner: Box<dyn ScriptRunner>,
    locator: DeviceLocator,
    opener: Box<dyn PortOpener>,
    cancel: CancellationToken,
    stage: Stage,
    execution_count: u32,
}

impl Session {
    /// Session backed by bash, the OS port list and real serial ports.
    pub fn new(config: &Config, workdir: &Path) -> Self {
        Self {
            id: SessionId::new(),
            source_path: config.effective_source_path(workdir),
            build_script: config.effective_build_script(workdir),
            flash_script: config.effective_flash_script(workdir),
            serial: SerialSettings::from(config),
            settle_delay: config.settle_delay(),
            runner: Box::new(BashRunner::new(workdir)),
            locator: DeviceLocator::system(),
            opener: Box::new(SystemPortOpener),
            cancel: CancellationToken::new(),
            stage: Stage::Idle,
            execution_count: 0,
        }
    }

    pub fn with_runner(mut self, runner: Box<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_ports(mut self, ports: Box<dyn PortEnumerator>) -> Self {
        self.locator = DeviceLocator::new(ports);
        self
    }

    pub fn with_opener(mut self, opener: Box<dyn PortOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_serial_settings(mut self, serial: SerialSettings) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Stage of the current or most recent run.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of submissions executed so far, blank ones included.
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    /// Token that stops the settle wait and the device stream.
    ///
    /// Cancellation is sticky: once cancelled, later submissions on this
    /// session end as `Cancelled` before touching the device.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one submission to a terminal result.
    ///
    /// Progress notices and device lines go to `sink` as they happen. Build
    /// and flash scripts block until they exit; the device stream ends after
    /// the configured idle timeout.
    pub fn execute(&mut self, code: &str, sink: &mut dyn OutputSink) -> ExecutionResult {
        self.stage = Stage::Idle;
        self.execution_count += 1;
        if code.trim().is_empty() {
            pklog_debug!("[{}] Empty submission, nothing to do", self.id.short());
            self.transition(Stage::Done);
            return ExecutionResult::empty();
        }

        pklog!(
            "[{}] Execution {} started ({} bytes)",
            self.id.short(),
            self.execution_count,
            code.len()
        );

        if self.cancel.is_cancelled() {
            return self.finish(ExecutionResult::Cancelled { lines: 0 });
        }

        if let Err(e) = fs::write(&self.source_path, code) {
            return self.finish(ExecutionResult::SourceWriteFailed {
                path: self.source_path.clone(),
                cause: e.to_string(),
            });
        }
        self.transition(Stage::SourceWritten);
        sink.emit(StreamChunk::stdout(format!(
            "Wrote source to {}\n",
            self.source_path.display()
        )));

        if let Err(e) = self.runner.run(&self.build_script) {
            return self.finish(step_failure(Step::Build, e));
        }
        self.transition(Stage::Built);

        if let Err(e) = self.runner.run(&self.flash_script) {
            return self.finish(step_failure(Step::Flash, e));
        }
        self.transition(Stage::Flashed);

        self.transition(Stage::Settling);
        if !self.settle() {
            return self.finish(ExecutionResult::Cancelled { lines: 0 });
        }

        self.transition(Stage::DeviceLocating);
        let device = match self.locator.locate() {
            Ok(Some(device)) => device,
            Ok(None) => return self.finish(ExecutionResult::DeviceNotFound),
            Err(e) => {
                pklog_warn!("[{}] Port enumeration failed: {}", self.id.short(), e);
                return self.finish(ExecutionResult::DeviceLookupFailed {
                    cause: e.to_string(),
                });
            }
        };

        self.transition(Stage::Streaming);
        sink.emit(StreamChunk::stdout(format!(
            "Reading output from {}...\n",
            device.path
        )));
        let result = self.stream(&device.path, sink);
        self.finish(result)
    }

    fn stream(&self, device: &str, sink: &mut dyn OutputSink) -> ExecutionResult {
        let mut lines = match serial::drain(
            &*self.opener,
            device,
            &self.serial,
            self.cancel.clone(),
        ) {
            Ok(lines) => lines,
            Err(e) => {
                return ExecutionResult::SerialReadFault {
                    cause: fault_cause(e),
                }
            }
        };

        let mut output = String::new();
        for line in lines.by_ref() {
            match line {
                Ok(line) => {
                    output.push_str(&line.text);
                    sink.emit(StreamChunk::stdout(line.text));
                }
                Err(e) => {
                    return ExecutionResult::SerialReadFault {
                        cause: fault_cause(e),
                    }
                }
            }
        }

        match lines.end() {
            Some(StreamEnd::Cancelled) => ExecutionResult::Cancelled {
                lines: lines.lines_read(),
            },
            _ => ExecutionResult::finished(output, lines.lines_read()),
        }
    }

    /// Fixed wait for the board to re-enumerate. Returns false if cancelled.
    fn settle(&self) -> bool {
        let until = serial::deadline_after(self.settle_delay);
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            std::thread::sleep(SETTLE_SLICE.min(until - now));
        }
    }

    fn transition(&mut self, next: Stage) {
        pklog_debug!("[{}] {} -> {}", self.id.short(), self.stage, next);
        self.stage = next;
    }

    fn finish(&mut self, result: ExecutionResult) -> ExecutionResult {
        self.transition(result.stage());
        if !self.stage.is_failure() {
            pklog!("[{}] Execution {} done", self.id.short(), self.execution_count);
        } else {
            pklog_error!(
                "[{}] Execution {} ended in {}: {}",
                self.id.short(),
                self.execution_count,
                self.stage,
                result.message()
            );
        }
        result
    }
}

fn step_failure(step: Step, error: Error) -> ExecutionResult {
    let (exit_code, stderr) = match error {
        Error::ExternalStep {
            exit_code, stderr, ..
        } => (exit_code, stderr),
        other => (None, other.to_string()),
    };
    match step {
        Step::Build => ExecutionResult::BuildFailed { exit_code, stderr },
        Step::Flash => ExecutionResult::FlashFailed { exit_code, stderr },
    }
}

fn fault_cause(error: Error) -> String {
    match error {
        Error::SerialRead { source, .. } => source.to_string(),
        Error::Serial(e) => e.to_string(),
        other => other.to_string(),
    }
}
