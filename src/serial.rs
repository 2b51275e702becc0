//! Draining device output over a serial connection.
//!
//! A drain session reads with a short poll timeout and ends once the
//! device has been silent for the idle timeout. Every line resets the idle
//! deadline, so a chatty device keeps the session open indefinitely while
//! a quiet one releases the host quickly.

use std::io::{self, BufRead, BufReader, Read};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::{pklog_debug, pklog_trace, pklog_warn, Error, Result};

/// Stand-in deadline when a timeout would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Byte stream of an open serial connection. Dropping it closes the port.
pub type PortStream = Box<dyn Read + Send>;

/// Opens serial connections with a per-read timeout.
pub trait PortOpener: Send {
    fn open(&self, device: &str, baud_rate: u32, poll_timeout: Duration) -> Result<PortStream>;
}

/// Opens real ports through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, device: &str, baud_rate: u32, poll_timeout: Duration) -> Result<PortStream> {
        pklog_debug!(
            "Opening {} at {} baud (poll {:?})",
            device,
            baud_rate,
            poll_timeout
        );
        let port = serialport::new(device, baud_rate)
            .timeout(poll_timeout)
            .open()?;
        Ok(Box::new(port))
    }
}

/// Connection parameters for one drain session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Upper bound of a single blocking read.
    pub poll_timeout: Duration,
    /// Silence that ends the session.
    pub idle_timeout: Duration,
}

impl From<&Config> for SerialSettings {
    fn from(config: &Config) -> Self {
        Self {
            baud_rate: config.effective_baud_rate(),
            poll_timeout: config.poll_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// One line of device output.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialLine {
    /// Decoded text including its line terminator, if one arrived.
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl SerialLine {
    pub fn trimmed(&self) -> &str {
        self.text.trim_end_matches(['\r', '\n'])
    }
}

/// Why a stream stopped without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    IdleTimeout,
    Cancelled,
}

/// Lazy sequence of device lines for one drain session.
///
/// Yields `Ok` lines as they arrive and ends on idle timeout or
/// cancellation. An I/O fault is yielded once as `Err` and ends the
/// stream. The port is closed as soon as the stream ends or is dropped.
pub struct LineStream {
    reader: Option<BufReader<PortStream>>,
    device: String,
    poll_timeout: Duration,
    idle_timeout: Duration,
    deadline: Instant,
    pending: Vec<u8>,
    cancel: CancellationToken,
    end: Option<StreamEnd>,
    lines: usize,
}

/// Instant `timeout` from now, saturating for timeouts past the clock range.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Open `device` and start a drain session.
pub fn drain(
    opener: &dyn PortOpener,
    device: &str,
    settings: &SerialSettings,
    cancel: CancellationToken,
) -> Result<LineStream> {
    let port = opener.open(device, settings.baud_rate, settings.poll_timeout)?;
    Ok(LineStream::new(port, device, settings, cancel))
}

impl LineStream {
    pub fn new(
        port: PortStream,
        device: &str,
        settings: &SerialSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: Some(BufReader::new(port)),
            device: device.to_string(),
            poll_timeout: settings.poll_timeout,
            idle_timeout: settings.idle_timeout,
            deadline: deadline_after(settings.idle_timeout),
            pending: Vec::new(),
            cancel,
            end: None,
            lines: 0,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// How the stream ended; `None` while open or after a fault.
    pub fn end(&self) -> Option<StreamEnd> {
        self.end
    }

    pub fn lines_read(&self) -> usize {
        self.lines
    }

    fn take_line(&mut self) -> SerialLine {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.lines += 1;
        self.deadline = deadline_after(self.idle_timeout);
        pklog_trace!("{} <- {:?}", self.device, text);
        SerialLine {
            text,
            received_at: Local::now(),
        }
    }

    fn close(&mut self, end: Option<StreamEnd>) {
        if self.reader.take().is_some() {
            pklog_debug!(
                "Closed {} after {} lines ({:?})",
                self.device,
                self.lines,
                end
            );
        }
        self.end = end;
    }
}

impl Iterator for LineStream {
    type Item = Result<SerialLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.reader.as_ref()?;

            if self.cancel.is_cancelled() || Instant::now() >= self.deadline {
                if !self.pending.is_empty() {
                    return Some(Ok(self.take_line()));
                }
                let end = if self.cancel.is_cancelled() {
                    StreamEnd::Cancelled
                } else {
                    StreamEnd::IdleTimeout
                };
                self.close(Some(end));
                return None;
            }

            let reader = self.reader.as_mut()?;
            match reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    // End of stream without a fault reads as an empty poll.
                    if !self.pending.is_empty() {
                        return Some(Ok(self.take_line()));
                    }
                    std::thread::sleep(self.poll_timeout);
                }
                Ok(_) => return Some(Ok(self.take_line())),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    // A partial line at a poll timeout is delivered as-is.
                    if !self.pending.is_empty() {
                        return Some(Ok(self.take_line()));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    pklog_warn!("Serial read on {} failed: {}", self.device, e);
                    self.close(None);
                    return Some(Err(Error::SerialRead {
                        device: self.device.clone(),
                        source: e,
                    }));
                }
            }
        }
    }
}
