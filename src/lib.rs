//! Build, flash and run C submissions on a Raspberry Pi Pico, streaming the
//! board's serial output back as execution results.
//!
//! The pieces, leaves first:
//! - [`device`]: finds the board among attached serial ports
//! - [`runner`]: runs the external build and flash scripts
//! - [`serial`]: drains device output under an idle timeout
//! - [`session`]: sequences one submission through all of the above

pub mod config;
pub mod device;
pub mod error;
pub mod log;
pub mod outcome;
pub mod reply;
pub mod runner;
pub mod serial;
pub mod session;
pub mod util;

pub use error::{Error, Result};
pub use outcome::{ExecutionResult, Stage};
pub use reply::{ExecuteReply, OutputSink, StreamChunk};
pub use session::{Session, SessionId};
