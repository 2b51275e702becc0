//! Integration test suite for picokernel.
//!
//! These tests drive whole submissions through a `Session` with scripted
//! collaborators: a fake script runner, a fixed port list and a serial port
//! that replays bytes on a timeline. Real bash scripts are used where the
//! runner itself is under test.
//!
//! # Test Categories
//!
//! - `orchestration`: stage ordering and every terminal result
//! - `idle_timeout`: drain session timing and streaming order
//! - `scripts`: real build/flash scripts in a scratch working directory
//!
//! # CI Compatibility
//!
//! No hardware is needed; nothing opens a real serial port.


mod orchestration;
