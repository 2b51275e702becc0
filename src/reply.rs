//! Message shapes handed to the notebook protocol layer.
//!
//! The protocol transport is not implemented here; these are the payloads
//! an adapter forwards as `stream` messages and `execute_reply` contents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::outcome::ExecutionResult;

/// Error name carried by every failed reply.
pub const ERROR_NAME: &str = "PicoKernelError";

/// One incremental piece of output, tagged with its stream name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub name: String,
    pub text: String,
}

impl StreamChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }
}

/// Receiver of incremental output, fed as soon as a chunk is produced.
pub trait OutputSink {
    fn emit(&mut self, chunk: StreamChunk);
}

impl OutputSink for Vec<StreamChunk> {
    fn emit(&mut self, chunk: StreamChunk) {
        self.push(chunk);
    }
}

impl OutputSink for crossbeam_channel::Sender<StreamChunk> {
    fn emit(&mut self, chunk: StreamChunk) {
        // A gone receiver only loses display; the run itself continues.
        let _ = self.send(chunk);
    }
}

/// Final reply for one execution request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok {
        execution_count: u32,
        payload: Vec<Value>,
        user_expressions: Map<String, Value>,
        data: BTreeMap<String, String>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl ExecuteReply {
    pub fn from_result(result: &ExecutionResult, execution_count: u32) -> Self {
        let message = result.message();
        if result.is_success() {
            let mut data = BTreeMap::new();
            data.insert("text/plain".to_string(), message);
            ExecuteReply::Ok {
                execution_count,
                payload: Vec::new(),
                user_expressions: Map::new(),
                data,
            }
        } else {
            ExecuteReply::Error {
                ename: ERROR_NAME.to_string(),
                evalue: message.clone(),
                traceback: vec![message],
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExecuteReply::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    pub name: String,
    pub mimetype: String,
    pub file_extension: String,
}

/// Static description of the kernel, as answered to an info request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelInfo {
    pub implementation: String,
    pub implementation_version: String,
    pub banner: String,
    pub language_info: LanguageInfo,
}

impl Default for KernelInfo {
    fn default() -> Self {
        Self {
            implementation: "pico_kernel".to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            banner: "Pico Kernel - a custom kernel for Raspberry Pi Pico".to_string(),
            language_info: LanguageInfo {
                name: "c".to_string(),
                mimetype: "text/x-csrc".to_string(),
                file_extension: ".c".to_string(),
            },
        }
    }
}
