//! IPC protocol between the master and its workers.
//!
//! Messages are JSON-serialized and newline-delimited, tagged by `type`:
//!
//! ```text
//! master → worker   {"type":"shutdown"}
//!                   {"type":"reload"}
//!                   {"type":"message","payload":...}
//! worker → master   {"type":"listening","address":"0.0.0.0:8080"}
//!                   {"type":"message","payload":...}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from master to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterMessage {
    /// Begin graceful drain and exit soon.
    Shutdown,
    /// Reopen log file descriptors.
    Reload,
    /// Relayed inter-worker message.
    Message {
        /// Opaque payload.
        payload: Value,
    },
}

/// Message from worker to master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The worker accepts connections.
    Listening {
        /// Listen address, if the worker reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    /// Arbitrary payload for the master's message handler.
    Message {
        /// Opaque payload.
        payload: Value,
    },
}

impl MasterMessage {
    /// Create a relayed message.
    pub fn message(payload: Value) -> Self {
        Self::Message { payload }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl WorkerMessage {
    /// Create a listening notification.
    pub fn listening(address: Option<String>) -> Self {
        Self::Listening { address }
    }

    /// Create an upward message.
    pub fn message(payload: Value) -> Self {
        Self::Message { payload }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}
