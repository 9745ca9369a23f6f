//! Console protocol - JSON command/response definitions

use serde::{Deserialize, Serialize};

/// Commands sent by an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum DebugCommand {
    /// List every live buster
    ListTasks,
    /// Get one buster's state
    TaskStatus { id: u64 },
    /// Cancel a buster on behalf of `requester` (owner UUID)
    Cancel { id: u64, requester: String },
    /// Point an owner's progress messages at one of their busters
    SetWatched { owner: String, id: u64 },
    /// Ping (health check)
    Ping,
}

/// Responses from the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DebugResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Pong { message: String },
    Tasks { tasks: Vec<TaskInfo> },
    Task { task: TaskInfo },
    Updated { description: String },
}

/// One buster as seen by an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u64,
    pub owner: String,
    pub kind: String,
    pub level: i32,
    /// "forward", "reverse" or "finished"
    pub phase: String,
    pub regions: usize,
    pub logged_voxels: usize,
}

impl DebugResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }

    pub fn updated(description: impl Into<String>) -> Self {
        Self::ok(ResponseData::Updated {
            description: description.into(),
        })
    }
}
