use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::TaskSnapshot;
use crate::models::TaskStatus;
use crate::models::timestamp::unix_millis;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Progress,
    Completed,
    Error,
}

impl FrameKind {
    pub fn for_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => FrameKind::Completed,
            TaskStatus::Failed => FrameKind::Error,
            TaskStatus::Started | TaskStatus::Running => FrameKind::Progress,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Progress => "progress",
            FrameKind::Completed => "completed",
            FrameKind::Error => "error",
        }
    }
}

/// One pushed event. Always carries the whole task, never a diff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(with = "unix_millis")]
    pub timestamp: SystemTime,
    pub task: TaskSnapshot,
}

impl ProgressFrame {
    pub fn new(task: TaskSnapshot, timestamp: SystemTime) -> Self {
        Self {
            kind: FrameKind::for_status(task.status),
            timestamp,
            task,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Server-sent-events block: `event:` names the frame kind, `data:`
    /// holds the JSON frame, terminated by a blank line.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.kind.as_str(),
            self.to_json()?
        ))
    }
}
