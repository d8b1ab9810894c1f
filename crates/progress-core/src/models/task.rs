use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::timestamp::{option_unix_millis, unix_millis};
use crate::models::{CoreError, CoreErrorKind};

/// Caller-assigned task identifier. Never empty.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "task id must not be empty",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TaskId {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Started,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Started => "STARTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "STARTED" => Ok(TaskStatus::Started),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unknown task status '{raw}'"),
            )),
        }
    }
}

/// Full state of one tracked task. Every broadcast frame carries a complete
/// copy of this record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    pub message: String,
    #[serde(with = "unix_millis")]
    pub start_time: SystemTime,
    #[serde(with = "unix_millis")]
    pub last_updated: SystemTime,
    #[serde(with = "option_unix_millis")]
    pub estimated_completion: Option<SystemTime>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Partial update applied by [`crate::tracker::ProgressTracker::update`].
/// `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskPatch {
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(mut self, current: u64) -> Self {
        self.current = Some(current);
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn touches_progress(&self) -> bool {
        self.current.is_some() || self.total.is_some() || self.stage.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskId, TaskStatus};
    use crate::models::CoreErrorKind;

    #[test]
    fn blank_task_ids_are_rejected() {
        assert_eq!(
            TaskId::new("   ").unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
        assert_eq!(TaskId::new("seed-1").unwrap().as_str(), "seed-1");
    }

    #[test]
    fn task_id_deserialization_validates() {
        assert!(serde_json::from_str::<TaskId>("\"\"").is_err());
        let parsed: TaskId = serde_json::from_str("\"seed-2\"").unwrap();
        assert_eq!(parsed.as_str(), "seed-2");
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Started.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn status_uses_upper_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!("FAILED".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
    }
}
