use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    InvalidConfig,
    DuplicateTask,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub task_id: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(task_id: &TaskId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.clone()),
            kind,
            message: message.into(),
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.task_id {
            Some(task_id) => write!(f, "{:?} [{}]: {}", self.kind, task_id, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl Error for CoreError {}
