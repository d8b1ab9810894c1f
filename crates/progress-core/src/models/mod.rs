pub mod error;
pub mod frame;
pub mod stage;
pub mod task;
pub mod timestamp;

pub use error::{CoreError, CoreErrorKind};
pub use frame::{FrameKind, ProgressFrame};
pub use stage::{StagePlan, StageWeight};
pub use task::{TaskId, TaskPatch, TaskSnapshot, TaskStatus};
