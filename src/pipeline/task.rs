//! A slicing job: configuration, status and stop flag

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;

use crate::config::SlicingConfig;
use crate::error::{TilerError, TilerResult};

use super::cancel::CancellationToken;
use super::status::TaskStatus;

#[derive(Debug)]
pub struct SlicingTask {
    id: String,
    config: SlicingConfig,
    status: RwLock<TaskStatus>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
}

impl SlicingTask {
    pub fn new(id: impl Into<String>, config: SlicingConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: RwLock::new(TaskStatus::Created),
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SlicingConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.status.read().clone()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&self, next: TaskStatus) -> TilerResult<()> {
        let mut status = self.status.write();
        if !status.can_transition_to(&next) {
            return Err(TilerError::invalid_state(format!(
                "task {}: cannot move from {} to {}",
                self.id, *status, next
            )));
        }
        debug!("task {}: {} -> {}", self.id, *status, next);
        *status = next;
        Ok(())
    }

    /// Request a stop. A task that has not started is cancelled at once;
    /// a running one stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut status = self.status.write();
        if matches!(*status, TaskStatus::Created | TaskStatus::Queued) {
            *status = TaskStatus::Cancelled;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    #[test]
    fn test_transition_validates() {
        let task = SlicingTask::new("t", SlicingConfig::default());
        assert_eq!(task.status(), TaskStatus::Created);
        let err = task.transition(TaskStatus::Processing(Stage::Load)).unwrap_err();
        assert!(matches!(err, TilerError::InvalidState(_)));
        task.transition(TaskStatus::Queued).unwrap();
        task.transition(TaskStatus::Processing(Stage::Load)).unwrap();
        assert_eq!(task.status(), TaskStatus::Processing(Stage::Load));
    }

    #[test]
    fn test_cancel_before_start() {
        let task = SlicingTask::new("t", SlicingConfig::default());
        let token = task.token();
        task.cancel();
        assert!(token.is_cancelled());
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.transition(TaskStatus::Queued).is_err());
    }

    #[test]
    fn test_cancel_while_running_leaves_status_to_the_pipeline() {
        let task = SlicingTask::new("t", SlicingConfig::default());
        task.transition(TaskStatus::Queued).unwrap();
        task.transition(TaskStatus::Processing(Stage::Load)).unwrap();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.status(), TaskStatus::Processing(Stage::Load));
    }
}
