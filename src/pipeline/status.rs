//! Task lifecycle: stages and the status state machine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Processing stage of a slicing task, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Load,
    Decimate,
    Split,
    Encode,
    Index,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Load, Stage::Decimate, Stage::Split, Stage::Encode, Stage::Index];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Decimate => "decimate",
            Stage::Split => "split",
            Stage::Encode => "encode",
            Stage::Index => "index",
        }
    }

    /// Share of overall progress covered by this stage, in percent
    pub fn percent_range(self) -> (f64, f64) {
        match self {
            Stage::Load => (0.0, 10.0),
            Stage::Decimate => (10.0, 30.0),
            Stage::Split => (30.0, 50.0),
            Stage::Encode => (50.0, 95.0),
            Stage::Index => (95.0, 100.0),
        }
    }

    /// Overall percent for `fraction` of this stage done
    pub fn percent(self, fraction: f64) -> f64 {
        let (start, end) = self.percent_range();
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Load => Some(Stage::Decimate),
            Stage::Decimate => Some(Stage::Split),
            Stage::Split => Some(Stage::Encode),
            Stage::Encode => Some(Stage::Index),
            Stage::Index => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a slicing task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Queued,
    Processing(Stage),
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed(_) | TaskStatus::Cancelled)
    }

    /// Whether `next` is a legal successor of this status.
    ///
    /// Stages advance one at a time; only the index stage completes a task.
    /// Any live task may fail or be cancelled; terminal states never change.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed(_)) | (_, Cancelled) => true,
            (Created, Queued) => true,
            (Queued, Processing(Stage::Load)) => true,
            (Processing(from), Processing(to)) => from.next() == Some(*to),
            (Processing(Stage::Index), Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing(stage) => write!(f, "processing ({})", stage),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed(message) => write!(f, "failed: {}", message),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
