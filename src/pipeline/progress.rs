//! Progress reporting for slicing tasks

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::status::Stage;

/// Snapshot of a task's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub stage: Stage,
    /// Overall completion, 0..=100
    pub percent: f64,
    pub processed_tiles: usize,
    pub total_tiles: usize,
    /// Estimated time to finish the encode stage, once tiles are flowing
    pub eta_ms: Option<u64>,
}

impl ProgressEvent {
    pub fn stage(task_id: &str, stage: Stage, fraction: f64) -> Self {
        Self {
            task_id: task_id.to_string(),
            stage,
            percent: stage.percent(fraction),
            processed_tiles: 0,
            total_tiles: 0,
            eta_ms: None,
        }
    }
}

/// Receiver of progress events; called from worker threads
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes events to the log; stage boundaries at info, tile ticks at debug
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&self, event: ProgressEvent) {
        if event.total_tiles == 0 {
            info!("[{}] {} {:.1}%", event.task_id, event.stage, event.percent);
        } else {
            debug!(
                "[{}] {} {:.1}% ({}/{} tiles, eta {:?} ms)",
                event.task_id, event.stage, event.percent, event.processed_tiles, event.total_tiles, event.eta_ms
            );
        }
    }
}

/// Forwards events over a channel without ever blocking a worker
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Sink backed by a bounded channel; events are dropped while it is full
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (Self::new(sender), receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, event: ProgressEvent) {
        match self.sender.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
