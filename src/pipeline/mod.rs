// src/pipeline/mod.rs
// Task orchestration: state machine, cancellation, progress and the stage runner
// RELEVANT FILES: src/pipeline/orchestrator.rs, src/pipeline/task.rs, src/pipeline/status.rs, src/error.rs

//! Slicing pipeline.
//!
//! A [`SlicingTask`] moves through
//! `Created -> Queued -> Processing(stage) -> Completed | Failed | Cancelled`
//! while [`Pipeline::run`] loads, decimates, splits, encodes and indexes it.

pub mod cancel;
pub mod orchestrator;
pub mod progress;
pub mod status;
pub mod task;

pub use cancel::CancellationToken;
pub use orchestrator::{Pipeline, SliceRecord, SlicingOutput, TILESET_PATH};
pub use progress::{ChannelProgressSink, LogProgressSink, NullProgressSink, ProgressEvent, ProgressSink};
pub use status::{Stage, TaskStatus};
pub use task::SlicingTask;
