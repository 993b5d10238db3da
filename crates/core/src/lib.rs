//! Domain logic for the video analysis pipeline.
//!
//! Everything in this crate is free of database and network dependencies so
//! the worker, the API and tests can share it. The only I/O lives in
//! [`ffmpeg`], which shells out to the ffmpeg/ffprobe binaries.

pub mod analysis;
pub mod error;
pub mod feedback;
pub mod ffmpeg;
pub mod metric_names;
pub mod metrics;
pub mod pose;
pub mod retry;
pub mod types;
