//! Integration tests for Recast
//!
//! These tests run the transcode engine and the job pool against the
//! simulated media backend and inspect the containers it writes.

#[path = "style.rs"]
mod style;

#[path = "integration/common.rs"]
mod common;

#[path = "integration/failure_handling.rs"]
mod failure_handling;
#[path = "integration/frame_capture.rs"]
mod frame_capture;
#[path = "integration/job_pool.rs"]
mod job_pool;
#[path = "integration/pass_through.rs"]
mod pass_through;
#[path = "integration/transcode_pipeline.rs"]
mod transcode_pipeline;
