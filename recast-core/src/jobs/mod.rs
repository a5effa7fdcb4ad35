//! Concurrent job execution on top of the single-threaded engine
//!
//! Each job keeps its own extractor, muxer and coders; the pool only bounds
//! how many run at once and routes cancellation and progress queries.

pub mod worker_pool;

pub use worker_pool::{
    JobHandle, JobId, JobProgress, JobResult, JobState, PoolError, PoolStats, WorkerPool,
};
