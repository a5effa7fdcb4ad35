//! End-to-end tests for Recast
//!
//! These tests walk complete user workflows: fixtures written to disk, a
//! batch of mixed jobs on the pool, and the finished containers read back.

mod batch_workflow;
