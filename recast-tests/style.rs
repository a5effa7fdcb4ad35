//! Style Enforcement Tests
//!
//! Scans the workspace crates for patterns production code must not contain.
//!
//! - `production_code` - No `#[allow(dead_code)]`, no `unwrap()` / `expect()` outside tests

#[path = "style/production_code.rs"]
mod production_code;
