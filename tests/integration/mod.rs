//! Integration test suite for vmstrap.
//!
//! # Test Categories
//!
//! - `engine`: task set, resolver, executor and rollback working together
//! - `pipeline`: manifests assembled into full build plans
//! - `recovery`: failed builds cleaning up after themselves
//!
//! Nothing here needs root: builds either run dry or use tasks that only
//! touch a temporary directory.

mod fixtures;

mod engine;
mod pipeline;
mod recovery;
