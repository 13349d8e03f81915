//! Common test utilities for tarpipe-engine
//!
//! - Fixtures: temporary trees, stand-in archiver scripts, tool detection
//! - Mocks: in-memory storage and backups

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
