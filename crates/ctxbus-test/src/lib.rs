//! ctxbus Test Harness - Scripted peers and bus validation
//!
//! This crate provides:
//! - A scripted mock application peer for `open`
//! - Context recorders for listener assertions
//! - A scenario harness over an agent host
//! - A seeded fuzzer checking the bus against a reference model

pub mod mock_app;
pub mod recorder;
pub mod scenario;
pub mod fuzzer;

pub use mock_app::*;
pub use recorder::*;
pub use scenario::*;
pub use fuzzer::*;
