//! ctxbus State - The shared tables behind the router
//!
//! This crate owns the process-wide state of one bus:
//! - Channel registry with a most-recent-value cache per context type
//! - Membership table (at most one current channel per application)
//! - Listener registry (type-filtered, scoped by live membership)
//!
//! None of these call back into the router; dependencies point one way.

pub mod registry;
pub mod membership;
pub mod listeners;

pub use registry::*;
pub use membership::*;
pub use listeners::*;
