//! ctxbus Core - Fundamental types shared by every layer of the bus
//!
//! This crate defines:
//! - Identifiers (AppId, ChannelId, ListenerId)
//! - Contexts and listener filters
//! - Channel descriptors and display metadata
//! - Implementation metadata reported by the desktop agent
//! - The bus error taxonomy

pub mod id;
pub mod context;
pub mod channel;
pub mod metadata;
pub mod error;

pub use id::*;
pub use context::*;
pub use channel::*;
pub use metadata::*;
pub use error::*;
