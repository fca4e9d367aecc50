//! Identity types for the context bus
//!
//! Applications and listeners are numbered by the bus that created them.
//! Channel ids are the stable strings published to applications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Application identity - one per connected peer
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AppId(pub u64);

impl AppId {
    pub const ZERO: AppId = AppId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        AppId(id)
    }
}

impl fmt::Debug for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "App({})", self.0)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app-{}", self.0)
    }
}

/// Listener identity - allocated in registration order
///
/// Ordering of listener ids is the delivery order of a fan-out.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ListenerId(pub u64);

impl ListenerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ListenerId(id)
    }
}

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Channel identity - stable, enumerable string id (e.g. `"red"`)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        ChannelId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        ChannelId::new(id)
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        ChannelId(id)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_id_orders_by_registration() {
        let first = ListenerId::new(1);
        let second = ListenerId::new(2);
        assert!(first < second);
    }

    #[test]
    fn test_channel_id_serializes_as_plain_string() {
        let id = ChannelId::new("red");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"red\"");

        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_str(), "red");
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(AppId::new(7).to_string(), "app-7");
        assert_eq!(format!("{:?}", AppId::new(7)), "App(7)");
        assert_eq!(ChannelId::from("blue").to_string(), "blue");
    }
}
