//! Membership table - which channel each application is on

use std::collections::HashMap;

use ctxbus_core::{AppId, BusError, BusResult, ChannelId};

use crate::ChannelRegistry;

/// Result of a join request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Membership changed; `previous` is the channel that was replaced
    Joined { previous: Option<ChannelId> },
    /// The application was already on the channel; nothing changed
    AlreadyMember,
    /// Requested from inside a listener callback; applied once the
    /// fan-out in progress has finished
    Deferred,
}

impl JoinOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, JoinOutcome::Joined { .. })
    }
}

/// Membership table - at most one current channel per application
#[derive(Debug, Default)]
pub struct MembershipTable {
    current: HashMap<AppId, ChannelId>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move an application onto a channel, replacing any prior membership
    pub fn join(
        &mut self,
        app: AppId,
        channel: &ChannelId,
        registry: &ChannelRegistry,
    ) -> BusResult<JoinOutcome> {
        if !registry.contains(channel) {
            return Err(BusError::UnknownChannel(channel.clone()));
        }

        if self.current.get(&app) == Some(channel) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let previous = self.current.insert(app, channel.clone());
        Ok(JoinOutcome::Joined { previous })
    }

    /// Clear membership, returning the channel that was left
    pub fn leave(&mut self, app: AppId) -> Option<ChannelId> {
        self.current.remove(&app)
    }

    /// Current channel of an application
    pub fn current(&self, app: AppId) -> Option<&ChannelId> {
        self.current.get(&app)
    }

    /// Check whether an application is on a channel
    #[inline]
    pub fn is_member(&self, app: AppId, channel: &ChannelId) -> bool {
        self.current.get(&app) == Some(channel)
    }

    /// Applications on a channel, ordered by id
    pub fn members(&self, channel: &ChannelId) -> Vec<AppId> {
        let mut apps: Vec<AppId> = self
            .current
            .iter()
            .filter(|(_, c)| *c == channel)
            .map(|(app, _)| *app)
            .collect();
        apps.sort();
        apps
    }

    /// Number of applications on some channel
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxbus_core::fdc3_system_channels;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(fdc3_system_channels()).unwrap()
    }

    #[test]
    fn test_join_replaces_membership() {
        let registry = registry();
        let mut table = MembershipTable::new();
        let app = AppId::new(1);
        let red = ChannelId::new("red");
        let blue = ChannelId::new("blue");

        assert_eq!(
            table.join(app, &red, &registry).unwrap(),
            JoinOutcome::Joined { previous: None }
        );
        assert_eq!(
            table.join(app, &blue, &registry).unwrap(),
            JoinOutcome::Joined {
                previous: Some(red.clone())
            }
        );

        assert_eq!(table.current(app), Some(&blue));
        assert!(!table.is_member(app, &red));
        assert!(table.members(&red).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rejoin_same_channel_is_noop() {
        let registry = registry();
        let mut table = MembershipTable::new();
        let app = AppId::new(1);
        let red = ChannelId::new("red");

        table.join(app, &red, &registry).unwrap();
        let outcome = table.join(app, &red, &registry).unwrap();
        assert_eq!(outcome, JoinOutcome::AlreadyMember);
        assert!(!outcome.changed());
        assert_eq!(table.current(app), Some(&red));
    }

    #[test]
    fn test_unknown_channel_leaves_membership_untouched() {
        let registry = registry();
        let mut table = MembershipTable::new();
        let app = AppId::new(1);
        let red = ChannelId::new("red");

        table.join(app, &red, &registry).unwrap();
        let err = table.join(app, &ChannelId::new("mauve"), &registry);
        assert!(matches!(err, Err(BusError::UnknownChannel(_))));
        assert_eq!(table.current(app), Some(&red));
    }

    #[test]
    fn test_leave() {
        let registry = registry();
        let mut table = MembershipTable::new();
        let a = AppId::new(1);
        let b = AppId::new(2);
        let red = ChannelId::new("red");

        table.join(b, &red, &registry).unwrap();
        table.join(a, &red, &registry).unwrap();
        assert_eq!(table.members(&red), vec![a, b]);

        assert_eq!(table.leave(a), Some(red.clone()));
        assert_eq!(table.leave(a), None);
        assert_eq!(table.current(a), None);
        assert_eq!(table.members(&red), vec![b]);
    }
}
