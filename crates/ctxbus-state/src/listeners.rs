//! Listener registry - who wants which contexts
//!
//! A listener never stores a channel. Its scope is its owner's membership,
//! looked up in the [`MembershipTable`] at the moment of every query, so a
//! listener follows its owner from channel to channel without
//! re-subscribing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ctxbus_core::{AppId, ChannelId, ContextFilter, ListenerId};

use crate::MembershipTable;

/// Shared liveness flag of a listener
///
/// Held by the registry entry and by every dispatch target cloned from it,
/// so deactivation is visible to a fan-out that is already under way.
#[derive(Clone, Debug)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new() -> Self {
        ActiveFlag(Arc::new(AtomicBool::new(true)))
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag; returns whether it was set
    pub fn deactivate(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered listener
#[derive(Clone, Debug)]
pub struct Subscription<H> {
    pub id: ListenerId,
    pub owner: AppId,
    pub filter: ContextFilter,
    pub active: ActiveFlag,
    pub handler: H,
}

impl<H> Subscription<H> {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }
}

/// Listener registry, generic over the handler the bus attaches
#[derive(Debug)]
pub struct ListenerRegistry<H> {
    /// Listener ID -> subscription; id order is registration order
    listeners: BTreeMap<ListenerId, Subscription<H>>,
    next_id: u64,
}

impl<H> Default for ListenerRegistry<H> {
    fn default() -> Self {
        ListenerRegistry {
            listeners: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<H: Clone> ListenerRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an active listener bound to `owner`
    pub fn register(&mut self, owner: AppId, filter: ContextFilter, handler: H) -> ListenerId {
        let id = self.reserve();
        self.register_reserved(id, owner, filter, handler);
        id
    }

    /// Allocate the next listener id without registering anything yet
    pub fn reserve(&mut self) -> ListenerId {
        let id = ListenerId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a listener under an id obtained from [`reserve`](Self::reserve)
    ///
    /// Ids are handed out in increasing order, so a reserved listener keeps
    /// its place in delivery order relative to later registrations.
    pub fn register_reserved(&mut self, id: ListenerId, owner: AppId, filter: ContextFilter, handler: H) {
        self.listeners.insert(
            id,
            Subscription {
                id,
                owner,
                filter,
                active: ActiveFlag::new(),
                handler,
            },
        );
    }

    /// Deactivate a listener; safe to call more than once
    ///
    /// Returns whether the listener was active.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        match self.listeners.remove(&id) {
            Some(sub) => sub.active.deactivate(),
            None => false,
        }
    }

    pub fn get(&self, id: ListenerId) -> Option<&Subscription<H>> {
        self.listeners.get(&id).filter(|s| s.is_active())
    }

    /// Active listeners whose owner is on `channel` and whose filter
    /// matches `context_type`, in registration order
    pub fn matching(
        &self,
        channel: &ChannelId,
        context_type: &str,
        membership: &MembershipTable,
    ) -> Vec<Subscription<H>> {
        self.listeners
            .values()
            .filter(|s| s.is_active())
            .filter(|s| s.filter.matches(context_type))
            .filter(|s| membership.is_member(s.owner, channel))
            .cloned()
            .collect()
    }

    /// Active listeners of one application matching `context_type`,
    /// regardless of membership
    pub fn matching_owner(&self, owner: AppId, context_type: &str) -> Vec<Subscription<H>> {
        self.listeners
            .values()
            .filter(|s| s.is_active() && s.owner == owner)
            .filter(|s| s.filter.matches(context_type))
            .cloned()
            .collect()
    }

    /// Active listeners of one application, in registration order
    pub fn owned_by(&self, owner: AppId) -> Vec<Subscription<H>> {
        self.listeners
            .values()
            .filter(|s| s.is_active() && s.owner == owner)
            .cloned()
            .collect()
    }

    /// Deactivate every listener of an application (it disconnected)
    pub fn remove_owner(&mut self, owner: AppId) -> usize {
        let ids: Vec<ListenerId> = self
            .listeners
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| s.id)
            .collect();

        ids.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }

    /// Count of active listeners
    pub fn len(&self) -> usize {
        self.listeners.values().filter(|s| s.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelRegistry;
    use ctxbus_core::fdc3_system_channels;
    use proptest::prelude::*;

    struct Fixture {
        registry: ChannelRegistry,
        membership: MembershipTable,
        listeners: ListenerRegistry<&'static str>,
    }

    fn fixture() -> Fixture {
        Fixture {
            registry: ChannelRegistry::new(fdc3_system_channels()).unwrap(),
            membership: MembershipTable::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    fn handlers(subs: &[Subscription<&'static str>]) -> Vec<&'static str> {
        subs.iter().map(|s| s.handler).collect()
    }

    #[test]
    fn test_matching_in_registration_order() {
        let mut f = fixture();
        let a = AppId::new(1);
        let b = AppId::new(2);
        let red = ChannelId::new("red");

        f.listeners.register(b, ContextFilter::Any, "b-any");
        f.listeners
            .register(a, ContextFilter::of_type("fdc3.instrument"), "a-instrument");
        f.listeners
            .register(a, ContextFilter::of_type("fdc3.contact"), "a-contact");
        f.membership.join(a, &red, &f.registry).unwrap();
        f.membership.join(b, &red, &f.registry).unwrap();

        let targets = f.listeners.matching(&red, "fdc3.instrument", &f.membership);
        assert_eq!(handlers(&targets), vec!["b-any", "a-instrument"]);
    }

    #[test]
    fn test_scope_follows_live_membership() {
        let mut f = fixture();
        let a = AppId::new(1);
        let red = ChannelId::new("red");
        let blue = ChannelId::new("blue");

        f.listeners.register(a, ContextFilter::Any, "a");
        f.membership.join(a, &red, &f.registry).unwrap();
        assert_eq!(f.listeners.matching(&red, "x", &f.membership).len(), 1);

        f.membership.join(a, &blue, &f.registry).unwrap();
        assert!(f.listeners.matching(&red, "x", &f.membership).is_empty());
        assert_eq!(f.listeners.matching(&blue, "x", &f.membership).len(), 1);

        f.membership.leave(a);
        assert!(f.listeners.matching(&blue, "x", &f.membership).is_empty());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut f = fixture();
        let a = AppId::new(1);
        let red = ChannelId::new("red");
        f.membership.join(a, &red, &f.registry).unwrap();

        let id = f.listeners.register(a, ContextFilter::Any, "a");
        let flag = f.listeners.get(id).unwrap().active.clone();

        assert!(f.listeners.unsubscribe(id));
        assert!(!f.listeners.unsubscribe(id));
        assert!(!flag.is_active());
        assert!(f.listeners.get(id).is_none());
        assert!(f.listeners.matching(&red, "x", &f.membership).is_empty());
        assert!(f.listeners.is_empty());
    }

    #[test]
    fn test_remove_owner() {
        let mut f = fixture();
        let a = AppId::new(1);
        let b = AppId::new(2);

        f.listeners.register(a, ContextFilter::Any, "a1");
        f.listeners.register(b, ContextFilter::Any, "b1");
        f.listeners.register(a, ContextFilter::Any, "a2");

        assert_eq!(f.listeners.remove_owner(a), 2);
        assert!(f.listeners.owned_by(a).is_empty());
        assert_eq!(handlers(&f.listeners.owned_by(b)), vec!["b1"]);
    }

    #[test]
    fn test_matching_owner_ignores_membership() {
        let mut f = fixture();
        let a = AppId::new(1);

        f.listeners
            .register(a, ContextFilter::of_type("fdc3.instrument"), "a-instrument");
        f.listeners.register(a, ContextFilter::Any, "a-any");

        let targets = f.listeners.matching_owner(a, "fdc3.contact");
        assert_eq!(handlers(&targets), vec!["a-any"]);
    }

    #[test]
    fn test_reserved_id_keeps_registration_order() {
        let mut f = fixture();
        let a = AppId::new(1);

        let early = f.listeners.reserve();
        let late = f.listeners.register(a, ContextFilter::Any, "late");
        assert!(f.listeners.get(early).is_none());

        f.listeners.register_reserved(early, a, ContextFilter::Any, "early");
        assert!(early < late);
        assert_eq!(handlers(&f.listeners.owned_by(a)), vec!["early", "late"]);
    }

    proptest! {
        #[test]
        fn prop_matching_never_crosses_channels(
            channels in proptest::collection::vec(0usize..3, 1..12),
            target in 0usize..3,
        ) {
            let mut f = fixture();
            let ids = ["red", "orange", "yellow"];

            for (i, c) in channels.iter().enumerate() {
                let app = AppId::new(i as u64 + 1);
                f.listeners.register(app, ContextFilter::Any, "l");
                f.membership.join(app, &ChannelId::new(ids[*c]), &f.registry).unwrap();
            }

            let channel = ChannelId::new(ids[target]);
            let targets = f.listeners.matching(&channel, "t", &f.membership);
            let expected = channels.iter().filter(|c| **c == target).count();
            prop_assert_eq!(targets.len(), expected);
            for t in &targets {
                prop_assert!(f.membership.is_member(t.owner, &channel));
            }
            prop_assert!(targets.windows(2).all(|w| w[0].id < w[1].id));
        }
    }
}
