//! Broadcast router - decides who receives a context, then delivers it
//!
//! Routing is split in two phases. Planning runs against [`BusState`] while
//! the bus holds its state lock: it resolves membership, updates the channel
//! cache and collects targets. Dispatch runs after the lock is released and
//! only touches the collected plan, so callbacks may call back into the bus.
//! The bus queues such calls until the fan-out has finished.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ctxbus_core::{AppId, BusError, BusResult, ChannelId, Context, ListenerId};
use ctxbus_state::{ChannelRegistry, JoinOutcome, ListenerRegistry, MembershipTable, Subscription};

/// Listener callback; receives exactly one context per delivery
pub type ContextHandler = Arc<dyn Fn(&Context) + Send + Sync>;

/// Shared mutable state of one bus
pub struct BusState {
    pub registry: ChannelRegistry,
    pub membership: MembershipTable,
    pub listeners: ListenerRegistry<ContextHandler>,
    /// Connected applications and their names
    pub apps: HashMap<AppId, String>,
    next_app: u64,
}

impl BusState {
    pub fn new(registry: ChannelRegistry) -> Self {
        BusState {
            registry,
            membership: MembershipTable::new(),
            listeners: ListenerRegistry::new(),
            apps: HashMap::new(),
            next_app: 1,
        }
    }

    /// Allocate an application id
    pub fn connect(&mut self, name: impl Into<String>) -> AppId {
        let app = AppId::new(self.next_app);
        self.next_app += 1;
        self.apps.insert(app, name.into());
        app
    }

    /// Forget an application: clear its membership, drop its listeners
    ///
    /// Returns how many listeners were deactivated.
    pub fn disconnect(&mut self, app: AppId) -> BusResult<usize> {
        self.ensure_connected(app)?;
        self.apps.remove(&app);
        self.membership.leave(app);
        Ok(self.listeners.remove_owner(app))
    }

    pub fn ensure_connected(&self, app: AppId) -> BusResult<()> {
        if self.apps.contains_key(&app) {
            Ok(())
        } else {
            Err(BusError::AppNotConnected(app))
        }
    }
}

/// Why a delivery happens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Fan-out of a channel broadcast
    Broadcast,
    /// Cached context handed to a listener on join or registration
    Replay,
    /// App-to-app delivery outside any channel
    Direct,
}

/// One planned callback invocation
pub struct Delivery {
    pub target: Subscription<ContextHandler>,
    pub context: Arc<Context>,
    pub kind: DeliveryKind,
}

/// Deliveries collected under the state lock, in delivery order
#[derive(Default)]
pub struct DispatchPlan {
    /// Channel the operation resolved to, if any
    pub channel: Option<ChannelId>,
    pub deliveries: Vec<Delivery>,
}

impl DispatchPlan {
    fn on(channel: ChannelId) -> Self {
        DispatchPlan {
            channel: Some(channel),
            deliveries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

/// What a dispatch did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub channel: Option<ChannelId>,
    /// Callbacks that returned normally
    pub delivered: usize,
    /// Targets deactivated between planning and delivery
    pub skipped: usize,
    pub replayed: usize,
    /// Listeners whose callback panicked
    pub faults: Vec<BusError>,
    /// Listeners that received the context, in delivery order
    pub recipients: Vec<ListenerId>,
    /// Issued from inside a callback; nothing has been delivered yet
    pub deferred: bool,
}

impl DispatchReport {
    pub fn fault_count(&self) -> usize {
        self.faults.len()
    }
}

/// Broadcast router
///
/// Depends on the registry, the membership table and the listener registry;
/// none of them depend on it.
pub struct BroadcastRouter;

impl BroadcastRouter {
    /// Plan a channel broadcast from `app`
    ///
    /// A broadcaster with no current channel yields an empty plan with no
    /// channel: nothing is cached and nobody is reached.
    pub fn plan_broadcast(
        state: &mut BusState,
        app: AppId,
        context: Arc<Context>,
    ) -> BusResult<DispatchPlan> {
        let channel = match state.membership.current(app) {
            Some(channel) => channel.clone(),
            None => return Ok(DispatchPlan::default()),
        };
        Self::plan_channel_broadcast(state, &channel, context)
    }

    /// Plan a broadcast onto `channel`, whatever the sender's membership
    pub fn plan_channel_broadcast(
        state: &mut BusState,
        channel: &ChannelId,
        context: Arc<Context>,
    ) -> BusResult<DispatchPlan> {
        state.registry.put(channel, Arc::clone(&context))?;

        let mut plan = DispatchPlan::on(channel.clone());
        plan.deliveries = state
            .listeners
            .matching(channel, context.context_type(), &state.membership)
            .into_iter()
            .map(|target| Delivery {
                target,
                context: Arc::clone(&context),
                kind: DeliveryKind::Broadcast,
            })
            .collect();
        Ok(plan)
    }

    /// Move `app` onto `channel` and plan the replay of cached contexts to
    /// each of its listeners
    pub fn plan_join(
        state: &mut BusState,
        app: AppId,
        channel: &ChannelId,
    ) -> BusResult<(JoinOutcome, DispatchPlan)> {
        let outcome = state.membership.join(app, channel, &state.registry)?;
        if !outcome.changed() {
            return Ok((outcome, DispatchPlan::on(channel.clone())));
        }

        let mut plan = DispatchPlan::on(channel.clone());
        for target in state.listeners.owned_by(app) {
            if let Some(context) = state.registry.cached_for(channel, &target.filter)? {
                plan.deliveries.push(Delivery {
                    target,
                    context,
                    kind: DeliveryKind::Replay,
                });
            }
        }
        Ok((outcome, plan))
    }

    /// Plan the replay owed to a listener registered while its owner is
    /// already on a channel
    pub fn plan_registration_replay(
        state: &BusState,
        listener: ListenerId,
    ) -> BusResult<DispatchPlan> {
        let Some(target) = state.listeners.get(listener).cloned() else {
            return Ok(DispatchPlan::default());
        };
        let Some(channel) = state.membership.current(target.owner).cloned() else {
            return Ok(DispatchPlan::default());
        };

        let mut plan = DispatchPlan::on(channel.clone());
        if let Some(context) = state.registry.cached_for(&channel, &target.filter)? {
            plan.deliveries.push(Delivery {
                target,
                context,
                kind: DeliveryKind::Replay,
            });
        }
        Ok(plan)
    }

    /// Plan delivery straight to one application's listeners, bypassing
    /// channels and the cache
    pub fn plan_direct(state: &BusState, target_app: AppId, context: Arc<Context>) -> DispatchPlan {
        let deliveries = state
            .listeners
            .matching_owner(target_app, context.context_type())
            .into_iter()
            .map(|target| Delivery {
                target,
                context: Arc::clone(&context),
                kind: DeliveryKind::Direct,
            })
            .collect();

        DispatchPlan {
            channel: None,
            deliveries,
        }
    }

    /// Invoke callbacks in plan order
    ///
    /// A panicking callback is recorded as a fault and delivery continues
    /// with the next target. Targets deactivated since planning are skipped.
    pub fn dispatch(plan: DispatchPlan) -> DispatchReport {
        let mut report = DispatchReport {
            channel: plan.channel,
            ..DispatchReport::default()
        };

        for delivery in plan.deliveries {
            let target = &delivery.target;
            if !target.is_active() {
                report.skipped += 1;
                continue;
            }

            tracing::trace!(
                listener = %target.id,
                owner = %target.owner,
                context_type = delivery.context.context_type(),
                kind = ?delivery.kind,
                "delivering context"
            );

            let handler = Arc::clone(&target.handler);
            let context = Arc::clone(&delivery.context);
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&context)));

            match result {
                Ok(()) => {
                    report.delivered += 1;
                    report.recipients.push(target.id);
                    if delivery.kind == DeliveryKind::Replay {
                        report.replayed += 1;
                    }
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!(
                        listener = %target.id,
                        owner = %target.owner,
                        context_type = delivery.context.context_type(),
                        "listener callback faulted: {}",
                        reason
                    );
                    report.faults.push(BusError::ListenerCallbackFault {
                        listener: target.id,
                        owner: target.owner,
                        reason,
                    });
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxbus_core::{fdc3_system_channels, ContextFilter};
    use parking_lot::Mutex;

    fn state() -> BusState {
        BusState::new(ChannelRegistry::new(fdc3_system_channels()).unwrap())
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> ContextHandler {
        let log = Arc::clone(log);
        Arc::new(move |ctx: &Context| log.lock().push(format!("{}:{}", tag, ctx.context_type())))
    }

    fn ctx(t: &str) -> Arc<Context> {
        Arc::new(Context::new(t))
    }

    #[test]
    fn test_broadcast_without_channel_is_noop() {
        let mut state = state();
        let a = state.connect("a");

        let plan = BroadcastRouter::plan_broadcast(&mut state, a, ctx("fdc3.instrument")).unwrap();
        assert!(plan.channel.is_none());
        assert!(plan.is_empty());
        for channel in state.registry.list_channels() {
            assert!(state.registry.latest(&channel.id).unwrap().is_none());
        }
    }

    #[test]
    fn test_broadcast_caches_and_targets_channel_members() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let b = state.connect("b");
        let c = state.connect("c");
        let red = ChannelId::new("red");

        state.listeners.register(a, ContextFilter::Any, recording(&log, "a"));
        state.listeners.register(c, ContextFilter::Any, recording(&log, "c"));
        state.membership.join(a, &red, &state.registry).unwrap();
        state.membership.join(b, &red, &state.registry).unwrap();
        state
            .membership
            .join(c, &ChannelId::new("blue"), &state.registry)
            .unwrap();

        let plan = BroadcastRouter::plan_broadcast(&mut state, b, ctx("fdc3.instrument")).unwrap();
        assert_eq!(plan.channel, Some(red.clone()));
        let report = BroadcastRouter::dispatch(plan);

        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec!["a:fdc3.instrument".to_string()]);
        assert!(state.registry.get(&red, "fdc3.instrument").unwrap().is_some());
    }

    #[test]
    fn test_channel_broadcast_ignores_sender_membership() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");

        state.listeners.register(a, ContextFilter::Any, recording(&log, "a"));
        state.membership.join(a, &red, &state.registry).unwrap();

        let plan =
            BroadcastRouter::plan_channel_broadcast(&mut state, &red, ctx("fdc3.contact")).unwrap();
        BroadcastRouter::dispatch(plan);
        assert_eq!(*log.lock(), vec!["a:fdc3.contact".to_string()]);

        let unknown = BroadcastRouter::plan_channel_broadcast(
            &mut state,
            &ChannelId::new("mauve"),
            ctx("fdc3.contact"),
        );
        let Err(err) = unknown else {
            panic!("broadcast onto an unknown channel was planned");
        };
        assert!(matches!(err, BusError::UnknownChannel(_)));
    }

    #[test]
    fn test_join_replays_matching_cache_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");

        state.registry.put(&red, ctx("fdc3.instrument")).unwrap();
        state.registry.put(&red, ctx("fdc3.contact")).unwrap();

        state
            .listeners
            .register(a, ContextFilter::of_type("fdc3.contact"), recording(&log, "contact"));
        state
            .listeners
            .register(a, ContextFilter::of_type("fdc3.position"), recording(&log, "position"));
        state.listeners.register(a, ContextFilter::Any, recording(&log, "any"));
        state
            .listeners
            .register(a, ContextFilter::of_type("fdc3.instrument"), recording(&log, "instrument"));

        let (outcome, plan) = BroadcastRouter::plan_join(&mut state, a, &red).unwrap();
        assert!(outcome.changed());
        let report = BroadcastRouter::dispatch(plan);

        assert_eq!(report.replayed, 3);
        assert_eq!(
            *log.lock(),
            vec![
                "contact:fdc3.contact".to_string(),
                "any:fdc3.contact".to_string(),
                "instrument:fdc3.instrument".to_string(),
            ]
        );
    }

    #[test]
    fn test_join_same_channel_replays_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");

        state.registry.put(&red, ctx("fdc3.instrument")).unwrap();
        state.listeners.register(a, ContextFilter::Any, recording(&log, "a"));

        let (_, first) = BroadcastRouter::plan_join(&mut state, a, &red).unwrap();
        assert_eq!(first.len(), 1);
        let (outcome, second) = BroadcastRouter::plan_join(&mut state, a, &red).unwrap();
        assert_eq!(outcome, JoinOutcome::AlreadyMember);
        assert!(second.is_empty());
    }

    #[test]
    fn test_registration_replay() {
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");
        let noop: ContextHandler = Arc::new(|_: &Context| {});

        state.registry.put(&red, ctx("fdc3.instrument")).unwrap();
        let off_channel = state
            .listeners
            .register(a, ContextFilter::Any, Arc::clone(&noop));
        assert!(BroadcastRouter::plan_registration_replay(&state, off_channel)
            .unwrap()
            .is_empty());

        state.membership.join(a, &red, &state.registry).unwrap();
        let typed = state
            .listeners
            .register(a, ContextFilter::of_type("fdc3.instrument"), Arc::clone(&noop));
        let other = state
            .listeners
            .register(a, ContextFilter::of_type("fdc3.contact"), noop);

        assert_eq!(
            BroadcastRouter::plan_registration_replay(&state, typed)
                .unwrap()
                .len(),
            1
        );
        assert!(BroadcastRouter::plan_registration_replay(&state, other)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_faulting_callback_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");

        state.listeners.register(
            a,
            ContextFilter::Any,
            Arc::new(|_: &Context| panic!("listener exploded")),
        );
        state.listeners.register(a, ContextFilter::Any, recording(&log, "after"));
        state.membership.join(a, &red, &state.registry).unwrap();

        let plan = BroadcastRouter::plan_broadcast(&mut state, a, ctx("fdc3.instrument")).unwrap();
        let report = BroadcastRouter::dispatch(plan);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.fault_count(), 1);
        assert!(matches!(
            &report.faults[0],
            BusError::ListenerCallbackFault { reason, .. } if reason == "listener exploded"
        ));
        assert_eq!(*log.lock(), vec!["after:fdc3.instrument".to_string()]);
    }

    #[test]
    fn test_deactivated_target_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");

        let id = state.listeners.register(a, ContextFilter::Any, recording(&log, "a"));
        state.membership.join(a, &red, &state.registry).unwrap();

        let plan = BroadcastRouter::plan_broadcast(&mut state, a, ctx("fdc3.instrument")).unwrap();
        state.listeners.unsubscribe(id);
        let report = BroadcastRouter::dispatch(plan);

        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_direct_delivery_bypasses_channels() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let a = state.connect("a");
        let b = state.connect("b");

        state
            .listeners
            .register(b, ContextFilter::of_type("fdc3.instrument"), recording(&log, "b"));

        let plan = BroadcastRouter::plan_direct(&state, b, ctx("fdc3.instrument"));
        let report = BroadcastRouter::dispatch(plan);
        assert_eq!(report.delivered, 1);
        assert!(BroadcastRouter::plan_direct(&state, a, ctx("fdc3.instrument")).is_empty());
        for channel in state.registry.list_channels() {
            assert!(state.registry.latest(&channel.id).unwrap().is_none());
        }
    }

    #[test]
    fn test_disconnect_clears_membership_and_listeners() {
        let mut state = state();
        let a = state.connect("a");
        let red = ChannelId::new("red");
        state
            .listeners
            .register(a, ContextFilter::Any, Arc::new(|_: &Context| {}));
        state.membership.join(a, &red, &state.registry).unwrap();

        assert_eq!(state.disconnect(a).unwrap(), 1);
        assert!(state.membership.current(a).is_none());
        assert!(state.listeners.is_empty());
        assert_eq!(state.disconnect(a), Err(BusError::AppNotConnected(a)));
    }
}
