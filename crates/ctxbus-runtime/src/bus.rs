//! Context bus - the single owner of one bus's state
//!
//! Operations are serialized by a re-entrant dispatch turn, so fan-outs of
//! two operations never interleave. The state lock is released before any
//! callback runs, and a callback may call back into the bus from the same
//! thread. A mutating call made that way is checked, queued and applied
//! once the fan-out in progress has finished, in the order the calls were
//! made. Reads and `unsubscribe` take effect at once. A callback must not
//! block on a bus operation issued from another thread.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use ctxbus_core::{
    AppId, BusError, BusResult, ChannelDescriptor, ChannelId, Context, ContextFilter,
    ImplementationMetadata, ListenerId,
};
use ctxbus_state::{ChannelRegistry, JoinOutcome};

use crate::{BroadcastRouter, BusConfig, BusState, ContextHandler, DispatchPlan, DispatchReport};

/// Bus counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub apps_connected: u64,
    pub apps_disconnected: u64,
    pub joins: u64,
    pub leaves: u64,
    pub broadcasts: u64,
    /// Broadcasts from applications on no channel
    pub idle_broadcasts: u64,
    pub direct_sends: u64,
    pub deliveries: u64,
    pub replays: u64,
    pub skipped_deliveries: u64,
    pub callback_faults: u64,
    pub listeners_added: u64,
    pub listeners_removed: u64,
    /// Calls made from inside a callback and applied after its fan-out
    pub queued_operations: u64,
}

impl BusStats {
    fn record(&mut self, report: &DispatchReport) {
        self.deliveries += report.delivered as u64;
        self.replays += report.replayed as u64;
        self.skipped_deliveries += report.skipped as u64;
        self.callback_faults += report.faults.len() as u64;
    }
}

/// A mutating call made from inside a listener callback
enum QueuedOp {
    Join { app: AppId, channel: ChannelId },
    Leave { app: AppId },
    AddListener {
        id: ListenerId,
        app: AppId,
        filter: ContextFilter,
        handler: ContextHandler,
    },
    Broadcast { app: AppId, context: Context },
    BroadcastOn {
        app: AppId,
        channel: ChannelId,
        context: Context,
    },
    DeliverTo { target: AppId, context: Context },
    Disconnect { app: AppId },
}

impl QueuedOp {
    fn name(&self) -> &'static str {
        match self {
            QueuedOp::Join { .. } => "join",
            QueuedOp::Leave { .. } => "leave",
            QueuedOp::AddListener { .. } => "add_listener",
            QueuedOp::Broadcast { .. } => "broadcast",
            QueuedOp::BroadcastOn { .. } => "channel broadcast",
            QueuedOp::DeliverTo { .. } => "direct delivery",
            QueuedOp::Disconnect { .. } => "disconnect",
        }
    }
}

/// Fan-out progress of the thread holding the dispatch turn
#[derive(Default)]
struct DispatchQueue {
    /// Callbacks are running
    dispatching: bool,
    /// The outermost operation is applying queued calls
    draining: bool,
    ops: VecDeque<QueuedOp>,
}

fn reject(app: AppId, operation: &'static str) -> impl FnOnce(BusError) -> BusError {
    move |e| {
        tracing::warn!(app = %app, error = %e, "{} rejected", operation);
        e
    }
}

fn deferred_report() -> DispatchReport {
    DispatchReport {
        deferred: true,
        ..DispatchReport::default()
    }
}

/// Context bus instance
pub struct ContextBus {
    config: BusConfig,
    /// Serializes operations; re-entrant for callbacks
    turn: ReentrantMutex<()>,
    state: Mutex<BusState>,
    queue: Mutex<DispatchQueue>,
    stats: Mutex<BusStats>,
}

impl ContextBus {
    /// Create a bus from configuration
    pub fn new(config: BusConfig) -> BusResult<Self> {
        config.validate()?;
        let registry = ChannelRegistry::new(config.channels.clone())?;

        tracing::debug!(
            channels = registry.len(),
            provider = %config.provider,
            "context bus created"
        );

        Ok(ContextBus {
            config,
            turn: ReentrantMutex::new(()),
            state: Mutex::new(BusState::new(registry)),
            queue: Mutex::new(DispatchQueue::default()),
            stats: Mutex::new(BusStats::default()),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Implementation metadata (`getInfo`)
    pub fn info(&self) -> ImplementationMetadata {
        self.config.implementation_metadata()
    }

    pub fn stats(&self) -> BusStats {
        self.stats.lock().clone()
    }

    // ------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------

    /// Register a new application; it starts on no channel
    pub fn connect(&self, name: impl Into<String>) -> AppId {
        let _turn = self.turn.lock();
        let name = name.into();
        let app = self.state.lock().connect(name.clone());
        self.stats.lock().apps_connected += 1;

        tracing::debug!(app = %app, name = %name, "application connected");
        app
    }

    /// Remove an application, clearing its membership and listeners
    pub fn disconnect(&self, app: AppId) -> BusResult<()> {
        let _turn = self.turn.lock();
        if self.in_fan_out() {
            self.state.lock().ensure_connected(app)?;
            self.enqueue(QueuedOp::Disconnect { app });
            return Ok(());
        }
        self.disconnect_now(app)
    }

    fn disconnect_now(&self, app: AppId) -> BusResult<()> {
        let removed = self.state.lock().disconnect(app)?;

        let mut stats = self.stats.lock();
        stats.apps_disconnected += 1;
        stats.listeners_removed += removed as u64;

        tracing::debug!(app = %app, listeners = removed, "application disconnected");
        Ok(())
    }

    pub fn is_connected(&self, app: AppId) -> bool {
        self.state.lock().apps.contains_key(&app)
    }

    pub fn app_name(&self, app: AppId) -> Option<String> {
        self.state.lock().apps.get(&app).cloned()
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// The fixed system channels, in published order
    pub fn system_channels(&self) -> Vec<ChannelDescriptor> {
        self.state.lock().registry.list_channels()
    }

    /// Move `app` onto `channel`, replaying cached contexts to its listeners
    ///
    /// From inside a callback the join is queued and
    /// [`JoinOutcome::Deferred`] is returned.
    pub fn join(&self, app: AppId, channel: &ChannelId) -> BusResult<JoinOutcome> {
        let _turn = self.turn.lock();
        if self.in_fan_out() {
            {
                let state = self.state.lock();
                state.ensure_connected(app)?;
                if !state.registry.contains(channel) {
                    return Err(reject(app, "join")(BusError::UnknownChannel(channel.clone())));
                }
            }
            self.enqueue(QueuedOp::Join {
                app,
                channel: channel.clone(),
            });
            return Ok(JoinOutcome::Deferred);
        }
        self.join_now(app, channel)
    }

    fn join_now(&self, app: AppId, channel: &ChannelId) -> BusResult<JoinOutcome> {
        let (outcome, plan) = {
            let mut state = self.state.lock();
            state.ensure_connected(app)?;
            BroadcastRouter::plan_join(&mut state, app, channel).map_err(reject(app, "join"))?
        };

        if let JoinOutcome::Joined { previous } = &outcome {
            tracing::debug!(
                app = %app,
                channel = %channel,
                previous = ?previous,
                replays = plan.len(),
                "joined channel"
            );
            self.stats.lock().joins += 1;
        }

        self.run(plan);
        Ok(outcome)
    }

    /// Clear `app`'s membership; returns the channel it left
    ///
    /// From inside a callback the leave is queued and `None` is returned.
    pub fn leave(&self, app: AppId) -> BusResult<Option<ChannelId>> {
        let _turn = self.turn.lock();
        if self.in_fan_out() {
            self.state.lock().ensure_connected(app)?;
            self.enqueue(QueuedOp::Leave { app });
            return Ok(None);
        }
        self.leave_now(app)
    }

    fn leave_now(&self, app: AppId) -> BusResult<Option<ChannelId>> {
        let previous = {
            let mut state = self.state.lock();
            state.ensure_connected(app)?;
            state.membership.leave(app)
        };

        if let Some(channel) = &previous {
            tracing::debug!(app = %app, channel = %channel, "left channel");
            self.stats.lock().leaves += 1;
        }
        Ok(previous)
    }

    /// Descriptor of `app`'s current channel
    pub fn current_channel(&self, app: AppId) -> BusResult<Option<ChannelDescriptor>> {
        let state = self.state.lock();
        state.ensure_connected(app)?;
        Ok(state
            .membership
            .current(app)
            .and_then(|c| state.registry.descriptor(c))
            .cloned())
    }

    /// Cached context on `app`'s current channel
    ///
    /// With a type, the cached context of that type; without one, the most
    /// recent context of any type. `None` when `app` is on no channel.
    pub fn current_context(&self, app: AppId, context_type: Option<&str>) -> BusResult<Option<Context>> {
        let state = self.state.lock();
        state.ensure_connected(app)?;
        let Some(channel) = state.membership.current(app) else {
            return Ok(None);
        };
        let cached = state
            .registry
            .cached_for(channel, &ContextFilter::from(context_type))?;
        Ok(cached.map(|c| (*c).clone()))
    }

    /// Cached context on any channel, by filter
    pub fn channel_context(&self, channel: &ChannelId, filter: &ContextFilter) -> BusResult<Option<Context>> {
        let state = self.state.lock();
        let cached = state.registry.cached_for(channel, filter)?;
        Ok(cached.map(|c| (*c).clone()))
    }

    /// Applications currently on `channel`
    pub fn members(&self, channel: &ChannelId) -> BusResult<Vec<AppId>> {
        let state = self.state.lock();
        if !state.registry.contains(channel) {
            return Err(BusError::UnknownChannel(channel.clone()));
        }
        Ok(state.membership.members(channel))
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a listener for `app`
    ///
    /// If `app` is already on a channel holding a matching cached context,
    /// the listener receives it before this call returns. From inside a
    /// callback the id is allocated at once and the registration is queued.
    pub fn add_listener(
        &self,
        app: AppId,
        filter: ContextFilter,
        handler: ContextHandler,
    ) -> BusResult<ListenerId> {
        let _turn = self.turn.lock();
        if self.in_fan_out() {
            let id = {
                let mut state = self.state.lock();
                state.ensure_connected(app)?;
                state.listeners.reserve()
            };
            self.stats.lock().listeners_added += 1;
            self.enqueue(QueuedOp::AddListener {
                id,
                app,
                filter,
                handler,
            });
            return Ok(id);
        }
        self.add_listener_now(app, filter, handler, None)
    }

    fn add_listener_now(
        &self,
        app: AppId,
        filter: ContextFilter,
        handler: ContextHandler,
        reserved: Option<ListenerId>,
    ) -> BusResult<ListenerId> {
        let (id, plan) = {
            let mut state = self.state.lock();
            state.ensure_connected(app)?;
            let id = match reserved {
                Some(id) => {
                    state.listeners.register_reserved(id, app, filter.clone(), handler);
                    id
                }
                None => state.listeners.register(app, filter.clone(), handler),
            };
            let plan = BroadcastRouter::plan_registration_replay(&state, id)?;
            (id, plan)
        };

        tracing::debug!(app = %app, listener = %id, filter = %filter, "listener added");
        if reserved.is_none() {
            self.stats.lock().listeners_added += 1;
        }

        self.run(plan);
        Ok(id)
    }

    /// Deactivate a listener; idempotent
    ///
    /// Takes effect immediately, including for a fan-out already in
    /// progress on this thread and for a registration still queued.
    /// Returns whether the listener was active.
    pub fn unsubscribe(&self, listener: ListenerId) -> bool {
        let active = self.state.lock().listeners.unsubscribe(listener);
        let removed = active || self.cancel_queued_listener(listener);
        if removed {
            tracing::debug!(listener = %listener, "listener removed");
            self.stats.lock().listeners_removed += 1;
        }
        removed
    }

    fn cancel_queued_listener(&self, listener: ListenerId) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.ops.len();
        queue
            .ops
            .retain(|op| !matches!(op, QueuedOp::AddListener { id, .. } if *id == listener));
        queue.ops.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    /// Broadcast `context` on `app`'s current channel
    ///
    /// Caches the context and delivers it to every matching listener on the
    /// channel. With no current channel this is a successful no-op.
    /// Listener faults are reported, never returned as errors. From inside
    /// a callback the broadcast is queued and the report is marked
    /// `deferred`.
    pub fn broadcast(&self, app: AppId, context: Context) -> BusResult<DispatchReport> {
        context.validate().map_err(reject(app, "broadcast"))?;

        let _turn = self.turn.lock();
        if self.in_fan_out() {
            self.state.lock().ensure_connected(app)?;
            self.enqueue(QueuedOp::Broadcast { app, context });
            return Ok(deferred_report());
        }
        self.broadcast_now(app, context)
    }

    fn broadcast_now(&self, app: AppId, context: Context) -> BusResult<DispatchReport> {
        let plan = {
            let mut state = self.state.lock();
            state.ensure_connected(app)?;
            BroadcastRouter::plan_broadcast(&mut state, app, Arc::new(context))?
        };

        {
            let mut stats = self.stats.lock();
            stats.broadcasts += 1;
            if plan.channel.is_none() {
                stats.idle_broadcasts += 1;
            }
        }

        match &plan.channel {
            Some(channel) => tracing::debug!(
                app = %app,
                channel = %channel,
                targets = plan.len(),
                "broadcast"
            ),
            None => tracing::debug!(app = %app, "broadcast outside any channel dropped"),
        }

        Ok(self.run(plan))
    }

    /// Broadcast `context` from `app` onto `channel` without joining it
    ///
    /// Caches and fans out exactly like a broadcast from a member; `app`'s
    /// own membership is left untouched.
    pub fn broadcast_on(&self, app: AppId, channel: &ChannelId, context: Context) -> BusResult<DispatchReport> {
        context.validate().map_err(reject(app, "channel broadcast"))?;

        let _turn = self.turn.lock();
        if self.in_fan_out() {
            {
                let state = self.state.lock();
                state.ensure_connected(app)?;
                if !state.registry.contains(channel) {
                    return Err(reject(app, "channel broadcast")(BusError::UnknownChannel(
                        channel.clone(),
                    )));
                }
            }
            self.enqueue(QueuedOp::BroadcastOn {
                app,
                channel: channel.clone(),
                context,
            });
            return Ok(deferred_report());
        }
        self.broadcast_on_now(app, channel, context)
    }

    fn broadcast_on_now(&self, app: AppId, channel: &ChannelId, context: Context) -> BusResult<DispatchReport> {
        let plan = {
            let mut state = self.state.lock();
            state.ensure_connected(app)?;
            BroadcastRouter::plan_channel_broadcast(&mut state, channel, Arc::new(context))
                .map_err(reject(app, "channel broadcast"))?
        };

        tracing::debug!(app = %app, channel = %channel, targets = plan.len(), "channel broadcast");
        self.stats.lock().broadcasts += 1;

        Ok(self.run(plan))
    }

    /// Deliver `context` straight to `target`'s matching listeners
    ///
    /// Bypasses channel membership and the channel cache.
    pub fn deliver_to(&self, target: AppId, context: Context) -> BusResult<DispatchReport> {
        context.validate().map_err(reject(target, "direct delivery"))?;

        let _turn = self.turn.lock();
        if self.in_fan_out() {
            self.state.lock().ensure_connected(target)?;
            self.enqueue(QueuedOp::DeliverTo { target, context });
            return Ok(deferred_report());
        }
        self.deliver_to_now(target, context)
    }

    fn deliver_to_now(&self, target: AppId, context: Context) -> BusResult<DispatchReport> {
        let plan = {
            let state = self.state.lock();
            state.ensure_connected(target)?;
            BroadcastRouter::plan_direct(&state, target, Arc::new(context))
        };

        tracing::debug!(app = %target, targets = plan.len(), "direct delivery");
        self.stats.lock().direct_sends += 1;

        Ok(self.run(plan))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Whether callbacks are running on the thread holding the turn
    ///
    /// Only meaningful with the turn held.
    fn in_fan_out(&self) -> bool {
        self.queue.lock().dispatching
    }

    fn enqueue(&self, op: QueuedOp) {
        tracing::debug!(operation = op.name(), "operation queued behind fan-out");
        self.stats.lock().queued_operations += 1;
        self.queue.lock().ops.push_back(op);
    }

    /// Dispatch a plan with the state lock released, record the outcome,
    /// then apply whatever the callbacks queued
    fn run(&self, plan: DispatchPlan) -> DispatchReport {
        let report = if plan.is_empty() {
            DispatchReport {
                channel: plan.channel,
                ..DispatchReport::default()
            }
        } else {
            self.queue.lock().dispatching = true;
            let report = BroadcastRouter::dispatch(plan);
            self.queue.lock().dispatching = false;
            self.stats.lock().record(&report);
            report
        };
        self.drain();
        report
    }

    /// Apply queued calls, oldest first
    ///
    /// Only the outermost operation drains. A queued call that fans out
    /// queues its own callbacks' calls behind the ones already waiting.
    fn drain(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.draining || queue.ops.is_empty() {
                return;
            }
            queue.draining = true;
        }

        loop {
            let next = self.queue.lock().ops.pop_front();
            let Some(op) = next else {
                break;
            };
            let operation = op.name();
            if let Err(e) = self.apply(op) {
                tracing::warn!(operation, error = %e, "queued operation failed");
            }
        }

        self.queue.lock().draining = false;
    }

    fn apply(&self, op: QueuedOp) -> BusResult<()> {
        match op {
            QueuedOp::Join { app, channel } => self.join_now(app, &channel).map(drop),
            QueuedOp::Leave { app } => self.leave_now(app).map(drop),
            QueuedOp::AddListener {
                id,
                app,
                filter,
                handler,
            } => self.add_listener_now(app, filter, handler, Some(id)).map(drop),
            QueuedOp::Broadcast { app, context } => self.broadcast_now(app, context).map(drop),
            QueuedOp::BroadcastOn {
                app,
                channel,
                context,
            } => self.broadcast_on_now(app, &channel, context).map(drop),
            QueuedOp::DeliverTo { target, context } => self.deliver_to_now(target, context).map(drop),
            QueuedOp::Disconnect { app } => self.disconnect_now(app),
        }
    }
}
