//! Bus Fuzzer - Seeded operation sequences checked against a reference model
//!
//! Every operation is applied both to a real [`ContextBus`] and to
//! [`BusModel`], a direct restatement of the routing rules:
//! - broadcasts cache and reach listeners whose owner is on the channel
//! - a membership-changing join replays the cache to the joiner's listeners
//! - registering while on a channel replays to the new listener
//! - unsubscribed listeners never receive anything again
//!
//! After the run each listener's delivery log must equal the model's.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use ctxbus_core::{AppId, BusResult, ChannelId, Context, ContextFilter, ListenerId};
use ctxbus_runtime::{BusConfig, ContextBus, ContextHandler};

/// Context types the fuzzer draws from
pub const FUZZ_CONTEXT_TYPES: [&str; 3] = ["fdc3.instrument", "fdc3.contact", "fdc3.position"];

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of connected applications
    pub app_count: usize,
    /// Number of system channels
    pub channel_count: usize,
    /// Number of operations to generate
    pub op_count: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            app_count: 4,
            channel_count: 3,
            op_count: 500,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            app_count: 3,
            channel_count: 2,
            op_count: 100,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            app_count: 8,
            channel_count: 6,
            op_count: 5000,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One bus operation
///
/// Indices are reduced modulo the number of apps, channels, context types
/// or registered listeners when applied, so any values are valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusOp {
    Join { app: usize, channel: usize },
    Leave { app: usize },
    /// `None` registers a wildcard listener
    Listen { app: usize, context_type: Option<usize> },
    Unsubscribe { listener: usize },
    Broadcast { app: usize, context_type: usize },
    BroadcastOn { app: usize, channel: usize, context_type: usize },
}

impl BusOp {
    /// Draw a random operation
    pub fn random(rng: &mut impl Rng, config: &FuzzerConfig) -> Self {
        let app = rng.gen_range(0..config.app_count.max(1));
        let channel = rng.gen_range(0..config.channel_count.max(1));
        let context_type = rng.gen_range(0..FUZZ_CONTEXT_TYPES.len());

        match rng.gen_range(0..10) {
            0 | 1 => BusOp::Join { app, channel },
            2 => BusOp::Leave { app },
            3 | 4 => BusOp::Listen {
                app,
                context_type: if rng.gen_bool(0.3) { None } else { Some(context_type) },
            },
            5 => BusOp::Unsubscribe {
                listener: rng.gen_range(0..64),
            },
            6 => BusOp::BroadcastOn {
                app,
                channel,
                context_type,
            },
            _ => BusOp::Broadcast { app, context_type },
        }
    }
}

#[derive(Clone, Debug)]
struct ModelListener {
    owner: usize,
    context_type: Option<String>,
    active: bool,
    expected: Vec<Context>,
}

impl ModelListener {
    fn matches(&self, context_type: &str) -> bool {
        self.context_type.as_deref().map_or(true, |t| t == context_type)
    }
}

/// Reference model of the routing rules
#[derive(Clone, Debug, Default)]
pub struct BusModel {
    membership: HashMap<usize, usize>,
    cache: HashMap<usize, HashMap<String, (Context, u64)>>,
    seq: u64,
    listeners: Vec<ModelListener>,
}

impl BusModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached_for(&self, channel: usize, context_type: &Option<String>) -> Option<Context> {
        let cache = self.cache.get(&channel)?;
        match context_type {
            Some(t) => cache.get(t).map(|(c, _)| c.clone()),
            None => cache
                .values()
                .max_by_key(|(_, seq)| *seq)
                .map(|(c, _)| c.clone()),
        }
    }

    pub fn join(&mut self, app: usize, channel: usize) {
        if self.membership.get(&app) == Some(&channel) {
            return;
        }
        self.membership.insert(app, channel);

        let replays: Vec<(usize, Context)> = self
            .listeners
            .iter()
            .enumerate()
            .filter(|(_, l)| l.active && l.owner == app)
            .filter_map(|(i, l)| self.cached_for(channel, &l.context_type).map(|c| (i, c)))
            .collect();
        for (i, context) in replays {
            self.listeners[i].expected.push(context);
        }
    }

    pub fn leave(&mut self, app: usize) {
        self.membership.remove(&app);
    }

    /// Register a listener; returns its index
    pub fn listen(&mut self, app: usize, context_type: Option<String>) -> usize {
        let replay = self
            .membership
            .get(&app)
            .and_then(|&channel| self.cached_for(channel, &context_type));

        self.listeners.push(ModelListener {
            owner: app,
            context_type,
            active: true,
            expected: replay.into_iter().collect(),
        });
        self.listeners.len() - 1
    }

    pub fn unsubscribe(&mut self, listener: usize) {
        if let Some(l) = self.listeners.get_mut(listener) {
            l.active = false;
        }
    }

    pub fn broadcast(&mut self, app: usize, context: Context) {
        if let Some(&channel) = self.membership.get(&app) {
            self.broadcast_on(channel, context);
        }
    }

    pub fn broadcast_on(&mut self, channel: usize, context: Context) {
        self.seq += 1;
        self.cache
            .entry(channel)
            .or_default()
            .insert(context.context_type().to_string(), (context.clone(), self.seq));

        for listener in &mut self.listeners {
            let on_channel = self.membership.get(&listener.owner) == Some(&channel);
            if listener.active && on_channel && listener.matches(context.context_type()) {
                listener.expected.push(context.clone());
            }
        }
    }

    /// Deliveries the model expects for listener `index`
    pub fn expected(&self, index: usize) -> &[Context] {
        self.listeners
            .get(index)
            .map(|l| l.expected.as_slice())
            .unwrap_or(&[])
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Result of a fuzz run
#[derive(Clone, Debug, Default)]
pub struct FuzzResult {
    pub ops_applied: usize,
    pub deliveries: usize,
    pub listeners: usize,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

struct FuzzListener {
    id: ListenerId,
    received: Arc<Mutex<Vec<Context>>>,
}

/// Bus fuzzer
pub struct BusFuzzer {
    config: FuzzerConfig,
    bus: ContextBus,
    apps: Vec<AppId>,
    channels: Vec<ChannelId>,
    listeners: Vec<FuzzListener>,
    model: BusModel,
    rng: StdRng,
    sent: u64,
}

impl BusFuzzer {
    /// Create a fuzzer over a fresh bus
    pub fn new(config: FuzzerConfig) -> BusResult<Self> {
        let bus = ContextBus::new(BusConfig::minimal(config.channel_count.max(1)))?;
        let apps = (0..config.app_count.max(1))
            .map(|i| bus.connect(format!("fuzz-{}", i)))
            .collect();
        let channels = bus.system_channels().into_iter().map(|c| c.id).collect();
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(BusFuzzer {
            config,
            bus,
            apps,
            channels,
            listeners: Vec::new(),
            model: BusModel::new(),
            rng,
            sent: 0,
        })
    }

    pub fn bus(&self) -> &ContextBus {
        &self.bus
    }

    /// Generate and apply `op_count` random operations, then check
    pub fn run(&mut self) -> BusResult<FuzzResult> {
        let ops: Vec<BusOp> = (0..self.config.op_count)
            .map(|_| BusOp::random(&mut self.rng, &self.config))
            .collect();
        self.run_ops(&ops)
    }

    /// Apply `ops` in order, then check
    pub fn run_ops(&mut self, ops: &[BusOp]) -> BusResult<FuzzResult> {
        for op in ops {
            self.apply(op)?;
        }
        let mut result = self.check();
        result.ops_applied = ops.len();
        Ok(result)
    }

    /// Apply one operation to the bus and the model
    pub fn apply(&mut self, op: &BusOp) -> BusResult<()> {
        let app_count = self.apps.len();
        let channel_count = self.channels.len();

        match *op {
            BusOp::Join { app, channel } => {
                let (app, channel) = (app % app_count, channel % channel_count);
                self.bus.join(self.apps[app], &self.channels[channel])?;
                self.model.join(app, channel);
            }
            BusOp::Leave { app } => {
                let app = app % app_count;
                self.bus.leave(self.apps[app])?;
                self.model.leave(app);
            }
            BusOp::Listen { app, context_type } => {
                let app = app % app_count;
                let context_type =
                    context_type.map(|t| FUZZ_CONTEXT_TYPES[t % FUZZ_CONTEXT_TYPES.len()].to_string());
                let filter = match &context_type {
                    Some(t) => ContextFilter::of_type(t.clone()),
                    None => ContextFilter::Any,
                };

                let received = Arc::new(Mutex::new(Vec::new()));
                let sink = Arc::clone(&received);
                let handler: ContextHandler = Arc::new(move |ctx: &Context| sink.lock().push(ctx.clone()));
                let id = self.bus.add_listener(self.apps[app], filter, handler)?;

                self.listeners.push(FuzzListener { id, received });
                self.model.listen(app, context_type);
            }
            BusOp::Unsubscribe { listener } => {
                if self.listeners.is_empty() {
                    return Ok(());
                }
                let index = listener % self.listeners.len();
                self.bus.unsubscribe(self.listeners[index].id);
                self.model.unsubscribe(index);
            }
            BusOp::Broadcast { app, context_type } => {
                let app = app % app_count;
                let context = self.next_context(context_type);
                self.bus.broadcast(self.apps[app], context.clone())?;
                self.model.broadcast(app, context);
            }
            BusOp::BroadcastOn {
                app,
                channel,
                context_type,
            } => {
                let (app, channel) = (app % app_count, channel % channel_count);
                let context = self.next_context(context_type);
                self.bus
                    .broadcast_on(self.apps[app], &self.channels[channel], context.clone())?;
                self.model.broadcast_on(channel, context);
            }
        }
        Ok(())
    }

    fn next_context(&mut self, context_type: usize) -> Context {
        self.sent += 1;
        Context::new(FUZZ_CONTEXT_TYPES[context_type % FUZZ_CONTEXT_TYPES.len()])
            .with("seq", json!(self.sent))
    }

    /// Compare every listener's log with the model
    pub fn check(&self) -> FuzzResult {
        let mut result = FuzzResult {
            listeners: self.listeners.len(),
            ..FuzzResult::default()
        };

        for (index, listener) in self.listeners.iter().enumerate() {
            let received = listener.received.lock();
            result.deliveries += received.len();

            let expected = self.model.expected(index);
            if received.as_slice() != expected {
                result.violations.push(format!(
                    "{}: expected {} deliveries, got {}",
                    listener.id,
                    expected.len(),
                    received.len()
                ));
            }
        }

        let faults = self.bus.stats().callback_faults;
        if faults > 0 {
            result
                .violations
                .push(format!("{} listener faults during fuzzing", faults));
        }
        result
    }
}
