//! Channel registry - the fixed channel set and its context cache

use std::collections::HashMap;
use std::sync::Arc;

use ctxbus_core::{BusError, BusResult, ChannelDescriptor, ChannelId, Context, ContextFilter};

/// A cached context with its store sequence number
#[derive(Clone, Debug)]
pub struct CachedContext {
    pub context: Arc<Context>,
    /// Registry-wide store order; higher is newer
    pub seq: u64,
}

/// One channel and its cache, keyed by context type
#[derive(Debug)]
struct ChannelSlot {
    descriptor: ChannelDescriptor,
    cache: HashMap<String, CachedContext>,
}

impl ChannelSlot {
    fn latest(&self) -> Option<&CachedContext> {
        self.cache.values().max_by_key(|c| c.seq)
    }
}

/// Channel registry - created once, never grows or shrinks
#[derive(Debug)]
pub struct ChannelRegistry {
    /// Channels in published order
    slots: Vec<ChannelSlot>,
    /// Channel ID -> slot index
    index: HashMap<ChannelId, usize>,
    /// Store sequence counter
    seq: u64,
}

impl ChannelRegistry {
    /// Build the registry from its fixed channel list
    pub fn new(descriptors: Vec<ChannelDescriptor>) -> BusResult<Self> {
        let mut index = HashMap::with_capacity(descriptors.len());
        let mut slots = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if descriptor.id.as_str().is_empty() {
                return Err(BusError::Config("channel id must not be empty".into()));
            }
            if index.insert(descriptor.id.clone(), slots.len()).is_some() {
                return Err(BusError::Config(format!(
                    "duplicate channel id: {}",
                    descriptor.id
                )));
            }
            slots.push(ChannelSlot {
                descriptor,
                cache: HashMap::new(),
            });
        }

        Ok(ChannelRegistry {
            slots,
            index,
            seq: 0,
        })
    }

    /// All channels, in stable published order
    pub fn list_channels(&self) -> Vec<ChannelDescriptor> {
        self.slots.iter().map(|s| s.descriptor.clone()).collect()
    }

    pub fn descriptor(&self, channel: &ChannelId) -> Option<&ChannelDescriptor> {
        self.index.get(channel).map(|&i| &self.slots[i].descriptor)
    }

    pub fn contains(&self, channel: &ChannelId) -> bool {
        self.index.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, channel: &ChannelId) -> BusResult<&ChannelSlot> {
        self.index
            .get(channel)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| BusError::UnknownChannel(channel.clone()))
    }

    fn slot_mut(&mut self, channel: &ChannelId) -> BusResult<&mut ChannelSlot> {
        match self.index.get(channel) {
            Some(&i) => Ok(&mut self.slots[i]),
            None => Err(BusError::UnknownChannel(channel.clone())),
        }
    }

    /// Cached context of one type on a channel
    pub fn get(&self, channel: &ChannelId, context_type: &str) -> BusResult<Option<Arc<Context>>> {
        let slot = self.slot(channel)?;
        Ok(slot.cache.get(context_type).map(|c| Arc::clone(&c.context)))
    }

    /// Most recently stored context of any type on a channel
    pub fn latest(&self, channel: &ChannelId) -> BusResult<Option<Arc<Context>>> {
        let slot = self.slot(channel)?;
        Ok(slot.latest().map(|c| Arc::clone(&c.context)))
    }

    /// Cached context a listener with `filter` would be replayed
    ///
    /// Type filters read their own entry; wildcards read the newest entry.
    pub fn cached_for(
        &self,
        channel: &ChannelId,
        filter: &ContextFilter,
    ) -> BusResult<Option<Arc<Context>>> {
        match filter {
            ContextFilter::Any => self.latest(channel),
            ContextFilter::Type(t) => self.get(channel, t),
        }
    }

    /// Store a context, replacing any cached context of the same type
    ///
    /// Returns the context it replaced.
    pub fn put(&mut self, channel: &ChannelId, context: Arc<Context>) -> BusResult<Option<Arc<Context>>> {
        let seq = self.seq + 1;
        let slot = self.slot_mut(channel)?;
        let previous = slot.cache.insert(
            context.context_type().to_string(),
            CachedContext { context, seq },
        );
        self.seq = seq;

        tracing::trace!(channel = %channel, seq, replaced = previous.is_some(), "context cached");
        Ok(previous.map(|c| c.context))
    }

    /// Context types currently cached on a channel, oldest first
    pub fn cached_types(&self, channel: &ChannelId) -> BusResult<Vec<String>> {
        let slot = self.slot(channel)?;
        let mut entries: Vec<_> = slot.cache.iter().collect();
        entries.sort_by_key(|(_, c)| c.seq);
        Ok(entries.into_iter().map(|(t, _)| t.clone()).collect())
    }
}
