use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::buffer::{ChannelBuffer, Sample};
use crate::error::{Result, StoreError};

type SharedBuffer = Arc<Mutex<ChannelBuffer>>;

#[derive(Default)]
struct Channels {
    /// Discovery order. Position is the channel's index in every snapshot.
    order: Vec<String>,
    buffers: HashMap<String, SharedBuffer>,
    capacity: usize,
}

/// Per-channel ring buffers keyed by channel name.
///
/// The channel map is set once per session by [`initialize`](Self::initialize)
/// and is read-mostly afterwards; each buffer carries its own lock. Reads of
/// two different channels are not taken at the same instant.
#[derive(Default)]
pub struct ChannelStore {
    channels: RwLock<Channels>,
}

impl ChannelStore {
    /// An empty store with no channels. Appends are no-ops until initialized.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store initialized with `names`, each holding up to `capacity` samples.
    pub fn with_channels<S: AsRef<str>>(names: &[S], capacity: usize) -> Result<Self> {
        let store = Self::new();
        store.initialize(names, capacity)?;
        Ok(store)
    }

    /// Allocate one empty buffer per name, replacing any prior state.
    pub fn initialize<S: AsRef<str>>(&self, names: &[S], capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }

        let mut seen = HashSet::with_capacity(names.len());
        let mut order = Vec::with_capacity(names.len());
        let mut buffers = HashMap::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name) {
                return Err(StoreError::DuplicateChannel(name.to_string()));
            }
            order.push(name.to_string());
            buffers.insert(
                name.to_string(),
                Arc::new(Mutex::new(ChannelBuffer::with_capacity(capacity))),
            );
        }

        debug!(channels = ?order, capacity, "initialized channel store");

        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        *channels = Channels {
            order,
            buffers,
            capacity,
        };
        Ok(())
    }

    /// Append a sample to the named channel, evicting its oldest when full.
    ///
    /// Unknown names are ignored. Returns whether the sample was stored.
    pub fn append(&self, name: &str, sample: Sample) -> bool {
        match self.buffer(name) {
            Some(buffer) => {
                lock(&buffer).push(sample);
                true
            }
            None => {
                trace!(channel = name, "append to unknown channel ignored");
                false
            }
        }
    }

    /// Append one value per channel, matched to channels by position.
    ///
    /// All values share one timestamp. Returns the number of samples
    /// stored; extra values beyond the channel count are ignored.
    pub fn append_row(&self, timestamp_ms: f64, values: &[f32]) -> usize {
        let buffers: Vec<SharedBuffer> = {
            let channels = self.read();
            channels
                .order
                .iter()
                .filter_map(|name| channels.buffers.get(name).cloned())
                .collect()
        };

        let mut stored = 0;
        for (buffer, &value) in buffers.iter().zip(values) {
            lock(buffer).push(Sample::new(timestamp_ms, value));
            stored += 1;
        }
        stored
    }

    /// Point-in-time copy of the named channel, oldest first.
    pub fn snapshot(&self, name: &str) -> Option<Vec<Sample>> {
        self.buffer(name).map(|buffer| lock(&buffer).to_vec())
    }

    /// Samples within `span_ms` of the channel's most recent sample.
    pub fn window(&self, name: &str, span_ms: f64) -> Option<Vec<Sample>> {
        self.buffer(name).map(|buffer| {
            let buffer = lock(&buffer);
            match buffer.latest() {
                Some(latest) => buffer.window(latest.timestamp_ms, span_ms),
                None => Vec::new(),
            }
        })
    }

    /// Most recently appended sample of the named channel.
    pub fn latest(&self, name: &str) -> Option<Sample> {
        self.buffer(name).and_then(|buffer| lock(&buffer).latest())
    }

    /// Current sample count of the named channel (0 if unknown).
    pub fn len(&self, name: &str) -> usize {
        self.buffer(name).map_or(0, |buffer| lock(&buffer).len())
    }

    /// Samples ever appended to the named channel (0 if unknown).
    pub fn appended(&self, name: &str) -> u64 {
        self.buffer(name).map_or(0, |buffer| lock(&buffer).appended())
    }

    /// Channel names in discovery order.
    pub fn channels(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().buffers.contains_key(name)
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.read().order.len()
    }

    /// Per-channel capacity (0 before initialization).
    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    fn buffer(&self, name: &str) -> Option<SharedBuffer> {
        self.read().buffers.get(name).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Channels> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.read();
        f.debug_struct("ChannelStore")
            .field("channels", &channels.order)
            .field("capacity", &channels.capacity)
            .finish()
    }
}

fn lock(buffer: &Mutex<ChannelBuffer>) -> MutexGuard<'_, ChannelBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}
