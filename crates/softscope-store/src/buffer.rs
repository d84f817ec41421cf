use std::collections::VecDeque;

/// One decoded point of a channel's time series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Device timestamp converted from microseconds to milliseconds.
    pub timestamp_ms: f64,
    pub value: f32,
}

impl Sample {
    pub fn new(timestamp_ms: f64, value: f32) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }

    /// Build a sample from the device's microsecond clock.
    pub fn from_micros(timestamp_us: u64, value: f32) -> Self {
        Self::new(Self::micros_to_ms(timestamp_us), value)
    }

    /// Device microseconds as the store's millisecond timestamp.
    pub fn micros_to_ms(timestamp_us: u64) -> f64 {
        timestamp_us as f64 / 1000.0
    }
}

/// Fixed-capacity FIFO of samples in arrival order.
///
/// Timestamps are not sorted: a reordered datagram shows up as an
/// out-of-order timestamp, exactly as it arrived.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    appended: u64,
}

impl ChannelBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            appended: 0,
        }
    }

    /// Append a sample, evicting the oldest when full.
    ///
    /// Returns the evicted sample, if any.
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        self.appended += 1;
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples ever appended, including evicted ones.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Copy of the current contents, oldest first.
    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Samples no older than `span_ms` before `end_ms`.
    pub fn window(&self, end_ms: f64, span_ms: f64) -> Vec<Sample> {
        let start = end_ms - span_ms;
        self.samples
            .iter()
            .filter(|s| s.timestamp_ms >= start)
            .copied()
            .collect()
    }
}
