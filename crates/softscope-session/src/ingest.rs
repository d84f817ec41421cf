use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use softscope_store::{ChannelStore, Sample};
use softscope_transport::{UdpEndpoint, MAX_DATAGRAM_SIZE};
use softscope_wire::{TelemetryBatch, WireError};
use tracing::{debug, info, trace, warn};

use crate::error::Result;

/// Pause after a receive error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Sentinel for "no batch applied yet" in the sequence counter.
const NO_SEQUENCE: u32 = u32::MAX;

/// Why a datagram was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not a decodable telemetry batch.
    Malformed(WireError),
    /// The batch's channel count disagrees with the discovered channel list.
    ChannelMismatch { expected: usize, found: usize },
}

/// Result of handling at most one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The receive wait elapsed with nothing to read.
    Idle,
    /// A batch was decoded and its snapshots appended.
    Applied {
        sequence: u16,
        snapshots: usize,
        truncated: bool,
    },
    /// A datagram arrived but was discarded.
    Dropped(DropReason),
}

/// Live counters updated by the ingest thread.
#[derive(Debug)]
pub struct IngestStats {
    datagrams: AtomicU64,
    batches: AtomicU64,
    snapshots: AtomicU64,
    malformed: AtomicU64,
    truncated: AtomicU64,
    channel_mismatches: AtomicU64,
    last_sequence: AtomicU32,
    last_batch_at: Mutex<Option<Instant>>,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self {
            datagrams: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            channel_mismatches: AtomicU64::new(0),
            last_sequence: AtomicU32::new(NO_SEQUENCE),
            last_batch_at: Mutex::new(None),
        }
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let last_sequence = match self.last_sequence.load(Ordering::Relaxed) {
            NO_SEQUENCE => None,
            seq => Some(seq as u16),
        };
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            channel_mismatches: self.channel_mismatches.load(Ordering::Relaxed),
            last_sequence,
            last_batch_at: *self
                .last_batch_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn record(&self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Idle => return,
            IngestOutcome::Applied {
                sequence,
                snapshots,
                truncated,
            } => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                self.snapshots
                    .fetch_add(*snapshots as u64, Ordering::Relaxed);
                if *truncated {
                    self.truncated.fetch_add(1, Ordering::Relaxed);
                }
                self.last_sequence
                    .store(u32::from(*sequence), Ordering::Relaxed);
                *self
                    .last_batch_at
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            }
            IngestOutcome::Dropped(DropReason::Malformed(_)) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
            }
            IngestOutcome::Dropped(DropReason::ChannelMismatch { .. }) => {
                self.channel_mismatches.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.datagrams.fetch_add(1, Ordering::Relaxed);
    }
}

/// Copy of [`IngestStats`] at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub datagrams: u64,
    pub batches: u64,
    pub snapshots: u64,
    pub malformed: u64,
    pub truncated: u64,
    pub channel_mismatches: u64,
    pub last_sequence: Option<u16>,
    #[serde(skip)]
    pub last_batch_at: Option<Instant>,
}

impl StatsSnapshot {
    /// Time since the last applied batch, `None` before the first one.
    pub fn since_last_batch(&self) -> Option<Duration> {
        self.last_batch_at.map(|at| at.elapsed())
    }
}

/// Receives telemetry batches and appends them to the channel store.
///
/// One loop runs per session, on its own thread. Bad datagrams are
/// counted and dropped; the loop never stops on them.
pub struct IngestLoop {
    endpoint: Arc<UdpEndpoint>,
    store: Arc<ChannelStore>,
    channels: Vec<String>,
    stats: Arc<IngestStats>,
    recv_timeout: Duration,
    buf: Vec<u8>,
}

impl IngestLoop {
    pub fn new(
        endpoint: Arc<UdpEndpoint>,
        store: Arc<ChannelStore>,
        channels: Vec<String>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            endpoint,
            store,
            channels,
            stats,
            recv_timeout: crate::config::DEFAULT_RECV_TIMEOUT,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Override the bounded receive wait; shutdown latency is at most this.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Wait for one datagram and apply it.
    pub fn poll_once(&mut self) -> Result<IngestOutcome> {
        let Some((len, from)) = self.endpoint.recv_from(&mut self.buf)? else {
            return Ok(IngestOutcome::Idle);
        };
        trace!(%from, len, "ingest datagram");

        let outcome = apply_datagram(&self.store, &self.channels, &self.buf[..len]);
        self.stats.record(&outcome);
        Ok(outcome)
    }

    /// Decode `payload` and append its snapshots, without touching the socket.
    pub fn apply(&self, payload: &[u8]) -> IngestOutcome {
        let outcome = apply_datagram(&self.store, &self.channels, payload);
        self.stats.record(&outcome);
        outcome
    }

    /// Poll until `running` is cleared.
    pub fn run(mut self, running: &AtomicBool) {
        if let Err(err) = self.endpoint.set_recv_timeout(Some(self.recv_timeout)) {
            warn!(error = %err, "failed to set ingest receive timeout");
        }
        info!(channels = self.channels.len(), "ingest loop started");

        while running.load(Ordering::SeqCst) {
            if let Err(err) = self.poll_once() {
                warn!(error = %err, "ingest receive failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            batches = stats.batches,
            snapshots = stats.snapshots,
            malformed = stats.malformed,
            "ingest loop stopped"
        );
    }
}

fn apply_datagram(store: &ChannelStore, channels: &[String], payload: &[u8]) -> IngestOutcome {
    let batch = match TelemetryBatch::decode(payload) {
        Ok(batch) => batch,
        Err(err) => {
            debug!(len = payload.len(), error = %err, "dropping malformed datagram");
            return IngestOutcome::Dropped(DropReason::Malformed(err));
        }
    };

    let found = usize::from(batch.header.channel_count);
    if found != channels.len() {
        warn!(
            expected = channels.len(),
            found,
            sequence = batch.header.sequence,
            "dropping batch with mismatched channel count"
        );
        return IngestOutcome::Dropped(DropReason::ChannelMismatch {
            expected: channels.len(),
            found,
        });
    }

    let truncated = batch.is_truncated();
    if truncated {
        debug!(
            sequence = batch.header.sequence,
            declared = batch.header.snapshot_count,
            decoded = batch.snapshots.len(),
            "batch truncated"
        );
    }

    // The store was initialized from `channels`, so its order matches.
    for snapshot in &batch.snapshots {
        store.append_row(Sample::micros_to_ms(snapshot.timestamp_us), &snapshot.values);
    }

    IngestOutcome::Applied {
        sequence: batch.header.sequence,
        snapshots: batch.snapshots.len(),
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use softscope_wire::{Snapshot, TelemetryBatch};

    use super::*;

    fn ingest(channels: &[&str], capacity: usize) -> IngestLoop {
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().expect("addr should parse"))
            .expect("endpoint should bind");
        let names: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let store = ChannelStore::with_channels(&names, capacity).expect("store should initialize");
        IngestLoop::new(
            Arc::new(endpoint),
            Arc::new(store),
            names,
            Arc::new(IngestStats::new()),
        )
    }

    fn encoded(sequence: u16, channels: usize, snapshots: Vec<Snapshot>) -> BytesMut {
        let mut buf = BytesMut::new();
        TelemetryBatch::new(sequence, channels, snapshots)
            .expect("batch should build")
            .encode(&mut buf)
            .expect("batch should encode");
        buf
    }

    #[test]
    fn applies_batch_in_channel_order() {
        let ingest = ingest(&["a", "b"], 16);
        let payload = encoded(
            9,
            2,
            vec![
                Snapshot::new(vec![1.0, -1.0], 1_000),
                Snapshot::new(vec![2.0, -2.0], 2_000),
            ],
        );

        assert_eq!(
            ingest.apply(&payload),
            IngestOutcome::Applied {
                sequence: 9,
                snapshots: 2,
                truncated: false
            }
        );

        let a = ingest.store.snapshot("a").expect("channel a");
        let b = ingest.store.snapshot("b").expect("channel b");
        assert_eq!(a, vec![Sample::new(1.0, 1.0), Sample::new(2.0, 2.0)]);
        assert_eq!(b, vec![Sample::new(1.0, -1.0), Sample::new(2.0, -2.0)]);

        let stats = ingest.stats().snapshot();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.last_sequence, Some(9));
        assert!(stats.since_last_batch().is_some());
    }

    #[test]
    fn malformed_datagram_leaves_store_untouched() {
        let ingest = ingest(&["a"], 4);

        let outcome = ingest.apply(b"PULSE");
        assert!(matches!(
            outcome,
            IngestOutcome::Dropped(DropReason::Malformed(WireError::TooShort { .. }))
        ));
        assert!(matches!(
            ingest.apply(&[0u8; 16]),
            IngestOutcome::Dropped(DropReason::Malformed(WireError::InvalidSync { found: 0 }))
        ));

        assert_eq!(ingest.store.len("a"), 0);
        let stats = ingest.stats().snapshot();
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.datagrams, 2);
        assert_eq!(stats.last_sequence, None);
    }

    #[test]
    fn mismatched_channel_count_is_dropped() {
        let ingest = ingest(&["a", "b"], 4);
        let payload = encoded(1, 3, vec![Snapshot::new(vec![1.0, 2.0, 3.0], 10)]);

        assert_eq!(
            ingest.apply(&payload),
            IngestOutcome::Dropped(DropReason::ChannelMismatch {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(ingest.store.len("a"), 0);
        assert_eq!(ingest.stats().snapshot().channel_mismatches, 1);
    }

    #[test]
    fn truncated_batch_applies_complete_snapshots() {
        let ingest = ingest(&["a"], 8);
        let full = encoded(
            3,
            1,
            (0..5).map(|i| Snapshot::new(vec![i as f32], i * 1000)).collect(),
        );
        // Header plus three whole snapshots and half of the fourth.
        let cut = 6 + 3 * 12 + 6;

        assert_eq!(
            ingest.apply(&full[..cut]),
            IngestOutcome::Applied {
                sequence: 3,
                snapshots: 3,
                truncated: true
            }
        );
        assert_eq!(ingest.store.len("a"), 3);
        assert_eq!(ingest.stats().snapshot().truncated, 1);
    }

    #[test]
    fn poll_once_is_idle_without_traffic() {
        let mut ingest = ingest(&["a"], 4).with_recv_timeout(Duration::from_millis(10));
        ingest
            .endpoint
            .set_recv_timeout(Some(Duration::from_millis(10)))
            .expect("timeout should set");

        assert_eq!(ingest.poll_once().expect("poll should succeed"), IngestOutcome::Idle);
        assert_eq!(ingest.stats().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn run_stops_when_flag_clears() {
        let ingest = ingest(&["a"], 4).with_recv_timeout(Duration::from_millis(10));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            thread::spawn(move || ingest.run(&running))
        };
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::SeqCst);

        handle.join().expect("ingest thread should stop");
    }
}
