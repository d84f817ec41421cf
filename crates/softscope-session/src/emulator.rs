//! A software stand-in for the telemetry device.
//!
//! [`DeviceEmulator`] answers the same commands over UDP and streams batches
//! with the device's pacing, so collectors can be exercised without
//! hardware. It replies to whichever address sent the last command.
//!
//! Device behavior:
//! - `METADATA` while idle: repeat the metadata response every
//!   `metadata_interval` until `START` arrives.
//! - `START`: begin sampling and streaming; resets the pulse clock.
//! - `PULSE`: resets the pulse clock.
//! - No pulse for `pulse_timeout` while streaming: drop back to idle and
//!   wait for a new `METADATA`.
//!
//! Samples are queued at `sample_period` into a bounded queue (new samples
//! are dropped when it is full) and sent in batches of up to `batch_size`
//! every `batch_interval`, each followed by a zeroed CRC trailer.

use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use softscope_transport::UdpEndpoint;
use softscope_wire::{
    encode_metadata_response, Command, Snapshot, TelemetryBatch, WireError, CRC_PLACEHOLDER_SIZE,
    PEER_PULSE_TIMEOUT,
};
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_PORT;
use crate::error::{Result, SessionError};

const EMULATOR_THREAD_NAME: &str = "softscope-emulator";

/// Longest a single [`DeviceEmulator::step`] waits for a command.
const COMMAND_POLL: Duration = Duration::from_millis(1);

const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Produces one value per channel for a timestamp in microseconds since the
/// emulator started.
pub type SampleSource = Box<dyn FnMut(u64) -> Vec<f32> + Send>;

/// Device-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmulatorState {
    /// Waiting for `METADATA`.
    Idle = 0,
    /// Repeating the metadata response until `START`.
    MetadataRequested = 1,
    /// Sampling and sending telemetry batches.
    Streaming = 2,
}

impl EmulatorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::MetadataRequested,
            2 => Self::Streaming,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MetadataRequested => "metadata-requested",
            Self::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub bind: SocketAddr,
    /// Channel names advertised in the metadata response, in order.
    pub channels: Vec<String>,
    pub sample_period: Duration,
    pub batch_interval: Duration,
    /// Most snapshots per datagram.
    pub batch_size: usize,
    pub metadata_interval: Duration,
    pub pulse_timeout: Duration,
    /// Snapshots buffered between batches.
    pub queue_capacity: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            channels: (0..10).map(|i| format!("var{i}")).collect(),
            sample_period: Duration::from_millis(1),
            batch_interval: Duration::from_millis(10),
            batch_size: 50,
            metadata_interval: Duration::from_millis(10),
            pulse_timeout: PEER_PULSE_TIMEOUT,
            queue_capacity: 200,
        }
    }
}

/// Square wave on every channel but the last, which carries a slow sine.
///
/// Even channels start at +1 and odd ones at -1; all flip every 10 ms.
pub fn demo_source(channel_count: usize) -> SampleSource {
    Box::new(move |timestamp_us| {
        let elapsed_ms = timestamp_us / 1000;
        let level = if (elapsed_ms / 10) % 2 == 0 { 1.0 } else { -1.0 };
        let mut values: Vec<f32> = (0..channel_count)
            .map(|i| if i % 2 == 0 { level } else { -level })
            .collect();
        if let Some(last) = values.last_mut() {
            *last = (timestamp_us as f64 / 1_000_000.0).sin() as f32;
        }
        values
    })
}

/// The device side of the protocol.
pub struct DeviceEmulator {
    endpoint: UdpEndpoint,
    config: EmulatorConfig,
    source: SampleSource,
    metadata: BytesMut,
    state: EmulatorState,
    shared_state: Arc<AtomicU8>,
    collector: Option<SocketAddr>,
    queue: VecDeque<Snapshot>,
    sequence: u16,
    started_at: Instant,
    last_pulse: Instant,
    next_sample: Instant,
    last_send: Option<Instant>,
    dropped_samples: u64,
    recv_buf: [u8; 64],
    out: BytesMut,
}

impl DeviceEmulator {
    /// Bind the emulator with the demo signal source.
    pub fn bind(config: EmulatorConfig) -> Result<Self> {
        let source = demo_source(config.channels.len());
        Self::with_source(config, source)
    }

    /// Bind the emulator with a custom sample source.
    pub fn with_source(config: EmulatorConfig, source: SampleSource) -> Result<Self> {
        let mut seen = HashSet::with_capacity(config.channels.len());
        if let Some(dup) = config.channels.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(WireError::DuplicateName(dup.clone()).into());
        }
        let mut metadata = BytesMut::new();
        encode_metadata_response(&config.channels, &mut metadata)?;

        let endpoint = UdpEndpoint::bind(config.bind)?;
        endpoint.set_recv_timeout(Some(COMMAND_POLL))?;

        let now = Instant::now();
        info!(
            local = %endpoint.local_addr(),
            channels = config.channels.len(),
            "device emulator ready"
        );
        Ok(Self {
            endpoint,
            config,
            source,
            metadata,
            state: EmulatorState::Idle,
            shared_state: Arc::new(AtomicU8::new(EmulatorState::Idle as u8)),
            collector: None,
            queue: VecDeque::new(),
            sequence: 0,
            started_at: now,
            last_pulse: now,
            next_sample: now,
            last_send: None,
            dropped_samples: 0,
            recv_buf: [0u8; 64],
            out: BytesMut::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    /// Samples discarded because the queue was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Run one device tick: handle at most one command, then sample and send
    /// whatever is due.
    pub fn step(&mut self) -> Result<EmulatorState> {
        if let Some((len, from)) = self.endpoint.recv_from(&mut self.recv_buf)? {
            match Command::decode(&self.recv_buf[..len]) {
                Some(command) => self.handle_command(command, from),
                None => trace!(%from, len, "ignoring unknown command"),
            }
        }

        let now = Instant::now();
        if self.state == EmulatorState::Streaming
            && now.duration_since(self.last_pulse) > self.config.pulse_timeout
        {
            info!("keepalive lost, returning to idle");
            self.set_state(EmulatorState::Idle);
            self.queue.clear();
        }

        match self.state {
            EmulatorState::Idle => {}
            EmulatorState::MetadataRequested => {
                if self.due(now, self.config.metadata_interval) {
                    self.send_metadata(now);
                }
            }
            EmulatorState::Streaming => {
                self.sample_until(now);
                if !self.queue.is_empty() && self.due(now, self.config.batch_interval) {
                    self.send_batch(now)?;
                }
            }
        }

        Ok(self.state)
    }

    /// Step until `running` is cleared.
    pub fn run(mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            if let Err(err) = self.step() {
                warn!(error = %err, "emulator step failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }
        debug!(dropped = self.dropped_samples, "device emulator stopped");
    }

    /// Run on a background thread.
    pub fn spawn(self) -> Result<EmulatorHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let local_addr = self.local_addr();
        let state = Arc::clone(&self.shared_state);

        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(EMULATOR_THREAD_NAME.to_string())
                .spawn(move || self.run(&running))
                .map_err(|e| SessionError::Spawn {
                    name: EMULATOR_THREAD_NAME,
                    source: e,
                })?
        };

        Ok(EmulatorHandle {
            local_addr,
            state,
            running,
            handle: Some(handle),
        })
    }

    fn handle_command(&mut self, command: Command, from: SocketAddr) {
        debug!(%command, %from, state = %self.state, "command received");
        self.collector = Some(from);
        match command {
            Command::Metadata => {
                if self.state == EmulatorState::Idle {
                    self.set_state(EmulatorState::MetadataRequested);
                    self.last_send = None;
                }
            }
            Command::Start => {
                self.last_pulse = Instant::now();
                if self.state != EmulatorState::Streaming {
                    self.set_state(EmulatorState::Streaming);
                    self.next_sample = self.last_pulse;
                    self.last_send = None;
                }
            }
            Command::Pulse => {
                self.last_pulse = Instant::now();
            }
        }
    }

    fn set_state(&mut self, state: EmulatorState) {
        self.state = state;
        self.shared_state.store(state as u8, Ordering::SeqCst);
    }

    fn due(&self, now: Instant, interval: Duration) -> bool {
        self.last_send
            .is_none_or(|last| now.duration_since(last) >= interval)
    }

    fn sample_until(&mut self, now: Instant) {
        let period = self.config.sample_period.max(Duration::from_micros(1));
        while self.next_sample <= now {
            let timestamp_us =
                u64::try_from(self.next_sample.duration_since(self.started_at).as_micros())
                    .unwrap_or(u64::MAX);
            self.next_sample += period;

            if self.queue.len() >= self.config.queue_capacity {
                self.dropped_samples += 1;
                continue;
            }
            let mut values = (self.source)(timestamp_us);
            values.resize(self.config.channels.len(), 0.0);
            self.queue.push_back(Snapshot::new(values, timestamp_us));
        }
    }

    fn send_metadata(&mut self, now: Instant) {
        self.last_send = Some(now);
        let Some(collector) = self.collector else {
            return;
        };
        if let Err(err) = self.endpoint.send_to(&self.metadata, collector) {
            debug!(%collector, error = %err, "metadata send failed");
        }
    }

    fn send_batch(&mut self, now: Instant) -> Result<()> {
        self.last_send = Some(now);
        let take = self.queue.len().min(self.config.batch_size.max(1));
        let snapshots: Vec<Snapshot> = self.queue.drain(..take).collect();

        let batch = TelemetryBatch::new(self.sequence, self.config.channels.len(), snapshots)?;
        self.sequence = self.sequence.wrapping_add(1);

        let Some(collector) = self.collector else {
            return Ok(());
        };
        self.out.clear();
        batch.encode(&mut self.out)?;
        self.out.put_bytes(0, CRC_PLACEHOLDER_SIZE);

        if let Err(err) = self.endpoint.send_to(&self.out, collector) {
            debug!(%collector, error = %err, "batch send failed");
        } else {
            trace!(
                sequence = batch.header.sequence,
                snapshots = batch.snapshots.len(),
                "batch sent"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEmulator")
            .field("local_addr", &self.endpoint.local_addr())
            .field("state", &self.state)
            .field("collector", &self.collector)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// A running emulator thread. Dropping it signals the thread to stop.
#[derive(Debug)]
pub struct EmulatorHandle {
    local_addr: SocketAddr,
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EmulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> EmulatorState {
        EmulatorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Signal the emulator to stop and wait for its thread.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("emulator thread panicked");
            }
        }
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use softscope_wire::decode_metadata_response;

    use super::*;

    fn loopback_config(channels: &[&str]) -> EmulatorConfig {
        EmulatorConfig {
            bind: "127.0.0.1:0".parse().expect("addr should parse"),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            ..EmulatorConfig::default()
        }
    }

    fn collector() -> UdpEndpoint {
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().expect("addr should parse"))
            .expect("collector should bind");
        endpoint
            .set_recv_timeout(Some(Duration::from_millis(200)))
            .expect("timeout should set");
        endpoint
    }

    fn step_until(emulator: &mut DeviceEmulator, state: EmulatorState) {
        for _ in 0..100 {
            if emulator.step().expect("step should succeed") == state {
                return;
            }
        }
        panic!("emulator never reached {state}");
    }

    #[test]
    fn demo_source_alternates_and_ends_with_sine() {
        let mut source = demo_source(4);
        assert_eq!(source(0), vec![1.0, -1.0, 1.0, 0.0]);

        let later = source(15_000);
        assert_eq!(&later[..3], &[-1.0, 1.0, -1.0]);
        assert!((later[3] - 0.015f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn rejects_duplicate_channel_names() {
        let err = DeviceEmulator::bind(loopback_config(&["a", "a"]))
            .expect_err("duplicates should be rejected");
        assert!(matches!(
            err,
            SessionError::Wire(WireError::DuplicateName(ref name)) if name == "a"
        ));
    }

    #[test]
    fn answers_metadata_then_streams_after_start() {
        let mut emulator =
            DeviceEmulator::bind(loopback_config(&["x", "y"])).expect("emulator should bind");
        let collector = collector();
        let mut buf = [0u8; 2048];

        collector
            .send_to(b"METADATA", emulator.local_addr())
            .expect("send should succeed");
        step_until(&mut emulator, EmulatorState::MetadataRequested);

        let (len, from) = collector
            .recv_from(&mut buf)
            .expect("recv should succeed")
            .expect("metadata should arrive");
        assert_eq!(from, emulator.local_addr());
        assert_eq!(
            decode_metadata_response(&buf[..len]).expect("metadata should decode"),
            vec!["x", "y"]
        );

        collector
            .send_to(b"START", emulator.local_addr())
            .expect("send should succeed");
        step_until(&mut emulator, EmulatorState::Streaming);

        // Drain stale metadata until the first batch shows up.
        let batch = loop {
            emulator.step().expect("step should succeed");
            if let Some((len, _)) = collector.recv_from(&mut buf).expect("recv should succeed") {
                if let Ok(batch) = TelemetryBatch::decode(&buf[..len]) {
                    break batch;
                }
            }
        };
        assert_eq!(batch.header.channel_count, 2);
        assert!(!batch.snapshots.is_empty());
        assert!(batch.snapshots.len() <= 50);
    }

    #[test]
    fn pulse_timeout_returns_to_idle() {
        let config = EmulatorConfig {
            pulse_timeout: Duration::from_millis(30),
            ..loopback_config(&["x"])
        };
        let mut emulator = DeviceEmulator::bind(config).expect("emulator should bind");
        let collector = collector();

        collector
            .send_to(b"START", emulator.local_addr())
            .expect("send should succeed");
        step_until(&mut emulator, EmulatorState::Streaming);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            emulator.step().expect("step should succeed"),
            EmulatorState::Idle
        );
    }

    #[test]
    fn full_queue_drops_new_samples() {
        let config = EmulatorConfig {
            queue_capacity: 5,
            batch_interval: Duration::from_secs(60),
            ..loopback_config(&["x"])
        };
        let mut emulator = DeviceEmulator::bind(config).expect("emulator should bind");
        emulator.handle_command(Command::Start, emulator.local_addr());
        emulator.last_send = Some(Instant::now());

        emulator.sample_until(Instant::now() + Duration::from_millis(20));
        assert_eq!(emulator.queue.len(), 5);
        assert!(emulator.dropped_samples() > 0);
    }

    #[test]
    fn spawned_emulator_reports_state_and_stops() {
        let handle = DeviceEmulator::bind(loopback_config(&["x"]))
            .expect("emulator should bind")
            .spawn()
            .expect("emulator should spawn");
        assert_eq!(handle.state(), EmulatorState::Idle);

        let collector = collector();
        collector
            .send_to(b"METADATA", handle.local_addr())
            .expect("send should succeed");
        let mut buf = [0u8; 64];
        let (len, _) = collector
            .recv_from(&mut buf)
            .expect("recv should succeed")
            .expect("metadata should arrive");
        assert_eq!(
            decode_metadata_response(&buf[..len]).expect("metadata should decode"),
            vec!["x"]
        );
        assert_eq!(handle.state(), EmulatorState::MetadataRequested);

        handle.stop();
    }
}
