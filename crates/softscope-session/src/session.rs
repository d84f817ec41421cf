use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use softscope_store::{ChannelStore, Sample};
use softscope_transport::UdpEndpoint;
use softscope_wire::Command;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, Timebase};
use crate::discovery::{Discovered, Discovery};
use crate::error::{Result, SessionError};
use crate::ingest::{IngestLoop, IngestStats, StatsSnapshot};

const INGEST_THREAD_NAME: &str = "softscope-ingest";

/// Owns the collector's UDP endpoint and speaks the command protocol.
///
/// The endpoint is shared: discovery and the ingest thread receive on it,
/// while the consumer sends `START` and `PULSE` through the same socket.
/// Discovery must finish before ingest starts; at most one [`LiveSession`]
/// owns the receive side at a time.
#[derive(Debug)]
pub struct TransportSession {
    endpoint: Arc<UdpEndpoint>,
    config: SessionConfig,
    ingest_active: Arc<AtomicBool>,
}

impl TransportSession {
    /// Validate `config` and bind its local address.
    pub fn bind(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = UdpEndpoint::bind(config.bind)?;
        Ok(Self::from_endpoint(endpoint, config))
    }

    /// Use an already bound endpoint. `config.bind` is ignored.
    pub fn from_endpoint(endpoint: UdpEndpoint, config: SessionConfig) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            config,
            ingest_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Arc<UdpEndpoint> {
        &self.endpoint
    }

    /// A step-wise probe loop against the configured peer.
    ///
    /// Probing changes the endpoint's receive timeout and consumes whatever
    /// arrives, so it fails with [`SessionError::IngestActive`] while a
    /// [`LiveSession`] from this transport is running.
    pub fn discovery(&self) -> Result<Discovery<'_>> {
        if self.ingest_active.load(Ordering::SeqCst) {
            return Err(SessionError::IngestActive);
        }
        Ok(Discovery::new(
            &self.endpoint,
            self.config.peer,
            self.config.discovery,
        ))
    }

    /// Block until the device answers a metadata probe.
    ///
    /// Retries forever unless `discovery.max_attempts` is set. Fails with
    /// [`SessionError::IngestActive`] while a session is live.
    pub fn discover_channels(&self) -> Result<Discovered> {
        info!(peer = %self.config.peer, local = %self.local_addr(), "discovering channels");
        self.discovery()?.run()
    }

    /// Send one command datagram, propagating failures.
    pub fn send_command(&self, command: Command, peer: SocketAddr) -> Result<()> {
        self.endpoint.send_to(command.as_bytes(), peer)?;
        debug!(%command, %peer, "sent command");
        Ok(())
    }

    /// Fire-and-forget `START`. Returns whether the datagram left the socket.
    pub fn send_start(&self, peer: SocketAddr) -> bool {
        send_logged(&self.endpoint, Command::Start, peer)
    }

    /// Fire-and-forget `PULSE`. Returns whether the datagram left the socket.
    pub fn send_keepalive(&self, peer: SocketAddr) -> bool {
        send_logged(&self.endpoint, Command::Pulse, peer)
    }

    /// Allocate the channel store, start ingesting and send `START`.
    ///
    /// The ingest thread is running before `START` goes out, so the first
    /// batch is not missed. Fails with [`SessionError::IngestActive`] if a
    /// previous session has not been stopped or dropped.
    pub fn start_session(&self, discovered: Discovered) -> Result<LiveSession> {
        let Discovered { channels, peer } = discovered;

        let store = Arc::new(ChannelStore::with_channels(
            &channels,
            self.config.max_points,
        )?);
        if self
            .ingest_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::IngestActive);
        }
        let stats = Arc::new(IngestStats::new());
        let running = Arc::new(AtomicBool::new(true));

        let ingest = IngestLoop::new(
            Arc::clone(&self.endpoint),
            Arc::clone(&store),
            channels.clone(),
            Arc::clone(&stats),
        )
        .with_recv_timeout(self.config.recv_timeout);

        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(INGEST_THREAD_NAME.to_string())
                .spawn(move || ingest.run(&running))
                .map_err(|e| {
                    self.ingest_active.store(false, Ordering::SeqCst);
                    SessionError::Spawn {
                        name: INGEST_THREAD_NAME,
                        source: e,
                    }
                })?
        };

        let live = LiveSession {
            endpoint: Arc::clone(&self.endpoint),
            peer,
            channels,
            store,
            stats,
            timebase: self.config.timebase,
            running,
            handle: Some(handle),
            ingest_active: Arc::clone(&self.ingest_active),
        };
        live.resend_start();

        info!(%peer, channels = live.channels.len(), "session started");
        Ok(live)
    }
}

/// A streaming session: a running ingest thread plus the shared store.
///
/// Dropping a `LiveSession` stops the ingest thread, waits for it, and
/// hands the endpoint back to its [`TransportSession`].
#[derive(Debug)]
pub struct LiveSession {
    endpoint: Arc<UdpEndpoint>,
    peer: SocketAddr,
    channels: Vec<String>,
    store: Arc<ChannelStore>,
    stats: Arc<IngestStats>,
    timebase: Timebase,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    ingest_active: Arc<AtomicBool>,
}

impl LiveSession {
    /// Device address commands are sent to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Channel names in device order.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Samples of `name` inside the configured display window.
    pub fn window(&self, name: &str) -> Option<Vec<Sample>> {
        self.store.window(name, self.timebase.window_ms())
    }

    /// Send `PULSE`. Call about once per keepalive period; the device stops
    /// streaming after two seconds without one.
    pub fn send_keepalive(&self) -> bool {
        send_logged(&self.endpoint, Command::Pulse, self.peer)
    }

    /// Send `START` again, for when the first one was lost.
    pub fn resend_start(&self) -> bool {
        send_logged(&self.endpoint, Command::Start, self.peer)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the ingest thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Returns within one ingest receive timeout.
    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("ingest thread panicked");
            }
            self.ingest_active.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_logged(endpoint: &UdpEndpoint, command: Command, peer: SocketAddr) -> bool {
    match endpoint.send_to(command.as_bytes(), peer) {
        Ok(()) => {
            debug!(%command, %peer, "sent command");
            true
        }
        Err(err) => {
            warn!(%command, %peer, error = %err, "command send failed");
            false
        }
    }
}
