use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use softscope_transport::{UdpEndpoint, MAX_DATAGRAM_SIZE};
use softscope_wire::{decode_metadata_response, Command, WireError};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{Result, SessionError};

/// Result of a successful metadata exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Channel names in device order. Snapshot values map to these by
    /// position, so this list must never be re-sorted.
    pub channels: Vec<String>,
    /// Address the metadata response came from; all commands go here.
    pub peer: SocketAddr,
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// A valid metadata response arrived.
    Found(Discovered),
    /// Nothing arrived before the response timeout.
    TimedOut,
    /// Something arrived but it was not a metadata response.
    Invalid(WireError),
    /// The probe could not be sent; the reply wait was still performed.
    SendFailed,
}

/// Metadata probe loop, one bounded step at a time.
///
/// Each [`step`](Self::step) sends one `METADATA` probe and waits at most
/// `response_timeout` for a reply. [`run`](Self::run) repeats steps with a
/// backoff until a response decodes.
pub struct Discovery<'a> {
    endpoint: &'a UdpEndpoint,
    target: SocketAddr,
    config: DiscoveryConfig,
    attempts: u32,
    buf: Vec<u8>,
}

impl<'a> Discovery<'a> {
    pub fn new(endpoint: &'a UdpEndpoint, target: SocketAddr, config: DiscoveryConfig) -> Self {
        Self {
            endpoint,
            target,
            config,
            attempts: 0,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Probes sent so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Send one probe and wait for one datagram.
    ///
    /// Only transport failures other than send errors are returned as `Err`;
    /// every protocol-level miss is a [`DiscoveryStep`] to retry on.
    pub fn step(&mut self) -> Result<DiscoveryStep> {
        self.attempts = self.attempts.saturating_add(1);
        self.endpoint
            .set_recv_timeout(Some(self.config.response_timeout))?;

        let sent = match self
            .endpoint
            .send_to(Command::Metadata.as_bytes(), self.target)
        {
            Ok(()) => true,
            Err(err) => {
                debug!(target = %self.target, error = %err, "metadata probe send failed");
                false
            }
        };
        debug!(target = %self.target, attempt = self.attempts, "sent metadata probe");

        let Some((len, from)) = self.endpoint.recv_from(&mut self.buf)? else {
            return Ok(if sent {
                DiscoveryStep::TimedOut
            } else {
                DiscoveryStep::SendFailed
            });
        };

        match decode_metadata_response(&self.buf[..len]) {
            Ok(channels) => {
                if from != self.target {
                    warn!(expected = %self.target, %from, "metadata response from unexpected address");
                }
                info!(peer = %from, ?channels, "metadata received");
                Ok(DiscoveryStep::Found(Discovered {
                    channels,
                    peer: from,
                }))
            }
            Err(err) => {
                debug!(%from, len, error = %err, "ignoring non-metadata datagram");
                Ok(DiscoveryStep::Invalid(err))
            }
        }
    }

    /// Probe until a valid metadata response arrives.
    ///
    /// With `max_attempts: None` this blocks until the device answers.
    pub fn run(&mut self) -> Result<Discovered> {
        loop {
            self.check_budget()?;
            if let Some(discovered) = self.retry_step()? {
                return Ok(discovered);
            }
        }
    }

    /// Like [`run`](Self::run), but gives up quietly with `Ok(None)` once
    /// `running` is cleared or `deadline` passes. Checked between probes.
    pub fn run_while(
        &mut self,
        running: &AtomicBool,
        deadline: Option<Instant>,
    ) -> Result<Option<Discovered>> {
        loop {
            if !running.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
            self.check_budget()?;
            if let Some(discovered) = self.retry_step()? {
                return Ok(Some(discovered));
            }
        }
    }

    fn check_budget(&self) -> Result<()> {
        match self.config.max_attempts {
            Some(max) if self.attempts >= max => Err(SessionError::DiscoveryExhausted {
                peer: self.target,
                attempts: self.attempts,
            }),
            _ => Ok(()),
        }
    }

    /// One step; on a miss, back off before the caller probes again.
    fn retry_step(&mut self) -> Result<Option<Discovered>> {
        match self.step()? {
            DiscoveryStep::Found(discovered) => Ok(Some(discovered)),
            step => {
                debug!(?step, attempt = self.attempts, "no metadata yet");
                thread::sleep(self.config.backoff);
                Ok(None)
            }
        }
    }
}
