//! Relay runner
//!
//! Listens for decoder datagrams, queues what it parses and flushes the
//! queue to the endpoint on a timer whose period follows
//! [`crate::backoff::flush_interval`]. A flush is skipped while the previous
//! send is still in flight. A slower heartbeat runs independently.
//!
//! [`RelayCore`] holds all the bookkeeping and is driven synchronously in
//! tests; [`start_relay`] wraps it in a task with a UDP socket and timers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::flush_interval;
use crate::client::BatchTransport;
use crate::error::{DecodeError, RelayError};
use crate::queue::{RelayMessage, RelayQueue};
use crate::wsjtx::{decode_datagram, WsjtxMessage};

/// Largest batch sent in one request
pub const DEFAULT_MAX_BATCH: usize = 200;

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Endpoint URL batches are posted to
    pub url: String,
    /// Bearer key
    pub key: String,
    /// Session identifier sent with every request
    pub session: String,
    /// Address the decoder feed listener binds to
    pub bind_addr: IpAddr,
    /// UDP port of the decoder feed
    pub udp_port: u16,
    /// Flush period while healthy
    pub batch_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
    pub max_batch: usize,
    /// Log every relayed message at info
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            session: String::new(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 2237,
            batch_interval: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(30_000),
            request_timeout: Duration::from_millis(10_000),
            max_batch: DEFAULT_MAX_BATCH,
            verbose: false,
        }
    }
}

impl RelayConfig {
    /// Check the fields the relay cannot run without
    pub fn validate(&self) -> Result<(), RelayError> {
        let missing: Vec<&str> = [
            ("url", &self.url),
            ("key", &self.key),
            ("session", &self.session),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Config(format!("missing {}", missing.join(", "))))
        }
    }
}

/// Externally visible relay state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub enabled: bool,
    pub running: bool,
    pub server_reachable: bool,
    /// Decode messages received from the feed
    pub decodes: u64,
    /// Messages accepted by the endpoint
    pub relayed: u64,
    pub consecutive_errors: u32,
    pub queued: usize,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Queue, counters and backoff state of one relay
#[derive(Debug)]
pub struct RelayCore {
    config: RelayConfig,
    queue: RelayQueue,
    status: RelayStatus,
    in_flight: bool,
    auth_reported: bool,
}

impl RelayCore {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            queue: RelayQueue::new(),
            status: RelayStatus {
                enabled: true,
                ..RelayStatus::default()
            },
            in_flight: false,
            auth_reported: false,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &RelayQueue {
        &self.queue
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            queued: self.queue.len(),
            ..self.status.clone()
        }
    }

    pub fn set_running(&mut self, running: bool) {
        self.status.running = running;
    }

    /// Whether a batch is out and not yet answered
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Current flush period
    pub fn flush_interval(&self) -> Duration {
        flush_interval(self.config.batch_interval, self.status.consecutive_errors)
    }

    /// Decode one datagram and queue it
    ///
    /// Returns the queued message's name, or `None` for liveness messages
    /// and types the relay does not forward. A datagram that fails to decode
    /// leaves queue and counters untouched.
    pub fn accept_datagram(
        &mut self,
        data: &[u8],
        received_at: u64,
    ) -> Result<Option<&'static str>, DecodeError> {
        let Some(dgram) = decode_datagram(data)? else {
            return Ok(None);
        };

        let name = dgram.message.name();
        match &dgram.message {
            WsjtxMessage::Heartbeat(hb) => {
                debug!(
                    "Decoder heartbeat from {:?} ({:?})",
                    dgram.id, hb.version
                );
                return Ok(None);
            }
            WsjtxMessage::Close => {
                info!("Decoder {:?} closed", dgram.id);
                return Ok(None);
            }
            WsjtxMessage::Decode(d) if self.config.verbose => {
                info!("Decode {:>4} dB {:?}", d.snr, d.message.as_deref().unwrap_or(""));
            }
            other => debug!("Queued {} from {:?}", other.name(), dgram.id),
        }

        if dgram.message.is_decode() {
            self.status.decodes += 1;
        }
        self.queue.push(RelayMessage {
            received_at,
            client: dgram.id,
            message: dgram.message,
        });
        Ok(Some(name))
    }

    /// Take the next batch unless one is already in flight or nothing waits
    pub fn begin_flush(&mut self) -> Option<Vec<RelayMessage>> {
        if self.in_flight {
            debug!("Relay send still in flight, skipping flush");
            return None;
        }
        if self.queue.is_empty() {
            return None;
        }
        self.in_flight = true;
        Some(self.queue.take_batch(self.config.max_batch))
    }

    /// Record the outcome of a batch started with [`RelayCore::begin_flush`]
    pub fn complete_flush(&mut self, batch: Vec<RelayMessage>, result: Result<(), RelayError>) {
        self.in_flight = false;
        match result {
            Ok(()) => {
                if self.status.consecutive_errors > 0 {
                    info!(
                        "Relay endpoint reachable again after {} failure(s)",
                        self.status.consecutive_errors
                    );
                }
                if self.config.verbose {
                    info!("Relayed {} message(s)", batch.len());
                }
                self.status.relayed += batch.len() as u64;
                self.status.consecutive_errors = 0;
                self.status.server_reachable = true;
                self.auth_reported = false;
            }
            Err(e) => {
                let count = batch.len();
                self.queue.requeue_front(batch);
                self.status.consecutive_errors = self.status.consecutive_errors.saturating_add(1);
                self.status.server_reachable = false;

                if e.is_auth() {
                    if !self.auth_reported {
                        error!("Relay endpoint rejected the key ({}); check wsjtx_relay.key", e);
                        self.auth_reported = true;
                    } else {
                        debug!("Relay still rejecting the key: {}", e);
                    }
                } else {
                    warn!(
                        "Relay send of {} message(s) failed ({} in a row): {}",
                        count, self.status.consecutive_errors, e
                    );
                }
                debug!("Next relay flush in {:?}", self.flush_interval());
            }
        }
    }

    /// Flush one batch inline and wait for the answer
    ///
    /// Returns false if nothing was sent.
    pub async fn flush_with<T>(&mut self, transport: &T) -> bool
    where
        T: BatchTransport + ?Sized,
    {
        let Some(batch) = self.begin_flush() else {
            return false;
        };
        let result = transport.send_batch(&self.config.session, &batch).await;
        self.complete_flush(batch, result);
        true
    }
}

/// Commands accepted by a running relay
#[derive(Debug)]
pub enum RelayCommand {
    /// Flush now regardless of the timer
    FlushNow,
    Shutdown,
}

/// Handle to a running relay task
#[derive(Debug)]
pub struct RelayHandle {
    cmd_tx: mpsc::Sender<RelayCommand>,
    status_rx: watch::Receiver<RelayStatus>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Latest published status
    pub fn status(&self) -> RelayStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<RelayStatus> {
        self.status_rx.clone()
    }

    /// Address the decoder feed listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn flush_now(&self) {
        let _ = self.cmd_tx.send(RelayCommand::FlushNow).await;
    }

    /// Stop the task and wait until its socket and timers are gone
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(RelayCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Relay task ended abnormally: {}", e);
        }
    }
}

type SendOutcome = (Vec<RelayMessage>, Result<(), RelayError>);

/// Validate settings, bind the listener and spawn the relay task
pub async fn start_relay(
    config: RelayConfig,
    transport: Arc<dyn BatchTransport>,
) -> Result<RelayHandle, RelayError> {
    config.validate()?;
    let socket = UdpSocket::bind((config.bind_addr, config.udp_port)).await?;
    let local_addr = socket.local_addr()?;
    info!(
        "Decoder relay listening on {} -> {}",
        local_addr, config.url
    );

    let mut core = RelayCore::new(config);
    core.set_running(true);
    let (status_tx, status_rx) = watch::channel(core.status());
    let (cmd_tx, cmd_rx) = mpsc::channel(8);

    let task = tokio::spawn(run_relay_task(core, socket, transport, cmd_rx, status_tx));

    Ok(RelayHandle {
        cmd_tx,
        status_rx,
        local_addr,
        task,
    })
}

async fn run_relay_task(
    mut core: RelayCore,
    socket: UdpSocket,
    transport: Arc<dyn BatchTransport>,
    mut cmd_rx: mpsc::Receiver<RelayCommand>,
    status_tx: watch::Sender<RelayStatus>,
) {
    let started = Instant::now();
    let session = core.config().session.clone();
    let mut buf = vec![0u8; 65_536];
    let mut flush_at = Instant::now() + core.flush_interval();
    let mut heartbeat = interval(core.config().heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (done_tx, mut done_rx) = mpsc::channel::<SendOutcome>(1);
    let mut sender: Option<JoinHandle<()>> = None;
    let mut beat: Option<JoinHandle<()>> = None;

    loop {
        let mut flush = false;

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => {
                        if let Err(e) = core.accept_datagram(&buf[..n], now_ms()) {
                            debug!("Dropping datagram from {}: {}", from, e);
                        }
                    }
                    Err(e) => warn!("Decoder feed receive error: {}", e),
                }
            }

            _ = sleep_until(flush_at) => {
                flush = true;
                flush_at = Instant::now() + core.flush_interval();
            }

            Some((batch, result)) = done_rx.recv() => {
                sender = None;
                core.complete_flush(batch, result);
                flush_at = Instant::now() + core.flush_interval();
            }

            _ = heartbeat.tick() => {
                if beat.as_ref().map_or(true, |b| b.is_finished()) {
                    let transport = Arc::clone(&transport);
                    let session = session.clone();
                    let uptime = started.elapsed().as_secs();
                    beat = Some(tokio::spawn(async move {
                        if let Err(e) = transport.send_heartbeat(&session, uptime).await {
                            debug!("Relay heartbeat failed: {}", e);
                        }
                    }));
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(RelayCommand::FlushNow) => flush = true,
                    Some(RelayCommand::Shutdown) | None => break,
                }
            }
        }

        if flush {
            if let Some(batch) = core.begin_flush() {
                let transport = Arc::clone(&transport);
                let session = session.clone();
                let done_tx = done_tx.clone();
                sender = Some(tokio::spawn(async move {
                    let result = transport.send_batch(&session, &batch).await;
                    let _ = done_tx.send((batch, result)).await;
                }));
            }
        }

        status_tx.send_replace(core.status());
    }

    for task in [sender, beat].into_iter().flatten() {
        task.abort();
    }
    core.set_running(false);
    status_tx.send_replace(core.status());
    info!("Decoder relay stopped ({} queued)", core.queue().len());
}
