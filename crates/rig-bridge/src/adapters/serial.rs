//! Serial rig adapter
//!
//! Runs one [`WireProtocol`] over a byte stream. The stream comes from an
//! opener so the same task drives a real serial port, a virtual radio on a
//! `tokio::io::duplex` pipe, or anything else that reads and writes.
//!
//! A lost or unopenable link flips `connected` off and is retried after
//! [`RECONNECT_DELAY`]; the link counts as up again once the radio answers.

use std::fmt;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

use rig_detect::SerialSettings;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::{wait_or_shutdown, AdapterCommand, AdapterTask, WireKind, WireProtocol};
use crate::error::BridgeError;
use crate::state::{RigField, StateHandle};

/// Pause between attempts to (re)open the link
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Anything a wire protocol can run over
pub trait RigStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RigStream for T {}

/// A boxed link to the radio
pub type BoxedStream = Box<dyn RigStream>;

/// Opens a fresh link each time it is called
pub type StreamOpener = Arc<dyn Fn() -> Result<BoxedStream, BridgeError> + Send + Sync>;

/// Serial CAT adapter
pub struct SerialAdapter {
    wire: WireKind,
    opener: StreamOpener,
    poll: Duration,
    pub(super) task: Option<AdapterTask>,
}

impl fmt::Debug for SerialAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialAdapter")
            .field("wire", &self.wire)
            .field("poll", &self.poll)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl SerialAdapter {
    /// Adapter on a local serial port
    pub fn open_port(wire: WireKind, settings: SerialSettings, poll: Duration) -> Self {
        let opener: StreamOpener = Arc::new(move || {
            let stream = rig_detect::open_serial(&settings)?;
            Ok(Box::new(stream) as BoxedStream)
        });
        Self::with_opener(wire, opener, poll)
    }

    /// Adapter on links produced by `opener`
    pub fn with_opener(wire: WireKind, opener: StreamOpener, poll: Duration) -> Self {
        Self {
            wire,
            opener,
            poll,
            task: None,
        }
    }

    pub fn id(&self) -> &'static str {
        self.wire.id()
    }

    pub fn wire(&self) -> WireKind {
        self.wire
    }

    pub(super) fn spawn(&self, state: StateHandle) -> AdapterTask {
        let wire = self.wire;
        let opener = Arc::clone(&self.opener);
        let poll = self.poll;
        AdapterTask::spawn(move |cmd_rx| run_serial_adapter(wire, opener, poll, state, cmd_rx))
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    Shutdown,
    Lost(io::Error),
}

/// Run the serial adapter task: open, run a session, retry on loss
pub async fn run_serial_adapter(
    wire: WireKind,
    opener: StreamOpener,
    poll: Duration,
    state: StateHandle,
    mut cmd_rx: mpsc::Receiver<AdapterCommand>,
) {
    let id = wire.id();
    let mut failures = 0u32;
    info!("Starting {} adapter task", wire.protocol().name());

    loop {
        match opener() {
            Ok(stream) => {
                failures = 0;
                debug!("{}: link open", id);
                let mut protocol = wire.build();
                let end = run_session(id, stream, protocol.as_mut(), poll, &state, &mut cmd_rx).await;
                state.set(RigField::Connected(false)).await;
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(e) => warn!("{}: link lost: {}", id, e),
                }
            }
            Err(e) => {
                if failures == 0 {
                    warn!("{}: cannot open link: {}", id, e);
                } else {
                    debug!("{}: still cannot open link ({} attempts): {}", id, failures + 1, e);
                }
                failures = failures.saturating_add(1);
                state.set(RigField::Connected(false)).await;
            }
        }

        if wait_or_shutdown(id, &mut cmd_rx, RECONNECT_DELAY).await {
            break;
        }
    }

    info!("{} adapter task stopped", wire.protocol().name());
}

async fn write_bytes<S>(stream: &mut S, id: &str, data: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    trace!("{} -> {:02X?}", id, data);
    stream.write_all(data).await?;
    stream.flush().await
}

/// Poll, parse and execute over one open link
///
/// Returns on shutdown or when the link fails.
pub async fn run_session<S>(
    id: &'static str,
    mut stream: S,
    wire: &mut dyn WireProtocol,
    poll: Duration,
    state: &StateHandle,
    cmd_rx: &mut mpsc::Receiver<AdapterCommand>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = [0u8; 512];
    let mut live = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = write_bytes(&mut stream, id, &wire.poll()).await {
                    return SessionEnd::Lost(e);
                }
            }

            result = stream.read(&mut buf) => {
                let n = match result {
                    Ok(0) => return SessionEnd::Lost(io::Error::new(ErrorKind::UnexpectedEof, "link closed")),
                    Ok(n) => n,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
                    Err(e) => return SessionEnd::Lost(e),
                };
                trace!("{} <- {:02X?}", id, &buf[..n]);

                let reports = wire.feed(&buf[..n]);
                if reports.is_empty() {
                    continue;
                }
                let mut fields = Vec::with_capacity(reports.len() + 1);
                if !live {
                    live = true;
                    info!("{}: radio is answering", id);
                    fields.push(RigField::Connected(true));
                }
                fields.extend(reports.into_iter().map(RigField::from));
                state.apply(fields).await;
            }

            cmd = cmd_rx.recv() => {
                let (command, response) = match cmd {
                    None | Some(AdapterCommand::Shutdown) => return SessionEnd::Shutdown,
                    Some(AdapterCommand::Rig { command, response }) => (command, response),
                };
                let bytes = match wire.encode(&command) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("{}: cannot encode {:?}: {}", id, command, e);
                        let _ = response.send(Err(e.into()));
                        continue;
                    }
                };
                debug!("{}: {:?}", id, command);
                match write_bytes(&mut stream, id, &bytes).await {
                    Ok(()) => {
                        let _ = response.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = response.send(Err(BridgeError::Backend(format!("{}: write failed: {}", id, e))));
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RigCommand;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn single_use_opener(stream: DuplexStream) -> StreamOpener {
        let slot = Mutex::new(Some(stream));
        Arc::new(move || {
            slot.lock()
                .unwrap()
                .take()
                .map(|s| Box::new(s) as BoxedStream)
                .ok_or_else(|| BridgeError::Backend("no more links".into()))
        })
    }

    #[tokio::test]
    async fn test_session_polls_and_reports() {
        let (state, _task) = StateHandle::spawn();
        let (_initial, mut updates) = state.subscribe().await.unwrap();
        let (ours, mut radio) = tokio::io::duplex(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let handle = tokio::spawn(run_serial_adapter(
            WireKind::Kenwood,
            single_use_opener(ours),
            Duration::from_millis(50),
            state.clone(),
            cmd_rx,
        ));

        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(1), radio.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"IF;");

        radio
            .write_all(b"IF00007074000     +000000000010000000;")
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.field, RigField::Connected(true));
        assert_eq!(
            updates.recv().await.unwrap().field,
            RigField::FrequencyHz(7_074_000)
        );
        assert_eq!(updates.recv().await.unwrap().field, RigField::Mode("LSB".into()));

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_command_written_and_acknowledged() {
        let (state, _task) = StateHandle::spawn();
        let (ours, mut radio) = tokio::io::duplex(256);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let mut wire = WireKind::Kenwood.build();

        let session = tokio::spawn(async move {
            run_session(
                "kenwood",
                ours,
                wire.as_mut(),
                Duration::from_secs(3600),
                &state,
                &mut cmd_rx,
            )
            .await
        });

        // First tick fires immediately
        let mut buf = [0u8; 64];
        let n = radio.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"IF;");

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(AdapterCommand::Rig {
                command: RigCommand::SetPtt(true),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
        let n = radio.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"TX;");

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(AdapterCommand::Rig {
                command: RigCommand::SetMode("DV".into()),
                response: tx,
            })
            .await
            .unwrap();
        assert!(matches!(rx.await.unwrap(), Err(BridgeError::Protocol(_))));

        drop(radio);
        assert!(matches!(session.await.unwrap(), SessionEnd::Lost(_)));
    }

    #[tokio::test]
    async fn test_unopenable_link_reports_disconnected_and_stops() {
        let (state, _task) = StateHandle::spawn();
        let opener: StreamOpener = Arc::new(|| Err(BridgeError::Backend("no such port".into())));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_serial_adapter(
            WireKind::Yaesu,
            opener,
            Duration::from_millis(100),
            state.clone(),
            cmd_rx,
        ));

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(AdapterCommand::Rig {
                command: RigCommand::SetFrequency(7_000_000),
                response: tx,
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_err());

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(!state.snapshot().await.unwrap().connected);
    }
}
