//! hamlib rigctld backend
//!
//! rigctld speaks a newline-delimited protocol on TCP. Reads answer with bare
//! values (`m` answers with the mode and then the passband on a second line);
//! writes answer `RPRT 0` on success and `RPRT <negative>` when refused.

use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::serial::{SessionEnd, RECONNECT_DELAY};
use super::{backend_mode_name, normalize_backend_mode, wait_or_shutdown, AdapterCommand, AdapterTask, RigCommand};
use crate::config::NetEndpoint;
use crate::error::BridgeError;
use crate::state::{RigField, StateHandle};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long rigctld may take to answer one command
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// One open rigctld connection
#[derive(Debug)]
pub struct RigctldSession<S> {
    stream: BufReader<S>,
}

impl<S> RigctldSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn read_line(&mut self) -> Result<String, BridgeError> {
        let mut line = String::new();
        let n = timeout(REPLY_TIMEOUT, self.stream.read_line(&mut line))
            .await
            .map_err(|_| io::Error::new(ErrorKind::TimedOut, "rigctld did not answer"))??;
        if n == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "rigctld closed the connection").into());
        }
        Ok(line.trim_end().to_string())
    }

    /// Send `command` and collect up to `lines` reply lines
    ///
    /// An `RPRT` reply ends the answer early; a non-zero code is a rejection.
    pub async fn command(&mut self, command: &str, lines: usize) -> Result<Vec<String>, BridgeError> {
        trace!("rigctld -> {}", command);
        let writer = self.stream.get_mut();
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reply = Vec::with_capacity(lines);
        while reply.len() < lines.max(1) {
            let line = self.read_line().await?;
            trace!("rigctld <- {}", line);
            if let Some(code) = line.strip_prefix("RPRT") {
                return match code.trim().parse::<i32>() {
                    Ok(0) => Ok(reply),
                    Ok(code) => Err(BridgeError::Backend(format!("rigctld refused {:?}: RPRT {}", command, code))),
                    Err(_) => Err(BridgeError::Backend(format!("rigctld: bad reply {:?}", line))),
                };
            }
            if lines == 0 {
                break;
            }
            reply.push(line);
        }
        Ok(reply)
    }

    /// Read frequency, mode, passband and PTT
    ///
    /// A refused read is an error. Values that do not parse are left out so
    /// the previous value stands.
    pub async fn read_state(&mut self) -> Result<Vec<RigField>, BridgeError> {
        let mut fields = Vec::with_capacity(4);

        let reply = self.command("f", 1).await?;
        match reply.first().and_then(|f| f.trim().parse::<u64>().ok()) {
            Some(hz) => fields.push(RigField::FrequencyHz(hz)),
            None => debug!("rigctld: ignoring frequency {:?}", reply),
        }

        let reply = self.command("m", 2).await?;
        match reply.first().and_then(|m| normalize_backend_mode(m)) {
            Some(tag) => fields.push(RigField::Mode(tag)),
            None => debug!("rigctld: ignoring mode {:?}", reply.first()),
        }
        if let Some(width) = reply.get(1).and_then(|w| w.trim().parse::<u32>().ok()) {
            if width > 0 {
                fields.push(RigField::FilterWidth(width));
            }
        }

        let reply = self.command("t", 1).await?;
        match reply.first().and_then(|t| t.trim().parse::<i32>().ok()) {
            Some(v) => fields.push(RigField::PttActive(v != 0)),
            None => debug!("rigctld: ignoring PTT {:?}", reply),
        }

        Ok(fields)
    }

    pub async fn execute(&mut self, command: &RigCommand) -> Result<(), BridgeError> {
        let line = match command {
            RigCommand::SetFrequency(hz) => format!("F {}", hz),
            RigCommand::SetMode(tag) => format!("M {} 0", backend_mode_name(tag)),
            RigCommand::SetPtt(on) => format!("T {}", u8::from(*on)),
        };
        self.command(&line, 0).await.map(|_| ())
    }
}

/// Run one session over an open connection
pub async fn run_rigctld_session<S>(
    session: &mut RigctldSession<S>,
    poll: Duration,
    state: &StateHandle,
    cmd_rx: &mut mpsc::Receiver<AdapterCommand>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut live = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => match session.read_state().await {
                Ok(fields) => {
                    let mut update = Vec::with_capacity(fields.len() + 1);
                    if !live {
                        live = true;
                        update.push(RigField::Connected(true));
                    }
                    update.extend(fields);
                    state.apply(update).await;
                }
                // rigctld is up but the rig behind it is not answering
                Err(BridgeError::Backend(e)) => {
                    if live {
                        warn!("rigctld: rig stopped answering: {}", e);
                    } else {
                        debug!("rigctld: rig still not answering: {}", e);
                    }
                    live = false;
                    state.set(RigField::Connected(false)).await;
                }
                Err(BridgeError::Io(e)) => return SessionEnd::Lost(e),
                Err(e) => return SessionEnd::Lost(io::Error::new(ErrorKind::Other, e.to_string())),
            },

            cmd = cmd_rx.recv() => match cmd {
                None | Some(AdapterCommand::Shutdown) => return SessionEnd::Shutdown,
                Some(AdapterCommand::Rig { command, response }) => {
                    match session.execute(&command).await {
                        Ok(()) => {
                            debug!("rigctld: {:?}", command);
                            let _ = response.send(Ok(()));
                        }
                        Err(BridgeError::Io(e)) => {
                            let _ = response.send(Err(BridgeError::Backend(format!("rigctld: {}", e))));
                            return SessionEnd::Lost(e);
                        }
                        Err(e) => {
                            warn!("{}", e);
                            let _ = response.send(Err(e));
                        }
                    }
                }
            }
        }
    }
}

/// rigctld adapter
#[derive(Debug)]
pub struct RigctldAdapter {
    endpoint: NetEndpoint,
    poll: Duration,
    pub(super) task: Option<AdapterTask>,
}

impl RigctldAdapter {
    pub fn new(endpoint: NetEndpoint, poll: Duration) -> Self {
        Self {
            endpoint,
            poll,
            task: None,
        }
    }

    pub fn endpoint(&self) -> &NetEndpoint {
        &self.endpoint
    }

    pub(super) fn spawn(&self, state: StateHandle) -> AdapterTask {
        let endpoint = self.endpoint.clone();
        let poll = self.poll;
        AdapterTask::spawn(move |cmd_rx| run_rigctld_adapter(endpoint, poll, state, cmd_rx))
    }
}

async fn connect(addr: &str) -> io::Result<TcpStream> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connect, poll and reconnect until shutdown
pub async fn run_rigctld_adapter(
    endpoint: NetEndpoint,
    poll: Duration,
    state: StateHandle,
    mut cmd_rx: mpsc::Receiver<AdapterCommand>,
) {
    let addr = endpoint.addr();
    let mut failures = 0u32;
    info!("Starting rigctld adapter for {}", addr);

    loop {
        match connect(&addr).await {
            Ok(stream) => {
                failures = 0;
                info!("rigctld: connected to {}", addr);
                let mut session = RigctldSession::new(stream);
                let end = run_rigctld_session(&mut session, poll, &state, &mut cmd_rx).await;
                state.set(RigField::Connected(false)).await;
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(e) => warn!("rigctld: connection lost: {}", e),
                }
            }
            Err(e) => {
                if failures == 0 {
                    warn!("rigctld: cannot connect to {}: {}", addr, e);
                } else {
                    debug!("rigctld: still cannot connect ({} attempts): {}", failures + 1, e);
                }
                failures = failures.saturating_add(1);
                state.set(RigField::Connected(false)).await;
            }
        }

        if wait_or_shutdown("rigctld", &mut cmd_rx, RECONNECT_DELAY).await {
            break;
        }
    }

    info!("rigctld adapter stopped");
}
