//! Rig adapters
//!
//! Every backend runs as its own task that owns its link, polls on a timer
//! and pushes what it learns into the state store. [`RigAdapter`] is the
//! closed set of backends behind one connect/disconnect/set surface.
//!
//! - **serial**: Yaesu and Kenwood ASCII CAT, Icom CI-V, over a byte stream
//! - **flrig**: XML-RPC client for a running flrig
//! - **rigctld**: line protocol client for hamlib's rigctld
//! - **mock**: deterministic waypoint simulator

pub mod flrig;
pub mod mock;
pub mod rigctld;
pub mod serial;
pub mod wire;

use std::future::Future;
use std::time::Duration;

use rig_protocol::mode;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{RadioConfig, RadioKind};
use crate::error::BridgeError;
use crate::state::StateHandle;

pub use flrig::FlrigAdapter;
pub use mock::MockAdapter;
pub use rigctld::RigctldAdapter;
pub use serial::{BoxedStream, SerialAdapter, StreamOpener};
pub use wire::{AsciiWire, CivWire, WireKind, WireProtocol};

/// How long a stopping adapter may take before it is aborted
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// A control request for the active rig
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigCommand {
    SetFrequency(u64),
    SetMode(String),
    SetPtt(bool),
}

/// Commands accepted by an adapter task
#[derive(Debug)]
pub enum AdapterCommand {
    /// Carry out a control request and report how it went
    Rig {
        command: RigCommand,
        response: oneshot::Sender<Result<(), BridgeError>>,
    },
    /// Close the link and stop
    Shutdown,
}

/// A running adapter task
#[derive(Debug)]
pub struct AdapterTask {
    cmd_tx: mpsc::Sender<AdapterCommand>,
    task: JoinHandle<()>,
}

impl AdapterTask {
    /// Spawn `run` with the receiving end of a fresh command channel
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<AdapterCommand>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        Self {
            cmd_tx,
            task: tokio::spawn(run(cmd_rx)),
        }
    }

    fn requester(&self, id: &'static str) -> RigRequester {
        RigRequester {
            id,
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Ask the task to stop and wait until its link and timers are gone
    async fn stop(mut self, id: &'static str) {
        let _ = self.cmd_tx.send(AdapterCommand::Shutdown).await;
        match timeout(STOP_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => debug!("{}: adapter task stopped", id),
            Ok(Err(e)) => warn!("{}: adapter task ended abnormally: {}", id, e),
            Err(_) => {
                warn!("{}: adapter task did not stop in time, aborting", id);
                self.task.abort();
                let _ = self.task.await;
            }
        }
    }
}

/// Sends control requests to a running adapter task without borrowing it
#[derive(Debug, Clone)]
pub struct RigRequester {
    id: &'static str,
    cmd_tx: mpsc::Sender<AdapterCommand>,
}

impl RigRequester {
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Carry out `command` and wait for the adapter's answer
    pub async fn execute(&self, command: RigCommand) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(AdapterCommand::Rig {
                command,
                response: tx,
            })
            .await
            .map_err(|_| BridgeError::AdapterStopped(self.id))?;
        rx.await.map_err(|_| BridgeError::AdapterStopped(self.id))?
    }
}

/// Wait out a reconnect delay while still answering commands
///
/// Returns true if shutdown was requested.
pub(crate) async fn wait_or_shutdown(
    id: &'static str,
    cmd_rx: &mut mpsc::Receiver<AdapterCommand>,
    delay: Duration,
) -> bool {
    let pause = sleep(delay);
    tokio::pin!(pause);
    loop {
        tokio::select! {
            _ = &mut pause => return false,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(AdapterCommand::Shutdown) => return true,
                Some(AdapterCommand::Rig { command, response }) => {
                    debug!("{}: dropping {:?}, link is down", id, command);
                    let _ = response.send(Err(BridgeError::Backend(format!("{} is not connected", id))));
                }
            }
        }
    }
}

/// Canonical tag for a mode name reported by flrig or rigctld
///
/// Returns `None` for an empty or unrecognised reply so the previous mode
/// stands.
pub fn normalize_backend_mode(name: &str) -> Option<String> {
    mode::canonical(name).map(str::to_string)
}

/// Hamlib-style mode name for a canonical or informal tag
pub fn backend_mode_name(tag: &str) -> String {
    let tag = tag.trim();
    let canonical = mode::alias(tag)
        .map(str::to_string)
        .unwrap_or_else(|| tag.to_ascii_uppercase());
    match canonical.as_str() {
        mode::tags::DATA_USB => "PKTUSB".into(),
        mode::tags::DATA_LSB => "PKTLSB".into(),
        mode::tags::DATA_FM => "PKTFM".into(),
        mode::tags::CW_R => "CWR".into(),
        mode::tags::RTTY_R => "RTTYR".into(),
        _ => canonical,
    }
}

/// One rig backend
#[derive(Debug)]
pub enum RigAdapter {
    Serial(SerialAdapter),
    Flrig(FlrigAdapter),
    Rigctld(RigctldAdapter),
    Mock(MockAdapter),
}

impl RigAdapter {
    /// Build the adapter the radio section asks for; `None` for no radio
    pub fn from_config(radio: &RadioConfig) -> Option<Self> {
        let poll = radio.poll_interval();
        match radio.kind {
            RadioKind::None => None,
            RadioKind::Yaesu => Some(RigAdapter::Serial(SerialAdapter::open_port(
                WireKind::Yaesu,
                radio.serial.clone(),
                poll,
            ))),
            RadioKind::Kenwood => Some(RigAdapter::Serial(SerialAdapter::open_port(
                WireKind::Kenwood,
                radio.serial.clone(),
                poll,
            ))),
            RadioKind::Icom => Some(RigAdapter::Serial(SerialAdapter::open_port(
                WireKind::Icom {
                    address: radio.icom_address,
                },
                radio.serial.clone(),
                poll,
            ))),
            RadioKind::Flrig => Some(RigAdapter::Flrig(FlrigAdapter::new(
                radio.flrig.clone(),
                poll,
            ))),
            RadioKind::Rigctld => Some(RigAdapter::Rigctld(RigctldAdapter::new(
                radio.rigctld.clone(),
                poll,
            ))),
            RadioKind::Mock => Some(RigAdapter::Mock(MockAdapter::new())),
        }
    }

    /// Adapter id, matching its descriptor
    pub fn id(&self) -> &'static str {
        match self {
            RigAdapter::Serial(a) => a.id(),
            RigAdapter::Flrig(_) => RadioKind::Flrig.id(),
            RigAdapter::Rigctld(_) => RadioKind::Rigctld.id(),
            RigAdapter::Mock(_) => RadioKind::Mock.id(),
        }
    }

    fn task_slot(&mut self) -> &mut Option<AdapterTask> {
        match self {
            RigAdapter::Serial(a) => &mut a.task,
            RigAdapter::Flrig(a) => &mut a.task,
            RigAdapter::Rigctld(a) => &mut a.task,
            RigAdapter::Mock(a) => &mut a.task,
        }
    }

    fn task(&self) -> Option<&AdapterTask> {
        match self {
            RigAdapter::Serial(a) => a.task.as_ref(),
            RigAdapter::Flrig(a) => a.task.as_ref(),
            RigAdapter::Rigctld(a) => a.task.as_ref(),
            RigAdapter::Mock(a) => a.task.as_ref(),
        }
    }

    /// Whether the adapter task is running
    pub fn is_running(&self) -> bool {
        self.task().is_some()
    }

    /// Start the adapter task; a running adapter is left alone
    pub fn connect(&mut self, state: StateHandle) {
        if self.is_running() {
            return;
        }
        info!("Connecting rig adapter {}", self.id());
        let task = match self {
            RigAdapter::Serial(a) => a.spawn(state),
            RigAdapter::Flrig(a) => a.spawn(state),
            RigAdapter::Rigctld(a) => a.spawn(state),
            RigAdapter::Mock(a) => a.spawn(state),
        };
        *self.task_slot() = Some(task);
    }

    /// Stop the adapter task and release its link
    ///
    /// Returns once the task is gone. Safe on an adapter that never connected.
    pub async fn disconnect(&mut self) {
        let id = self.id();
        match self.task_slot().take() {
            Some(task) => {
                info!("Disconnecting rig adapter {}", id);
                task.stop(id).await;
            }
            None => debug!("Rig adapter {} was not running", id),
        }
    }

    /// Request channel of the running task
    pub fn requester(&self) -> Option<RigRequester> {
        let id = self.id();
        self.task().map(|task| task.requester(id))
    }

    /// Forward a control request to the adapter task
    pub async fn execute(&self, command: RigCommand) -> Result<(), BridgeError> {
        match self.requester() {
            Some(requester) => requester.execute(command).await,
            None => Err(BridgeError::AdapterStopped(self.id())),
        }
    }

    pub async fn set_frequency(&self, hz: u64) -> Result<(), BridgeError> {
        self.execute(RigCommand::SetFrequency(hz)).await
    }

    pub async fn set_mode(&self, tag: &str) -> Result<(), BridgeError> {
        self.execute(RigCommand::SetMode(tag.to_string())).await
    }

    pub async fn set_ptt(&self, on: bool) -> Result<(), BridgeError> {
        self.execute(RigCommand::SetPtt(on)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_backend_mode() {
        assert_eq!(normalize_backend_mode("PKTUSB").as_deref(), Some("DATA-USB"));
        assert_eq!(normalize_backend_mode("usb").as_deref(), Some("USB"));
        assert_eq!(normalize_backend_mode("CWR").as_deref(), Some("CW-R"));
        assert_eq!(normalize_backend_mode("  "), None);
        assert_eq!(normalize_backend_mode("?"), None);
        assert_eq!(normalize_backend_mode("#ERR"), None);
        assert_eq!(normalize_backend_mode("2400"), None);
    }

    #[test]
    fn test_backend_mode_name() {
        assert_eq!(backend_mode_name("FT8"), "PKTUSB");
        assert_eq!(backend_mode_name("DATA-LSB"), "PKTLSB");
        assert_eq!(backend_mode_name("cw-r"), "CWR");
        assert_eq!(backend_mode_name("usb"), "USB");
    }

    #[test]
    fn test_from_config() {
        let mut radio = RadioConfig::default();
        assert!(RigAdapter::from_config(&radio).is_none());

        radio.kind = RadioKind::Icom;
        let adapter = RigAdapter::from_config(&radio).unwrap();
        assert_eq!(adapter.id(), "icom");
        assert!(!adapter.is_running());

        radio.kind = RadioKind::Rigctld;
        assert_eq!(RigAdapter::from_config(&radio).unwrap().id(), "rigctld");
    }

    #[tokio::test]
    async fn test_commands_fail_when_not_running() {
        let adapter = RigAdapter::Mock(MockAdapter::new());
        assert!(matches!(
            adapter.set_frequency(7_074_000).await,
            Err(BridgeError::AdapterStopped("mock"))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_harmless() {
        let mut adapter = RigAdapter::Mock(MockAdapter::new());
        adapter.disconnect().await;
        adapter.disconnect().await;
        assert!(!adapter.is_running());
    }
}
