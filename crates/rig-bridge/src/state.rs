//! Rig state store
//!
//! One canonical [`RigState`] owned by a single actor task. Adapters send
//! field changes through a [`StateHandle`]; the actor applies them in
//! arrival order and fans each real change out on a broadcast channel.
//! Setting a field to the value it already has is silent.

use chrono::Utc;
use rig_protocol::RadioReport;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::BridgeError;

/// Capacity of the change feed; slow subscribers see `Lagged`
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Canonical rig state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigState {
    pub connected: bool,
    pub frequency_hz: u64,
    pub mode: String,
    /// Hz or a device-specific filter index
    pub filter_width: u32,
    pub ptt_active: bool,
    /// Milliseconds since the Unix epoch; 0 until the first change
    pub last_update_at: u64,
}

/// One settable field with its new value
///
/// Serializes as `{"property": "frequencyHz", "value": 14074000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "property", content = "value", rename_all = "camelCase")]
pub enum RigField {
    Connected(bool),
    FrequencyHz(u64),
    Mode(String),
    FilterWidth(u32),
    PttActive(bool),
}

impl RigField {
    /// Wire name of the property
    pub fn property(&self) -> &'static str {
        match self {
            RigField::Connected(_) => "connected",
            RigField::FrequencyHz(_) => "frequencyHz",
            RigField::Mode(_) => "mode",
            RigField::FilterWidth(_) => "filterWidth",
            RigField::PttActive(_) => "pttActive",
        }
    }
}

impl From<RadioReport> for RigField {
    fn from(report: RadioReport) -> Self {
        match report {
            RadioReport::Frequency { hz } => RigField::FrequencyHz(hz),
            RadioReport::Mode { mode } => RigField::Mode(mode.to_string()),
            RadioReport::FilterWidth { width } => RigField::FilterWidth(width),
            RadioReport::Ptt { active } => RigField::PttActive(active),
        }
    }
}

/// A change published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigUpdate {
    #[serde(flatten)]
    pub field: RigField,
    pub at: u64,
}

/// The state record plus its change feed
#[derive(Debug)]
pub struct RigStateStore {
    state: RigState,
    updates: broadcast::Sender<RigUpdate>,
}

impl RigStateStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: RigState::default(),
            updates,
        }
    }

    pub fn state(&self) -> &RigState {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RigUpdate> {
        self.updates.subscribe()
    }

    /// Set one field; returns the published update, or `None` if unchanged
    pub fn set(&mut self, field: RigField) -> Option<RigUpdate> {
        let s = &mut self.state;
        let changed = match &field {
            RigField::Connected(v) => replace_if_changed(&mut s.connected, *v),
            RigField::FrequencyHz(v) => replace_if_changed(&mut s.frequency_hz, *v),
            RigField::Mode(v) => {
                if s.mode != *v {
                    s.mode.clone_from(v);
                    true
                } else {
                    false
                }
            }
            RigField::FilterWidth(v) => replace_if_changed(&mut s.filter_width, *v),
            RigField::PttActive(v) => replace_if_changed(&mut s.ptt_active, *v),
        };
        if !changed {
            return None;
        }

        let at = now_ms().max(s.last_update_at);
        s.last_update_at = at;
        trace!("Rig {} -> {:?}", field.property(), field);
        let update = RigUpdate { field, at };
        // No subscribers is fine
        let _ = self.updates.send(update.clone());
        Some(update)
    }

    /// Back to disconnected defaults, announcing each field that moves
    pub fn reset(&mut self) -> Vec<RigUpdate> {
        let defaults = RigState::default();
        [
            RigField::Connected(defaults.connected),
            RigField::FrequencyHz(defaults.frequency_hz),
            RigField::Mode(defaults.mode),
            RigField::FilterWidth(defaults.filter_width),
            RigField::PttActive(defaults.ptt_active),
        ]
        .into_iter()
        .filter_map(|f| self.set(f))
        .collect()
    }
}

impl Default for RigStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Commands accepted by the state store actor
#[derive(Debug)]
pub enum StateCommand {
    /// Apply field changes in order
    Apply { fields: Vec<RigField> },
    /// Return a snapshot
    Snapshot { response: oneshot::Sender<RigState> },
    /// Return a snapshot and a feed starting right after it
    Subscribe {
        response: oneshot::Sender<(RigState, broadcast::Receiver<RigUpdate>)>,
    },
    /// Return to disconnected defaults
    Reset { response: oneshot::Sender<()> },
    /// Shutdown the actor
    Shutdown,
}

/// Run the state store actor until shutdown or until every handle is gone
pub async fn run_state_actor(mut store: RigStateStore, mut cmd_rx: mpsc::Receiver<StateCommand>) {
    info!("Starting rig state store");
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            StateCommand::Apply { fields } => {
                for field in fields {
                    store.set(field);
                }
            }
            StateCommand::Snapshot { response } => {
                let _ = response.send(store.state().clone());
            }
            StateCommand::Subscribe { response } => {
                let _ = response.send((store.state().clone(), store.subscribe()));
            }
            StateCommand::Reset { response } => {
                let moved = store.reset();
                debug!("Rig state reset ({} field(s) changed)", moved.len());
                let _ = response.send(());
            }
            StateCommand::Shutdown => break,
        }
    }
    info!("Rig state store stopped");
}

/// Cloneable handle to the state store actor
#[derive(Debug, Clone)]
pub struct StateHandle {
    cmd_tx: mpsc::Sender<StateCommand>,
}

impl StateHandle {
    /// Spawn a state store actor and return its handle
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let task = tokio::spawn(run_state_actor(RigStateStore::new(), cmd_rx));
        (Self { cmd_tx }, task)
    }

    async fn send(&self, cmd: StateCommand) -> Result<(), BridgeError> {
        self.cmd_tx.send(cmd).await.map_err(|_| BridgeError::ShutDown)
    }

    /// Set one field
    pub async fn set(&self, field: RigField) {
        self.apply(vec![field]).await;
    }

    /// Set several fields, in order
    pub async fn apply(&self, fields: Vec<RigField>) {
        if fields.is_empty() {
            return;
        }
        if self.send(StateCommand::Apply { fields }).await.is_err() {
            debug!("State store gone, dropping update");
        }
    }

    /// Apply parsed radio reports, in order
    pub async fn report(&self, reports: Vec<RadioReport>) {
        self.apply(reports.into_iter().map(RigField::from).collect())
            .await;
    }

    pub async fn snapshot(&self) -> Result<RigState, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.send(StateCommand::Snapshot { response: tx }).await?;
        rx.await.map_err(|_| BridgeError::ShutDown)
    }

    /// Current state plus every change after it
    pub async fn subscribe(
        &self,
    ) -> Result<(RigState, broadcast::Receiver<RigUpdate>), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.send(StateCommand::Subscribe { response: tx }).await?;
        rx.await.map_err(|_| BridgeError::ShutDown)
    }

    /// Return to disconnected defaults and wait until done
    pub async fn reset(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.send(StateCommand::Reset { response: tx }).await?;
        rx.await.map_err(|_| BridgeError::ShutDown)
    }

    pub async fn shutdown(&self) {
        let _ = self.send(StateCommand::Shutdown).await;
    }
}
