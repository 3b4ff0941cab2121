//! Radio Control Bridge
//!
//! Keeps one live picture of the transceiver ([`RigState`]) fed by whichever
//! rig adapter is active, and runs integrations (decoder relay, logger bridge)
//! beside it.
//!
//! # Architecture
//!
//! - **state**: the single-writer state store actor and its change feed
//! - **adapters**: rig backends, each running as its own task
//! - **integrations**: relay and logger bridges
//! - **registry**: descriptor table plus the actor owning live instances
//! - **routes**: read-only JSON routes over a [`BridgeContext`]
//! - **config**: persisted configuration
//!
//! [`Bridge`] wires them together and is the command surface the
//! presentation layer talks to.
//!
//! # Example
//!
//! ```rust,no_run
//! use rig_bridge::{Bridge, BridgeConfig, RadioKind};
//!
//! # async fn example() -> Result<(), rig_bridge::BridgeError> {
//! let mut config = BridgeConfig::load();
//! config.radio.kind = RadioKind::Mock;
//!
//! let bridge = Bridge::start(config).await;
//! let (snapshot, mut updates) = bridge.subscribe().await?;
//! println!("{} Hz", snapshot.frequency_hz);
//! while let Ok(update) = updates.recv().await {
//!     println!("{:?}", update);
//! }
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod integrations;
pub mod registry;
pub mod routes;
pub mod state;

use rig_detect::{PortScanner, SerialPortInfo};
use rig_relay::RelayStatus;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use adapters::{RigAdapter, RigCommand};
pub use config::{BridgeConfig, N3fjpSettings, NetEndpoint, RadioConfig, RadioKind, RelaySettings};
pub use error::BridgeError;
pub use integrations::{IntegrationStatus, N3fjpStatus};
pub use registry::{AdapterInfo, AdapterLifecycle, RegistryHandle, DESCRIPTORS};
pub use routes::{BridgeContext, RouteTable};
pub use state::{RigField, RigState, RigUpdate, StateHandle};

use registry::{integration_enabled, integration_section_changed, AdapterCategory};

/// The running bridge
#[derive(Debug)]
pub struct Bridge {
    state: StateHandle,
    state_task: JoinHandle<()>,
    registry: RegistryHandle,
    registry_task: JoinHandle<()>,
    config_tx: watch::Sender<BridgeConfig>,
    routes: RouteTable,
}

fn integration_ids() -> impl Iterator<Item = &'static str> {
    DESCRIPTORS
        .iter()
        .filter(|d| d.category == AdapterCategory::Integration)
        .map(|d| d.id)
}

impl Bridge {
    /// Start the state store and registry, connect the configured rig and
    /// start every enabled integration
    ///
    /// Integrations that refuse to start are logged and left stopped.
    pub async fn start(config: BridgeConfig) -> Self {
        info!("Starting bridge (radio: {})", config.radio.kind);
        let (state, state_task) = StateHandle::spawn();
        let (registry, registry_task) = RegistryHandle::spawn(state.clone(), config.clone());
        let (config_tx, _) = watch::channel(config.clone());

        let bridge = Self {
            state,
            state_task,
            registry,
            registry_task,
            config_tx,
            routes: RouteTable::build(),
        };

        if let Err(e) = bridge.registry.switch_rig(config.radio.clone()).await {
            warn!("Could not start rig adapter: {}", e);
        }
        for id in integration_ids() {
            if integration_enabled(id, &config) {
                bridge.start_integration(id, &config).await;
            }
        }
        bridge
    }

    async fn start_integration(&self, id: &str, config: &BridgeConfig) {
        if let Err(e) = self.registry.start_integration(id, config.clone()).await {
            warn!("Integration {} not running: {}", id, e);
        }
    }

    /// Current rig state
    pub async fn rig_state(&self) -> Result<RigState, BridgeError> {
        self.state.snapshot().await
    }

    /// Snapshot plus every change after it
    pub async fn subscribe(&self) -> Result<(RigState, broadcast::Receiver<RigUpdate>), BridgeError> {
        self.state.subscribe().await
    }

    pub async fn set_frequency(&self, hz: u64) -> Result<(), BridgeError> {
        self.registry.execute(RigCommand::SetFrequency(hz)).await
    }

    pub async fn set_mode(&self, tag: &str) -> Result<(), BridgeError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(BridgeError::Config("mode must not be empty".into()));
        }
        self.registry.execute(RigCommand::SetMode(tag.to_string())).await
    }

    /// Key or unkey; refused unless `radio.ptt_enabled`
    pub async fn set_ptt(&self, on: bool) -> Result<(), BridgeError> {
        self.registry.execute(RigCommand::SetPtt(on)).await
    }

    pub fn config(&self) -> BridgeConfig {
        self.config_tx.borrow().clone()
    }

    /// Watch configuration changes
    pub fn subscribe_config(&self) -> watch::Receiver<BridgeConfig> {
        self.config_tx.subscribe()
    }

    /// Adopt a new configuration
    ///
    /// A changed radio section switches the rig adapter (a PTT-flag-only
    /// change does not); a changed integration section restarts or stops
    /// that integration. Nothing is written to disk.
    pub async fn replace_config(&self, config: BridgeConfig) -> Result<(), BridgeError> {
        let previous = self.config_tx.send_replace(config.clone());

        if previous.radio != config.radio {
            self.registry.update_radio(config.radio.clone()).await?;
        }

        for id in integration_ids() {
            if !integration_section_changed(id, &previous, &config) {
                continue;
            }
            if integration_enabled(id, &config) {
                self.start_integration(id, &config).await;
            } else {
                self.registry.stop_integration(id, config.clone()).await?;
            }
        }
        Ok(())
    }

    /// Switch to a different kind of rig, keeping its connection settings
    pub async fn switch_rig(&self, kind: RadioKind) -> Result<Option<&'static str>, BridgeError> {
        let mut radio = self.config_tx.borrow().radio.clone();
        radio.kind = kind;
        self.config_tx.send_modify(|c| c.radio = radio.clone());
        self.registry.switch_rig(radio).await
    }

    /// Make a prepared adapter the active rig
    pub async fn install_rig(&self, adapter: RigAdapter) -> Result<(), BridgeError> {
        self.registry.install_rig(adapter).await
    }

    pub async fn active_rig(&self) -> Result<Option<&'static str>, BridgeError> {
        self.registry.active_rig().await
    }

    /// Local serial ports
    pub async fn serial_ports(&self) -> Result<Vec<SerialPortInfo>, BridgeError> {
        let ports = tokio::task::spawn_blocking(|| PortScanner::new().enumerate_ports())
            .await
            .map_err(|e| BridgeError::Backend(format!("port scan failed: {}", e)))??;
        Ok(ports)
    }

    /// Open and close `path` at `baud` without touching the active rig
    pub async fn test_serial_port(&self, path: &str, baud: u32) -> Result<(), BridgeError> {
        Ok(rig_detect::test_open(path, baud).await?)
    }

    pub async fn integration_status(&self, id: &str) -> Result<IntegrationStatus, BridgeError> {
        self.registry.integration_status(id).await
    }

    pub async fn relay_status(&self) -> Result<RelayStatus, BridgeError> {
        match self.registry.integration_status("wsjtx-relay").await? {
            IntegrationStatus::WsjtxRelay(status) => Ok(status),
            _ => Err(BridgeError::UnknownAdapter("wsjtx-relay".into())),
        }
    }

    /// Context handed to route handlers
    pub fn context(&self) -> BridgeContext {
        BridgeContext {
            state: self.state.clone(),
            registry: self.registry.clone(),
            config: self.config_tx.subscribe(),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run the handler registered for `path`
    pub async fn route(&self, path: &str) -> Result<Value, BridgeError> {
        self.routes.dispatch(path, &self.context()).await
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<AdapterLifecycle> {
        self.registry.subscribe_lifecycle()
    }

    /// Stop every adapter, then the registry and the state store
    pub async fn shutdown(self) {
        info!("Shutting down bridge");
        self.registry.shutdown().await;
        if let Err(e) = self.registry_task.await {
            warn!("Registry task ended abnormally: {}", e);
        }
        self.state.shutdown().await;
        if let Err(e) = self.state_task.await {
            warn!("State task ended abnormally: {}", e);
        }
        info!("Bridge stopped");
    }
}
