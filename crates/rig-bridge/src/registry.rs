//! Adapter registry
//!
//! Knows every adapter the bridge can run (the build-time [`DESCRIPTORS`]
//! table) and owns the live instances. At most one rig adapter is active; a
//! switch always disconnects the previous instance before the next one
//! connects, whether or not the previous one ever reached its radio.
//! Integrations are independent of the rig and of each other.
//!
//! Runs as an actor so switches and dispatches are serialized.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{RigAdapter, RigCommand, RigRequester};
use crate::config::{BridgeConfig, RadioConfig, RadioKind};
use crate::error::BridgeError;
use crate::integrations::{IntegrationAdapter, IntegrationStatus, N3fjpIntegration, RelayIntegration};
use crate::routes::{register_n3fjp_routes, register_relay_routes, RouteTable};
use crate::state::StateHandle;

const LIFECYCLE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterCategory {
    Rig,
    Integration,
}

/// How an adapter instance is made
#[derive(Debug, Clone, Copy)]
pub enum AdapterFactory {
    /// Rig adapter of this kind, from the radio section
    Rig(RadioKind),
    /// Integration from the whole configuration
    Integration(fn(&BridgeConfig) -> IntegrationAdapter),
}

/// A registered adapter
#[derive(Debug)]
pub struct AdapterDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: AdapterCategory,
    /// Configuration section the adapter reads
    pub config_key: &'static str,
    pub factory: AdapterFactory,
    pub register_routes: Option<fn(&mut RouteTable)>,
}

fn relay_integration(config: &BridgeConfig) -> IntegrationAdapter {
    IntegrationAdapter::WsjtxRelay(RelayIntegration::new(config.wsjtx_relay.clone()))
}

fn n3fjp_integration(config: &BridgeConfig) -> IntegrationAdapter {
    IntegrationAdapter::N3fjp(N3fjpIntegration::new(config.n3fjp.clone()))
}

const fn rig(id: &'static str, display_name: &'static str, kind: RadioKind) -> AdapterDescriptor {
    AdapterDescriptor {
        id,
        display_name,
        category: AdapterCategory::Rig,
        config_key: "radio",
        factory: AdapterFactory::Rig(kind),
        register_routes: None,
    }
}

/// Every adapter the bridge knows
pub static DESCRIPTORS: &[AdapterDescriptor] = &[
    rig("yaesu", "Yaesu CAT (serial)", RadioKind::Yaesu),
    rig("kenwood", "Kenwood CAT (serial)", RadioKind::Kenwood),
    rig("icom", "Icom CI-V (serial)", RadioKind::Icom),
    rig("flrig", "flrig (XML-RPC)", RadioKind::Flrig),
    rig("rigctld", "hamlib rigctld (TCP)", RadioKind::Rigctld),
    rig("mock", "Simulated rig", RadioKind::Mock),
    AdapterDescriptor {
        id: "wsjtx-relay",
        display_name: "WSJT-X decode relay",
        category: AdapterCategory::Integration,
        config_key: "wsjtx_relay",
        factory: AdapterFactory::Integration(relay_integration),
        register_routes: Some(register_relay_routes),
    },
    AdapterDescriptor {
        id: "n3fjp",
        display_name: "N3FJP logger bridge",
        category: AdapterCategory::Integration,
        config_key: "n3fjp",
        factory: AdapterFactory::Integration(n3fjp_integration),
        register_routes: Some(register_n3fjp_routes),
    },
];

pub fn descriptor(id: &str) -> Option<&'static AdapterDescriptor> {
    DESCRIPTORS.iter().find(|d| d.id == id)
}

/// Whether the integration's section asks for it to run
pub fn integration_enabled(id: &str, config: &BridgeConfig) -> bool {
    match id {
        "wsjtx-relay" => config.wsjtx_relay.enabled,
        "n3fjp" => config.n3fjp.enabled,
        _ => false,
    }
}

/// Whether the integration's section differs between two configurations
pub fn integration_section_changed(id: &str, old: &BridgeConfig, new: &BridgeConfig) -> bool {
    match id {
        "wsjtx-relay" => old.wsjtx_relay != new.wsjtx_relay,
        "n3fjp" => old.n3fjp != new.n3fjp,
        _ => false,
    }
}

/// Descriptor plus live state, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: AdapterCategory,
    pub config_key: &'static str,
    pub active: bool,
}

/// Registry lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AdapterLifecycle {
    /// The previous rig adapter is fully stopped
    Disconnected { id: &'static str },
    /// A rig adapter is being connected
    Connecting { id: &'static str },
    IntegrationStarted { id: &'static str },
    IntegrationStopped { id: &'static str },
}

/// Commands accepted by the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Replace the rig adapter with the one `radio` describes
    SwitchRig {
        radio: RadioConfig,
        response: oneshot::Sender<Option<&'static str>>,
    },
    /// New radio section; switches unless only the PTT flag moved
    UpdateRadio {
        radio: RadioConfig,
        response: oneshot::Sender<Option<&'static str>>,
    },
    /// Replace the rig adapter with a prepared instance
    InstallRig {
        adapter: RigAdapter,
        response: oneshot::Sender<()>,
    },
    /// Hand out the active rig's request channel for `command`
    Dispatch {
        command: RigCommand,
        response: oneshot::Sender<Result<RigRequester, BridgeError>>,
    },
    /// (Re)start an integration from `config`
    StartIntegration {
        id: String,
        config: BridgeConfig,
        response: oneshot::Sender<Result<(), BridgeError>>,
    },
    /// Stop an integration and adopt `config`
    StopIntegration {
        id: String,
        config: BridgeConfig,
        response: oneshot::Sender<Result<(), BridgeError>>,
    },
    IntegrationStatus {
        id: String,
        response: oneshot::Sender<Result<IntegrationStatus, BridgeError>>,
    },
    ActiveRig {
        response: oneshot::Sender<Option<&'static str>>,
    },
    Adapters {
        response: oneshot::Sender<Vec<AdapterInfo>>,
    },
    /// Disconnect everything and stop
    Shutdown { response: oneshot::Sender<()> },
}

struct Registry {
    state: StateHandle,
    config: BridgeConfig,
    rig: Option<RigAdapter>,
    integrations: BTreeMap<&'static str, IntegrationAdapter>,
    lifecycle: broadcast::Sender<AdapterLifecycle>,
}

impl Registry {
    fn emit(&self, event: AdapterLifecycle) {
        debug!("Registry: {:?}", event);
        let _ = self.lifecycle.send(event);
    }

    /// Stop the current rig, reset the state, start `next`
    async fn replace_rig(&mut self, next: Option<RigAdapter>) -> Option<&'static str> {
        if let Some(mut previous) = self.rig.take() {
            let id = previous.id();
            previous.disconnect().await;
            self.emit(AdapterLifecycle::Disconnected { id });
        }

        if self.state.reset().await.is_err() {
            warn!("Registry: state store is gone");
        }

        let mut next = next?;
        let id = next.id();
        self.emit(AdapterLifecycle::Connecting { id });
        next.connect(self.state.clone());
        info!("Active rig adapter: {}", id);
        self.rig = Some(next);
        Some(id)
    }

    async fn switch_rig(&mut self, radio: RadioConfig) -> Option<&'static str> {
        let next = RigAdapter::from_config(&radio);
        self.config.radio = radio;
        if next.is_none() {
            info!("No radio configured");
        }
        self.replace_rig(next).await
    }

    async fn update_radio(&mut self, radio: RadioConfig) -> Option<&'static str> {
        let ptt_only = RadioConfig {
            ptt_enabled: radio.ptt_enabled,
            ..self.config.radio.clone()
        } == radio;
        if ptt_only && self.rig.is_some() {
            debug!("Radio section changed PTT control only, keeping adapter");
            self.config.radio = radio;
            return self.rig.as_ref().map(RigAdapter::id);
        }
        self.switch_rig(radio).await
    }

    fn dispatch(&self, command: &RigCommand) -> Result<RigRequester, BridgeError> {
        if matches!(command, RigCommand::SetPtt(_)) && !self.config.radio.ptt_enabled {
            return Err(BridgeError::PttDisabled);
        }
        let rig = self.rig.as_ref().ok_or(BridgeError::NoActiveRig)?;
        rig.requester().ok_or(BridgeError::AdapterStopped(rig.id()))
    }

    fn integration_factory(id: &str) -> Result<(&'static str, fn(&BridgeConfig) -> IntegrationAdapter), BridgeError> {
        match descriptor(id) {
            Some(AdapterDescriptor {
                id,
                factory: AdapterFactory::Integration(build),
                ..
            }) => Ok((*id, *build)),
            _ => Err(BridgeError::UnknownAdapter(id.to_string())),
        }
    }

    async fn start_integration(&mut self, id: &str, config: BridgeConfig) -> Result<(), BridgeError> {
        let (id, build) = Self::integration_factory(id)?;
        self.config = config;
        if let Some(mut running) = self.integrations.remove(id) {
            running.disconnect().await;
            self.emit(AdapterLifecycle::IntegrationStopped { id });
        }

        let mut instance = build(&self.config);
        let result = instance.connect().await;
        // Kept even when refused so its status stays visible
        self.integrations.insert(id, instance);
        if result.is_ok() {
            self.emit(AdapterLifecycle::IntegrationStarted { id });
        }
        result
    }

    async fn stop_integration(&mut self, id: &str, config: BridgeConfig) -> Result<(), BridgeError> {
        let (id, _) = Self::integration_factory(id)?;
        self.config = config;
        if let Some(mut instance) = self.integrations.remove(id) {
            let was_running = instance.is_running();
            instance.disconnect().await;
            if was_running {
                self.emit(AdapterLifecycle::IntegrationStopped { id });
            }
        }
        Ok(())
    }

    fn integration_status(&self, id: &str) -> Result<IntegrationStatus, BridgeError> {
        let (id, build) = Self::integration_factory(id)?;
        Ok(match self.integrations.get(id) {
            Some(instance) => instance.status(),
            None => build(&self.config).status(),
        })
    }

    fn adapters(&self) -> Vec<AdapterInfo> {
        let active_rig = self.rig.as_ref().map(RigAdapter::id);
        DESCRIPTORS
            .iter()
            .map(|d| AdapterInfo {
                id: d.id,
                display_name: d.display_name,
                category: d.category,
                config_key: d.config_key,
                active: match d.category {
                    AdapterCategory::Rig => active_rig == Some(d.id),
                    AdapterCategory::Integration => self
                        .integrations
                        .get(d.id)
                        .is_some_and(IntegrationAdapter::is_running),
                },
            })
            .collect()
    }

    async fn shutdown(&mut self) {
        if let Some(mut rig) = self.rig.take() {
            let id = rig.id();
            rig.disconnect().await;
            self.emit(AdapterLifecycle::Disconnected { id });
        }
        let integrations = std::mem::take(&mut self.integrations);
        for (id, mut instance) in integrations {
            instance.disconnect().await;
            self.emit(AdapterLifecycle::IntegrationStopped { id });
        }
    }
}

/// Run the registry actor
pub async fn run_registry_actor(
    state: StateHandle,
    config: BridgeConfig,
    lifecycle: broadcast::Sender<AdapterLifecycle>,
    mut cmd_rx: mpsc::Receiver<RegistryCommand>,
) {
    info!("Starting adapter registry");
    let mut registry = Registry {
        state,
        config,
        rig: None,
        integrations: BTreeMap::new(),
        lifecycle,
    };

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RegistryCommand::SwitchRig { radio, response } => {
                let _ = response.send(registry.switch_rig(radio).await);
            }
            RegistryCommand::UpdateRadio { radio, response } => {
                let _ = response.send(registry.update_radio(radio).await);
            }
            RegistryCommand::InstallRig { adapter, response } => {
                registry.replace_rig(Some(adapter)).await;
                let _ = response.send(());
            }
            RegistryCommand::Dispatch { command, response } => {
                let _ = response.send(registry.dispatch(&command));
            }
            RegistryCommand::StartIntegration { id, config, response } => {
                let _ = response.send(registry.start_integration(&id, config).await);
            }
            RegistryCommand::StopIntegration { id, config, response } => {
                let _ = response.send(registry.stop_integration(&id, config).await);
            }
            RegistryCommand::IntegrationStatus { id, response } => {
                let _ = response.send(registry.integration_status(&id));
            }
            RegistryCommand::ActiveRig { response } => {
                let _ = response.send(registry.rig.as_ref().map(RigAdapter::id));
            }
            RegistryCommand::Adapters { response } => {
                let _ = response.send(registry.adapters());
            }
            RegistryCommand::Shutdown { response } => {
                registry.shutdown().await;
                let _ = response.send(());
                break;
            }
        }
    }

    // Every handle dropped without a shutdown
    registry.shutdown().await;
    info!("Adapter registry stopped");
}

/// Cloneable handle to the registry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
    lifecycle: broadcast::Sender<AdapterLifecycle>,
}

impl RegistryHandle {
    /// Spawn a registry with nothing running
    pub fn spawn(state: StateHandle, config: BridgeConfig) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let task = tokio::spawn(run_registry_actor(state, config, lifecycle.clone(), cmd_rx));
        (Self { cmd_tx, lifecycle }, task)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| BridgeError::ShutDown)?;
        rx.await.map_err(|_| BridgeError::ShutDown)
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<AdapterLifecycle> {
        self.lifecycle.subscribe()
    }

    /// Switch to the adapter `radio` describes; returns its id
    pub async fn switch_rig(&self, radio: RadioConfig) -> Result<Option<&'static str>, BridgeError> {
        self.request(|response| RegistryCommand::SwitchRig { radio, response })
            .await
    }

    pub async fn update_radio(&self, radio: RadioConfig) -> Result<Option<&'static str>, BridgeError> {
        self.request(|response| RegistryCommand::UpdateRadio { radio, response })
            .await
    }

    /// Make `adapter` the active rig
    pub async fn install_rig(&self, adapter: RigAdapter) -> Result<(), BridgeError> {
        self.request(|response| RegistryCommand::InstallRig { adapter, response })
            .await
    }

    /// Run `command` on the active rig
    ///
    /// The registry only hands out the adapter's request channel, so a slow
    /// backend holds up the caller and nobody else.
    pub async fn execute(&self, command: RigCommand) -> Result<(), BridgeError> {
        let requester = self
            .request(|response| RegistryCommand::Dispatch {
                command: command.clone(),
                response,
            })
            .await??;
        requester.execute(command).await
    }

    pub async fn start_integration(&self, id: &str, config: BridgeConfig) -> Result<(), BridgeError> {
        let id = id.to_string();
        self.request(|response| RegistryCommand::StartIntegration { id, config, response })
            .await?
    }

    pub async fn stop_integration(&self, id: &str, config: BridgeConfig) -> Result<(), BridgeError> {
        let id = id.to_string();
        self.request(|response| RegistryCommand::StopIntegration { id, config, response })
            .await?
    }

    pub async fn integration_status(&self, id: &str) -> Result<IntegrationStatus, BridgeError> {
        let id = id.to_string();
        self.request(|response| RegistryCommand::IntegrationStatus { id, response })
            .await?
    }

    pub async fn active_rig(&self) -> Result<Option<&'static str>, BridgeError> {
        self.request(|response| RegistryCommand::ActiveRig { response })
            .await
    }

    pub async fn adapters(&self) -> Result<Vec<AdapterInfo>, BridgeError> {
        self.request(|response| RegistryCommand::Adapters { response })
            .await
    }

    /// Disconnect everything and stop the actor
    pub async fn shutdown(&self) {
        if self
            .request(|response| RegistryCommand::Shutdown { response })
            .await
            .is_err()
        {
            debug!("Registry already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    fn mock_radio() -> RadioConfig {
        RadioConfig {
            kind: RadioKind::Mock,
            ..RadioConfig::default()
        }
    }

    #[test]
    fn test_descriptor_table() {
        assert_eq!(DESCRIPTORS.len(), 8);
        for kind in RadioKind::ALL.iter().filter(|k| **k != RadioKind::None) {
            let d = descriptor(kind.id()).unwrap();
            assert_eq!(d.category, AdapterCategory::Rig);
            assert!(matches!(d.factory, AdapterFactory::Rig(k) if k == *kind));
        }
        assert!(descriptor("wsjtx-relay").unwrap().register_routes.is_some());
        assert!(descriptor("none").is_none());
    }

    #[tokio::test]
    async fn test_switch_disconnects_previous_first() {
        let (state, _state_task) = StateHandle::spawn();
        let (registry, _task) = RegistryHandle::spawn(state.clone(), BridgeConfig::default());
        let mut events = registry.subscribe_lifecycle();

        assert_eq!(registry.switch_rig(mock_radio()).await.unwrap(), Some("mock"));
        assert_eq!(events.recv().await.unwrap(), AdapterLifecycle::Connecting { id: "mock" });

        let rigctld = RadioConfig {
            kind: RadioKind::Rigctld,
            ..RadioConfig::default()
        };
        assert_eq!(registry.switch_rig(rigctld).await.unwrap(), Some("rigctld"));
        assert_eq!(events.recv().await.unwrap(), AdapterLifecycle::Disconnected { id: "mock" });
        assert_eq!(events.recv().await.unwrap(), AdapterLifecycle::Connecting { id: "rigctld" });

        assert_eq!(registry.switch_rig(RadioConfig::default()).await.unwrap(), None);
        assert_eq!(events.recv().await.unwrap(), AdapterLifecycle::Disconnected { id: "rigctld" });
        assert_eq!(registry.active_rig().await.unwrap(), None);
        assert!(!state.snapshot().await.unwrap().connected);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_ptt_gate_and_dispatch() {
        let (state, _state_task) = StateHandle::spawn();
        let (registry, _task) = RegistryHandle::spawn(state.clone(), BridgeConfig::default());

        assert!(matches!(
            registry.execute(RigCommand::SetFrequency(7_074_000)).await,
            Err(BridgeError::NoActiveRig)
        ));

        registry.switch_rig(mock_radio()).await.unwrap();
        registry.execute(RigCommand::SetFrequency(7_074_000)).await.unwrap();
        assert_eq!(state.snapshot().await.unwrap().frequency_hz, 7_074_000);
        assert!(matches!(
            registry.execute(RigCommand::SetPtt(true)).await,
            Err(BridgeError::PttDisabled)
        ));

        // Turning PTT on keeps the running adapter
        let mut events = registry.subscribe_lifecycle();
        let radio = RadioConfig {
            ptt_enabled: true,
            ..mock_radio()
        };
        assert_eq!(registry.update_radio(radio).await.unwrap(), Some("mock"));
        registry.execute(RigCommand::SetPtt(true)).await.unwrap();
        assert!(state.snapshot().await.unwrap().ptt_active);
        assert!(events.try_recv().is_err());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_install_rig() {
        let (state, _state_task) = StateHandle::spawn();
        let (registry, _task) = RegistryHandle::spawn(state, BridgeConfig::default());
        registry
            .install_rig(RigAdapter::Mock(MockAdapter::new()))
            .await
            .unwrap();
        assert_eq!(registry.active_rig().await.unwrap(), Some("mock"));
        let adapters = registry.adapters().await.unwrap();
        assert!(adapters.iter().any(|a| a.id == "mock" && a.active));
        assert!(adapters.iter().filter(|a| a.active).count() == 1);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_integration_lifecycle() {
        let (state, _state_task) = StateHandle::spawn();
        let (registry, _task) = RegistryHandle::spawn(state, BridgeConfig::default());

        let status = registry.integration_status("wsjtx-relay").await.unwrap();
        assert!(!status.running());

        let mut config = BridgeConfig::default();
        config.wsjtx_relay.enabled = true;
        assert!(matches!(
            registry.start_integration("wsjtx-relay", config).await,
            Err(BridgeError::Config(_))
        ));
        match registry.integration_status("wsjtx-relay").await.unwrap() {
            IntegrationStatus::WsjtxRelay(s) => {
                assert!(s.enabled);
                assert!(!s.running);
            }
            other => panic!("unexpected status {:?}", other),
        }

        assert!(matches!(
            registry.integration_status("mock").await,
            Err(BridgeError::UnknownAdapter(_))
        ));
        registry
            .stop_integration("wsjtx-relay", BridgeConfig::default())
            .await
            .unwrap();
        match registry.integration_status("wsjtx-relay").await.unwrap() {
            IntegrationStatus::WsjtxRelay(s) => assert!(!s.enabled),
            other => panic!("unexpected status {:?}", other),
        }
        registry.shutdown().await;
    }
}
