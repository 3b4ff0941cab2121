//! Integration adapters
//!
//! Integrations run beside the rig adapter, each on its own sockets and
//! timers. Any number of them can be active at once.

pub mod n3fjp;
pub mod relay;

use rig_relay::RelayStatus;
use serde::Serialize;

use crate::error::BridgeError;

pub use n3fjp::{N3fjpIntegration, N3fjpStatus};
pub use relay::RelayIntegration;

/// Status of one integration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "integration", rename_all = "snake_case")]
pub enum IntegrationStatus {
    WsjtxRelay(RelayStatus),
    N3fjp(N3fjpStatus),
}

impl IntegrationStatus {
    pub fn running(&self) -> bool {
        match self {
            IntegrationStatus::WsjtxRelay(s) => s.running,
            IntegrationStatus::N3fjp(s) => s.connected,
        }
    }
}

/// One integration instance
#[derive(Debug)]
pub enum IntegrationAdapter {
    WsjtxRelay(RelayIntegration),
    N3fjp(N3fjpIntegration),
}

impl IntegrationAdapter {
    pub fn id(&self) -> &'static str {
        match self {
            IntegrationAdapter::WsjtxRelay(_) => "wsjtx-relay",
            IntegrationAdapter::N3fjp(_) => "n3fjp",
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            IntegrationAdapter::WsjtxRelay(i) => i.is_running(),
            IntegrationAdapter::N3fjp(i) => i.is_running(),
        }
    }

    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        match self {
            IntegrationAdapter::WsjtxRelay(i) => i.connect().await,
            IntegrationAdapter::N3fjp(i) => i.connect().await,
        }
    }

    /// Stop and release sockets; harmless when not running
    pub async fn disconnect(&mut self) {
        match self {
            IntegrationAdapter::WsjtxRelay(i) => i.disconnect().await,
            IntegrationAdapter::N3fjp(i) => i.disconnect().await,
        }
    }

    pub fn status(&self) -> IntegrationStatus {
        match self {
            IntegrationAdapter::WsjtxRelay(i) => IntegrationStatus::WsjtxRelay(i.status()),
            IntegrationAdapter::N3fjp(i) => IntegrationStatus::N3fjp(i.status()),
        }
    }
}
