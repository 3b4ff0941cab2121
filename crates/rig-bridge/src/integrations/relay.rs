//! Decoder feed relay integration

use std::fmt;
use std::sync::Arc;

use rig_relay::{start_relay, BatchTransport, HttpTransport, RelayHandle, RelayStatus};
use tracing::{error, info};

use crate::config::RelaySettings;
use crate::error::BridgeError;

/// The WSJT-X relay as a bridge integration
///
/// Settings that cannot work (no URL, key or session) are refused once with
/// an error; the instance stays around so its status still reads
/// enabled-but-not-running.
pub struct RelayIntegration {
    settings: RelaySettings,
    transport: Option<Arc<dyn BatchTransport>>,
    handle: Option<RelayHandle>,
    refused: bool,
}

impl fmt::Debug for RelayIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayIntegration")
            .field("settings", &self.settings)
            .field("handle", &self.handle)
            .field("refused", &self.refused)
            .finish()
    }
}

impl RelayIntegration {
    /// Relay posting over HTTP
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            transport: None,
            handle: None,
            refused: false,
        }
    }

    /// Relay delivering through `transport` instead of HTTP
    pub fn with_transport(settings: RelaySettings, transport: Arc<dyn BatchTransport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new(settings)
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// The running relay, if any
    pub fn handle(&self) -> Option<&RelayHandle> {
        self.handle.as_ref()
    }

    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let config = self.settings.to_relay_config();
        if let Err(e) = config.validate() {
            if !self.refused {
                error!("WSJT-X relay not started: {}", e);
                self.refused = true;
            }
            return Err(BridgeError::Config(e.to_string()));
        }

        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(
                &config.url,
                &config.key,
                config.request_timeout,
            )?),
        };
        let handle = start_relay(config, transport).await?;
        info!("WSJT-X relay listening on {}", handle.local_addr());
        self.handle = Some(handle);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
            info!("WSJT-X relay stopped");
        }
    }

    pub fn status(&self) -> RelayStatus {
        match &self.handle {
            Some(handle) => handle.status(),
            None => RelayStatus {
                enabled: self.settings.enabled,
                ..RelayStatus::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rig_relay::{RelayError, RelayMessage};

    struct NullTransport;

    #[async_trait]
    impl BatchTransport for NullTransport {
        async fn send_batch(&self, _: &str, _: &[RelayMessage]) -> Result<(), RelayError> {
            Ok(())
        }

        async fn send_heartbeat(&self, _: &str, _: u64) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn settings() -> RelaySettings {
        RelaySettings {
            enabled: true,
            url: "http://127.0.0.1:9/api/wsjtx".into(),
            key: "k".into(),
            session: "s".into(),
            udp_port: 0,
            ..RelaySettings::default()
        }
    }

    #[tokio::test]
    async fn test_missing_settings_refused() {
        let mut relay = RelayIntegration::new(RelaySettings {
            enabled: true,
            ..RelaySettings::default()
        });
        assert!(matches!(relay.connect().await, Err(BridgeError::Config(_))));
        assert!(matches!(relay.connect().await, Err(BridgeError::Config(_))));

        let status = relay.status();
        assert!(status.enabled);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let mut relay = RelayIntegration::with_transport(settings(), Arc::new(NullTransport));
        relay.connect().await.unwrap();
        assert!(relay.is_running());
        assert!(relay.status().running);

        // Connecting twice keeps the running relay
        relay.connect().await.unwrap();

        relay.disconnect().await;
        assert!(!relay.is_running());
        assert!(!relay.status().running);
        relay.disconnect().await;
    }
}
