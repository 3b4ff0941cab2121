//! Bridge configuration
//!
//! Stored as pretty JSON in the XDG config directory. Missing fields take
//! their defaults, so an old or hand-trimmed file still loads. Environment
//! variables override the file; the binary applies its CLI flags last.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rig_detect::SerialSettings;
use rig_protocol::icom::DEFAULT_RADIO_ADDR;
use rig_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// Which backend drives the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioKind {
    /// No rig adapter
    #[default]
    None,
    Yaesu,
    Kenwood,
    Icom,
    Flrig,
    Rigctld,
    Mock,
}

impl RadioKind {
    pub const ALL: [RadioKind; 7] = [
        RadioKind::None,
        RadioKind::Yaesu,
        RadioKind::Kenwood,
        RadioKind::Icom,
        RadioKind::Flrig,
        RadioKind::Rigctld,
        RadioKind::Mock,
    ];

    /// Identifier used in configuration and adapter ids
    pub fn id(&self) -> &'static str {
        match self {
            RadioKind::None => "none",
            RadioKind::Yaesu => "yaesu",
            RadioKind::Kenwood => "kenwood",
            RadioKind::Icom => "icom",
            RadioKind::Flrig => "flrig",
            RadioKind::Rigctld => "rigctld",
            RadioKind::Mock => "mock",
        }
    }
}

impl fmt::Display for RadioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RadioKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RadioKind::ALL
            .into_iter()
            .find(|k| k.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| BridgeError::Config(format!("unknown radio type {:?}", s)))
    }
}

/// Host and port of a network backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetEndpoint {
    pub host: String,
    pub port: u16,
}

impl NetEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_flrig() -> NetEndpoint {
    NetEndpoint::new("127.0.0.1", 12345)
}

fn default_rigctld() -> NetEndpoint {
    NetEndpoint::new("127.0.0.1", 4532)
}

/// Rig adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub kind: RadioKind,
    /// Serial link for the Yaesu, Kenwood and Icom backends
    pub serial: SerialSettings,
    /// CI-V address of the radio
    pub icom_address: u8,
    pub poll_interval_ms: u64,
    /// Allow transmit control from the command surface
    pub ptt_enabled: bool,
    #[serde(default = "default_flrig")]
    pub flrig: NetEndpoint,
    #[serde(default = "default_rigctld")]
    pub rigctld: NetEndpoint,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            kind: RadioKind::None,
            serial: SerialSettings::default(),
            icom_address: DEFAULT_RADIO_ADDR,
            poll_interval_ms: 1000,
            ptt_enabled: false,
            flrig: default_flrig(),
            rigctld: default_rigctld(),
        }
    }
}

impl RadioConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}

/// Decoder feed relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub enabled: bool,
    pub url: String,
    pub key: String,
    pub session: String,
    pub udp_port: u16,
    pub batch_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub verbose: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            key: String::new(),
            session: String::new(),
            udp_port: 2237,
            batch_interval_ms: 2000,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 10_000,
            verbose: false,
        }
    }
}

impl RelaySettings {
    /// Runner settings for this section
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            url: self.url.trim().to_string(),
            key: self.key.trim().to_string(),
            session: self.session.trim().to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: self.udp_port,
            batch_interval: Duration::from_millis(self.batch_interval_ms.max(100)),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1000)),
            request_timeout: Duration::from_millis(self.request_timeout_ms.max(100)),
            verbose: self.verbose,
            ..RelayConfig::default()
        }
    }
}

/// N3FJP logger integration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct N3fjpSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Where N1MM-style contact datagrams go
    pub udp_dest: String,
    /// Station callsign put in forwarded contacts
    pub my_call: String,
    /// Optional endpoint that also receives each logged contact as JSON
    pub post_url: String,
    pub api_key: String,
}

impl Default for N3fjpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 1100,
            udp_dest: "127.0.0.1:12060".into(),
            my_call: String::new(),
            post_url: String::new(),
            api_key: String::new(),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub radio: RadioConfig,
    pub wsjtx_relay: RelaySettings,
    pub n3fjp: N3fjpSettings,
}

impl BridgeConfig {
    /// `$XDG_CONFIG_HOME/rigbridge`, falling back to `~/.config/rigbridge`
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("rigbridge"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("rigbridge"))
    }

    /// Default location of `config.json`
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load from the default location, or defaults if there is nothing usable
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`, or defaults if it is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No config at {} ({}), using defaults", path.display(), e);
                return Self::default();
            }
        };
        // Editors on Windows like to leave a BOM behind
        match serde_json::from_str(text.trim_start_matches('\u{feff}')) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), BridgeError> {
        let path = Self::default_path()
            .ok_or_else(|| BridgeError::Config("could not determine config path".into()))?;
        self.save_to(&path)
    }

    /// Save as pretty JSON, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Apply `RIGBRIDGE_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `RIGBRIDGE_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("RIGBRIDGE_RADIO") {
            match v.parse() {
                Ok(kind) => self.radio.kind = kind,
                Err(e) => warn!("RIGBRIDGE_RADIO: {}", e),
            }
        }
        if let Some(v) = get("RIGBRIDGE_RELAY_URL") {
            self.wsjtx_relay.url = v;
        }
        if let Some(v) = get("RIGBRIDGE_RELAY_KEY") {
            self.wsjtx_relay.key = v;
        }
        if let Some(v) = get("RIGBRIDGE_RELAY_SESSION") {
            self.wsjtx_relay.session = v;
        }
        if let Some(v) = get("RIGBRIDGE_N3FJP_HOST") {
            self.n3fjp.host = v;
        }
        if let Some(v) = get("RIGBRIDGE_N3FJP_PORT") {
            match v.parse() {
                Ok(port) => self.n3fjp.port = port,
                Err(_) => warn!("RIGBRIDGE_N3FJP_PORT: not a port number: {:?}", v),
            }
        }
    }
}
