//! N3FJP logger integration
//!
//! Subscribes to the logger's TCP API, follows what the operator types into
//! the call and grid boxes, and when a contact is entered reads back its band,
//! mode and frequency. The contact then goes out as an N1MM-style
//! `<contactinfo>` datagram and, if configured, as a JSON POST.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::N3fjpSettings;
use crate::error::BridgeError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POST_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Buffer growth limit; past it only the tail is kept
const MAX_BUFFER: usize = 300_000;
const KEEP_ON_OVERFLOW: usize = 80_000;

/// Highest frequency accepted from the logger (300 GHz)
const MAX_FREQ_MHZ: f64 = 300_000.0;

const OPEN: &[u8] = b"<cmd>";
const CLOSE: &[u8] = b"</cmd>";

pub const SET_UPDATE_STATE: &str = "<CMD><SETUPDATESTATE><VALUE>TRUE</VALUE></CMD>";
pub const READ_BMF: &str = "<CMD><READBMF></CMD>";

fn find_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|p| p + from)
}

/// Splits the logger's byte stream into `<CMD>…</CMD>` blocks
#[derive(Debug, Default)]
pub struct CmdBuffer {
    buf: Vec<u8>,
}

impl CmdBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every block they complete
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUFFER {
            let cut = self.buf.len() - KEEP_ON_OVERFLOW;
            self.buf.drain(..cut);
        }

        let mut blocks = Vec::new();
        let mut consumed = 0;
        let mut pos = 0;
        while let Some(start) = find_ci(&self.buf, OPEN, pos) {
            let Some(end) = find_ci(&self.buf, CLOSE, start + OPEN.len()) else {
                break;
            };
            let stop = end + CLOSE.len();
            blocks.push(String::from_utf8_lossy(&self.buf[start..stop]).trim().to_string());
            consumed = stop;
            pos = stop;
        }
        self.buf.drain(..consumed);
        blocks
    }
}

/// Name of the element directly inside `<CMD>`, upper-cased
pub fn command_name(block: &str) -> Option<String> {
    let start = find_ci(block.as_bytes(), OPEN, 0)? + OPEN.len();
    let rest = block[start..].trim_start().strip_prefix('<')?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || !rest[name.len()..].starts_with('>') {
        return None;
    }
    Some(name.to_ascii_uppercase())
}

/// Trimmed text of `<TAG>…</TAG>`
pub fn tag_value(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let bytes = block.as_bytes();
    let start = find_ci(bytes, open.as_bytes(), 0)? + open.len();
    let end = find_ci(bytes, close.as_bytes(), start)?;
    Some(block[start..end].trim().to_string())
}

/// Representative frequency in MHz for a band name such as `20` or `40M`
pub fn band_to_mhz(band: &str) -> Option<f64> {
    let band = band.trim().to_ascii_uppercase().replace('M', "");
    let mhz = match band.as_str() {
        "160" => 1.8,
        "80" => 3.5,
        "60" => 5.3,
        "40" => 7.0,
        "30" => 10.1,
        "20" => 14.0,
        "17" => 18.1,
        "15" => 21.0,
        "12" => 24.9,
        "10" => 28.0,
        "6" => 50.0,
        "2" => 144.0,
        _ => return None,
    };
    Some(mhz)
}

/// Logger mode names reduced to the families downstream consumers use
pub fn normalize_mode(mode: &str) -> String {
    let mode = mode.trim().to_ascii_uppercase();
    match mode.as_str() {
        "PH" | "USB" | "LSB" | "SSB" => "SSB".into(),
        "DI" => "DIGI".into(),
        "" => "UNKNOWN".into(),
        _ => mode,
    }
}

/// A contact the logger just entered
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedContact {
    pub call: String,
    pub band_mhz: f64,
    pub freq_mhz: f64,
    /// Mode as the logger reported it
    pub mode: String,
    pub grid: Option<String>,
}

/// N1MM-style `<contactinfo>` datagram
pub fn contact_info_xml(my_call: &str, contact: &LoggedContact, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y-%m-%d %H:%M:%S");
    // N1MM carries frequencies in 10 Hz units
    let freq_10hz = (contact.freq_mhz * 100_000.0).round() as u64;
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <contactinfo>\
         <app>RIGBRIDGE</app>\
         <contestname>N3FJP</contestname>\
         <contestnr>1</contestnr>\
         <timestamp>{}</timestamp>\
         <mycall>{}</mycall>\
         <band>{:.1}</band>\
         <rxfreq>{}</rxfreq>\
         <txfreq>{}</txfreq>\
         <operator></operator>\
         <mode>{}</mode>\
         <call>{}</call>\
         </contactinfo>",
        timestamp, my_call, contact.band_mhz, freq_10hz, freq_10hz, contact.mode, contact.call
    )
}

/// JSON body of the optional POST
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QsoRecord {
    pub ts_utc: String,
    pub dx_call: String,
    pub band_mhz: f64,
    pub freq_khz: Option<u64>,
    pub mode: String,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub de_call: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dx_grid: Option<String>,
}

impl QsoRecord {
    pub fn new(my_call: &str, contact: &LoggedContact, now: DateTime<Utc>) -> Self {
        let khz = (contact.freq_mhz * 1000.0).round() as u64;
        let my_call = my_call.trim();
        Self {
            ts_utc: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            dx_call: contact.call.clone(),
            band_mhz: contact.band_mhz,
            freq_khz: (khz > 0).then_some(khz),
            mode: normalize_mode(&contact.mode),
            source: "rigbridge_n3fjp",
            de_call: (!my_call.is_empty()).then(|| my_call.to_ascii_uppercase()),
            dx_grid: contact.grid.clone(),
        }
    }
}

/// What the session wants done after a block
#[derive(Debug, Clone, PartialEq)]
pub enum LoggerAction {
    /// Write a command to the logger
    Send(&'static str),
    /// Hand a contact downstream
    Forward(LoggedContact),
}

/// Per-connection logger state
#[derive(Debug, Clone)]
pub struct LoggerSession {
    last_call: String,
    last_grid: String,
    last_mode: String,
    pending: Option<String>,
}

impl Default for LoggerSession {
    fn default() -> Self {
        Self {
            last_call: String::new(),
            last_grid: String::new(),
            last_mode: "SSB".into(),
            pending: None,
        }
    }
}

impl LoggerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_block(&mut self, block: &str) -> Vec<LoggerAction> {
        let Some(name) = command_name(block) else {
            return Vec::new();
        };

        match name.as_str() {
            "SETUPDATESTATERESPONSE" => {
                debug!("N3FJP: update state {}", tag_value(block, "VALUE").unwrap_or_default());
                Vec::new()
            }
            "UPDATERESPONSE" => {
                let control = tag_value(block, "CONTROL").unwrap_or_default().to_ascii_uppercase();
                let value = tag_value(block, "VALUE").unwrap_or_default();
                match control.as_str() {
                    "TXTENTRYCALL" => {
                        let call = value.to_ascii_uppercase();
                        trace!("N3FJP: call box {:?}", call);
                        if !call.is_empty() {
                            self.last_call = call;
                        }
                    }
                    "TXTENTRYGRID" => {
                        if !value.is_empty() {
                            self.last_grid = value;
                        }
                    }
                    _ => {}
                }
                Vec::new()
            }
            "ENTEREVENT" => {
                debug!("N3FJP: contact entered ({})", self.last_call);
                self.pending = Some(self.last_call.clone());
                vec![LoggerAction::Send(READ_BMF)]
            }
            "READBMFRESPONSE" => {
                let band = tag_value(block, "BAND").unwrap_or_default();
                let mode = tag_value(block, "MODETEST")
                    .filter(|m| !m.is_empty())
                    .or_else(|| tag_value(block, "MODE"))
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                let freq_mhz = tag_value(block, "FREQ")
                    .and_then(|f| f.parse::<f64>().ok())
                    .filter(|f| f.is_finite() && *f > 0.0 && *f <= MAX_FREQ_MHZ);
                if !mode.is_empty() {
                    self.last_mode = mode;
                }

                let Some(call) = self.pending.take() else {
                    return Vec::new();
                };
                let grid = std::mem::take(&mut self.last_grid);
                match (band_to_mhz(&band), freq_mhz) {
                    (Some(band_mhz), Some(freq_mhz)) if !call.is_empty() => {
                        vec![LoggerAction::Forward(LoggedContact {
                            call,
                            band_mhz,
                            freq_mhz,
                            mode: self.last_mode.clone(),
                            grid: (!grid.is_empty()).then_some(grid),
                        })]
                    }
                    (band_mhz, freq) => {
                        info!(
                            "N3FJP: not forwarding contact, missing data (call {:?}, band {:?}, freq {:?})",
                            call, band_mhz, freq
                        );
                        Vec::new()
                    }
                }
            }
            other => {
                trace!("N3FJP: ignoring {}", other);
                Vec::new()
            }
        }
    }
}

/// Externally visible logger integration state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct N3fjpStatus {
    pub enabled: bool,
    pub connected: bool,
    pub qsos_forwarded: u64,
    pub last_call: Option<String>,
}

/// Where forwarded contacts go
#[derive(Debug, Clone)]
struct Outputs {
    udp: SocketAddr,
    my_call: String,
    post: Option<(reqwest::Client, String, String)>,
}

async fn send_command(stream: &mut TcpStream, command: &str) -> std::io::Result<()> {
    trace!("N3FJP -> {}", command);
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

async fn post_record(client: reqwest::Client, url: String, api_key: String, record: QsoRecord) {
    let mut request = client.post(&url).json(&record);
    if !api_key.is_empty() {
        request = request.header("X-API-Key", api_key);
    }
    match request.send().await {
        Ok(response) if response.status().is_success() => debug!("N3FJP: POST ok -> {}", url),
        Ok(response) => warn!("N3FJP: POST {} -> HTTP {}", url, response.status()),
        Err(e) => warn!("N3FJP: POST {} failed: {}", url, e),
    }
}

enum LinkEnd {
    Shutdown,
    Lost(std::io::Error),
}

async fn run_logger_link(
    stream: &mut TcpStream,
    udp: &UdpSocket,
    outputs: &Outputs,
    status_tx: &watch::Sender<N3fjpStatus>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> LinkEnd {
    if let Err(e) = send_command(stream, SET_UPDATE_STATE).await {
        return LinkEnd::Lost(e);
    }

    let mut session = LoggerSession::new();
    let mut blocks = CmdBuffer::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = tokio::select! {
            result = stream.read(&mut buf) => match result {
                Ok(0) => return LinkEnd::Lost(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "logger closed the connection")),
                Ok(n) => n,
                Err(e) => return LinkEnd::Lost(e),
            },
            _ = shutdown_rx.recv() => return LinkEnd::Shutdown,
        };

        for block in blocks.push(&buf[..n]) {
            for action in session.handle_block(&block) {
                match action {
                    LoggerAction::Send(command) => {
                        if let Err(e) = send_command(stream, command).await {
                            return LinkEnd::Lost(e);
                        }
                    }
                    LoggerAction::Forward(contact) => forward(udp, outputs, status_tx, contact).await,
                }
            }
        }
    }
}

async fn forward(
    udp: &UdpSocket,
    outputs: &Outputs,
    status_tx: &watch::Sender<N3fjpStatus>,
    contact: LoggedContact,
) {
    let now = Utc::now();
    let xml = contact_info_xml(&outputs.my_call, &contact, now);
    match udp.send_to(xml.as_bytes(), outputs.udp).await {
        Ok(_) => info!(
            "N3FJP: forwarded {} ({} MHz {}) -> {}",
            contact.call, contact.freq_mhz, contact.mode, outputs.udp
        ),
        Err(e) => warn!("N3FJP: UDP send to {} failed: {}", outputs.udp, e),
    }

    if let Some((client, url, key)) = &outputs.post {
        let record = QsoRecord::new(&outputs.my_call, &contact, now);
        tokio::spawn(post_record(client.clone(), url.clone(), key.clone(), record));
    }

    status_tx.send_modify(|s| {
        s.qsos_forwarded += 1;
        s.last_call = Some(contact.call.clone());
    });
}

/// Connect to the logger and forward contacts until shutdown
async fn run_n3fjp_task(
    addr: String,
    outputs: Outputs,
    status_tx: watch::Sender<N3fjpStatus>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let udp = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(udp) => udp,
        Err(e) => {
            warn!("N3FJP: cannot open UDP socket: {}", e);
            return;
        }
    };

    info!("Starting N3FJP integration for {}", addr);
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let connected = tokio::select! {
            result = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)) => result,
            _ = shutdown_rx.recv() => break,
        };

        match connected {
            Ok(Ok(mut stream)) => {
                info!("N3FJP: connected to {}", addr);
                backoff = INITIAL_BACKOFF;
                status_tx.send_modify(|s| s.connected = true);
                let end = run_logger_link(&mut stream, &udp, &outputs, &status_tx, &mut shutdown_rx).await;
                status_tx.send_modify(|s| s.connected = false);
                match end {
                    LinkEnd::Shutdown => break,
                    LinkEnd::Lost(e) => warn!("N3FJP: connection lost: {}", e),
                }
            }
            Ok(Err(e)) => warn!("N3FJP: cannot connect to {}: {}", addr, e),
            Err(_) => warn!("N3FJP: connecting to {} timed out", addr),
        }

        debug!("N3FJP: retrying in {:?}", backoff);
        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown_rx.recv() => break,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    info!("N3FJP integration stopped");
}

#[derive(Debug)]
struct N3fjpHandle {
    shutdown_tx: mpsc::Sender<()>,
    status_rx: watch::Receiver<N3fjpStatus>,
    task: JoinHandle<()>,
}

/// The N3FJP logger bridge as an integration
#[derive(Debug)]
pub struct N3fjpIntegration {
    settings: N3fjpSettings,
    handle: Option<N3fjpHandle>,
}

impl N3fjpIntegration {
    pub fn new(settings: N3fjpSettings) -> Self {
        Self {
            settings,
            handle: None,
        }
    }

    pub fn settings(&self) -> &N3fjpSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn outputs(&self) -> Result<Outputs, BridgeError> {
        let udp = self
            .settings
            .udp_dest
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| BridgeError::Config(format!("n3fjp.udp_dest {:?}: {}", self.settings.udp_dest, e)))?;
        let post_url = self.settings.post_url.trim();
        let post = if post_url.is_empty() {
            None
        } else {
            let client = reqwest::Client::builder().timeout(POST_TIMEOUT).build()?;
            Some((client, post_url.to_string(), self.settings.api_key.trim().to_string()))
        };
        Ok(Outputs {
            udp,
            my_call: self.settings.my_call.trim().to_ascii_uppercase(),
            post,
        })
    }

    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.handle.is_some() {
            return Ok(());
        }
        if self.settings.host.trim().is_empty() {
            return Err(BridgeError::Config("n3fjp.host is empty".into()));
        }
        let outputs = self.outputs()?;
        let addr = format!("{}:{}", self.settings.host.trim(), self.settings.port);

        let (status_tx, status_rx) = watch::channel(N3fjpStatus {
            enabled: true,
            ..N3fjpStatus::default()
        });
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_n3fjp_task(addr, outputs, status_tx, shutdown_rx));
        self.handle = Some(N3fjpHandle {
            shutdown_tx,
            status_rx,
            task,
        });
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.shutdown_tx.send(()).await;
            if let Err(e) = handle.task.await {
                warn!("N3FJP task ended abnormally: {}", e);
            }
        }
    }

    pub fn status(&self) -> N3fjpStatus {
        match &self.handle {
            Some(handle) => handle.status_rx.borrow().clone(),
            None => N3fjpStatus {
                enabled: self.settings.enabled,
                ..N3fjpStatus::default()
            },
        }
    }

    /// Watch status changes of the running task
    pub fn subscribe_status(&self) -> Option<watch::Receiver<N3fjpStatus>> {
        self.handle.as_ref().map(|h| h.status_rx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_cmd_buffer_split_blocks() {
        let mut buf = CmdBuffer::new();
        assert!(buf.push(b"noise<CMD><ENTER").is_empty());
        let blocks = buf.push(b"EVENT></CMD>\r\n<cmd><READBMFRESPONSE><BAND>20</BAND></cmd><CMD><UPD");
        assert_eq!(
            blocks,
            vec![
                "<CMD><ENTEREVENT></CMD>".to_string(),
                "<cmd><READBMFRESPONSE><BAND>20</BAND></cmd>".to_string(),
            ]
        );
        assert_eq!(
            buf.push(b"ATERESPONSE></CMD>"),
            vec!["<CMD><UPDATERESPONSE></CMD>".to_string()]
        );
    }

    #[test]
    fn test_cmd_buffer_bounded() {
        let mut buf = CmdBuffer::new();
        let junk = vec![b'x'; MAX_BUFFER + 10];
        assert!(buf.push(&junk).is_empty());
        assert!(buf.buf.len() <= KEEP_ON_OVERFLOW);
    }

    #[test]
    fn test_command_name_and_tags() {
        let block = "<CMD> <UPDATERESPONSE><CONTROL>txtEntryCall</CONTROL><VALUE> k1abc </VALUE></CMD>";
        assert_eq!(command_name(block).as_deref(), Some("UPDATERESPONSE"));
        assert_eq!(tag_value(block, "CONTROL").as_deref(), Some("txtEntryCall"));
        assert_eq!(tag_value(block, "value").as_deref(), Some("k1abc"));
        assert_eq!(tag_value(block, "BAND"), None);
        assert_eq!(command_name("<CMD>plain</CMD>"), None);
    }

    #[test]
    fn test_band_and_mode_normalisation() {
        assert_eq!(band_to_mhz("20"), Some(14.0));
        assert_eq!(band_to_mhz("40m"), Some(7.0));
        assert_eq!(band_to_mhz("11"), None);
        assert_eq!(normalize_mode("ph"), "SSB");
        assert_eq!(normalize_mode("LSB"), "SSB");
        assert_eq!(normalize_mode("DI"), "DIGI");
        assert_eq!(normalize_mode("CW"), "CW");
        assert_eq!(normalize_mode(""), "UNKNOWN");
    }

    fn contact() -> LoggedContact {
        LoggedContact {
            call: "K1ABC".into(),
            band_mhz: 14.0,
            freq_mhz: 14.074,
            mode: "DI".into(),
            grid: Some("FN42".into()),
        }
    }

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_contact_info_xml() {
        let xml = contact_info_xml("W1AW", &contact(), at());
        assert!(xml.contains("<timestamp>2023-11-14 22:13:20</timestamp>"));
        assert!(xml.contains("<mycall>W1AW</mycall>"));
        assert!(xml.contains("<band>14.0</band>"));
        assert!(xml.contains("<rxfreq>1407400</rxfreq>"));
        assert!(xml.contains("<call>K1ABC</call>"));
    }

    #[test]
    fn test_qso_record_json() {
        let record = QsoRecord::new("w1aw", &contact(), at());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ts_utc"], "2023-11-14T22:13:20Z");
        assert_eq!(json["freq_khz"], 14074);
        assert_eq!(json["mode"], "DIGI");
        assert_eq!(json["de_call"], "W1AW");
        assert_eq!(json["dx_grid"], "FN42");

        let record = QsoRecord::new("", &LoggedContact { grid: None, ..contact() }, at());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("de_call").is_none());
        assert!(json.get("dx_grid").is_none());
    }

    #[test]
    fn test_session_enter_then_read_back() {
        let mut session = LoggerSession::new();
        assert!(session
            .handle_block("<CMD><UPDATERESPONSE><CONTROL>TXTENTRYCALL</CONTROL><VALUE>k1abc</VALUE></CMD>")
            .is_empty());
        session.handle_block("<CMD><UPDATERESPONSE><CONTROL>TXTENTRYGRID</CONTROL><VALUE>FN42</VALUE></CMD>");
        // Clearing the call box after entry keeps the last call
        session.handle_block("<CMD><UPDATERESPONSE><CONTROL>TXTENTRYCALL</CONTROL><VALUE></VALUE></CMD>");

        assert_eq!(
            session.handle_block("<CMD><ENTEREVENT></CMD>"),
            vec![LoggerAction::Send(READ_BMF)]
        );
        let actions = session.handle_block(
            "<CMD><READBMFRESPONSE><BAND>20</BAND><MODE>PH</MODE><MODETEST>USB</MODETEST><FREQ>14.250</FREQ></CMD>",
        );
        assert_eq!(
            actions,
            vec![LoggerAction::Forward(LoggedContact {
                call: "K1ABC".into(),
                band_mhz: 14.0,
                freq_mhz: 14.25,
                mode: "USB".into(),
                grid: Some("FN42".into()),
            })]
        );

        // A read-back nobody asked for is not forwarded
        assert!(session
            .handle_block("<CMD><READBMFRESPONSE><BAND>20</BAND><FREQ>14.250</FREQ></CMD>")
            .is_empty());
    }

    #[test]
    fn test_session_skips_incomplete_contact() {
        let mut session = LoggerSession::new();
        session.handle_block("<CMD><UPDATERESPONSE><CONTROL>TXTENTRYCALL</CONTROL><VALUE>K1ABC</VALUE></CMD>");
        session.handle_block("<CMD><ENTEREVENT></CMD>");
        assert!(session
            .handle_block("<CMD><READBMFRESPONSE><BAND>11</BAND><FREQ>27.185</FREQ></CMD>")
            .is_empty());
    }

    #[test]
    fn test_session_rejects_absurd_frequency() {
        let mut session = LoggerSession::new();
        session.handle_block("<CMD><UPDATERESPONSE><CONTROL>TXTENTRYCALL</CONTROL><VALUE>K1ABC</VALUE></CMD>");
        for freq in ["1e300", "-14.074", "inf", "NaN"] {
            session.handle_block("<CMD><ENTEREVENT></CMD>");
            let block = format!("<CMD><READBMFRESPONSE><BAND>20</BAND><FREQ>{}</FREQ></CMD>", freq);
            assert!(session.handle_block(&block).is_empty(), "forwarded {}", freq);
        }

        session.handle_block("<CMD><ENTEREVENT></CMD>");
        let actions = session.handle_block("<CMD><READBMFRESPONSE><BAND>20</BAND><FREQ>14.074</FREQ></CMD>");
        assert_eq!(actions.len(), 1);
    }

    #[tokio::test]
    async fn test_forwards_contact_from_logger() {
        let logger = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let logger_port = logger.local_addr().unwrap().port();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut integration = N3fjpIntegration::new(N3fjpSettings {
            enabled: true,
            host: "127.0.0.1".into(),
            port: logger_port,
            udp_dest: receiver.local_addr().unwrap().to_string(),
            my_call: "w1aw".into(),
            ..N3fjpSettings::default()
        });
        integration.connect().await.unwrap();

        let (sock, _) = logger.accept().await.unwrap();
        let mut sock = BufReader::new(sock);
        let mut line = String::new();
        sock.read_line(&mut line).await.unwrap();
        assert_eq!(line, format!("{}\r\n", SET_UPDATE_STATE));

        sock.get_mut()
            .write_all(
                b"<CMD><UPDATERESPONSE><CONTROL>TXTENTRYCALL</CONTROL><VALUE>K1ABC</VALUE></CMD>\
                  <CMD><ENTEREVENT></CMD>",
            )
            .await
            .unwrap();

        line.clear();
        sock.read_line(&mut line).await.unwrap();
        assert_eq!(line, format!("{}\r\n", READ_BMF));
        sock.get_mut()
            .write_all(b"<CMD><READBMFRESPONSE><BAND>40</BAND><MODE>CW</MODE><FREQ>7.030</FREQ></CMD>")
            .await
            .unwrap();

        let mut datagram = [0u8; 2048];
        let (n, _) = timeout(Duration::from_secs(2), receiver.recv_from(&mut datagram))
            .await
            .unwrap()
            .unwrap();
        let xml = String::from_utf8_lossy(&datagram[..n]);
        assert!(xml.contains("<call>K1ABC</call>"));
        assert!(xml.contains("<mycall>W1AW</mycall>"));
        assert!(xml.contains("<rxfreq>703000</rxfreq>"));

        let mut status_rx = integration.subscribe_status().unwrap();
        let status = status_rx
            .wait_for(|s| s.qsos_forwarded == 1)
            .await
            .unwrap()
            .clone();
        assert!(status.connected);
        assert_eq!(status.last_call.as_deref(), Some("K1ABC"));

        integration.disconnect().await;
        assert!(!integration.is_running());
    }

    #[tokio::test]
    async fn test_bad_udp_dest_refused() {
        let mut integration = N3fjpIntegration::new(N3fjpSettings {
            enabled: true,
            udp_dest: "not an address".into(),
            ..N3fjpSettings::default()
        });
        assert!(matches!(integration.connect().await, Err(BridgeError::Config(_))));
        assert!(integration.status().enabled);
        assert!(!integration.status().connected);
    }
}
