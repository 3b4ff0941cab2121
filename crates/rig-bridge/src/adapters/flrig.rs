//! flrig backend
//!
//! flrig exposes its rig over XML-RPC at `http://host:port/RPC2`. Replies are
//! small and flat, so they are picked apart with plain string search rather
//! than a full XML parser.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::{backend_mode_name, normalize_backend_mode, AdapterCommand, AdapterTask, RigCommand};
use crate::config::NetEndpoint;
use crate::error::BridgeError;
use crate::state::{RigField, StateHandle};

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// XML-RPC parameter
#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    Int(i64),
    Double(f64),
    Str(String),
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Request body for one call
pub fn method_call(method: &str, params: &[XmlValue]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
        method
    );
    for param in params {
        let value = match param {
            XmlValue::Int(v) => format!("<i4>{}</i4>", v),
            XmlValue::Double(v) => format!("<double>{}</double>", v),
            XmlValue::Str(s) => format!("<string>{}</string>", escape(s)),
        };
        body.push_str("<param><value>");
        body.push_str(&value);
        body.push_str("</value></param>");
    }
    body.push_str("</params></methodCall>");
    body
}

/// First scalar in a method response, as text
///
/// Arrays are descended into; a fault is an error.
pub fn response_value(xml: &str) -> Result<String, BridgeError> {
    if xml.contains("<fault>") {
        let reason = response_fault(xml).unwrap_or_else(|| "unknown fault".into());
        return Err(BridgeError::Backend(format!("flrig fault: {}", reason)));
    }

    let mut rest = xml;
    while let Some(start) = rest.find("<value>") {
        rest = &rest[start + "<value>".len()..];
        let inner = rest.trim_start();
        if inner.starts_with("<array") || inner.starts_with("<data") || inner.starts_with("<struct") {
            continue;
        }
        let end = inner
            .find("</value>")
            .ok_or_else(|| BridgeError::Backend("flrig: unterminated value".into()))?;
        let inner = &inner[..end];
        return Ok(unescape(strip_type_tag(inner)));
    }
    Err(BridgeError::Backend("flrig: reply has no value".into()))
}

fn strip_type_tag(inner: &str) -> &str {
    let trimmed = inner.trim();
    if !trimmed.starts_with('<') {
        return inner;
    }
    let Some(close) = trimmed.find('>') else {
        return inner;
    };
    let tag = &trimmed[1..close];
    if tag.ends_with('/') {
        // <string/>
        return "";
    }
    let closing = format!("</{}>", tag);
    match trimmed.rfind(&closing) {
        Some(end) if end > close => &trimmed[close + 1..end],
        _ => inner,
    }
}

fn response_fault(xml: &str) -> Option<String> {
    let at = xml.find("faultString")?;
    let rest = &xml[at..];
    let start = rest.find("<value>")? + "<value>".len();
    let end = rest[start..].find("</value>")?;
    Some(unescape(strip_type_tag(&rest[start..start + end])))
}

/// XML-RPC client for one flrig instance
#[derive(Debug, Clone)]
pub struct FlrigClient {
    http: reqwest::Client,
    url: String,
}

impl FlrigClient {
    pub fn new(endpoint: &NetEndpoint) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: format!("http://{}/RPC2", endpoint.addr()),
        })
    }

    /// Call `method` and return the first scalar of the reply
    pub async fn call(&self, method: &str, params: &[XmlValue]) -> Result<String, BridgeError> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(method_call(method, params))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Backend(format!("flrig: HTTP {}", status)));
        }
        let text = response.text().await?;
        trace!("flrig {} -> {}", method, text);
        response_value(&text)
    }

    /// Read frequency, mode, PTT and bandwidth
    ///
    /// Transport failures are errors. Replies that do not parse are left out
    /// so the previous value stands.
    pub async fn read_state(&self) -> Result<Vec<RigField>, BridgeError> {
        let mut fields = Vec::with_capacity(4);

        let vfo = self.call("rig.get_vfo", &[]).await?;
        match parse_hz(&vfo) {
            Some(hz) => fields.push(RigField::FrequencyHz(hz)),
            None => debug!("flrig: ignoring frequency {:?}", vfo),
        }

        let mode = self.call("rig.get_mode", &[]).await?;
        if let Some(tag) = normalize_backend_mode(&mode) {
            fields.push(RigField::Mode(tag));
        }

        let ptt = self.call("rig.get_ptt", &[]).await?;
        match ptt.trim().parse::<i64>() {
            Ok(v) => fields.push(RigField::PttActive(v != 0)),
            Err(_) => debug!("flrig: ignoring PTT {:?}", ptt),
        }

        // Not every rig reports a bandwidth
        match self.call("rig.get_bw", &[]).await {
            Ok(bw) => {
                if let Ok(width) = bw.trim().parse::<u32>() {
                    fields.push(RigField::FilterWidth(width));
                }
            }
            Err(BridgeError::Backend(e)) => trace!("flrig: no bandwidth: {}", e),
            Err(e) => return Err(e),
        }

        Ok(fields)
    }

    pub async fn execute(&self, command: &RigCommand) -> Result<(), BridgeError> {
        match command {
            RigCommand::SetFrequency(hz) => {
                self.call("rig.set_vfo", &[XmlValue::Double(*hz as f64)])
                    .await?
            }
            RigCommand::SetMode(tag) => {
                self.call("rig.set_mode", &[XmlValue::Str(backend_mode_name(tag))])
                    .await?
            }
            RigCommand::SetPtt(on) => {
                self.call("rig.set_ptt", &[XmlValue::Int(i64::from(*on))])
                    .await?
            }
        };
        Ok(())
    }
}

fn parse_hz(text: &str) -> Option<u64> {
    let text = text.trim();
    text.parse::<u64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|v| v.round() as u64)
    })
}

/// flrig adapter
#[derive(Debug)]
pub struct FlrigAdapter {
    endpoint: NetEndpoint,
    poll: Duration,
    pub(super) task: Option<AdapterTask>,
}

impl FlrigAdapter {
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
        AdapterTask::spawn(move |cmd_rx| run_flrig_adapter(endpoint, poll, state, cmd_rx))
    }
}

/// Poll flrig until shutdown
pub async fn run_flrig_adapter(
    endpoint: NetEndpoint,
    poll: Duration,
    state: StateHandle,
    mut cmd_rx: mpsc::Receiver<AdapterCommand>,
) {
    let client = match FlrigClient::new(&endpoint) {
        Ok(client) => client,
        Err(e) => {
            error!("flrig: cannot build HTTP client: {}", e);
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    AdapterCommand::Shutdown => break,
                    AdapterCommand::Rig { response, .. } => {
                        let _ = response.send(Err(BridgeError::Backend("flrig client unavailable".into())));
                    }
                }
            }
            return;
        }
    };

    info!("Starting flrig adapter for {}", endpoint.addr());
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut connected = false;
    let mut failing = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => match client.read_state().await {
                Ok(fields) => {
                    let mut update = Vec::with_capacity(fields.len() + 1);
                    if !connected {
                        info!("flrig: connected to {}", endpoint.addr());
                        connected = true;
                        update.push(RigField::Connected(true));
                    }
                    failing = false;
                    update.extend(fields);
                    state.apply(update).await;
                }
                Err(e) => {
                    if !failing {
                        warn!("flrig: poll failed: {}", e);
                        failing = true;
                    } else {
                        debug!("flrig: poll still failing: {}", e);
                    }
                    connected = false;
                    state.set(RigField::Connected(false)).await;
                }
            },

            cmd = cmd_rx.recv() => match cmd {
                None | Some(AdapterCommand::Shutdown) => break,
                Some(AdapterCommand::Rig { command, response }) => {
                    let result = client.execute(&command).await;
                    if let Err(e) = &result {
                        warn!("flrig: {:?} failed: {}", command, e);
                    }
                    let _ = response.send(result);
                }
            }
        }
    }

    state.set(RigField::Connected(false)).await;
    info!("flrig adapter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn string_response(value: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param><value>{}</value></param></params></methodResponse>",
            value
        )
    }

    #[test]
    fn test_method_call_body() {
        let body = method_call("rig.set_mode", &[XmlValue::Str("PKTUSB".into())]);
        assert!(body.contains("<methodName>rig.set_mode</methodName>"));
        assert!(body.contains("<param><value><string>PKTUSB</string></value></param>"));

        let body = method_call("rig.set_vfo", &[XmlValue::Double(14_074_000.0)]);
        assert!(body.contains("<double>14074000</double>"));
    }

    #[test]
    fn test_response_value_shapes() {
        assert_eq!(response_value(&string_response("14074000")).unwrap(), "14074000");
        assert_eq!(response_value(&string_response("<string>USB</string>")).unwrap(), "USB");
        assert_eq!(response_value(&string_response("<i4>1</i4>")).unwrap(), "1");
        assert_eq!(response_value(&string_response("<string/>")).unwrap(), "");

        let array = string_response(
            "<array><data><value>3000</value><value></value></data></array>",
        );
        assert_eq!(response_value(&array).unwrap(), "3000");
    }

    #[test]
    fn test_response_fault() {
        let xml = "<methodResponse><fault><value><struct>\
            <member><name>faultCode</name><value><int>1</int></value></member>\
            <member><name>faultString</name><value><string>no such method</string></value></member>\
            </struct></value></fault></methodResponse>";
        let err = response_value(xml).unwrap_err();
        assert!(err.to_string().contains("no such method"));
    }

    #[test]
    fn test_parse_hz() {
        assert_eq!(parse_hz("7074000"), Some(7_074_000));
        assert_eq!(parse_hz(" 7074000.0 "), Some(7_074_000));
        assert_eq!(parse_hz("abc"), None);
        assert_eq!(parse_hz(""), None);
    }

    /// Read one HTTP request and return its body
    async fn read_request(sock: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= head_end + 4 + length {
                    return text[head_end + 4..].to_string();
                }
            }
        }
        String::new()
    }

    fn fault_response(reason: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><methodResponse><fault><value><struct>\
             <member><name>faultCode</name><value><int>1</int></value></member>\
             <member><name>faultString</name><value><string>{}</string></value></member>\
             </struct></value></fault></methodResponse>",
            reason
        )
    }

    /// Minimal flrig: answers reads from fixed values, records every call
    ///
    /// While `rig_gone` is set every call gets a fault.
    async fn fake_flrig(calls: Arc<Mutex<Vec<String>>>, rig_gone: Arc<AtomicBool>) -> NetEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let body = read_request(&mut sock).await;
                calls.lock().unwrap().push(body.clone());
                let value = if body.contains("rig.get_vfo") {
                    "<string>14074000</string>"
                } else if body.contains("rig.get_mode") {
                    "<string>PKTUSB</string>"
                } else if body.contains("rig.get_ptt") {
                    "<i4>0</i4>"
                } else if body.contains("rig.get_bw") {
                    "<array><data><value>3000</value><value></value></data></array>"
                } else {
                    "<i4>0</i4>"
                };
                let reply = if rig_gone.load(Ordering::SeqCst) {
                    fault_response("rig not connected")
                } else {
                    string_response(value)
                };
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        NetEndpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_read_state_against_fake_flrig() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let endpoint = fake_flrig(calls.clone(), Arc::default()).await;
        let client = FlrigClient::new(&endpoint).unwrap();

        let fields = client.read_state().await.unwrap();
        assert_eq!(
            fields,
            vec![
                RigField::FrequencyHz(14_074_000),
                RigField::Mode("DATA-USB".into()),
                RigField::PttActive(false),
                RigField::FilterWidth(3000),
            ]
        );

        client
            .execute(&RigCommand::SetMode("FT8".into()))
            .await
            .unwrap();
        let last = calls.lock().unwrap().last().cloned().unwrap();
        assert!(last.contains("rig.set_mode"));
        assert!(last.contains("PKTUSB"));
    }

    #[tokio::test]
    async fn test_adapter_reports_and_executes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let endpoint = fake_flrig(calls.clone(), Arc::default()).await;
        let (state, _task) = StateHandle::spawn();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_flrig_adapter(
            endpoint,
            Duration::from_secs(3600),
            state.clone(),
            cmd_rx,
        ));

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(AdapterCommand::Rig {
                command: RigCommand::SetPtt(true),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        let snap = loop {
            let snap = state.snapshot().await.unwrap();
            if snap.connected {
                break snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(snap.frequency_hz, 14_074_000);
        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.contains("rig.set_ptt") && c.contains("<i4>1</i4>")));

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connected_follows_failure_and_recovery() {
        let rig_gone = Arc::new(AtomicBool::new(false));
        let endpoint = fake_flrig(Arc::default(), rig_gone.clone()).await;
        let (state, _task) = StateHandle::spawn();
        let (_, mut updates) = state.subscribe().await.unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(run_flrig_adapter(
            endpoint,
            Duration::from_millis(20),
            state.clone(),
            cmd_rx,
        ));

        let mut flips = Vec::new();
        while flips.len() < 3 {
            let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
                .await
                .unwrap()
                .unwrap();
            if let RigField::Connected(on) = update.field {
                flips.push(on);
                if flips.len() < 3 {
                    rig_gone.store(on, Ordering::SeqCst);
                }
            }
        }
        assert_eq!(flips, vec![true, false, true]);
        assert!(state.snapshot().await.unwrap().connected);

        cmd_tx.send(AdapterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_flrig_is_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = FlrigClient::new(&NetEndpoint::new("127.0.0.1", port)).unwrap();
        assert!(client.read_state().await.is_err());
    }
}
