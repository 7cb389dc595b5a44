//! Simulated device for tests and demos
//!
//! [`SimulatedDevice`] speaks the real wire protocol (CoAP framing, payload
//! cipher, sync/status/control endpoints) against an in-memory raw status.
//! It can be reached through an in-memory transport (it implements
//! [`Connector`]) or over a real UDP socket via [`SimulatedDevice::serve_udp`].
//!
//! Faults can be injected to exercise recovery paths: corrupted status
//! digests, dropped responses, rejected handshakes, expired sessions,
//! plaintext firmware, and unsolicited datagrams with foreign tokens.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airctrl_core::{DeviceIdentity, RawStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::{CONTROL_PATH, STATUS_PATH, SYNC_PATH};
use crate::crypto::{self, ClientKey};
use crate::message::{option_number, CoapMessage, Code, MessageType};
use crate::transport::{Connector, SimulatedConfig, TransportAdapter, TransportError};

const CONTROL_BOOKKEEPING: [&str; 3] = ["CommandType", "DeviceId", "EnduserId"];

/// Raw status of a legacy-key purifier/humidifier combo
pub fn combo_status(model_id: &str) -> RawStatus {
    to_raw(json!({
        "name": "Living Room",
        "type": "AC2729",
        "modelid": model_id,
        "swversion": "0.2.1",
        "WifiVersion": "AWS_Philips_AIR@62.1",
        "ProductId": "85bc26fae62611e8a1e3061302926720",
        "DeviceId": "3c84c6c8123311ebb1ae8e3584d00715",
        "StatusType": "status",
        "ConnectType": "Online",
        "pwr": "1",
        "mode": "P",
        "om": "1",
        "func": "PH",
        "rhset": 50,
        "rh": 45,
        "temp": 22,
        "pm25": 4,
        "iaql": 1,
        "cl": false,
        "aqil": 100,
        "uil": "1",
        "ddp": "1",
        "dt": 0,
        "dtrs": 0,
        "wl": 100,
        "err": 0,
        "fltsts0": 287,
        "flttotal0": 360,
        "fltsts1": 2689,
        "flttotal1": 4800,
        "fltsts2": 2689,
        "flttotal2": 4800,
        "wicksts": 2689,
        "wicktotal": 4800,
        "fltt1": "A3",
        "fltt2": "C7",
        "aqit": 4
    }))
}

/// Raw status of a numeric-key ("D03xxx") purifier
pub fn numeric_status(model_id: &str) -> RawStatus {
    to_raw(json!({
        "D01S03": "Bedroom",
        "D01S05": model_id,
        "D01S12": "1.0.7",
        "ProductId": "a1f8a0f4e8f111ec8f1c0a0b1c2d3e4f",
        "DeviceId": "0f3a2d7c8e8f11ecb9090242ac120002",
        "D03102": 1,
        "D0310C": 0,
        "D0310D": 1,
        "D03103": 0,
        "D03105": 123,
        "D03221": 3,
        "D03120": 1,
        "D03224": 215,
        "D0312A": 1,
        "D0312B": 0,
        "D03110": 0,
        "D03240": 0,
        "D05408": 4800,
        "D0540E": 4312,
        "D05207": 360,
        "D0520D": 290
    }))
}

fn to_raw(value: Value) -> RawStatus {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => RawStatus::new(),
    }
}

#[derive(Debug, Default)]
struct Faults {
    corrupt_status: u32,
    drop_responses: u32,
    spurious_datagrams: u32,
    reject_handshake: bool,
    plaintext: bool,
    silent: bool,
}

#[derive(Debug)]
struct DeviceState {
    status: RawStatus,
    /// Counter handed out at the last handshake; `None` when no session
    session_key: Option<ClientKey>,
    /// Counter the device encrypts status frames with
    device_key: ClientKey,
    max_age: u32,
}

struct Inner {
    state: Mutex<DeviceState>,
    faults: Mutex<Faults>,
    commands: Mutex<Vec<RawStatus>>,
    handshakes: AtomicU32,
    /// Arrival time of every sync request, answered or not
    sync_attempts: Mutex<Vec<Instant>>,
    connections: AtomicU32,
    status_requests: AtomicU32,
    latency: Duration,
}

/// In-memory device speaking the encrypted CoAP protocol
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<Inner>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::from_config(&SimulatedConfig::default())
    }
}

impl SimulatedDevice {
    /// Device reporting the given raw status
    pub fn new(status: RawStatus) -> Self {
        Self::with_latency(status, Duration::ZERO)
    }

    fn with_latency(status: RawStatus, latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DeviceState {
                    status,
                    session_key: None,
                    device_key: ClientKey(0x0100_0000),
                    max_age: 60,
                }),
                faults: Mutex::new(Faults::default()),
                commands: Mutex::new(Vec::new()),
                handshakes: AtomicU32::new(0),
                sync_attempts: Mutex::new(Vec::new()),
                connections: AtomicU32::new(0),
                status_requests: AtomicU32::new(0),
                latency,
            }),
        }
    }

    /// Device from transport configuration; numeric-key models get the
    /// numeric status layout
    pub fn from_config(config: &SimulatedConfig) -> Self {
        let status = if is_numeric_model(&config.model_id) {
            let mut status = numeric_status(&config.model_id);
            if config.model_id.starts_with("AC3737") {
                status.insert("D0312C".to_string(), json!(1));
                status.insert("D03128".to_string(), json!(50));
                status.insert("D03125".to_string(), json!(44));
            }
            status
        } else {
            combo_status(&config.model_id)
        };
        Self::with_latency(status, Duration::from_millis(config.latency_ms))
    }

    // --- State inspection ---

    pub fn status(&self) -> RawStatus {
        self.inner.state.lock().status.clone()
    }

    /// Replace one raw status entry
    pub fn set_raw(&self, key: &str, value: Value) {
        self.inner
            .state
            .lock()
            .status
            .insert(key.to_string(), value);
    }

    pub fn remove_raw(&self, key: &str) {
        self.inner.state.lock().status.remove(key);
    }

    pub fn set_max_age(&self, seconds: u32) {
        self.inner.state.lock().max_age = seconds;
    }

    /// Control patches applied, in arrival order
    pub fn commands(&self) -> Vec<RawStatus> {
        self.inner.commands.lock().clone()
    }

    pub fn handshakes(&self) -> u32 {
        self.inner.handshakes.load(Ordering::SeqCst)
    }

    /// When each sync request arrived, including those a silent device
    /// ignored; follows the paused clock in `start_paused` tests
    pub fn sync_attempts(&self) -> Vec<Instant> {
        self.inner.sync_attempts.lock().clone()
    }

    pub fn connections(&self) -> u32 {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn status_requests(&self) -> u32 {
        self.inner.status_requests.load(Ordering::SeqCst)
    }

    // --- Fault injection ---

    /// Corrupt the digest of the next `count` status frames
    pub fn corrupt_next_status(&self, count: u32) {
        self.inner.faults.lock().corrupt_status = count;
    }

    /// Swallow the next `count` requests without answering
    pub fn drop_next_responses(&self, count: u32) {
        self.inner.faults.lock().drop_responses = count;
    }

    /// Precede the next `count` responses with a datagram carrying a foreign token
    pub fn send_spurious_datagrams(&self, count: u32) {
        self.inner.faults.lock().spurious_datagrams = count;
    }

    /// Answer handshakes with 4.03 Forbidden
    pub fn reject_handshakes(&self, reject: bool) {
        self.inner.faults.lock().reject_handshake = reject;
    }

    /// Behave like plaintext firmware
    pub fn set_plaintext(&self, plaintext: bool) {
        self.inner.faults.lock().plaintext = plaintext;
    }

    /// Stop answering entirely (device offline)
    pub fn set_silent(&self, silent: bool) {
        self.inner.faults.lock().silent = silent;
    }

    /// Forget the session; commands fail until the next handshake
    pub fn expire_session(&self) {
        self.inner.state.lock().session_key = None;
    }

    // --- Protocol ---

    /// Handle one request datagram, returning the datagrams sent back
    pub fn handle_datagram(&self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let request = match CoapMessage::decode(datagram) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Simulated device: ignoring undecodable datagram");
                return Vec::new();
            }
        };

        if request.uri_path() == SYNC_PATH {
            self.inner.sync_attempts.lock().push(Instant::now());
        }

        let spurious = {
            let mut faults = self.inner.faults.lock();
            if faults.silent {
                return Vec::new();
            }
            if faults.drop_responses > 0 {
                faults.drop_responses -= 1;
                return Vec::new();
            }
            if faults.spurious_datagrams > 0 {
                faults.spurious_datagrams -= 1;
                true
            } else {
                false
            }
        };

        let response = match request.uri_path().as_str() {
            SYNC_PATH => self.handle_sync(&request),
            STATUS_PATH => self.handle_status(&request),
            CONTROL_PATH => self.handle_control(&request),
            _ => reply(&request, Code::NOT_FOUND, Vec::new()),
        };

        let mut out = Vec::new();
        if spurious {
            let foreign: Vec<u8> = request.token.iter().map(|b| !b).collect();
            let stale = reply(&request, Code::CONTENT, b"{}".to_vec()).with_token(&foreign);
            out.push(stale.encode());
        }
        out.push(response.encode());
        out
    }

    fn handle_sync(&self, request: &CoapMessage) -> CoapMessage {
        self.inner.handshakes.fetch_add(1, Ordering::SeqCst);

        let (reject, plaintext) = {
            let faults = self.inner.faults.lock();
            (faults.reject_handshake, faults.plaintext)
        };
        if reject {
            return reply(request, Code::FORBIDDEN, Vec::new());
        }
        if plaintext {
            return reply(request, Code::CONTENT, self.reported_document().into_bytes());
        }

        let mut state = self.inner.state.lock();
        let key = ClientKey(0x2000_0000u32.wrapping_add(self.handshakes() << 8));
        state.session_key = Some(key);
        reply(request, Code::CONTENT, key.to_hex().into_bytes())
    }

    fn handle_status(&self, request: &CoapMessage) -> CoapMessage {
        self.inner.status_requests.fetch_add(1, Ordering::SeqCst);

        let document = self.reported_document();
        let (corrupt, plaintext) = {
            let mut faults = self.inner.faults.lock();
            let corrupt = faults.corrupt_status > 0;
            if corrupt {
                faults.corrupt_status -= 1;
            }
            (corrupt, faults.plaintext)
        };

        let (payload, max_age) = {
            let mut state = self.inner.state.lock();
            let max_age = state.max_age;
            if plaintext {
                (document, max_age)
            } else {
                state.device_key = state.device_key.next();
                let mut frame = crypto::encrypt(state.device_key, &document);
                if corrupt {
                    flip_digest(&mut frame);
                }
                (frame, max_age)
            }
        };

        reply(request, Code::CONTENT, payload.into_bytes())
            .with_uint_option(option_number::MAX_AGE, max_age)
    }

    fn handle_control(&self, request: &CoapMessage) -> CoapMessage {
        let failed = || reply(request, Code::CHANGED, br#"{"status":"failed"}"#.to_vec());

        if self.inner.state.lock().session_key.is_none() {
            return failed();
        }

        let text = String::from_utf8_lossy(&request.payload).to_string();
        let Ok((_, plaintext)) = crypto::decrypt(&text) else {
            return failed();
        };
        let Ok(document) = serde_json::from_str::<Value>(&plaintext) else {
            return failed();
        };
        let Some(desired) = document
            .get("state")
            .and_then(|s| s.get("desired"))
            .and_then(Value::as_object)
        else {
            return failed();
        };

        let patch: RawStatus = desired
            .iter()
            .filter(|(k, _)| !CONTROL_BOOKKEEPING.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        {
            let mut state = self.inner.state.lock();
            for (key, value) in &patch {
                state.status.insert(key.clone(), value.clone());
            }
        }
        self.inner.commands.lock().push(patch);

        reply(request, Code::CHANGED, br#"{"status":"success"}"#.to_vec())
    }

    fn reported_document(&self) -> String {
        let state = self.inner.state.lock();
        json!({ "state": { "reported": state.status } }).to_string()
    }

    // --- UDP ---

    /// Serve this device on a local UDP socket
    pub async fn serve_udp(&self) -> std::io::Result<SimulatedUdpServer> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let local_addr = socket.local_addr()?;
        let device = self.clone();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                for datagram in device.handle_datagram(&buf[..len]) {
                    let _ = socket.send_to(&datagram, from).await;
                }
            }
        });

        Ok(SimulatedUdpServer { local_addr, task })
    }
}

fn is_numeric_model(model_id: &str) -> bool {
    ["AC0850/31", "AC0950", "AC1715", "AC3737"]
        .iter()
        .any(|prefix| model_id.starts_with(prefix))
}

fn reply(request: &CoapMessage, code: Code, payload: Vec<u8>) -> CoapMessage {
    let message_type = match request.message_type {
        MessageType::Confirmable => MessageType::Acknowledgement,
        _ => MessageType::NonConfirmable,
    };
    CoapMessage::new(message_type, code, request.message_id)
        .with_token(&request.token)
        .with_payload(payload)
}

fn flip_digest(frame: &mut String) {
    let last = frame.len() - 1;
    let flipped = if frame.ends_with('0') { "1" } else { "0" };
    frame.replace_range(last.., flipped);
}

/// Simulated device listening on UDP; stops when dropped
pub struct SimulatedUdpServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl SimulatedUdpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for SimulatedUdpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// In-memory transport connected to a [`SimulatedDevice`]
pub struct SimulatedTransport {
    device: SimulatedDevice,
    inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    connected: AtomicBool,
}

impl SimulatedTransport {
    pub fn new(device: SimulatedDevice) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            device,
            inbox_tx,
            inbox: tokio::sync::Mutex::new(inbox),
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TransportAdapter for SimulatedTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.device.inner.latency.is_zero() {
            tokio::time::sleep(self.device.inner.latency).await;
        }
        for response in self.device.handle_datagram(datagram) {
            let _ = self.inbox_tx.send(response);
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(datagram)) => Ok(datagram),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let mut inbox = self.inbox.lock().await;
        while inbox.try_recv().is_ok() {}
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn peer(&self) -> String {
        "simulated".to_string()
    }
}

#[async_trait]
impl Connector for SimulatedDevice {
    async fn open(
        &self,
        _identity: &DeviceIdentity,
    ) -> Result<Arc<dyn TransportAdapter>, TransportError> {
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedTransport::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_handshake_then_status() {
        let device = SimulatedDevice::new(combo_status("AC2729/10"));

        let sync = codec::sync_request(1, &[1], 0x1234);
        let replies = device.handle_datagram(&sync.encode());
        let key = codec::decode_sync_response(&CoapMessage::decode(&replies[0]).unwrap()).unwrap();
        assert_eq!(device.handshakes(), 1);
        assert_ne!(key, ClientKey(0));

        let status = codec::status_request(2, &[2]);
        let replies = device.handle_datagram(&status.encode());
        let response =
            codec::decode_status_response(&CoapMessage::decode(&replies[0]).unwrap()).unwrap();
        assert_eq!(response.raw.get("modelid"), Some(&json!("AC2729/10")));
        assert_eq!(response.max_age, 60);
    }

    #[tokio::test]
    async fn test_sync_attempts_recorded_while_silent() {
        let device = SimulatedDevice::new(combo_status("AC2729/10"));
        device.set_silent(true);
        assert!(device
            .handle_datagram(&codec::sync_request(1, &[1], 7).encode())
            .is_empty());
        device.handle_datagram(&codec::status_request(2, &[2]).encode());

        assert_eq!(device.sync_attempts().len(), 1);
        assert_eq!(device.handshakes(), 0);
    }

    #[test]
    fn test_control_applies_patch_in_order() {
        let device = SimulatedDevice::default();
        device.handle_datagram(&codec::sync_request(1, &[1], 7).encode());

        for (i, mode) in ["A", "S"].iter().enumerate() {
            let mut patch = RawStatus::new();
            patch.insert("mode".to_string(), json!(mode));
            let request = codec::control_request(10 + i as u16, &[3], ClientKey(i as u32), &patch);
            let replies = device.handle_datagram(&request.encode());
            let outcome =
                codec::decode_control_response(&CoapMessage::decode(&replies[0]).unwrap())
                    .unwrap();
            assert_eq!(outcome, codec::ControlOutcome::Success);
        }

        let modes: Vec<_> = device
            .commands()
            .iter()
            .map(|c| c.get("mode").cloned())
            .collect();
        assert_eq!(modes, vec![Some(json!("A")), Some(json!("S"))]);
        assert_eq!(device.status().get("mode"), Some(&json!("S")));
    }

    #[test]
    fn test_expired_session_fails_control() {
        let device = SimulatedDevice::default();
        device.handle_datagram(&codec::sync_request(1, &[1], 7).encode());
        device.expire_session();

        let mut patch = RawStatus::new();
        patch.insert("pwr".to_string(), json!("0"));
        let replies =
            device.handle_datagram(&codec::control_request(2, &[2], ClientKey(1), &patch).encode());
        let outcome =
            codec::decode_control_response(&CoapMessage::decode(&replies[0]).unwrap()).unwrap();
        assert_eq!(outcome, codec::ControlOutcome::Failed);
        assert!(device.commands().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_transport_drops_and_spurious() {
        let device = SimulatedDevice::default();
        let transport = device
            .open(&DeviceIdentity::new("simulated"))
            .await
            .unwrap();

        device.drop_next_responses(1);
        transport
            .send(&codec::status_request(1, &[1]).encode())
            .await
            .unwrap();
        assert!(transport
            .receive(Duration::from_millis(10))
            .await
            .unwrap_err()
            .is_timeout());

        device.send_spurious_datagrams(1);
        transport
            .send(&codec::status_request(2, &[5]).encode())
            .await
            .unwrap();
        let first = CoapMessage::decode(&transport.receive(Duration::from_millis(10)).await.unwrap())
            .unwrap();
        let second =
            CoapMessage::decode(&transport.receive(Duration::from_millis(10)).await.unwrap())
                .unwrap();
        assert_ne!(first.token, vec![5]);
        assert_eq!(second.token, vec![5]);
        assert_eq!(device.connections(), 1);
    }
}
