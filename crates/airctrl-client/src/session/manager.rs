//! Session manager for encrypted device communication

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airctrl_coap::codec::{self, ControlOutcome, StatusResponse};
use airctrl_coap::{
    ClientKey, CoapMessage, FrameError, ResponseError, TransportAdapter, TransportError,
};
use airctrl_core::RawStatus;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::SessionState;
use crate::config::ClientConfig;
use crate::error::{HandshakeError, SessionError};

/// A request sent under the session key
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Status,
    /// Raw status patch to apply
    Control(RawStatus),
}

/// Successful answer to a [`Request`]
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Status(StatusResponse),
    /// The device applied the control patch
    Applied,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    key: ClientKey,
    established_at: Instant,
    last_exchange: Instant,
}

/// Why a single exchange produced no matching response
enum ExchangeError {
    Transport(TransportError),
    Frame(FrameError),
}

impl From<TransportError> for ExchangeError {
    fn from(err: TransportError) -> Self {
        ExchangeError::Transport(err)
    }
}

/// Owns the encrypted session with one device
///
/// Exchanges are serialized: only one request is in flight on the transport
/// at a time, and responses are matched to it by token.
pub struct SessionManager {
    transport: Arc<dyn TransportAdapter>,
    request_timeout: Duration,
    handshake_timeout: Duration,
    timeout_threshold: u32,
    state: RwLock<SessionState>,
    session: RwLock<Option<Session>>,
    consecutive_timeouts: AtomicU32,
    message_id: AtomicU16,
    token: AtomicU32,
    exchange_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn TransportAdapter>, config: &ClientConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout(),
            handshake_timeout: config.handshake_timeout(),
            timeout_threshold: config.timeout_threshold.max(1),
            state: RwLock::new(SessionState::Unestablished),
            session: RwLock::new(None),
            consecutive_timeouts: AtomicU32::new(0),
            message_id: AtomicU16::new(rand::random()),
            token: AtomicU32::new(rand::random()),
            exchange_lock: Mutex::new(()),
        }
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Current client key counter, when a session is established
    pub fn key(&self) -> Option<ClientKey> {
        self.session.read().map(|s| s.key)
    }

    /// Time since the last successful exchange
    pub fn idle_for(&self) -> Option<Duration> {
        self.session.read().map(|s| s.last_exchange.elapsed())
    }

    /// Age of the current session
    pub fn session_age(&self) -> Option<Duration> {
        self.session.read().map(|s| s.established_at.elapsed())
    }

    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.transport
    }

    /// Perform the key exchange and activate a new session
    pub async fn establish(&self) -> Result<ClientKey, HandshakeError> {
        let _guard = self.exchange_lock.lock().await;

        self.set_state(SessionState::Handshaking);
        *self.session.write() = None;

        let nonce: u32 = rand::random();
        let (message_id, token) = self.next_ids();
        let request = codec::sync_request(message_id, &token, nonce);
        debug!(peer = %self.transport.peer(), nonce = format!("{:08X}", nonce), "Sending key exchange");

        let result = match self.exchange(&request, self.handshake_timeout).await {
            Ok(response) => codec::decode_sync_response(&response).map_err(handshake_error),
            Err(ExchangeError::Transport(e)) => Err(HandshakeError::Unreachable(e.to_string())),
            Err(ExchangeError::Frame(e)) => Err(HandshakeError::ProtocolMismatch(e.to_string())),
        };

        match result {
            Ok(key) => {
                let now = Instant::now();
                *self.session.write() = Some(Session {
                    key,
                    established_at: now,
                    last_exchange: now,
                });
                self.consecutive_timeouts.store(0, Ordering::SeqCst);
                self.set_state(SessionState::Active);
                info!(peer = %self.transport.peer(), key = %key, "Session established");
                Ok(key)
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                warn!(peer = %self.transport.peer(), error = %e, "Key exchange failed");
                Err(e)
            }
        }
    }

    /// Send one request under the session key
    ///
    /// Integrity failures, undecodable responses, a control rejection and
    /// `timeout_threshold` consecutive timeouts expire the session and return
    /// [`SessionError::NeedsReestablish`]. Nothing is retried here.
    pub async fn request(&self, request: &Request) -> Result<Response, SessionError> {
        let _guard = self.exchange_lock.lock().await;

        let key = match (self.state(), self.key()) {
            (SessionState::Active, Some(key)) => key,
            (SessionState::Expired, _) => {
                return Err(SessionError::NeedsReestablish("session expired".to_string()))
            }
            _ => return Err(SessionError::NotEstablished),
        };

        let (message_id, token) = self.next_ids();
        let message = match request {
            Request::Status => codec::status_request(message_id, &token),
            Request::Control(patch) => {
                let next = key.next();
                if let Some(session) = self.session.write().as_mut() {
                    session.key = next;
                }
                codec::control_request(message_id, &token, next, patch)
            }
        };

        let response = match self.exchange(&message, self.request_timeout).await {
            Ok(response) => response,
            Err(ExchangeError::Transport(e)) if e.is_timeout() => return Err(self.record_timeout()),
            Err(ExchangeError::Transport(e)) => {
                self.invalidate(&e.to_string());
                return Err(SessionError::Transport(e));
            }
            Err(ExchangeError::Frame(e)) => return Err(self.invalidate(&e.to_string())),
        };
        self.consecutive_timeouts.store(0, Ordering::SeqCst);

        let decoded = match request {
            Request::Status => codec::decode_status_response(&response).map(Response::Status),
            Request::Control(_) => match codec::decode_control_response(&response) {
                Ok(ControlOutcome::Success) => Ok(Response::Applied),
                Ok(ControlOutcome::Failed) => {
                    return Err(self.invalidate("device rejected the session key"))
                }
                Err(e) => Err(e),
            },
        };

        match decoded {
            Ok(response) => {
                if let Some(session) = self.session.write().as_mut() {
                    session.last_exchange = Instant::now();
                }
                Ok(response)
            }
            Err(ResponseError::Rejected(code)) => {
                warn!(peer = %self.transport.peer(), code = %code, "Request rejected");
                Err(SessionError::Rejected(format!("device answered {}", code)))
            }
            Err(e) => Err(self.invalidate(&e.to_string())),
        }
    }

    /// Poll the device status
    pub async fn status(&self) -> Result<StatusResponse, SessionError> {
        match self.request(&Request::Status).await? {
            Response::Status(status) => Ok(status),
            Response::Applied => Err(SessionError::Rejected(
                "control reply to a status request".to_string(),
            )),
        }
    }

    /// Apply a raw status patch
    pub async fn control(&self, patch: &RawStatus) -> Result<(), SessionError> {
        self.request(&Request::Control(patch.clone())).await.map(|_| ())
    }

    /// Mark the session expired so the next request asks for a new one
    pub fn expire(&self) {
        if self.state() == SessionState::Active {
            self.set_state(SessionState::Expired);
        }
    }

    /// Tear down the session and release the transport
    pub async fn close(&self) {
        *self.session.write() = None;
        self.set_state(SessionState::Unestablished);
        self.transport.close().await;
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(peer = %self.transport.peer(), from = %previous, to = %state, "Session state changed");
        }
    }

    fn invalidate(&self, reason: &str) -> SessionError {
        warn!(peer = %self.transport.peer(), reason, "Session expired");
        self.set_state(SessionState::Expired);
        SessionError::NeedsReestablish(reason.to_string())
    }

    fn record_timeout(&self) -> SessionError {
        let count = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.timeout_threshold {
            self.consecutive_timeouts.store(0, Ordering::SeqCst);
            return self.invalidate(&format!("{} consecutive timeouts", count));
        }
        debug!(peer = %self.transport.peer(), count, "Request timed out");
        SessionError::Timeout
    }

    fn next_ids(&self) -> (u16, [u8; 4]) {
        let message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
        let token = self.token.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        (message_id, token)
    }

    /// Send a request and wait for the response carrying its token
    async fn exchange(
        &self,
        request: &CoapMessage,
        timeout: Duration,
    ) -> Result<CoapMessage, ExchangeError> {
        let deadline = Instant::now() + timeout;
        self.transport.send(&request.encode()).await?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout.as_millis() as u64).into());
            }

            let datagram = self.transport.receive(remaining).await?;
            match CoapMessage::decode(&datagram) {
                Ok(response) if response.token == request.token => return Ok(response),
                Ok(other) => {
                    debug!(
                        token = %hex_token(&other.token),
                        code = %other.code,
                        "Ignoring datagram for another exchange"
                    );
                }
                Err(e @ FrameError::UnsupportedVersion(_)) => return Err(ExchangeError::Frame(e)),
                Err(e) => debug!(error = %e, "Ignoring undecodable datagram"),
            }
        }
    }
}

fn handshake_error(err: ResponseError) -> HandshakeError {
    match err {
        ResponseError::Rejected(code) => HandshakeError::Rejected(format!("device answered {}", code)),
        ResponseError::UnexpectedPayload(reason) => HandshakeError::ProtocolMismatch(reason),
        ResponseError::Frame(e) => HandshakeError::ProtocolMismatch(e.to_string()),
    }
}

fn hex_token(token: &[u8]) -> String {
    token.iter().map(|b| format!("{:02x}", b)).collect()
}
