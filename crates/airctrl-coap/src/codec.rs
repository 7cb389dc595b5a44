//! Request builders and response decoders for the device endpoints
//!
//! | Endpoint           | Request                   | Response                         |
//! |--------------------|---------------------------|----------------------------------|
//! | `/sys/dev/sync`    | NON POST, hex client nonce| hex device counter               |
//! | `/sys/dev/status`  | NON GET, Observe=0        | encrypted `state.reported`       |
//! | `/sys/dev/control` | CON POST, encrypted patch | plain `{"status": "success"}`    |

use airctrl_core::RawStatus;
use serde_json::{json, Map, Value};

use crate::crypto::{self, ClientKey};
use crate::error::{FrameError, ResponseError};
use crate::message::{option_number, CoapMessage, Code, MessageType};

pub const SYNC_PATH: &str = "/sys/dev/sync";
pub const STATUS_PATH: &str = "/sys/dev/status";
pub const CONTROL_PATH: &str = "/sys/dev/control";

/// Decoded answer to a status request
#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    /// Counter the device encrypted the frame with
    pub device_key: ClientKey,
    pub raw: RawStatus,
    /// Device push interval in seconds
    pub max_age: u32,
}

/// Result of a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Success,
    /// The device refused the frame; its session counter no longer matches
    Failed,
}

/// Key exchange request carrying the client nonce
pub fn sync_request(message_id: u16, token: &[u8], nonce: u32) -> CoapMessage {
    CoapMessage::new(MessageType::NonConfirmable, Code::POST, message_id)
        .with_token(token)
        .with_uri_path(SYNC_PATH)
        .with_payload(format!("{:08X}", nonce))
}

pub fn status_request(message_id: u16, token: &[u8]) -> CoapMessage {
    CoapMessage::new(MessageType::NonConfirmable, Code::GET, message_id)
        .with_token(token)
        .with_uint_option(option_number::OBSERVE, 0)
        .with_uri_path(STATUS_PATH)
}

/// Encrypted command request; `key` must already be advanced
pub fn control_request(
    message_id: u16,
    token: &[u8],
    key: ClientKey,
    patch: &RawStatus,
) -> CoapMessage {
    let plaintext = control_envelope(patch).to_string();
    CoapMessage::new(MessageType::Confirmable, Code::POST, message_id)
        .with_token(token)
        .with_uri_path(CONTROL_PATH)
        .with_payload(crypto::encrypt(key, &plaintext))
}

/// `{"state":{"desired":{...}}}` with the bookkeeping fields the firmware expects
pub fn control_envelope(patch: &RawStatus) -> Value {
    let mut desired = Map::new();
    desired.insert("CommandType".to_string(), json!("app"));
    desired.insert("DeviceId".to_string(), json!(""));
    desired.insert("EnduserId".to_string(), json!(""));
    for (key, value) in patch {
        desired.insert(key.clone(), value.clone());
    }
    json!({ "state": { "desired": desired } })
}

fn check_code(response: &CoapMessage) -> Result<(), ResponseError> {
    if response.code.is_error() {
        return Err(ResponseError::Rejected(response.code));
    }
    Ok(())
}

fn payload_text(response: &CoapMessage) -> Result<&str, ResponseError> {
    std::str::from_utf8(&response.payload)
        .map_err(|_| FrameError::malformed("payload is not UTF-8").into())
}

/// The device counter from a sync response
pub fn decode_sync_response(response: &CoapMessage) -> Result<ClientKey, ResponseError> {
    check_code(response)?;
    let text = payload_text(response)?.trim();
    if text.starts_with('{') {
        return Err(ResponseError::UnexpectedPayload(
            "plaintext JSON instead of a key counter".to_string(),
        ));
    }
    ClientKey::from_hex(text).map_err(|e| ResponseError::UnexpectedPayload(e.to_string()))
}

/// Decrypt a status response and unwrap `state.reported`
pub fn decode_status_response(response: &CoapMessage) -> Result<StatusResponse, ResponseError> {
    check_code(response)?;
    let (device_key, plaintext) = crypto::decrypt(payload_text(response)?)?;

    let document: Value = serde_json::from_str(&plaintext)
        .map_err(|e| FrameError::malformed(format!("status is not JSON: {}", e)))?;
    let reported = document
        .get("state")
        .and_then(|state| state.get("reported"))
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ResponseError::UnexpectedPayload("status without state.reported".to_string())
        })?;

    Ok(StatusResponse {
        device_key,
        raw: reported
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        max_age: response.max_age(),
    })
}

pub fn decode_control_response(response: &CoapMessage) -> Result<ControlOutcome, ResponseError> {
    check_code(response)?;
    let document: Value = serde_json::from_str(payload_text(response)?)
        .map_err(|e| FrameError::malformed(format!("control reply is not JSON: {}", e)))?;

    match document.get("status").and_then(Value::as_str) {
        Some("success") => Ok(ControlOutcome::Success),
        Some(_) => Ok(ControlOutcome::Failed),
        None => Err(ResponseError::UnexpectedPayload(
            "control reply without status".to_string(),
        )),
    }
}
