//! Device identity

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RawStatus;

/// Default CoAP UDP port
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Raw keys carrying the model id, oldest firmware vocabulary first
const MODEL_KEYS: &[&str] = &["modelid", "D01-05", "D01S05"];
const NAME_KEYS: &[&str] = &["name", "D01-03", "D01S03"];
const PRODUCT_ID_KEYS: &[&str] = &["ProductId"];
const DEVICE_ID_KEYS: &[&str] = &["DeviceId"];
const SW_VERSION_KEYS: &[&str] = &["swversion", "D01-21", "D01S12"];
const WIFI_VERSION_KEYS: &[&str] = &["WifiVersion"];

/// Bookkeeping keys echoed by the firmware that carry no device state
const BOOKKEEPING_KEYS: &[&str] = &["CommandType", "EnduserId", "StatusType", "ConnectType"];

/// Returns true for raw keys consumed into [`DeviceIdentity`] or ignored as
/// protocol bookkeeping, rather than decoded as capabilities.
pub fn is_identity_key(key: &str) -> bool {
    [
        MODEL_KEYS,
        NAME_KEYS,
        PRODUCT_ID_KEYS,
        DEVICE_ID_KEYS,
        SW_VERSION_KEYS,
        WIFI_VERSION_KEYS,
        BOOKKEEPING_KEYS,
    ]
    .iter()
    .any(|keys| keys.contains(&key))
}

/// Who a device is and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hostname or IP address
    pub host: String,
    /// CoAP UDP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Model id (e.g. "AC2729/10"); empty until discovered
    #[serde(default)]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_version: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_COAP_PORT
}

impl DeviceIdentity {
    /// Identity for a host whose model is not known yet
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_COAP_PORT,
            model_id: String::new(),
            name: None,
            product_id: None,
            device_id: None,
            sw_version: None,
            wifi_version: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// "host:port" socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fill identity fields from a reported raw status.
    ///
    /// Returns the previous model id when the reported model differs from a
    /// non-empty known one.
    pub fn merge_reported(&mut self, raw: &RawStatus) -> Option<String> {
        let mut previous_model = None;

        if let Some(model) = first_text(raw, MODEL_KEYS) {
            if self.model_id != model {
                if !self.model_id.is_empty() {
                    previous_model = Some(std::mem::take(&mut self.model_id));
                }
                self.model_id = model;
            }
        }

        merge_field(&mut self.name, raw, NAME_KEYS);
        merge_field(&mut self.product_id, raw, PRODUCT_ID_KEYS);
        merge_field(&mut self.device_id, raw, DEVICE_ID_KEYS);
        merge_field(&mut self.sw_version, raw, SW_VERSION_KEYS);
        merge_field(&mut self.wifi_version, raw, WIFI_VERSION_KEYS);

        previous_model
    }
}

fn merge_field(field: &mut Option<String>, raw: &RawStatus, keys: &[&str]) {
    if let Some(value) = first_text(raw, keys) {
        *field = Some(value);
    }
}

fn first_text(raw: &RawStatus, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
