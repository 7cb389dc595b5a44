//! CoAP message framing (RFC 7252 subset used by the device firmware)

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, FrameResult};

const COAP_VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;
const MAX_TOKEN_LENGTH: usize = 8;

/// CoAP option numbers
pub mod option_number {
    pub const OBSERVE: u16 = 6;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
}

/// Max-Age assumed when a response carries no Max-Age option (seconds)
pub const DEFAULT_MAX_AGE: u32 = 60;

/// CoAP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// CoAP request method or response code (`class << 5 | detail`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const CHANGED: Code = Code(0x44);
    pub const CONTENT: Code = Code(0x45);
    pub const BAD_REQUEST: Code = Code(0x80);
    pub const UNAUTHORIZED: Code = Code(0x81);
    pub const FORBIDDEN: Code = Code(0x83);
    pub const NOT_FOUND: Code = Code(0x84);
    pub const INTERNAL_SERVER_ERROR: Code = Code(0xA0);

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// Client (4.xx) or server (5.xx) error response
    pub fn is_error(self) -> bool {
        matches!(self.class(), 4 | 5)
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// A single CoAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    /// Options as (number, value); kept sorted by number on encode
    pub options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl CoapMessage {
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: &[u8]) -> Self {
        self.token = token.to_vec();
        self
    }

    /// Append one Uri-Path option per non-empty path segment
    pub fn with_uri_path(mut self, path: &str) -> Self {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options
                .push((option_number::URI_PATH, segment.as_bytes().to_vec()));
        }
        self
    }

    pub fn with_uint_option(mut self, number: u16, value: u32) -> Self {
        self.options.push((number, encode_uint(value)));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// First value of an option
    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    /// Uri-Path segments joined as "/a/b/c"
    pub fn uri_path(&self) -> String {
        self.options
            .iter()
            .filter(|(n, _)| *n == option_number::URI_PATH)
            .map(|(_, v)| format!("/{}", String::from_utf8_lossy(v)))
            .collect()
    }

    /// Max-Age in seconds, defaulting to 60 when absent
    pub fn max_age(&self) -> u32 {
        self.option(option_number::MAX_AGE)
            .map(decode_uint)
            .unwrap_or(DEFAULT_MAX_AGE)
    }

    pub fn observe(&self) -> Option<u32> {
        self.option(option_number::OBSERVE).map(decode_uint)
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let token_len = self.token.len().min(MAX_TOKEN_LENGTH);
        let mut buf = BytesMut::with_capacity(4 + token_len + self.payload.len() + 32);

        buf.put_u8((COAP_VERSION << 6) | (self.message_type.bits() << 4) | token_len as u8);
        buf.put_u8(self.code.0);
        buf.put_u16(self.message_id);
        buf.put_slice(&self.token[..token_len]);

        let mut options: Vec<&(u16, Vec<u8>)> = self.options.iter().collect();
        options.sort_by_key(|(number, _)| *number);

        let mut last_number = 0u16;
        for (number, value) in options {
            let (delta_nibble, delta_ext) = option_nibble(number - last_number);
            let (len_nibble, len_ext) = option_nibble(value.len() as u16);
            buf.put_u8((delta_nibble << 4) | len_nibble);
            put_extension(&mut buf, delta_ext);
            put_extension(&mut buf, len_ext);
            buf.put_slice(value);
            last_number = *number;
        }

        if !self.payload.is_empty() {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(&self.payload);
        }

        buf.to_vec()
    }

    /// Parse wire bytes
    pub fn decode(data: &[u8]) -> FrameResult<Self> {
        if data.first() == Some(&b'{') {
            return Err(FrameError::UnsupportedVersion(
                "plaintext JSON datagram".to_string(),
            ));
        }
        if data.len() < 4 {
            return Err(FrameError::malformed(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(FrameError::UnsupportedVersion(format!(
                "CoAP version {}",
                version
            )));
        }

        let token_len = (data[0] & 0x0F) as usize;
        if token_len > MAX_TOKEN_LENGTH {
            return Err(FrameError::malformed(format!(
                "token length {} exceeds 8",
                token_len
            )));
        }

        let message_type = MessageType::from_bits(data[0] >> 4);
        let code = Code(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);
        let token = take(data, 4, token_len, "token")?.to_vec();

        let mut pos = 4 + token_len;
        let mut options = Vec::new();
        let mut payload = Vec::new();
        let mut last_number = 0u16;

        while pos < data.len() {
            let byte = data[pos];
            pos += 1;

            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(FrameError::malformed("payload marker without payload"));
                }
                payload = data[pos..].to_vec();
                break;
            }

            let delta = read_extension(data, &mut pos, byte >> 4)?;
            let length = read_extension(data, &mut pos, byte & 0x0F)? as usize;

            let number = last_number
                .checked_add(delta)
                .ok_or_else(|| FrameError::malformed("option number overflow"))?;
            let value = take(data, pos, length, "option value")?.to_vec();
            pos += length;

            options.push((number, value));
            last_number = number;
        }

        Ok(Self {
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

fn take<'a>(data: &'a [u8], start: usize, len: usize, what: &str) -> FrameResult<&'a [u8]> {
    data.get(start..start + len)
        .ok_or_else(|| FrameError::malformed(format!("truncated {}", what)))
}

fn option_nibble(value: u16) -> (u8, Option<Extension>) {
    match value {
        0..=12 => (value as u8, None),
        13..=268 => (13, Some(Extension::One((value - 13) as u8))),
        _ => (14, Some(Extension::Two(value - 269))),
    }
}

enum Extension {
    One(u8),
    Two(u16),
}

fn put_extension(buf: &mut BytesMut, ext: Option<Extension>) {
    match ext {
        Some(Extension::One(v)) => buf.put_u8(v),
        Some(Extension::Two(v)) => buf.put_u16(v),
        None => {}
    }
}

fn read_extension(data: &[u8], pos: &mut usize, nibble: u8) -> FrameResult<u16> {
    match nibble {
        0..=12 => Ok(u16::from(nibble)),
        13 => {
            let ext = take(data, *pos, 1, "option extension")?;
            *pos += 1;
            Ok(u16::from(ext[0]) + 13)
        }
        14 => {
            let ext = take(data, *pos, 2, "option extension")?;
            *pos += 2;
            u16::from_be_bytes([ext[0], ext[1]])
                .checked_add(269)
                .ok_or_else(|| FrameError::malformed("option extension overflow"))
        }
        _ => Err(FrameError::malformed("reserved option nibble 15")),
    }
}

/// Minimal big-endian encoding of an unsigned option value
fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn decode_uint(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}
