//! Payload cipher
//!
//! Every encrypted payload is framed as `counter ‖ ciphertext ‖ digest`, all
//! uppercase hex:
//!
//! - `counter`: the 8-character client key the sender used for this frame
//! - `ciphertext`: AES-128-CBC/PKCS#7 over the UTF-8 JSON plaintext, keyed by
//!   `MD5("JiangPan" ‖ counter)` rendered as 32 hex characters, whose first
//!   16 characters are the key and last 16 the IV (as ASCII bytes)
//! - `digest`: SHA-256 over `counter ‖ ciphertext` (hex text), 64 characters

use std::fmt;

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use sha2::Sha256;

use crate::error::{FrameError, FrameResult};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const SECRET_PREFIX: &str = "JiangPan";
const COUNTER_LEN: usize = 8;
const DIGEST_LEN: usize = 64;
const BLOCK_HEX_LEN: usize = 32;

/// Session counter shared with the device
///
/// Incremented (wrapping) before each encryption; rendered as 8 uppercase
/// hex characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(pub u32);

impl ClientKey {
    /// Parse the 8-hex-character form sent by the device
    pub fn from_hex(text: &str) -> FrameResult<Self> {
        let text = text.trim();
        if text.len() != COUNTER_LEN || !text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FrameError::malformed(format!(
                "expected 8 hex characters, got {:?}",
                text
            )));
        }
        u32::from_str_radix(text, 16)
            .map(ClientKey)
            .map_err(|e| FrameError::malformed(e.to_string()))
    }

    /// The following counter value, wrapping at 2^32
    pub fn next(self) -> Self {
        ClientKey(self.0.wrapping_add(1))
    }

    pub fn to_hex(self) -> String {
        format!("{:08X}", self.0)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// `MD5("JiangPan" ‖ counter)` as 32 uppercase hex characters
pub fn key_and_iv(counter: ClientKey) -> String {
    let mut hasher = Md5::new();
    hasher.update(SECRET_PREFIX.as_bytes());
    hasher.update(counter.to_hex().as_bytes());
    hex::encode_upper(hasher.finalize())
}

fn cipher_material(counter: ClientKey) -> ([u8; 16], [u8; 16]) {
    let material = key_and_iv(counter);
    let bytes = material.as_bytes();
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&bytes[..16]);
    iv.copy_from_slice(&bytes[16..32]);
    (key, iv)
}

fn digest(counter_hex: &str, ciphertext_hex: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(counter_hex.as_bytes());
    hasher.update(ciphertext_hex.as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// Encrypt `plaintext` under `counter`
///
/// The caller is responsible for advancing the counter first.
pub fn encrypt(counter: ClientKey, plaintext: &str) -> String {
    let (key, iv) = cipher_material(counter);
    let ciphertext = Aes128CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let counter_hex = counter.to_hex();
    let ciphertext_hex = hex::encode_upper(ciphertext);
    let digest_hex = digest(&counter_hex, &ciphertext_hex);

    format!("{}{}{}", counter_hex, ciphertext_hex, digest_hex)
}

/// Verify and decrypt a frame, returning the sender's counter and plaintext
pub fn decrypt(frame: &str) -> FrameResult<(ClientKey, String)> {
    let frame = frame.trim();
    if frame.starts_with('{') {
        return Err(FrameError::UnsupportedVersion(
            "device answered with plaintext JSON".to_string(),
        ));
    }
    if !frame.is_ascii() {
        return Err(FrameError::malformed("frame contains non-ASCII text"));
    }
    if frame.len() < COUNTER_LEN + BLOCK_HEX_LEN + DIGEST_LEN {
        return Err(FrameError::malformed(format!(
            "frame too short: {} characters",
            frame.len()
        )));
    }

    let (counter_hex, rest) = frame.split_at(COUNTER_LEN);
    let (ciphertext_hex, digest_hex) = rest.split_at(rest.len() - DIGEST_LEN);

    if ciphertext_hex.len() % BLOCK_HEX_LEN != 0 {
        return Err(FrameError::malformed(format!(
            "ciphertext length {} is not a whole number of blocks",
            ciphertext_hex.len()
        )));
    }

    let counter = ClientKey::from_hex(counter_hex)?;
    let ciphertext =
        hex::decode(ciphertext_hex).map_err(|e| FrameError::malformed(e.to_string()))?;
    if !digest_hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FrameError::malformed("digest is not hex"));
    }

    let expected = digest(&counter_hex.to_ascii_uppercase(), &ciphertext_hex.to_ascii_uppercase());
    if !expected.eq_ignore_ascii_case(digest_hex) {
        return Err(FrameError::IntegrityMismatch);
    }

    let (key, iv) = cipher_material(counter);
    let plaintext = Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| FrameError::malformed("invalid padding"))?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| FrameError::malformed("plaintext is not UTF-8"))?;
    Ok((counter, text))
}
