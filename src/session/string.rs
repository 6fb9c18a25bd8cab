//! Portable string session handling.

use std::net::Ipv4Addr;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use thiserror::Error;
use tracing::{debug, warn};

/// Version character of the current string session encoding.
pub const CURRENT_VERSION: char = '1';

/// Exact length of a current-version token.
pub const EXPECTED_LENGTH: usize = 353;

/// Decoded payload: `dc_id:u8 | ipv4:[u8;4] | port:u16 | auth_key:[u8;256]`.
const PAYLOAD_LENGTH: usize = 1 + 4 + 2 + 256;

/// Errors raised while validating or persisting a string session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("STRING_SESSION empty. Please fill it in! Quitting...")]
    Missing,

    #[error("STRING_SESSION wrong ({0} chars). Copy paste correctly! Quitting...")]
    WrongLength(usize),

    #[error("STRING_SESSION could not be decoded: {0}")]
    Malformed(String),

    #[error("Data center address {0} is not an IPv4 address")]
    UnsupportedAddress(String),

    #[error("Failed to write session: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Connection details carried by a current-version token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionData {
    pub dc_id: i32,
    pub server_address: Ipv4Addr,
    pub port: u16,
    pub auth_key: [u8; 256],
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("dc_id", &self.dc_id)
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// A validated string session.
///
/// Tokens of the current version are decoded on load; tokens of any other
/// version are kept verbatim and left to the transport to interpret.
#[derive(Clone)]
pub struct StringSession {
    raw: String,
    data: Option<SessionData>,
}

impl StringSession {
    /// Validates a configured token before any network activity.
    ///
    /// # Errors
    ///
    /// Fails when the token is absent, or when it claims the current version
    /// but has the wrong length or an undecodable body.
    pub fn load(token: Option<&str>) -> Result<Self, SessionError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(SessionError::Missing)?;

        if !token.starts_with(CURRENT_VERSION) {
            debug!("String session has a foreign version prefix, passing through");
            return Ok(Self {
                raw: token.to_owned(),
                data: None,
            });
        }

        if token.len() != EXPECTED_LENGTH {
            return Err(SessionError::WrongLength(token.len()));
        }

        let data = decode_payload(&token[CURRENT_VERSION.len_utf8()..])?;
        Ok(Self {
            raw: token.to_owned(),
            data: Some(data),
        })
    }

    /// Picks the session to start with.
    ///
    /// A token previously written by [`StringSession::save`] to `saved` wins,
    /// so data center repairs survive restarts. An absent or unusable saved
    /// file falls back to the configured token.
    ///
    /// # Errors
    ///
    /// Fails like [`StringSession::load`] on the configured token.
    pub fn resolve(saved: impl AsRef<Path>, configured: Option<&str>) -> Result<Self, SessionError> {
        let saved = saved.as_ref();
        match std::fs::read_to_string(saved) {
            Ok(token) => match Self::load(Some(&token)) {
                Ok(session) => {
                    debug!("Using saved string session from {}", saved.display());
                    return Ok(session);
                }
                Err(e) => warn!("Ignoring saved session {}: {}", saved.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not read saved session {}: {}", saved.display(), e),
        }
        Self::load(configured)
    }

    /// Builds a current-version session from its parts.
    #[must_use]
    pub fn from_data(data: SessionData) -> Self {
        let raw = encode_payload(&data);
        Self {
            raw,
            data: Some(data),
        }
    }

    /// Decoded connection details, if this is a current-version token.
    #[must_use]
    pub fn data(&self) -> Option<&SessionData> {
        self.data.as_ref()
    }

    /// The data center the session points at.
    #[must_use]
    pub fn dc_id(&self) -> Option<i32> {
        self.data.as_ref().map(|d| d.dc_id)
    }

    /// The server address the session connects through.
    #[must_use]
    pub fn server_address(&self) -> Option<String> {
        self.data.as_ref().map(|d| d.server_address.to_string())
    }

    /// Repoints the session at another data center.
    ///
    /// # Errors
    ///
    /// Fails if `ip` is not an IPv4 address.
    pub fn set_dc(&mut self, dc_id: i32, ip: &str, port: u16) -> Result<(), SessionError> {
        let address: Ipv4Addr = ip
            .parse()
            .map_err(|_| SessionError::UnsupportedAddress(ip.to_owned()))?;

        if let Some(data) = self.data.as_mut() {
            data.dc_id = dc_id;
            data.server_address = address;
            data.port = port;
            self.raw = encode_payload(data);
        }
        Ok(())
    }

    /// Serializes the session back to its string form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.raw.clone()
    }

    /// Writes the encoded session to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        std::fs::write(path, self.encode())?;
        Ok(())
    }
}

impl std::fmt::Debug for StringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringSession")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

fn decode_payload(body: &str) -> Result<SessionData, SessionError> {
    let bytes = URL_SAFE
        .decode(body)
        .map_err(|e| SessionError::Malformed(e.to_string()))?;

    if bytes.len() != PAYLOAD_LENGTH {
        return Err(SessionError::Malformed(format!(
            "expected {PAYLOAD_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }

    let mut auth_key = [0u8; 256];
    auth_key.copy_from_slice(&bytes[7..]);

    Ok(SessionData {
        dc_id: i32::from(bytes[0]),
        server_address: Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]),
        port: u16::from_be_bytes([bytes[5], bytes[6]]),
        auth_key,
    })
}

fn encode_payload(data: &SessionData) -> String {
    let mut bytes = Vec::with_capacity(PAYLOAD_LENGTH);
    // DC ids are single digits; the format reserves one byte.
    bytes.push(u8::try_from(data.dc_id).unwrap_or_default());
    bytes.extend_from_slice(&data.server_address.octets());
    bytes.extend_from_slice(&data.port.to_be_bytes());
    bytes.extend_from_slice(&data.auth_key);

    let mut out = String::with_capacity(EXPECTED_LENGTH);
    out.push(CURRENT_VERSION);
    out.push_str(&URL_SAFE.encode(bytes));
    out
}
