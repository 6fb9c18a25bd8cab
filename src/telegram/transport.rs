//! Boundary between the userbot core and the Telegram connection.

use async_trait::async_trait;
use thiserror::Error;

use crate::plugins::{Dispatcher, RebootRequest};

/// Errors surfaced by a transport, classified by how the caller reacts.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("API_ID/API_HASH rejected: {0}")]
    ApiIdInvalid(String),

    #[error("Authorization key is in use elsewhere: {0}")]
    AuthKeyDuplicated(String),

    #[error("Phone number is invalid: {0}")]
    PhoneInvalid(String),

    #[error("Unexpected end of input during login")]
    UnexpectedEof,

    #[error("Session could not be used: {0}")]
    MalformedSession(String),

    #[error("Bot token expired or invalid: {0}")]
    BotTokenInvalid(String),

    #[error("Transport buffer corrupted: {0}")]
    CorruptBuffer(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Maps a raw protocol error message onto an error class.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let upper = message.to_uppercase();
        let owned = message.to_owned();

        if upper.contains("API_ID_INVALID") || upper.contains("API_ID_PUBLISHED_FLOOD") {
            Self::ApiIdInvalid(owned)
        } else if upper.contains("AUTH_KEY_DUPLICATED") {
            Self::AuthKeyDuplicated(owned)
        } else if upper.contains("PHONE_NUMBER_INVALID") {
            Self::PhoneInvalid(owned)
        } else if upper.contains("ACCESS_TOKEN_EXPIRED") || upper.contains("ACCESS_TOKEN_INVALID") {
            Self::BotTokenInvalid(owned)
        } else if upper.contains("BAD STATUS") || upper.contains("INVALID BUFFER") {
            Self::CorruptBuffer(owned)
        } else {
            Self::Other(owned)
        }
    }

    /// Whether only a fresh process can recover from this error.
    #[must_use]
    pub const fn requires_restart(&self) -> bool {
        matches!(self, Self::CorruptBuffer(_))
    }
}

/// How the client proves who it is.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sign in as a bot.
    BotToken(String),
    /// Use the stored session, falling back to an interactive login.
    Session,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BotToken(_) => f.write_str("BotToken(..)"),
            Self::Session => f.write_str("Session"),
        }
    }
}

/// One entry of the server's data center topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcOption {
    pub id: i32,
    pub ip_address: String,
    pub port: u16,
}

/// Where the local session currently points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDc {
    pub dc_id: Option<i32>,
    pub server_address: Option<String>,
}

/// The raw account record returned by the server, phone included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Why the event loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// The connection was closed.
    Disconnected,
    /// A handler asked for a full process restart.
    Reboot(RebootRequest),
}

/// The authenticated connection used by the bootstrap and the event loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects and signs in.
    async fn start(&self, credential: &Credential) -> Result<(), TransportError>;

    /// Whether the signed-in account is a bot.
    async fn is_bot(&self) -> Result<bool, TransportError>;

    /// Fetches the signed-in account.
    async fn get_me(&self) -> Result<Account, TransportError>;

    /// Queries the server's data center topology.
    async fn dc_options(&self) -> Result<Vec<DcOption>, TransportError>;

    /// Current data center of the local session.
    fn session_dc(&self) -> SessionDc;

    /// Repoints the local session at another data center.
    fn set_dc(&self, dc_id: i32, ip: &str, port: u16) -> Result<(), TransportError>;

    /// Persists the local session.
    async fn save(&self) -> Result<(), TransportError>;

    /// Feeds incoming messages to `dispatcher` until the connection ends.
    async fn run_until_disconnected(&self, dispatcher: &Dispatcher) -> Result<Shutdown, TransportError>;

    /// Closes the connection.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rpc_errors() {
        assert!(matches!(
            TransportError::classify("request error: rpc error 400: API_ID_INVALID"),
            TransportError::ApiIdInvalid(_)
        ));
        assert!(matches!(
            TransportError::classify("rpc error 406: AUTH_KEY_DUPLICATED"),
            TransportError::AuthKeyDuplicated(_)
        ));
        assert!(matches!(
            TransportError::classify("rpc error 400: PHONE_NUMBER_INVALID"),
            TransportError::PhoneInvalid(_)
        ));
        assert!(matches!(
            TransportError::classify("rpc error 401: ACCESS_TOKEN_EXPIRED"),
            TransportError::BotTokenInvalid(_)
        ));
        assert!(matches!(
            TransportError::classify("timeout"),
            TransportError::Other(_)
        ));
    }

    #[test]
    fn test_corrupt_buffer_requires_restart() {
        let err = TransportError::classify("transport error: bad status 404");
        assert!(err.requires_restart());
        assert!(!TransportError::UnexpectedEof.requires_restart());
    }

    #[test]
    fn test_credential_debug_hides_token() {
        let shown = format!("{:?}", Credential::BotToken("123:secret".to_owned()));
        assert!(!shown.contains("secret"));
    }
}
