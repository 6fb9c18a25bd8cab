//! Telegram connection module.
//!
//! Defines the transport boundary the bootstrap and event loop talk to,
//! the identity snapshot, and the `grammers` implementation.

mod client;
mod identity;
mod login;
mod transport;

pub use client::{GrammersTransport, TransportPolicy};
pub use identity::{Identity, display_name};
pub use transport::{
    Account, Credential, DcOption, SessionDc, Shutdown, Transport, TransportError,
};
