//! String session validation and persistence.
//!
//! The configured session token is checked for shape before any
//! network activity; a malformed token is a fatal startup error.

mod string;

pub use string::{CURRENT_VERSION, EXPECTED_LENGTH, SessionData, SessionError, StringSession};
