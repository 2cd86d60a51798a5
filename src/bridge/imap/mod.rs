//! IMAP server implementation (RFC 3501 subset)
//!
//! Supports the IMAP4rev1 commands a desktop client needs to read mail:
//! - CAPABILITY, NOOP, LOGOUT, ID, NAMESPACE
//! - LOGIN (password is the backend API token)
//! - LIST, LSUB, STATUS, SELECT, EXAMINE, CLOSE
//! - FETCH, STORE, SEARCH and their UID variants
//! - IDLE, CHECK, EXPUNGE (acknowledged only)
pub mod command;
pub mod framer;
pub mod response;
mod session;

pub use session::{ImapSession, ImapState, SessionError};
