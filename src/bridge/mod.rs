pub mod api;
pub mod config;
pub mod imap;
pub mod logging;
pub mod mailbox;
pub mod server;
pub mod uid_store;

pub use server::{run_imap_listener, BridgeContext};
pub use uid_store::UidStore;
