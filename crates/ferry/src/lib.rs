//! Ferry Client - relay client library with self-update
//!
//! This crate provides the client side of the ferry relay:
//! - `client` - Connection loop with automatic reconnect, command channel,
//!   and event stream for the interactive front end
//! - `input` - Console line parsing: slash commands and chat
//! - `update` - Self-update pipeline: artifact download with progress,
//!   atomic binary swap, and respawn of the replaced executable
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`; fallible operations return
//! `Result` or `Option`, and channel/lock failures are handled gracefully.

pub mod client;
pub mod input;
pub mod update;

pub use client::{ClientCommand, ClientConfig, ClientEvent, RelayClient};
pub use update::{UpdateError, UpdateEvent, UpdateOrchestrator, UpdateState};
