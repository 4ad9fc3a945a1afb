//! Ferry Daemon - Multi-client relay server
//!
//! This crate provides the server side of the ferry relay:
//! - `server` - TCP accept loop and per-session protocol engine
//! - `registry` - Broadcast registry tracking live session writers
//! - `handler` - Request handling (version negotiation, file relay, echo)
//! - `storage` - Staged upload storage
//! - `logsink` - Chat / upload record sink (JSONL file or tracing-only)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ferryd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │────▶│     BroadcastRegistry       │   │
//! │  │  (TCP listener) │     │  (live session writers)     │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ fan-out           │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ SessionHandler  │────▶│       RelayHandler          │   │
//! │  │  (per client)   │     │ (negotiate / store / echo)  │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`; fallible operations return
//! `Result` or `Option`, and channel/lock failures are handled gracefully.

pub mod handler;
pub mod logsink;
pub mod registry;
pub mod server;
pub mod storage;
