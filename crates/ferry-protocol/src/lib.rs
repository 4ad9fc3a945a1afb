//! Ferry Protocol - wire protocol for the ferry relay
//!
//! This crate provides the line-framed sub-protocol shared by the ferryd
//! server and the ferry client: payload encoding, request/response framing,
//! push classification, session lifecycle states, and release version
//! negotiation. It performs no I/O.

pub mod codec;
pub mod frame;
pub mod session;
pub mod version;

pub use codec::{decode, encode, DecodeError};
pub use frame::{
    parse_push, parse_request, render_request, render_response, FrameError, Push, Request,
    Response,
};
pub use session::SessionState;
pub use version::{needs_update, VersionError, VersionTag};
