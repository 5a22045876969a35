//! Protocol engines
//!
//! Two wire styles cover the supported families: a half-duplex
//! request/response packet exchange ([`packet`]) and a break-triggered wake
//! burst ([`handshake`]). Both sit directly on a [`crate::transport::Transport`]
//! and share the validation rules that turn raw bytes into checked answers.

pub mod handshake;
pub mod packet;

pub use handshake::{wake, HandshakeInfo, HANDSHAKE_SIZE};
pub use packet::{build_command, validate_response, HalfDuplexEngine, PACKET_OVERHEAD};
