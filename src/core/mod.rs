//! Core protocol engine
//!
//! - Wire protocol parsing (header, addresses, UDP frames)
//! - Handshake state machine and command dispatch
//! - Fallback byte-replay path
//! - Hook traits for downstream handlers

mod engine;
mod fallback;
pub mod hooks;
pub mod packet;
mod protocol;

pub use engine::{Service, ServiceBuilder};
pub use fallback::ReplayStream;
pub use hooks::{
    AsyncStream, CloseCallback, FallbackHandler, InboundHandler, SessionMeta, TransportStream,
    UserIdent,
};
pub use packet::{PacketStream, UdpFrame, FRONT_HEADROOM};
pub use protocol::{Address, Command, CredentialKey, DecodeResult, KEY_LENGTH, MAX_ADDRESS_LEN};
