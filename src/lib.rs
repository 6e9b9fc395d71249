//! Inbound protocol engine for a Trojan-style tunneling server.
//!
//! The engine terminates a connection handed over by the transport layer
//! (TLS termination, listener and accept loop all live outside this crate),
//! authenticates it from the 56-byte credential sent first on the wire, and
//! dispatches it to a TCP, UDP-over-TCP or multiplex handler. Connections
//! that fail authentication are replayed into a fallback handler so the
//! endpoint stays indistinguishable from an ordinary TLS service.
//!
//! Architecture:
//! - `core/`: wire protocol, handshake state machine, dispatch, fallback
//! - `auth/`: credential table and remote authentication client
//! - `utils`: credential key derivation
//! - `logger`: tracing setup and structured event helpers

pub mod auth;
pub mod core;
pub mod error;
pub mod logger;
pub mod utils;

pub use crate::auth::{RemoteAuthenticator, Snapshot, StoreError, UserStore, AUTH_TIMEOUT};
pub use crate::core::{
    Address, AsyncStream, CloseCallback, Command, CredentialKey, DecodeResult, FallbackHandler,
    InboundHandler, PacketStream, ReplayStream, Service, ServiceBuilder, SessionMeta,
    TransportStream, UdpFrame, UserIdent, FRONT_HEADROOM, KEY_LENGTH,
};
pub use crate::error::{Error, Result};
pub use crate::utils::derive_key;
