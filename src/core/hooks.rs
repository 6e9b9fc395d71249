//! Hook traits for extensibility
//!
//! The engine authenticates and classifies connections; everything that
//! happens to a classified connection (outbound relay, multiplex transport,
//! the disguise web server behind the fallback path) is injected through the
//! traits defined here.

use async_trait::async_trait;
use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use super::packet::PacketStream;
use super::protocol::{Address, Command};

/// Unified transport stream trait combining AsyncRead + AsyncWrite + Send + Unpin
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Unified transport stream type handed to downstream handlers
pub type TransportStream = Pin<Box<dyn AsyncStream>>;

/// Callback invoked exactly once when a session ends, regardless of which
/// side closed it or whether it closed with an error. `FnOnce` makes a second
/// invocation unrepresentable; handlers own the single call.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identity attached to authenticated sessions.
///
/// The engine is generic over the identity type so richer types than a plain
/// string can be plugged in without touching the handshake. The remote
/// authentication service issues identities as strings, so the type must
/// offer a fallible conversion from one; a conversion failure is treated as
/// an authentication failure.
pub trait UserIdent: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn from_remote(id: &str) -> Option<Self>;
}

impl UserIdent for String {
    fn from_remote(id: &str) -> Option<Self> {
        Some(id.to_string())
    }
}

/// Numeric user ids, as issued by panel-style control planes.
impl UserIdent for i64 {
    fn from_remote(id: &str) -> Option<Self> {
        id.parse().ok()
    }
}

/// Per-connection metadata resolved during the handshake.
///
/// Built once at dispatch time and never mutated afterwards; downstream
/// handlers (and the stats layer above them) read it, they do not write it.
#[derive(Debug, Clone)]
pub struct SessionMeta<U> {
    /// Resolved user identity; `None` only on the fallback path.
    pub user: Option<U>,
    /// Client peer address.
    pub source: SocketAddr,
    /// Requested destination; unset on the fallback path.
    pub destination: Option<Address>,
    /// Requested command; unset on the fallback path.
    pub command: Option<Command>,
}

impl<U> SessionMeta<U> {
    pub(crate) fn authenticated(
        user: U,
        source: SocketAddr,
        destination: Address,
        command: Command,
    ) -> Self {
        Self {
            user: Some(user),
            source,
            destination: Some(destination),
            command: Some(command),
        }
    }

    pub(crate) fn unauthenticated(source: SocketAddr) -> Self {
        Self {
            user: None,
            source,
            destination: None,
            command: None,
        }
    }
}

/// Downstream handler capability set consumed by the command dispatcher.
#[async_trait]
pub trait InboundHandler<U: UserIdent>: Send + Sync {
    /// Handle a TCP relay session.
    async fn handle_tcp(&self, meta: SessionMeta<U>, stream: TransportStream, on_close: CloseCallback);

    /// Handle a packet-oriented (UDP-over-TCP) session.
    async fn handle_packet(
        &self,
        meta: SessionMeta<U>,
        packets: PacketStream<TransportStream>,
        on_close: CloseCallback,
    );

    /// Hand a raw connection to the multiplex sub-protocol layer. The
    /// destination in `meta` is unused for this mode.
    async fn handle_mux(&self, meta: SessionMeta<U>, stream: TransportStream, on_close: CloseCallback);
}

/// Handler for rejected connections, e.g. a plain web server that makes the
/// endpoint look like an ordinary TLS service to unauthenticated probes.
#[async_trait]
pub trait FallbackHandler<U: UserIdent>: Send + Sync {
    /// Same shape as a TCP session, with no destination and no user. The
    /// stream replays every byte the engine consumed before rejecting.
    async fn handle_fallback(
        &self,
        meta: SessionMeta<U>,
        stream: TransportStream,
        on_close: CloseCallback,
    );
}
