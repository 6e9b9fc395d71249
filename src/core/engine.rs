//! Handshake engine and command dispatcher
//!
//! One `Service` instance terminates every inbound connection of a listener:
//! it reads the fixed-format request header, resolves the user identity
//! (local credential table, or the remote authentication service when one is
//! configured), and hands the connection to the registered handler for its
//! payload mode. A connection presenting an unknown credential is replayed
//! into the fallback handler instead of being closed, so probes cannot tell
//! the proxy apart from an ordinary TLS service.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use super::fallback::ReplayStream;
use super::hooks::{
    AsyncStream, CloseCallback, FallbackHandler, InboundHandler, SessionMeta, TransportStream,
    UserIdent,
};
use super::packet::PacketStream;
use super::protocol::{Address, Command, CredentialKey, KEY_LENGTH};
use crate::auth::{RemoteAuthenticator, StoreError, UserStore};
use crate::error::{Error, Result};
use crate::logger::log;

/// Inbound protocol engine for one listener.
///
/// The credential table and the remote authenticator are shared across all
/// connections of the instance; everything else is per-connection state owned
/// by the task that accepted the stream.
pub struct Service<U: UserIdent> {
    store: UserStore<U>,
    remote_auth: Option<RemoteAuthenticator>,
    handler: Arc<dyn InboundHandler<U>>,
    fallback: Option<Arc<dyn FallbackHandler<U>>>,
    shutdown: CancellationToken,
}

impl<U: UserIdent> Service<U> {
    pub fn builder() -> ServiceBuilder<U> {
        ServiceBuilder::new()
    }

    /// Replace the credential table from paired identity/password lists.
    /// Called on configuration reload; all-or-nothing.
    pub fn update_users(&self, users: Vec<U>, passwords: Vec<String>) -> std::result::Result<(), StoreError> {
        self.store.replace(users, passwords)
    }

    /// The live credential table.
    pub fn store(&self) -> &UserStore<U> {
        &self.store
    }

    /// Run the handshake on a freshly accepted connection and dispatch it.
    ///
    /// `on_close` is forwarded to whichever handler ends up owning the
    /// session. The handshake aborts with [`Error::Shutdown`] if the engine's
    /// cancellation token fires while it is still in flight; once a session
    /// is dispatched it belongs to the handler and is no longer raced against
    /// the token, so `on_close` keeps its exactly-once contract.
    pub async fn handle_connection<S>(
        &self,
        stream: S,
        source: SocketAddr,
        on_close: CloseCallback,
    ) -> Result<()>
    where
        S: AsyncStream + 'static,
    {
        let classified = tokio::select! {
            result = self.handshake(stream, source) => result?,
            _ = self.shutdown.cancelled() => return Err(Error::Shutdown),
        };

        match classified {
            Classified::Session {
                user,
                command,
                destination,
                stream,
            } => {
                let meta = SessionMeta::authenticated(user, source, destination, command);
                match command {
                    Command::Tcp => self.handler.handle_tcp(meta, stream, on_close).await,
                    Command::UdpAssociate => {
                        self.handler
                            .handle_packet(meta, PacketStream::new(stream), on_close)
                            .await
                    }
                    Command::Mux => self.handler.handle_mux(meta, stream, on_close).await,
                }
            }
            Classified::Diverted { stream } => {
                // presence checked before classifying as diverted
                if let Some(fallback) = &self.fallback {
                    fallback
                        .handle_fallback(SessionMeta::unauthenticated(source), stream, on_close)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn handshake<S>(&self, mut stream: S, source: SocketAddr) -> Result<Classified<U>>
    where
        S: AsyncStream + 'static,
    {
        let peer = source.to_string();

        // A short or failed read here is a transport problem, not a protocol
        // rejection; the fallback path is not consulted.
        let mut key: CredentialKey = [0u8; KEY_LENGTH];
        stream.read_exact(&mut key).await?;

        let user = match &self.remote_auth {
            Some(remote) => {
                // The remote service is authoritative once configured: a
                // negative or failed answer terminates the attempt.
                let credential = hex::encode(key);
                let Some(id) = remote.authenticate(&credential, &peer).await else {
                    log::authentication(&peer, false);
                    return Err(Error::RemoteAuth("authentication service rejected credential"));
                };
                let Some(user) = U::from_remote(&id) else {
                    return Err(Error::RemoteAuth("unusable identity from authentication service"));
                };
                // memoize so the next connection holding this key resolves
                // locally without a round trip
                self.store.insert(user.clone(), key);
                user
            }
            None => match self.store.lookup_by_key(&key) {
                Some(user) => user,
                None => {
                    if self.fallback.is_none() {
                        log::rejection(&peer, "credential not recognized, fallback disabled");
                        return Err(Error::FallbackDisabled);
                    }
                    log::rejection(&peer, "credential not recognized");
                    // replay the consumed bytes so the fallback handler sees
                    // the stream from byte zero
                    let replay = ReplayStream::new(stream, Bytes::copy_from_slice(&key));
                    return Ok(Classified::Diverted {
                        stream: Box::pin(replay),
                    });
                }
            },
        };

        log::authentication(&peer, true);

        skip_reserved(&mut stream).await?;

        let command = Command::try_from(stream.read_u8().await?).map_err(Error::Malformed)?;

        let destination = Address::read_from(&mut stream).await?;
        skip_reserved(&mut stream).await?;

        log::debug!(
            peer = %peer,
            user = ?user,
            command = %command,
            destination = %destination,
            "session established"
        );

        Ok(Classified::Session {
            user,
            command,
            destination,
            stream: Box::pin(stream),
        })
    }
}

/// Outcome of a completed handshake, ready for dispatch.
enum Classified<U> {
    /// Authenticated and parsed.
    Session {
        user: U,
        command: Command,
        destination: Address,
        stream: TransportStream,
    },
    /// Rejected; the consumed header bytes are already replayed in front of
    /// the stream.
    Diverted { stream: TransportStream },
}

async fn skip_reserved<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut pad = [0u8; 2];
    reader.read_exact(&mut pad).await?;
    Ok(())
}

/// Builder for constructing a [`Service`].
pub struct ServiceBuilder<U: UserIdent> {
    handler: Option<Arc<dyn InboundHandler<U>>>,
    fallback: Option<Arc<dyn FallbackHandler<U>>>,
    remote_auth: Option<RemoteAuthenticator>,
    shutdown: Option<CancellationToken>,
}

impl<U: UserIdent> ServiceBuilder<U> {
    pub fn new() -> Self {
        Self {
            handler: None,
            fallback: None,
            remote_auth: None,
            shutdown: None,
        }
    }

    /// Set the downstream handler for authenticated sessions (required).
    pub fn handler(mut self, handler: Arc<dyn InboundHandler<U>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Install a fallback handler for rejected connections. Without one, a
    /// rejection becomes a hard connection error.
    pub fn fallback(mut self, fallback: Arc<dyn FallbackHandler<U>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Route authentication through a remote service instead of the local
    /// table. Authoritative once set.
    pub fn remote_auth(mut self, remote: RemoteAuthenticator) -> Self {
        self.remote_auth = Some(remote);
        self
    }

    /// Token that aborts in-flight handshakes on engine shutdown.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the service with an empty credential table.
    ///
    /// Panics if the inbound handler is not set.
    pub fn build(self) -> Service<U> {
        Service {
            store: UserStore::new(),
            remote_auth: self.remote_auth,
            handler: self.handler.expect("inbound handler is required"),
            fallback: self.fallback,
            shutdown: self.shutdown.unwrap_or_default(),
        }
    }
}

impl<U: UserIdent> Default for ServiceBuilder<U> {
    fn default() -> Self {
        Self::new()
    }
}
