//! Authentication: the local credential table and the remote auth service
//! client the handshake consults when an endpoint is configured.

mod remote;
mod store;

pub use remote::{RemoteAuthenticator, AUTH_TIMEOUT};
pub use store::{Snapshot, StoreError, UserStore};
