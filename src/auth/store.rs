//! Credential table
//!
//! A bidirectional mapping between user identity and credential key, replaced
//! wholesale on configuration reload and consulted on every handshake.
//!
//! The two maps live together in one immutable snapshot behind an `ArcSwap`:
//! readers grab the current snapshot with a single atomic load, so they can
//! never observe the identity→key and key→identity directions disagreeing,
//! no matter how a concurrent replacement interleaves.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::core::{CredentialKey, UserIdent};
use crate::utils::derive_key;

/// Credential table errors, surfaced synchronously from [`UserStore::replace`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("user already exists: {0}")]
    DuplicateUser(String),

    #[error("password already used by {owner}")]
    DuplicatePassword { owner: String },

    #[error("user and password lists differ in length ({users} users, {passwords} passwords)")]
    MismatchedLists { users: usize, passwords: usize },
}

/// Immutable view of the credential table; both directions are guaranteed to
/// be inverses of each other.
#[derive(Debug)]
pub struct Snapshot<U> {
    users: HashMap<U, CredentialKey>,
    keys: HashMap<CredentialKey, U>,
}

impl<U: UserIdent> Snapshot<U> {
    fn empty() -> Self {
        Self {
            users: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn user_of(&self, key: &CredentialKey) -> Option<&U> {
        self.keys.get(key)
    }

    pub fn key_of(&self, user: &U) -> Option<&CredentialKey> {
        self.users.get(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Iterate over (identity, key) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&U, &CredentialKey)> {
        self.users.iter()
    }
}

/// Atomically-replaceable credential table.
pub struct UserStore<U: UserIdent> {
    current: ArcSwap<Snapshot<U>>,
    /// Serializes `replace` and `insert`; lookups never take it.
    write_lock: Mutex<()>,
}

impl<U: UserIdent> UserStore<U> {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            write_lock: Mutex::new(()),
        }
    }

    /// Build a fresh snapshot from paired identity/password lists and swap it
    /// in. All-or-nothing: any duplicate discards the new snapshot and leaves
    /// the previous one active.
    pub fn replace(&self, users: Vec<U>, passwords: Vec<String>) -> Result<(), StoreError> {
        if users.len() != passwords.len() {
            return Err(StoreError::MismatchedLists {
                users: users.len(),
                passwords: passwords.len(),
            });
        }

        let mut user_map: HashMap<U, CredentialKey> = HashMap::with_capacity(users.len());
        let mut key_map: HashMap<CredentialKey, U> = HashMap::with_capacity(users.len());
        for (user, password) in users.into_iter().zip(passwords) {
            if user_map.contains_key(&user) {
                return Err(StoreError::DuplicateUser(format!("{:?}", user)));
            }
            let key = derive_key(&password);
            if let Some(owner) = key_map.get(&key) {
                return Err(StoreError::DuplicatePassword {
                    owner: format!("{:?}", owner),
                });
            }
            user_map.insert(user.clone(), key);
            key_map.insert(key, user);
        }

        let snapshot = Arc::new(Snapshot {
            users: user_map,
            keys: key_map,
        });
        let _guard = self.write_lock.lock().expect("store writer lock poisoned");
        self.current.store(snapshot);
        Ok(())
    }

    /// Add one pair to the live snapshot without replacing the rest.
    ///
    /// This is the trust-on-first-use memoization path: a remotely resolved
    /// identity is recorded so later connections holding the same key resolve
    /// locally. It is a cache-warming side effect, not validation, and an
    /// existing entry for either direction is overwritten.
    pub fn insert(&self, user: U, key: CredentialKey) {
        let _guard = self.write_lock.lock().expect("store writer lock poisoned");
        let live = self.current.load();
        let mut users = live.users.clone();
        let mut keys = live.keys.clone();
        users.insert(user.clone(), key);
        keys.insert(key, user);
        self.current.store(Arc::new(Snapshot { users, keys }));
    }

    /// Resolve an identity from its wire key against the live snapshot.
    pub fn lookup_by_key(&self, key: &CredentialKey) -> Option<U> {
        self.current.load().keys.get(key).cloned()
    }

    /// Reverse lookup: the key a configured identity authenticates with.
    pub fn key_of(&self, user: &U) -> Option<CredentialKey> {
        self.current.load().users.get(user).copied()
    }

    /// Consistent view of both directions of the live table.
    pub fn snapshot(&self) -> Arc<Snapshot<U>> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

impl<U: UserIdent> Default for UserStore<U> {
    fn default() -> Self {
        Self::new()
    }
}
