//! Remote authentication service client
//!
//! When an authentication endpoint is configured it becomes the
//! authoritative identity source: the engine sends the hex-encoded wire
//! credential plus the client address and gets back an identity string.
//!
//! Every failure mode (transport error, timeout, non-2xx status, malformed
//! body, `ok=false`) collapses into a plain "not authenticated" outcome so
//! the handshake can always express the result as a boolean decision.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::logger::log;
use crate::utils::redact;

/// Fixed request timeout for the authentication call, independent of any
/// caller-specified deadline.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    auth: &'a str,
    addr: &'a str,
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    ok: bool,
    #[serde(default)]
    id: String,
}

/// One cached verdict. Identity and timestamp are written together as a
/// single map value, so concurrent readers never see a half-written entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    identity: String,
    issued_at: Instant,
}

struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    expiry: Duration,
}

/// Client for the remote authentication API, with an optional bounded-TTL
/// result cache keyed by the raw credential.
pub struct RemoteAuthenticator {
    endpoint: String,
    client: reqwest::Client,
    cache: Option<ResultCache>,
}

impl RemoteAuthenticator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(AUTH_TIMEOUT)
            .build()
            .expect("http client construction");
        Self {
            endpoint: endpoint.into(),
            client,
            cache: None,
        }
    }

    /// Enable result caching. Entries older than `expiry` are ignored and
    /// lazily overwritten on the next successful call; nothing is ever
    /// proactively evicted, so the cache is bounded by the number of distinct
    /// credentials seen.
    pub fn with_cache(mut self, expiry: Duration) -> Self {
        self.cache = Some(ResultCache {
            entries: DashMap::new(),
            expiry,
        });
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Authenticate a raw credential for a client at `source`.
    ///
    /// Returns the resolved identity, or `None` for every kind of failure.
    pub async fn authenticate(&self, credential: &str, source: &str) -> Option<String> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.entries.get(credential) {
                if entry.issued_at.elapsed() < cache.expiry {
                    log::trace!(
                        auth = redact(credential),
                        user = %entry.identity,
                        "remote auth cache hit"
                    );
                    return Some(entry.identity.clone());
                }
            }
        }

        let identity = self.query(credential, source).await?;

        if let Some(cache) = &self.cache {
            cache.entries.insert(
                credential.to_string(),
                CacheEntry {
                    identity: identity.clone(),
                    issued_at: Instant::now(),
                },
            );
        }
        Some(identity)
    }

    async fn query(&self, credential: &str, source: &str) -> Option<String> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let request = AuthRequest {
            auth: credential,
            addr: source,
            ts,
        };

        log::debug!(auth = redact(credential), addr = source, "remote auth request");

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!(auth = redact(credential), error = %e, "auth api request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            log::warn!(
                auth = redact(credential),
                status = status.as_u16(),
                "auth api returned non-success status"
            );
            return None;
        }

        let body: AuthResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!(auth = redact(credential), error = %e, "auth api response malformed");
                return None;
            }
        };

        if !body.ok {
            log::warn!(auth = redact(credential), addr = source, "auth api denied credential");
            return None;
        }

        log::info!(addr = source, user = %body.id, "auth api accepted credential");
        Some(body.id)
    }
}
