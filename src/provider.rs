//! OpenID Provider abstraction: token requests, discovery, and key fetching.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::jwk::{Jwk, JwkSet};

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Raw ID token bytes in a zeroizing buffer.
///
/// Move-only: the buffer has exactly one owner between the OP response and
/// its consumption into a PK Token, and is wiped on drop on every exit
/// path, including errors.
pub struct IdToken(Zeroizing<Vec<u8>>);

impl IdToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for IdToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdToken([redacted])")
    }
}

/// An OpenID Provider capable of issuing ID tokens with a commitment baked
/// into one of its payload claims.
#[async_trait]
pub trait OpenIdProvider: Send + Sync {
    /// The expected `iss` claim value.
    fn issuer(&self) -> &str;

    /// The payload claim carrying the CIC commitment (`nonce` or `aud`).
    fn commitment_claim(&self) -> &str;

    /// Run the OIDC flow, binding `commitment` into the commitment claim.
    async fn request_tokens(
        &self,
        cancel: &CancellationToken,
        commitment: &str,
    ) -> Result<IdToken>;

    /// Register a channel whose received URIs are issued as the final
    /// redirect of the OIDC callback response.
    ///
    /// Only browser-capable providers implement this; the default fails
    /// closed, which the client treats as "no cosigner support".
    fn hook_http_session(&self, _redirects: mpsc::Receiver<String>) -> Result<()> {
        Err(Error::ProviderUnsupportedCapability("HTTP session hook"))
    }
}

/// The OIDC discovery document, reduced to the members this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
}

/// Fetch `{issuer}/.well-known/openid-configuration`.
///
/// The advertised issuer must match the configured one (modulo a trailing
/// slash), otherwise the discovery response is rejected.
pub async fn discover(
    http: &reqwest::Client,
    cancel: &CancellationToken,
    issuer: &str,
) -> Result<OidcDiscovery> {
    let issuer = issuer.trim_end_matches('/');
    let url = format!("{issuer}/.well-known/openid-configuration");
    let discovery: OidcDiscovery = get_json(http, cancel, &url).await?;

    if discovery.issuer.trim_end_matches('/') != issuer {
        return Err(Error::IssuerMismatch {
            expected: issuer.to_string(),
            actual: discovery.issuer.clone(),
        });
    }
    Ok(discovery)
}

/// Fetch a JWKS document.
pub async fn fetch_jwks(
    http: &reqwest::Client,
    cancel: &CancellationToken,
    jwks_uri: &str,
) -> Result<JwkSet> {
    get_json(http, cancel, jwks_uri).await
}

async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    cancel: &CancellationToken,
    url: &str,
) -> Result<T> {
    let request = async {
        let response = http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} fetching {url}",
                response.status()
            )));
        }
        response.json::<T>().await.map_err(Error::from)
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = request => result,
    }
}

/// A source of public keys addressed by `kid`.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key(&self, cancel: &CancellationToken, kid: &str) -> Result<Jwk>;
}

struct CachedKey {
    key: Jwk,
    fetched_at: Instant,
}

/// Concurrency-safe JWKS cache with TTL and per-kid eviction.
pub struct JwksCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedKey>>,
}

impl JwksCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an unexpired key.
    pub fn get(&self, kid: &str) -> Option<Jwk> {
        let entries = self.entries.read().unwrap();
        entries
            .get(kid)
            .filter(|cached| cached.fetched_at.elapsed() <= self.ttl)
            .map(|cached| cached.key.clone())
    }

    pub fn insert(&self, kid: String, key: Jwk) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            kid,
            CachedKey {
                key,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop a key by `kid`. Returns whether an entry was present.
    pub fn evict(&self, kid: &str) -> bool {
        self.entries.write().unwrap().remove(kid).is_some()
    }
}

/// Key source backed by OIDC discovery, with a shared JWKS cache.
pub struct RemoteKeySource {
    issuer: String,
    http: reqwest::Client,
    cache: JwksCache,
    required_alg: Option<String>,
}

impl RemoteKeySource {
    pub fn new(issuer: &str) -> Self {
        Self::with_cache_ttl(issuer, DEFAULT_CACHE_TTL_SECS)
    }

    pub fn with_cache_ttl(issuer: &str, ttl_secs: u64) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            cache: JwksCache::new(Duration::from_secs(ttl_secs)),
            required_alg: None,
        }
    }

    /// Reject JWKS entries advertising a different `alg`. OP key sources
    /// set this to `RS256`.
    pub fn require_alg(mut self, alg: &str) -> Self {
        self.required_alg = Some(alg.to_string());
        self
    }

    async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let discovery = discover(&self.http, cancel, &self.issuer).await?;
        let jwks = fetch_jwks(&self.http, cancel, &discovery.jwks_uri).await?;

        tracing::debug!(issuer = %self.issuer, keys = jwks.keys.len(), "refreshed JWKS");

        for entry in jwks.keys {
            let Some(kid) = entry.kid else { continue };
            if let (Some(required), Some(advertised)) = (&self.required_alg, &entry.alg) {
                if advertised != required {
                    continue;
                }
            }
            self.cache.insert(kid, entry.key);
        }
        Ok(())
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    async fn fetch_key(&self, cancel: &CancellationToken, kid: &str) -> Result<Jwk> {
        if let Some(key) = self.cache.get(kid) {
            return Ok(key);
        }

        self.refresh(cancel).await?;

        self.cache
            .get(kid)
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }
}

/// Fixed key source for tests and pre-distributed cosigner keys.
pub struct StaticKeySource {
    keys: HashMap<String, Jwk>,
}

impl StaticKeySource {
    pub fn new(keys: impl IntoIterator<Item = (String, Jwk)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_key(&self, _cancel: &CancellationToken, kid: &str) -> Result<Jwk> {
        self.keys
            .get(kid)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }
}
