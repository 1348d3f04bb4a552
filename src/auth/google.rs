//! Google ID token verification for the OAuth sign-in path.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity asserted by the provider after a successful check.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The token itself is bad: signature, audience, expiry, shape.
    #[error("{0}")]
    Rejected(String),
    /// The provider's keys could not be fetched.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    email: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

// Older tokens carry "email_verified": "true".
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies RS256 ID tokens against Google's published JWKS.
pub struct GoogleVerifier {
    client_id: Option<String>,
    certs_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl GoogleVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            client_id,
            certs_url: GOOGLE_CERTS_URL.to_string(),
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Verifier with a pre-loaded key set; only misses reach the network.
    #[cfg(test)]
    pub fn with_keys(client_id: &str, keys: JwkSet) -> Self {
        let verifier = Self::new(Some(client_id.to_string()));
        Self {
            cache: RwLock::new(Some(CachedKeys {
                keys,
                fetched_at: Instant::now(),
            })),
            ..verifier
        }
    }

    async fn fetch_keys(&self) -> anyhow::Result<JwkSet> {
        let keys = self
            .http
            .get(&self.certs_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;
        debug!(count = keys.keys.len(), "google jwks fetched");
        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| IdentityError::Rejected(e.to_string()));
                    }
                }
            }
        }

        // Stale cache or rotated keys: refetch once.
        let keys = self.fetch_keys().await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| IdentityError::Rejected(e.to_string()))?;
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| IdentityError::Rejected("unknown signing key".into()))
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let Some(client_id) = self.client_id.as_deref() else {
            warn!("google sign-in attempted without GOOGLE_CLIENT_ID");
            return Err(IdentityError::Rejected("google sign-in is not configured".into()));
        };

        let header =
            decode_header(id_token).map_err(|e| IdentityError::Rejected(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::Rejected("missing key id".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(std::slice::from_ref(&client_id));
        validation.set_issuer(&GOOGLE_ISSUERS[..]);
        let claims = decode::<GoogleClaims>(id_token, &key, &validation)
            .map_err(|e| IdentityError::Rejected(e.to_string()))?
            .claims;

        let email = claims
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::Rejected("token carries no email".into()))?;

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email,
            email_verified: claims.email_verified,
            name: claims.name,
            picture: claims.picture,
        })
    }
}
