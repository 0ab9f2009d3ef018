//! Channel credentials: minting, verification and client-side fetching.
//!
//! The server holds the master signing secret and hands clients short-lived,
//! channel-scoped tokens instead. A token is
//! `base64url(claims JSON) "." base64url(HMAC-SHA256(secret, claims part))`,
//! so the realtime endpoint can check it without any shared state.
//!
//! # Identity
//!
//! Every credential is issued to one logical client role (default
//! `notifications-client`). There is no per-user scoping; each credential
//! still carries a random nonce so two viewers never hold identical tokens.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::config::Config;
use crate::constants::{CREDENTIAL_FETCH_TIMEOUT, CREDENTIAL_PATH};

type HmacSha256 = Hmac<Sha256>;

/// A short-lived token authorizing one client to join the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Opaque signed token presented to the realtime endpoint.
    pub token: String,
    /// Client identity the token was issued to.
    pub client_id: String,
    /// Issue time, epoch milliseconds.
    pub issued_at: i64,
    /// Expiry time, epoch milliseconds.
    pub expires_at: i64,
}

impl Credential {
    /// Whether the credential is no longer usable at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Claims carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Client identity.
    pub client_id: String,
    /// Channels the holder may subscribe to.
    pub channels: Vec<String>,
    /// Issue time, epoch milliseconds.
    pub issued_at: i64,
    /// Expiry time, epoch milliseconds.
    pub expires_at: i64,
    /// Random per-credential value.
    pub nonce: String,
}

impl TokenClaims {
    /// Whether these claims allow subscribing to `channel`.
    pub fn allows(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

/// Errors from issuing, verifying or fetching credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The signing secret is not configured.
    ConfigMissing,
    /// Signing failed.
    Signing(String),
    /// Token is malformed or its signature does not match.
    InvalidToken(String),
    /// Token was valid but has expired.
    Expired,
    /// Fetching a credential from the server failed.
    Fetch(String),
    /// Fetching a credential took too long.
    Timeout,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMissing => write!(f, "Channel signing key not configured"),
            Self::Signing(msg) => write!(f, "Failed to sign credential: {msg}"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {msg}"),
            Self::Expired => write!(f, "Token expired"),
            Self::Fetch(msg) => write!(f, "Credential fetch failed: {msg}"),
            Self::Timeout => write!(f, "Credential fetch timed out"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Mints and verifies channel credentials.
///
/// Cheap to clone; the server shares one instance across handlers.
#[derive(Clone)]
pub struct ChannelAuthBroker {
    signing_key: Option<Vec<u8>>,
    client_role: String,
    channels: Vec<String>,
    ttl: Duration,
}

impl std::fmt::Debug for ChannelAuthBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAuthBroker")
            .field("configured", &self.signing_key.is_some())
            .field("client_role", &self.client_role)
            .field("channels", &self.channels)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ChannelAuthBroker {
    /// Create a broker. `signing_key = None` makes every issue fail closed.
    pub fn new(
        signing_key: Option<String>,
        client_role: impl Into<String>,
        channels: Vec<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            signing_key: signing_key.map(String::into_bytes),
            client_role: client_role.into(),
            channels,
            ttl,
        }
    }

    /// Build a broker from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.signing_key.clone(),
            config.client_role.clone(),
            vec![config.channel.clone()],
            config.credential_ttl(),
        )
    }

    /// Whether a signing secret is present.
    pub fn is_configured(&self) -> bool {
        self.signing_key.is_some()
    }

    /// The fixed client role credentials are issued to.
    pub fn client_role(&self) -> &str {
        &self.client_role
    }

    /// Issue a credential for `identity`, valid from now for the configured TTL.
    pub fn issue_credential(&self, identity: &str) -> Result<Credential, AuthError> {
        self.issue_credential_at(identity, crate::now_millis())
    }

    /// Issue a credential as if the current time were `now_ms`.
    pub fn issue_credential_at(&self, identity: &str, now_ms: i64) -> Result<Credential, AuthError> {
        let key = self.signing_key.as_deref().ok_or(AuthError::ConfigMissing)?;

        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let claims = TokenClaims {
            client_id: identity.to_string(),
            channels: self.channels.clone(),
            issued_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        };

        let claims_json =
            serde_json::to_vec(&claims).map_err(|e| AuthError::Signing(e.to_string()))?;
        let claims_part = URL_SAFE_NO_PAD.encode(claims_json);
        let signature = sign(key, claims_part.as_bytes())?;

        log::debug!(
            "Issued credential for {} (expires in {}s)",
            identity,
            self.ttl.as_secs()
        );

        Ok(Credential {
            token: format!("{claims_part}.{}", URL_SAFE_NO_PAD.encode(signature)),
            client_id: claims.client_id,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        })
    }

    /// Verify a token's signature and expiry, returning its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, crate::now_millis())
    }

    /// Verify a token as if the current time were `now_ms`.
    pub fn verify_at(&self, token: &str, now_ms: i64) -> Result<TokenClaims, AuthError> {
        let key = self.signing_key.as_deref().ok_or(AuthError::ConfigMissing)?;

        let (claims_part, sig_part) = token
            .split_once('.')
            .ok_or_else(|| AuthError::InvalidToken("missing signature".into()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|e| AuthError::InvalidToken(format!("signature encoding: {e}")))?;

        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|e| AuthError::Signing(e.to_string()))?;
        mac.update(claims_part.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|e| AuthError::InvalidToken(format!("signature mismatch: {e}")))?;

        let claims_json = URL_SAFE_NO_PAD
            .decode(claims_part)
            .map_err(|e| AuthError::InvalidToken(format!("claims encoding: {e}")))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json)
            .map_err(|e| AuthError::InvalidToken(format!("claims: {e}")))?;

        if now_ms >= claims.expires_at {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn sign(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AuthError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Anything that can hand a session a fresh credential.
#[async_trait]
pub trait CredentialSource: Send + Sync + std::fmt::Debug {
    /// Obtain a credential for this client.
    async fn fetch(&self) -> Result<Credential, AuthError>;
}

#[async_trait]
impl CredentialSource for ChannelAuthBroker {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        self.issue_credential(&self.client_role)
    }
}

/// Error body returned by the credential endpoint.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Fetches credentials from a formcast server's credential endpoint.
#[derive(Debug, Clone)]
pub struct HttpCredentialSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialSource {
    /// Create a source for `server_url` (without the endpoint path).
    pub fn new(server_url: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(CREDENTIAL_FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Fetch(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}{}", server_url.trim_end_matches('/'), CREDENTIAL_PATH),
        })
    }

    /// The full endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout
            } else {
                AuthError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| "no error detail".to_string());
            return Err(AuthError::Fetch(format!("HTTP {status}: {detail}")));
        }

        response
            .json::<Credential>()
            .await
            .map_err(|e| AuthError::Fetch(format!("invalid credential body: {e}")))
    }
}
