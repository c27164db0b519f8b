//! CSRF token issuing and verification
//!
//! Tokens have the form `nonce.expires_ms.signature`, where the signature is
//! an HMAC-SHA256 over `session|nonce|expires_ms`. Only the most recently
//! issued token of a session is accepted.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use moka::future::Cache;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::CsrfConfig;
use crate::events::RiskLevel;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 16;

/// CSRF verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("CSRF token is missing")]
    MissingToken,

    #[error("No session is associated with the request")]
    MissingSession,

    #[error("CSRF token is malformed")]
    Malformed,

    #[error("CSRF token signature is invalid")]
    InvalidSignature,

    #[error("CSRF token has expired")]
    Expired,

    #[error("CSRF token does not match the session")]
    Mismatch,
}

impl CsrfError {
    /// Risk level recorded for this failure
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            CsrfError::Expired => RiskLevel::Low,
            CsrfError::MissingToken | CsrfError::MissingSession | CsrfError::Malformed => {
                RiskLevel::Medium
            }
            CsrfError::InvalidSignature | CsrfError::Mismatch => RiskLevel::High,
        }
    }
}

/// An issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsrfToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Per-session CSRF protection
pub struct CsrfProtection {
    config: CsrfConfig,
    secret: Secret<String>,
    tokens: Cache<String, String>,
}

impl CsrfProtection {
    /// Create protection from config; an empty secret is replaced by a random one
    pub fn new(config: CsrfConfig) -> Self {
        let secret = if config.secret.expose_secret().is_empty() {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            debug!("No CSRF secret configured; generated an ephemeral one");
            Secret::new(hex::encode(bytes))
        } else {
            config.secret.clone()
        };

        let tokens = Cache::builder()
            .max_capacity(config.max_sessions)
            .time_to_live(config.token_ttl())
            .build();

        Self {
            config,
            secret,
            tokens,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn header_name(&self) -> &str {
        &self.config.header_name
    }

    /// Whether requests to `path` skip the token check
    pub fn is_exempt(&self, path: &str) -> bool {
        self.config
            .skip_paths
            .iter()
            .any(|skip| path == skip || path.starts_with(&format!("{}/", skip.trim_end_matches('/'))))
    }

    /// Issue a fresh token for `session_id`, replacing any previous one
    pub async fn generate_token(&self, session_id: &str) -> Result<CsrfToken, CsrfError> {
        self.generate_token_at(session_id, Utc::now()).await
    }

    /// Issue a fresh token as of `now`
    pub async fn generate_token_at(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CsrfToken, CsrfError> {
        if session_id.is_empty() {
            return Err(CsrfError::MissingSession);
        }

        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);

        let expires_ms = now.timestamp_millis() + self.config.token_ttl_secs as i64 * 1000;
        let signature = self.sign(session_id, &nonce, expires_ms)?;
        let token = format!("{}.{}.{}", nonce, expires_ms, signature);

        self.tokens.insert(session_id.to_string(), token.clone()).await;
        debug!("Issued CSRF token for session {}", session_id);

        Ok(CsrfToken {
            token,
            expires_at: Utc
                .timestamp_millis_opt(expires_ms)
                .single()
                .ok_or(CsrfError::Malformed)?,
        })
    }

    /// Verify `token` for `session_id` as of `now`
    pub async fn validate(
        &self,
        session_id: Option<&str>,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CsrfError> {
        let session_id = session_id
            .filter(|s| !s.is_empty())
            .ok_or(CsrfError::MissingSession)?;
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::MissingToken)?;

        let mut parts = token.split('.');
        let (nonce, expires, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(e), Some(s), None) if !n.is_empty() && !s.is_empty() => (n, e, s),
            _ => return Err(CsrfError::Malformed),
        };
        let expires_ms: i64 = expires.parse().map_err(|_| CsrfError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| CsrfError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload(session_id, nonce, expires_ms).as_bytes());
        if mac.verify_slice(&signature).is_err() {
            warn!("CSRF token with invalid signature for session {}", session_id);
            return Err(CsrfError::InvalidSignature);
        }

        if now.timestamp_millis() > expires_ms {
            return Err(CsrfError::Expired);
        }

        match self.tokens.get(session_id).await {
            Some(current) if current == token => Ok(()),
            _ => {
                warn!("Stale or foreign CSRF token for session {}", session_id);
                Err(CsrfError::Mismatch)
            }
        }
    }

    /// Drop the session's token
    pub async fn revoke(&self, session_id: &str) {
        self.tokens.invalidate(session_id).await;
        debug!("Revoked CSRF token for session {}", session_id);
    }

    /// Number of sessions holding a token
    pub fn active_sessions(&self) -> u64 {
        self.tokens.entry_count()
    }

    fn mac(&self) -> Result<HmacSha256, CsrfError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| CsrfError::Malformed)
    }

    fn sign(&self, session_id: &str, nonce: &str, expires_ms: i64) -> Result<String, CsrfError> {
        let mut mac = self.mac()?;
        mac.update(payload(session_id, nonce, expires_ms).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn payload(session_id: &str, nonce: &str, expires_ms: i64) -> String {
    format!("{}|{}|{}", session_id, nonce, expires_ms)
}
