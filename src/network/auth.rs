//! Credential Check
//!
//! Turns account-service tokens into opaque account ids. The duel server
//! never issues tokens. Keys are parsed once at startup; a server without a
//! key treats every player as anonymous.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Domain prefix hashed in front of the subject.
const ACCOUNT_ID_DOMAIN: &[u8] = b"hit-duel-account:";

/// Default clock skew tolerated on `exp`.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Key used to verify token signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyingKey {
    /// HS256 shared secret.
    Secret(String),
    /// RS256 public key, PEM encoded.
    RsaPem(String),
}

/// Credential-check settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    /// Verifying key. `None` disables the check.
    pub key: Option<VerifyingKey>,
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// Seconds of clock skew tolerated on `exp`.
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key: None,
            issuer: None,
            audience: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }
}

impl AuthConfig {
    /// Read `DUEL_AUTH_*` variables. A PEM key wins over a shared secret;
    /// empty variables count as unset.
    pub fn from_env() -> Result<Self, AuthError> {
        let key = non_empty_var("DUEL_AUTH_PUBLIC_KEY_PEM")
            .map(VerifyingKey::RsaPem)
            .or_else(|| non_empty_var("DUEL_AUTH_SECRET").map(VerifyingKey::Secret));

        let leeway_secs = match non_empty_var("DUEL_AUTH_LEEWAY_SECS") {
            Some(raw) => raw
                .parse()
                .map_err(|e| AuthError::Misconfigured(format!("DUEL_AUTH_LEEWAY_SECS: {}", e)))?,
            None => DEFAULT_LEEWAY_SECS,
        };

        Ok(Self {
            key,
            issuer: non_empty_var("DUEL_AUTH_ISSUER"),
            audience: non_empty_var("DUEL_AUTH_AUDIENCE"),
            leeway_secs,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Claims read from an account-service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClaims {
    /// Account-service user id.
    #[serde(default)]
    pub sub: String,
    /// Expiry, Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl AccountClaims {
    /// Stable opaque account id: first 16 bytes of a domain-tagged SHA-256
    /// of the subject, hex encoded.
    pub fn account_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ACCOUNT_ID_DOMAIN);
        hasher.update(self.sub.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// `exp` is in the past.
    #[error("token expired")]
    Expired,
    /// Signature does not match the configured key.
    #[error("bad token signature")]
    BadSignature,
    /// `iss` differs from the configured issuer.
    #[error("unexpected issuer")]
    WrongIssuer,
    /// `aud` differs from the configured audience.
    #[error("unexpected audience")]
    WrongAudience,
    /// Not a decodable JWT.
    #[error("malformed token")]
    Malformed,
    /// `sub` absent or empty.
    #[error("token has no subject")]
    MissingSubject,
    /// Key or settings unusable.
    #[error("credential check misconfigured: {0}")]
    Misconfigured(String),
    /// Any other rejection.
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::BadSignature,
            ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
            ErrorKind::InvalidAudience => AuthError::WrongAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => AuthError::MissingSubject,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed
            }
            _ => AuthError::Rejected(err.to_string()),
        }
    }
}

/// Credential-check collaborator: token in, opaque account id out.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    /// Verify a token and return the account id it belongs to.
    async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// [`CredentialCheck`] backed by local JWT verification.
#[derive(Clone)]
pub struct JwtCredentialCheck {
    key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialCheck {
    /// Build the check from settings. `Ok(None)` when no key is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>, AuthError> {
        let (key, algorithm) = match &config.key {
            None => return Ok(None),
            Some(VerifyingKey::Secret(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            Some(VerifyingKey::RsaPem(pem)) => {
                let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::Misconfigured(format!("public key: {}", e)))?;
                (key, Algorithm::RS256)
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["sub"]);
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Some(Self { key, validation }))
    }
}

#[async_trait]
impl CredentialCheck for JwtCredentialCheck {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let claims = decode::<AccountClaims>(token, &self.key, &self.validation)?.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }

        // `exp` is optional, so it is checked here rather than required above
        if let Some(exp) = claims.exp {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            if exp.saturating_add(self.validation.leeway) < now {
                return Err(AuthError::Expired);
            }
        }

        Ok(claims.account_id())
    }
}

impl std::fmt::Debug for JwtCredentialCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCredentialCheck")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
