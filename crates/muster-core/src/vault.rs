use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience marker baked into every agent bearer token. Tokens minted for
/// any other purpose (e.g. an admin session) carry a different audience and
/// must be rejected here even when the signature is valid.
pub const AGENT_AUDIENCE: &str = "muster-agent";
pub const ISSUER: &str = "muster";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentClaims {
    /// Internal device id, stringified.
    pub sub: String,
    /// Externally visible device UUID.
    pub did: Uuid,
    pub host: String,
    pub aud: String,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
}

impl AgentClaims {
    pub fn device_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("wrong token audience")]
    WrongAudience,
    #[error("token encoding failed")]
    Encoding,
}

/// Raw token plus the hash the registry stores. The raw token leaves this
/// struct exactly once, in the enrollment response.
pub struct IssuedToken {
    pub token: String,
    pub token_hash: String,
}

/// One-way hash used to match presented tokens against stored credentials.
/// Hashes are compared, never raw tokens.
pub fn token_hash(raw: &str) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Redacted form safe for logs: fixed-length prefix/suffix plus length.
/// Never log a raw token.
pub fn fingerprint(raw: &str) -> String {
    if raw.len() < 16 || !raw.is_ascii() {
        return format!("(redacted len={})", raw.len());
    }
    format!("{}..{} len={}", &raw[..6], &raw[raw.len() - 4..], raw.len())
}

#[derive(Clone)]
pub struct TokenVault {
    secret: Vec<u8>,
    ttl: chrono::Duration,
}

impl TokenVault {
    pub fn new(secret: Vec<u8>, ttl: chrono::Duration) -> Self {
        Self { secret, ttl }
    }

    /// Mints a time-bounded HS256 bearer token binding the device identity
    /// triple, and the hash under which it will be stored.
    pub fn issue(
        &self,
        device_id: i64,
        external_id: Uuid,
        hostname: &str,
    ) -> Result<IssuedToken, VaultError> {
        let now = Utc::now();
        let claims = AgentClaims {
            sub: device_id.to_string(),
            did: external_id,
            host: hostname.to_string(),
            aud: AGENT_AUDIENCE.to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|_| VaultError::Encoding)?;
        let token_hash = token_hash(&token);

        Ok(IssuedToken { token, token_hash })
    }

    /// Pure cryptographic check: signature, expiry, audience, issuer.
    /// No I/O; the registry match happens in the gateway afterwards.
    pub fn verify(&self, token: &str) -> Result<AgentClaims, VaultError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AGENT_AUDIENCE]);
        validation.set_issuer(&[ISSUER]);

        let data = decode::<AgentClaims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => VaultError::Expired,
            ErrorKind::InvalidAudience => VaultError::WrongAudience,
            _ => VaultError::Malformed,
        })?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> TokenVault {
        TokenVault::new(b"test-secret".to_vec(), chrono::Duration::days(1))
    }

    #[test]
    fn issue_then_verify_roundtrips_claims() {
        let v = vault();
        let did = Uuid::new_v4();
        let issued = v.issue(42, did, "host-01").unwrap();

        let claims = v.verify(&issued.token).unwrap();
        assert_eq!(claims.device_id(), Some(42));
        assert_eq!(claims.did, did);
        assert_eq!(claims.host, "host-01");
        assert_eq!(claims.aud, AGENT_AUDIENCE);
    }

    #[test]
    fn hash_is_deterministic_and_not_the_token() {
        let v = vault();
        let issued = v.issue(1, Uuid::new_v4(), "h").unwrap();
        assert_eq!(issued.token_hash, token_hash(&issued.token));
        assert_ne!(issued.token_hash, issued.token);
        assert_eq!(issued.token_hash.len(), 64);
    }

    #[test]
    fn expired_token_is_distinguishable() {
        // Negative ttl well past jsonwebtoken's default leeway.
        let v = TokenVault::new(b"test-secret".to_vec(), chrono::Duration::days(-2));
        let issued = v.issue(1, Uuid::new_v4(), "h").unwrap();
        assert_eq!(v.verify(&issued.token), Err(VaultError::Expired));
    }

    #[test]
    fn wrong_audience_is_rejected_even_when_validly_signed() {
        let v = vault();
        let now = Utc::now();
        let claims = AgentClaims {
            sub: "1".to_string(),
            did: Uuid::new_v4(),
            host: "h".to_string(),
            aud: "muster-web".to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert_eq!(v.verify(&token), Err(VaultError::WrongAudience));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(vault().verify("not-a-token"), Err(VaultError::Malformed));
    }

    #[test]
    fn tampered_signature_is_malformed() {
        let v = vault();
        let other = TokenVault::new(b"other-secret".to_vec(), chrono::Duration::days(1));
        let issued = other.issue(1, Uuid::new_v4(), "h").unwrap();
        assert_eq!(v.verify(&issued.token), Err(VaultError::Malformed));
    }

    #[test]
    fn fingerprint_never_contains_the_full_token() {
        let v = vault();
        let issued = v.issue(1, Uuid::new_v4(), "h").unwrap();
        let fp = fingerprint(&issued.token);
        assert!(!fp.contains(&issued.token));
        assert!(fp.contains("len="));
        assert_eq!(fingerprint("short"), "(redacted len=5)");
    }
}
