//! Bearer token verification shared by the gateway and the realtime relay.
//! Tokens carry the user id in `sub`.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct JwtAuth {
    secret: String,
    audience: Option<String>,
    issuer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Token from an `Authorization` header value.
pub fn bearer(value: &str) -> Option<&str> {
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

impl JwtAuth {
    pub fn new(
        secret: impl Into<String>,
        audience: Option<String>,
        issuer: Option<String>,
    ) -> Self {
        Self { secret: secret.into(), audience, issuer }
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut v = Validation::default();
        v.validate_aud = self.audience.is_some();
        if let Some(aud) = &self.audience {
            v.set_audience(&[aud]);
        }
        if let Some(iss) = &self.issuer {
            v.set_issuer(&[iss]);
        }
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<Claims>(token, &key, &v)?;
        Ok(data.claims)
    }

    /// Verified, non-blank user id.
    pub fn subject(&self, token: &str) -> anyhow::Result<String> {
        let claims = self.verify(token)?;
        let sub = claims.sub.trim();
        anyhow::ensure!(!sub.is_empty(), "token has no subject");
        Ok(sub.to_string())
    }

    /// Signs a token for `sub` with this verifier's audience and issuer.
    /// The auth service owns issuing in production; this serves local
    /// tooling and tests.
    pub fn issue(&self, sub: &str, ttl_secs: u64) -> anyhow::Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = Claims {
            sub: sub.to_string(),
            exp: usize::try_from(now + ttl_secs)?,
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
        };
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        Ok(encode(&Header::default(), &claims, &key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_subject() {
        let auth = JwtAuth::new("s3cret", None, None);
        let token = auth.issue("user-42", 3600).unwrap();
        assert_eq!(auth.subject(&token).unwrap(), "user-42");
    }

    #[test]
    fn wrong_secret_fails() {
        let auth = JwtAuth::new("s3cret", None, None);
        let token = JwtAuth::new("other", None, None).issue("user-42", 3600).unwrap();
        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let strict = JwtAuth::new("s3cret", Some("forecast".into()), None);
        let loose = JwtAuth::new("s3cret", None, None);
        assert!(strict.verify(&loose.issue("u1", 60).unwrap()).is_err());
        assert!(strict.verify(&strict.issue("u1", 60).unwrap()).is_ok());
    }

    #[test]
    fn blank_subject_is_refused() {
        let auth = JwtAuth::new("s3cret", None, None);
        assert!(auth.subject(&auth.issue("  ", 60).unwrap()).is_err());
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer("Basic abc"), None);
        assert_eq!(bearer("Bearer   "), None);
        assert_eq!(bearer("Bearer  tok.en "), Some("tok.en"));
    }
}
