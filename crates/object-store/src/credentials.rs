//! Upload-token signing.
//!
//! A token is `access_key:sign:policy` where `policy` is the URL-safe base64
//! of a JSON put policy and `sign` is the URL-safe base64 HMAC-SHA1 of that
//! encoded policy under the secret key.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;

use crate::StoreError;

type HmacSha1 = Hmac<Sha1>;

/// Put policy embedded in an upload token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutPolicy {
    /// Target bucket (optionally `bucket:key`).
    pub scope: String,
    /// Unix seconds after which the token is rejected.
    pub deadline: i64,
}

/// Access/secret key pair.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Signs `data`, returning `access_key:urlsafe_b64(hmac_sha1(secret, data))`.
    pub fn sign(&self, data: &[u8]) -> Result<String, StoreError> {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| StoreError::InvalidCredentials(e.to_string()))?;
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        Ok(format!("{}:{}", self.access_key, URL_SAFE.encode(digest)))
    }

    /// Builds an upload token for `policy`.
    pub fn upload_token(&self, policy: &PutPolicy) -> Result<String, StoreError> {
        let encoded = URL_SAFE.encode(serde_json::to_vec(policy)?);
        let signed = self.sign(encoded.as_bytes())?;
        Ok(format!("{signed}:{encoded}"))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_three_parts() {
        let creds = Credentials::new("ak", "sk");
        let policy = PutPolicy {
            scope: "bucket".into(),
            deadline: 1_700_000_000,
        };
        let token = creds.upload_token(&policy).unwrap();
        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ak");

        let policy_json = URL_SAFE.decode(parts[2]).unwrap();
        assert_eq!(
            String::from_utf8(policy_json).unwrap(),
            r#"{"scope":"bucket","deadline":1700000000}"#
        );
    }

    #[test]
    fn signature_is_hmac_sha1_of_encoded_policy() {
        let creds = Credentials::new("ak", "sk");
        let policy = PutPolicy {
            scope: "b".into(),
            deadline: 1,
        };
        let token = creds.upload_token(&policy).unwrap();
        let (signed, encoded) = token.rsplit_once(':').unwrap();

        let mut mac = HmacSha1::new_from_slice(b"sk").unwrap();
        mac.update(encoded.as_bytes());
        let expected = URL_SAFE.encode(mac.finalize().into_bytes());
        assert_eq!(signed, format!("ak:{expected}"));
    }

    #[test]
    fn different_secrets_sign_differently() {
        let a = Credentials::new("ak", "one").sign(b"data").unwrap();
        let b = Credentials::new("ak", "two").sign(b"data").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_redacts_secret() {
        let out = format!("{:?}", Credentials::new("ak", "very-secret"));
        assert!(out.contains("ak"));
        assert!(!out.contains("very-secret"));
    }
}
