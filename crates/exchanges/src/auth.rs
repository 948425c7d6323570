//! API credentials and HMAC-SHA256 request signing

use crate::errors::{ExchangeError, Result};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// API key pair
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read a key pair from two environment variables
    pub fn from_env(key_var: &str, secret_var: &str) -> Result<Self> {
        let api_key = std::env::var(key_var)
            .map_err(|_| ExchangeError::MissingCredentials(key_var.to_string()))?;
        let secret_key = std::env::var(secret_var)
            .map_err(|_| ExchangeError::MissingCredentials(secret_var.to_string()))?;
        Ok(Self::new(api_key, secret_key))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Hex-encoded HMAC-SHA256 of `payload` keyed by the secret
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::SigningError(format!("HMAC setup failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

// Never print the secret
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// `k=v&k=v` in the given order, values percent-encoded
pub fn build_query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
